pub mod error;
pub mod pg;
pub mod reconciler;

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

pub use error::CatalogError;
pub use pg::PgCatalog;
pub use reconciler::{CatalogReconciler, ReconcileOptions, Reconciliation};

/// One statement (or introspection query) of a reconciliation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    CheckDatabase,
    CreateDatabase,
    CheckRole,
    CreateRole,
    RotatePassword,
    GrantDatabase,
    GrantTables,
    GrantSchema,
}

impl Step {
    pub fn is_create(self) -> bool {
        matches!(self, Self::CreateDatabase | Self::CreateRole)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CheckDatabase => "database lookup",
            Self::CreateDatabase => "create database",
            Self::CheckRole => "role lookup",
            Self::CreateRole => "create role",
            Self::RotatePassword => "rotate role password",
            Self::GrantDatabase => "grant database privileges",
            Self::GrantTables => "grant table privileges",
            Self::GrantSchema => "grant schema privileges",
        })
    }
}

/// Privilege scopes a service role ends up holding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantScope {
    /// `ALL PRIVILEGES ON DATABASE <db>`
    Database,
    /// `SELECT, INSERT, UPDATE, DELETE ON ALL TABLES IN SCHEMA public`
    AllTablesInSchemaPublic,
    /// `USAGE, CREATE ON SCHEMA public`
    SchemaPublic,
}

/// Opens catalog sessions. `None` targets the administrative database.
#[async_trait]
pub trait CatalogConnector: Send + Sync {
    async fn connect(&self, database: Option<&str>)
    -> Result<Box<dyn CatalogSession>, CatalogError>;
}

/// A single open connection to the catalog.
#[async_trait]
pub trait CatalogSession: Send {
    async fn database_exists(&mut self, name: &str) -> Result<bool, CatalogError>;

    async fn role_exists(&mut self, name: &str) -> Result<bool, CatalogError>;

    /// Run an administrative statement. `subject` names the object it acts
    /// on, for conflict reporting.
    async fn execute(&mut self, step: Step, subject: &str, sql: &str)
    -> Result<(), CatalogError>;

    async fn close(self: Box<Self>) -> Result<(), CatalogError>;
}

/// Quote an identifier for interpolation into DDL (`"x""y"`).
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote a string literal for interpolation into DDL (`'x''y'`).
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
