use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{ConnectOptions, Connection, Executor};

use super::{CatalogConnector, CatalogError, CatalogSession, Step};

/// Postgres-backed catalog reached through a single admin connection string.
#[derive(Debug, Clone)]
pub struct PgCatalog {
    admin: PgConnectOptions,
    admin_database: String,
}

impl PgCatalog {
    pub fn new(admin_url: &str) -> Result<Self, CatalogError> {
        let admin: PgConnectOptions = admin_url.parse().map_err(|source| CatalogError::Connect {
            database: "admin".into(),
            source,
        })?;
        let admin_database = admin.get_database().unwrap_or("postgres").to_owned();
        Ok(Self {
            admin,
            admin_database,
        })
    }
}

#[async_trait]
impl CatalogConnector for PgCatalog {
    #[tracing::instrument(skip(self), err)]
    async fn connect(
        &self,
        database: Option<&str>,
    ) -> Result<Box<dyn CatalogSession>, CatalogError> {
        let target = database.unwrap_or(&self.admin_database);
        let options = self.admin.clone().database(target);

        let conn = options
            .connect()
            .await
            .map_err(|source| CatalogError::Connect {
                database: target.to_owned(),
                source,
            })?;

        tracing::debug!(database = target, "catalog connection opened");
        Ok(Box::new(PgSession {
            conn,
            database: target.to_owned(),
        }))
    }
}

struct PgSession {
    conn: PgConnection,
    database: String,
}

#[async_trait]
impl CatalogSession for PgSession {
    async fn database_exists(&mut self, name: &str) -> Result<bool, CatalogError> {
        let found: Option<i32> =
            sqlx::query_scalar("SELECT 1 FROM pg_database WHERE datname = $1")
                .bind(name)
                .fetch_optional(&mut self.conn)
                .await
                .map_err(|e| CatalogError::from_statement(Step::CheckDatabase, name, e))?;
        Ok(found.is_some())
    }

    async fn role_exists(&mut self, name: &str) -> Result<bool, CatalogError> {
        let found: Option<i32> = sqlx::query_scalar("SELECT 1 FROM pg_roles WHERE rolname = $1")
            .bind(name)
            .fetch_optional(&mut self.conn)
            .await
            .map_err(|e| CatalogError::from_statement(Step::CheckRole, name, e))?;
        Ok(found.is_some())
    }

    // A plain `&str` goes over the simple query protocol: CREATE DATABASE
    // refuses to run inside the implicit transaction of a prepared statement.
    async fn execute(&mut self, step: Step, subject: &str, sql: &str) -> Result<(), CatalogError> {
        Executor::execute(&mut self.conn, sql)
            .await
            .map_err(|e| CatalogError::from_statement(step, subject, e))?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), CatalogError> {
        let PgSession { conn, database } = *self;
        conn.close()
            .await
            .map_err(|source| CatalogError::Connect { database, source })
    }
}
