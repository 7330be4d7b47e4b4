use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::identifier;

use super::{CatalogConnector, CatalogError, GrantScope, Step, quote_ident, quote_literal};

/// Outcome of a reconciliation run. Everything already present is reported
/// as confirmed rather than created.
#[derive(Clone, Serialize)]
pub struct Reconciliation {
    pub database: String,
    pub role: String,
    pub database_created: bool,
    pub role_created: bool,
    /// The existing role was given a fresh password.
    pub password_rotated: bool,
    /// Set when this run created the role or rotated its password. Never
    /// serialized; the caller hands it to the secret store.
    #[serde(skip)]
    pub role_password: Option<String>,
    pub grants: Vec<GrantScope>,
}

impl fmt::Debug for Reconciliation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciliation")
            .field("database", &self.database)
            .field("role", &self.role)
            .field("database_created", &self.database_created)
            .field("role_created", &self.role_created)
            .field("password_rotated", &self.password_rotated)
            .field("role_password", &self.role_password.as_ref().map(|_| "<redacted>"))
            .field("grants", &self.grants)
            .finish()
    }
}

/// Per-run switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileOptions {
    /// Give an existing role a new password. Used when its stored
    /// credentials are missing.
    pub rotate_password: bool,
}

/// Stateless reconciler: every call re-inspects the live catalog.
#[derive(Clone)]
pub struct CatalogReconciler {
    connector: Arc<dyn CatalogConnector>,
}

/// 32 random bytes, hex-encoded. Only ever handed to the secret store.
fn generate_password() -> String {
    let mut bytes = [0u8; 32];
    rand::fill(&mut bytes);
    hex::encode(bytes)
}

impl CatalogReconciler {
    pub fn new(connector: Arc<dyn CatalogConnector>) -> Self {
        Self { connector }
    }

    /// Ensure `<id>_db`, role `<id>` and its grants exist for `raw_service_name`.
    ///
    /// Safe to re-run. A failing statement aborts the remaining steps and
    /// leaves earlier ones applied; the next run picks up from there.
    pub async fn reconcile(&self, raw_service_name: &str) -> Result<Reconciliation, CatalogError> {
        self.reconcile_with(raw_service_name, ReconcileOptions::default())
            .await
    }

    /// [`Self::reconcile`] with explicit `options`.
    #[tracing::instrument(skip(self), err)]
    pub async fn reconcile_with(
        &self,
        raw_service_name: &str,
        options: ReconcileOptions,
    ) -> Result<Reconciliation, CatalogError> {
        let id = identifier::normalize(raw_service_name);
        if id.is_empty() {
            return Err(CatalogError::InvalidName(raw_service_name.to_owned()));
        }
        let database = id.database_name();
        let role = id.role_name();

        // Database-level work runs on the administrative database.
        let mut admin = self.connector.connect(None).await?;

        let database_created = if admin.database_exists(&database).await? {
            false
        } else {
            let sql = format!("CREATE DATABASE {}", quote_ident(&database));
            admin.execute(Step::CreateDatabase, &database, &sql).await?;
            tracing::info!(%database, "database created");
            true
        };

        let role_exists = admin.role_exists(&role).await?;
        let role_password = match (role_exists, options.rotate_password) {
            (false, _) => {
                let password = generate_password();
                let sql = format!(
                    "CREATE ROLE {} LOGIN PASSWORD {}",
                    quote_ident(&role),
                    quote_literal(&password)
                );
                admin.execute(Step::CreateRole, &role, &sql).await?;
                tracing::info!(%role, "role created");
                Some(password)
            }
            (true, true) => {
                let password = generate_password();
                let sql = format!(
                    "ALTER ROLE {} WITH LOGIN PASSWORD {}",
                    quote_ident(&role),
                    quote_literal(&password)
                );
                admin.execute(Step::RotatePassword, &role, &sql).await?;
                tracing::info!(%role, "role password rotated");
                Some(password)
            }
            (true, false) => None,
        };

        let sql = format!(
            "GRANT ALL PRIVILEGES ON DATABASE {} TO {}",
            quote_ident(&database),
            quote_ident(&role)
        );
        admin.execute(Step::GrantDatabase, &database, &sql).await?;
        admin.close().await?;

        // Schema grants only apply to the database the session is connected to.
        let mut target = self.connector.connect(Some(&database)).await?;

        let sql = format!(
            "GRANT SELECT, INSERT, UPDATE, DELETE ON ALL TABLES IN SCHEMA public TO {}",
            quote_ident(&role)
        );
        target.execute(Step::GrantTables, &database, &sql).await?;

        let sql = format!("GRANT USAGE, CREATE ON SCHEMA public TO {}", quote_ident(&role));
        target.execute(Step::GrantSchema, &database, &sql).await?;
        target.close().await?;

        tracing::info!(%database, %role, database_created, role_created = !role_exists, "catalog reconciled");

        Ok(Reconciliation {
            database,
            role,
            database_created,
            role_created: !role_exists,
            password_rotated: role_exists && role_password.is_some(),
            role_password,
            grants: vec![
                GrantScope::Database,
                GrantScope::AllTablesInSchemaPublic,
                GrantScope::SchemaPublic,
            ],
        })
    }
}


#[cfg(test)]
mod tests {
    use super::fake::FakeCatalog;
    use super::*;
    use crate::error::ErrorKind;

    fn reconciler(fake: &FakeCatalog) -> CatalogReconciler {
        CatalogReconciler::new(Arc::new(fake.clone()))
    }

    #[tokio::test]
    async fn first_run_creates_everything() {
        let fake = FakeCatalog::default();
        let result = reconciler(&fake).reconcile("RedTail-Advisor").await.unwrap();

        assert_eq!(result.database, "redtail_advisor_db");
        assert_eq!(result.role, "redtail_advisor");
        assert!(result.database_created);
        assert!(result.role_created);
        assert_eq!(result.grants.len(), 3);

        let state = fake.state.lock().unwrap();
        assert!(state.databases.contains("redtail_advisor_db"));
        assert!(state.roles.contains("redtail_advisor"));
    }

    #[tokio::test]
    async fn second_run_is_a_no_op_with_identical_grants() {
        let fake = FakeCatalog::default();
        let rec = reconciler(&fake);

        rec.reconcile("orion-sync").await.unwrap();
        let grants_after_first = fake.state.lock().unwrap().grants.clone();
        let creates_after_first = fake
            .state
            .lock()
            .unwrap()
            .log
            .iter()
            .filter(|(_, step, _)| step.is_create())
            .count();

        let second = rec.reconcile("orion-sync").await.unwrap();
        assert!(!second.database_created);
        assert!(!second.role_created);
        assert!(second.role_password.is_none());

        let state = fake.state.lock().unwrap();
        assert_eq!(state.grants, grants_after_first);
        let creates = state.log.iter().filter(|(_, step, _)| step.is_create()).count();
        assert_eq!(creates, creates_after_first, "second run must not create");
    }

    #[tokio::test]
    async fn schema_grants_run_on_target_database() {
        let fake = FakeCatalog::default();
        reconciler(&fake).reconcile("wealthbox").await.unwrap();

        let state = fake.state.lock().unwrap();
        assert_eq!(state.connections, vec!["postgres", "wealthbox_db"]);
        for (database, step, _) in &state.log {
            match step {
                Step::GrantTables | Step::GrantSchema => assert_eq!(database, "wealthbox_db"),
                _ => assert_eq!(database, "postgres"),
            }
        }
    }

    #[tokio::test]
    async fn statements_quote_identifiers() {
        let fake = FakeCatalog::default();
        reconciler(&fake).reconcile("emoney").await.unwrap();

        let state = fake.state.lock().unwrap();
        let sqls: Vec<&str> = state.log.iter().map(|(_, _, sql)| sql.as_str()).collect();
        assert_eq!(sqls[0], "CREATE DATABASE \"emoney_db\"");
        assert!(sqls[1].starts_with("CREATE ROLE \"emoney\" LOGIN PASSWORD '"));
        assert_eq!(
            sqls[2],
            "GRANT ALL PRIVILEGES ON DATABASE \"emoney_db\" TO \"emoney\""
        );
        assert_eq!(
            sqls[3],
            "GRANT SELECT, INSERT, UPDATE, DELETE ON ALL TABLES IN SCHEMA public TO \"emoney\""
        );
        assert_eq!(sqls[4], "GRANT USAGE, CREATE ON SCHEMA public TO \"emoney\"");
    }

    #[tokio::test]
    async fn password_is_random_not_derived() {
        let fake = FakeCatalog::default();
        let rec = reconciler(&fake);

        let a = rec.reconcile("svc-a").await.unwrap();
        let b = rec.reconcile("svc-b").await.unwrap();
        let pa = a.role_password.unwrap();
        let pb = b.role_password.unwrap();

        assert_eq!(pa.len(), 64);
        assert!(pa.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(pa, "svc_a_pass");
        assert_ne!(pa, pb);
    }

    #[tokio::test]
    async fn password_redacted_in_debug() {
        let fake = FakeCatalog::default();
        let result = reconciler(&fake).reconcile("svc").await.unwrap();
        let password = result.role_password.clone().unwrap();

        let debug = format!("{result:?}");
        assert!(!debug.contains(&password));
        assert!(debug.contains("<redacted>"));

        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("role_password").is_none());
    }

    #[tokio::test]
    async fn empty_identifier_rejected_before_connecting() {
        let fake = FakeCatalog::default();
        let err = reconciler(&fake).reconcile("!!!").await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(fake.state.lock().unwrap().connections.is_empty());
    }

    #[tokio::test]
    async fn failure_aborts_without_rollback() {
        let fake = FakeCatalog::default();
        fake.state.lock().unwrap().fail_on = Some(Step::GrantDatabase);

        let err = reconciler(&fake).reconcile("orion").await.unwrap_err();
        assert!(matches!(
            err,
            CatalogError::Statement {
                step: Step::GrantDatabase,
                ..
            }
        ));

        let state = fake.state.lock().unwrap();
        assert!(state.databases.contains("orion_db"), "earlier steps stay applied");
        assert!(state.roles.contains("orion"));
        assert!(!state.log.iter().any(|(_, step, _)| *step == Step::GrantTables));
        assert_eq!(state.connections, vec!["postgres"]);
    }

    #[tokio::test]
    async fn rerun_after_failure_completes() {
        let fake = FakeCatalog::default();
        let rec = reconciler(&fake);
        fake.state.lock().unwrap().fail_on = Some(Step::GrantSchema);
        assert!(rec.reconcile("orion").await.is_err());

        fake.state.lock().unwrap().fail_on = None;
        let result = rec.reconcile("orion").await.unwrap();
        assert!(!result.database_created);
        assert!(!result.role_created);
        assert_eq!(fake.state.lock().unwrap().grants.len(), 3);
    }

    #[tokio::test]
    async fn concurrent_create_surfaces_conflict() {
        let fake = FakeCatalog::default();
        fake.state
            .lock()
            .unwrap()
            .hidden
            .insert("redtail_db".to_owned());

        let err = reconciler(&fake).reconcile("redtail").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn rotation_gives_existing_role_a_new_password() {
        let fake = FakeCatalog::default();
        let rec = reconciler(&fake);
        let first = rec.reconcile("orion").await.unwrap();

        let rotated = rec
            .reconcile_with(
                "orion",
                ReconcileOptions {
                    rotate_password: true,
                },
            )
            .await
            .unwrap();
        assert!(!rotated.role_created);
        assert!(rotated.password_rotated);
        assert_ne!(rotated.role_password, first.role_password);

        let state = fake.state.lock().unwrap();
        let (_, _, sql) = state
            .log
            .iter()
            .find(|(_, step, _)| *step == Step::RotatePassword)
            .unwrap();
        assert!(sql.starts_with("ALTER ROLE \"orion\" WITH LOGIN PASSWORD '"));
    }

    #[tokio::test]
    async fn new_role_is_not_reported_as_rotated() {
        let fake = FakeCatalog::default();
        let result = reconciler(&fake)
            .reconcile_with(
                "orion",
                ReconcileOptions {
                    rotate_password: true,
                },
            )
            .await
            .unwrap();
        assert!(result.role_created);
        assert!(!result.password_rotated);
        assert!(result.role_password.is_some());
    }
}
