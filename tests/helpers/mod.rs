#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use provisioner::api::{self, AppState};
use provisioner::catalog::{
    CatalogConnector, CatalogError, CatalogReconciler, CatalogSession, Step,
};
use provisioner::config::Config;
use provisioner::gitops::GitPublisher;
use provisioner::orchestrator::Orchestrator;
use provisioner::repo_map::{RepositoryMap, StaticRepoMapSource};
use provisioner::secrets::VaultClient;

// ---------------------------------------------------------------------------
// In-memory catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryCatalogState {
    pub databases: HashSet<String>,
    pub roles: HashSet<String>,
    pub statements: Vec<String>,
}

/// Catalog that records statements and tracks created objects in memory.
#[derive(Clone, Default)]
pub struct MemoryCatalog {
    pub state: Arc<Mutex<MemoryCatalogState>>,
}

struct MemorySession {
    state: Arc<Mutex<MemoryCatalogState>>,
}

#[async_trait]
impl CatalogConnector for MemoryCatalog {
    async fn connect(
        &self,
        _database: Option<&str>,
    ) -> Result<Box<dyn CatalogSession>, CatalogError> {
        Ok(Box::new(MemorySession {
            state: Arc::clone(&self.state),
        }))
    }
}

#[async_trait]
impl CatalogSession for MemorySession {
    async fn database_exists(&mut self, name: &str) -> Result<bool, CatalogError> {
        Ok(self.state.lock().unwrap().databases.contains(name))
    }

    async fn role_exists(&mut self, name: &str) -> Result<bool, CatalogError> {
        Ok(self.state.lock().unwrap().roles.contains(name))
    }

    async fn execute(&mut self, step: Step, subject: &str, sql: &str) -> Result<(), CatalogError> {
        let mut state = self.state.lock().unwrap();
        state.statements.push(sql.to_owned());
        match step {
            Step::CreateDatabase => {
                state.databases.insert(subject.to_owned());
            }
            Step::CreateRole => {
                state.roles.insert(subject.to_owned());
            }
            _ => {}
        }
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), CatalogError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// App construction
// ---------------------------------------------------------------------------

/// Config with defaults and the git workspace under `work_dir`.
pub fn test_config(work_dir: &Path) -> Config {
    let work = work_dir.display().to_string();
    Config::from_lookup(|key| (key == "PROVISIONER_WORK_DIR").then(|| work.clone()))
}

pub struct TestApp {
    pub router: Router,
    pub catalog: MemoryCatalog,
    pub work_dir: PathBuf,
}

/// Build the full router over an in-memory catalog, a fixed repository map,
/// and an optional secret store address.
pub fn test_app(work_dir: &Path, repos: RepositoryMap, vault_addr: Option<&str>) -> TestApp {
    let config = Arc::new(test_config(work_dir));
    let catalog = MemoryCatalog::default();
    let vault = vault_addr.map(|addr| VaultClient::new(addr, "test-token").unwrap());

    let orchestrator = Orchestrator::new(
        Arc::clone(&config),
        CatalogReconciler::new(Arc::new(catalog.clone())),
        Arc::new(StaticRepoMapSource(repos)),
        GitPublisher::new(work_dir, "gitops-bot", "gitops@localhost"),
        vault,
    );

    TestApp {
        router: api::app(AppState { orchestrator }),
        catalog,
        work_dir: work_dir.to_path_buf(),
    }
}

// ---------------------------------------------------------------------------
// Secret store
// ---------------------------------------------------------------------------

/// Secret store that accepts the token, already has the `secrets/` mount and
/// acknowledges every KV v2 write. Reads are unmatched, so no secret exists yet.
pub async fn mock_vault() -> MockServer {
    let server = MockServer::start().await;
    mount_vault(&server).await;
    server
}

/// [`mock_vault`] whose first write to `secret_path` fails with a 500.
pub async fn mock_vault_with_failing_first_write(secret_path: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/v1/secrets/data/{secret_path}")))
        .respond_with(ResponseTemplate::new(500).set_body_string("storage sealed"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_vault(&server).await;
    server
}

async fn mount_vault(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v1/auth/token/lookup-self"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": {}})))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/sys/mounts"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": {"secrets/": {}}})),
        )
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/v1/secrets/data/.+"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": {"version": 1}})),
        )
        .mount(server)
        .await;
}

/// Make the KV v2 secret at `secret_path` readable.
pub async fn mark_stored(server: &MockServer, secret_path: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/v1/secrets/data/{secret_path}")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": {"data": {}}})),
        )
        .mount(server)
        .await;
}

// ---------------------------------------------------------------------------
// Git fixtures
// ---------------------------------------------------------------------------

#[path = "../../src/gitops/testutil.rs"]
mod fixtures;

pub use fixtures::{git, is_empty_dir, seeded_remote};

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

pub async fn get_text(app: &Router, path: &str) -> (StatusCode, String) {
    let req = Request::builder()
        .method("GET")
        .uri(path)
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

/// Send a POST request with a JSON body.
pub async fn post_json(app: &Router, path: &str, body: Value) -> (StatusCode, Value) {
    let req = Request::builder()
        .method("POST")
        .uri(path)
        .header("Content-Type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap();

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::String(
            String::from_utf8_lossy(&bytes).into_owned(),
        ))
    };
    (status, body)
}
