use std::net::SocketAddr;
use std::sync::Arc;

use tokio::signal;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use provisioner::api::{self, AppState};
use provisioner::catalog::{CatalogReconciler, PgCatalog};
use provisioner::config::Config;
use provisioner::gitops::GitPublisher;
use provisioner::orchestrator::Orchestrator;
use provisioner::repo_map::FileRepoMapSource;
use provisioner::secrets::VaultClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Arc::new(Config::load());

    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_env("PROVISIONER_LOG").unwrap_or_else(|_| "info".into()));
    if cfg.dev_mode {
        registry.with(fmt::layer()).init();
    } else {
        registry.with(fmt::layer().json()).init();
    }

    let catalog = CatalogReconciler::new(Arc::new(PgCatalog::new(&cfg.catalog_admin_url)?));

    let vault = match (&cfg.vault_addr, &cfg.vault_token) {
        (Some(addr), Some(token)) => Some(VaultClient::new(addr, token)?),
        _ => {
            tracing::warn!("VAULT_ADDR/VAULT_TOKEN not set; secret and database steps disabled");
            None
        }
    };

    if !cfg.repo_map_path.exists() {
        tracing::warn!(path = %cfg.repo_map_path.display(), "repository map not found; publishing will fail until it exists");
    }
    let repo_maps = Arc::new(FileRepoMapSource::new(&cfg.repo_map_path));

    let git = GitPublisher::new(
        &cfg.git_work_dir,
        &cfg.git_author_name,
        &cfg.git_author_email,
    );

    let orchestrator = Orchestrator::new(Arc::clone(&cfg), catalog, repo_maps, git, vault);
    let app = api::app(AppState { orchestrator });

    let addr: SocketAddr = cfg.listen.parse()?;
    tracing::info!(%addr, "starting provisioner");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("provisioner stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
