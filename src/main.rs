use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use status_watch::config::{AppConfig, load_declarations};
use status_watch::handler::{LoggingHandler, TriggerHandler};
use status_watch::persistence::FileWatchStore;
use status_watch::server::{AppState, build_router};
use status_watch::source::github::{GitHubClient, GitHubPullSource};
use status_watch::worker::{ExecutorRegistry, SupervisorError, WatchSupervisor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "status_watch=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    std::fs::create_dir_all(&config.state_dir)
        .with_context(|| format!("creating state dir {}", config.state_dir.display()))?;

    let client = match &config.github_token {
        Some(token) => GitHubClient::from_token(token.clone()),
        None => {
            warn!("GITHUB_TOKEN not set, using unauthenticated GitHub access");
            GitHubClient::anonymous()
        }
    }
    .context("building GitHub client")?;

    let source = Arc::new(GitHubPullSource::new(client));
    let store = Arc::new(FileWatchStore::new(&config.state_dir));
    let registry = Arc::new(ExecutorRegistry::new());
    let supervisor = WatchSupervisor::new(
        source,
        Arc::clone(&store),
        Arc::clone(&registry),
        config.poll.clone(),
    );
    let handler: Arc<dyn TriggerHandler> = Arc::new(LoggingHandler);

    supervisor
        .resume_all(|_, _| Some(Arc::clone(&handler)))
        .await
        .context("resuming persisted watches")?;

    if let Some(path) = &config.declarations {
        let now = Utc::now();
        for declaration in load_declarations(path)? {
            let (id, watch) = match declaration.resolve(now) {
                Ok(resolved) => resolved,
                Err(e) => {
                    error!(id = %declaration.id, error = %e, "Invalid watch declaration, skipping");
                    continue;
                }
            };
            match supervisor.start(id.clone(), watch, Arc::clone(&handler)).await {
                Ok(_) | Err(SupervisorError::AlreadyRunning(_)) => {}
                Err(e) => error!(watch = %id, error = %e, "Could not start watch"),
            }
        }
    }

    let app = build_router(AppState::new(store, registry));
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    supervisor.shutdown_all().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Could not listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
