//! Start Lights Back binary entrypoint wiring REST, WebSocket, SSE and the score store.

use std::{env, net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "couch-store")]
use start_lights_back::dao::score_store::couchdb::{CouchConfig, CouchScoreStore};
#[cfg(feature = "mongo-store")]
use start_lights_back::dao::score_store::mongodb::{MongoConfig, MongoScoreStore};
use start_lights_back::{
    config::AppConfig,
    dao::{
        score_store::{ScoreStore, local::LocalScoreStore},
        storage::StorageError,
    },
    routes,
    services::{sse_events, storage_supervisor},
    state::{AppState, SharedState},
};

const DEFAULT_LOCAL_STORE_PATH: &str = "data/scores.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let app_state = AppState::new(config);

    tokio::spawn(sse_events::forward_race_notices(app_state.clone()));
    tokio::spawn(sse_events::forward_system_status(app_state.clone()));
    spawn_score_store(app_state.clone());

    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Start the storage supervisor for the backend selected by `SCORE_STORE`.
fn spawn_score_store(state: SharedState) {
    let backend = env::var("SCORE_STORE").unwrap_or_else(|_| "local".into());
    info!(backend = %backend, "selecting score store");

    match backend.as_str() {
        #[cfg(feature = "couch-store")]
        "couch" => {
            tokio::spawn(storage_supervisor::run(state, || async {
                let config = CouchConfig::from_env()?;
                let store = CouchScoreStore::connect(config).await?;
                Ok::<_, StorageError>(Arc::new(store) as Arc<dyn ScoreStore>)
            }));
        }
        #[cfg(feature = "mongo-store")]
        "mongo" => {
            tokio::spawn(storage_supervisor::run(state, || async {
                let config = MongoConfig::from_env().await?;
                let store = MongoScoreStore::connect(config).await?;
                Ok::<_, StorageError>(Arc::new(store) as Arc<dyn ScoreStore>)
            }));
        }
        other => {
            if other != "local" {
                warn!(backend = %other, "unknown or disabled score store; using local file store");
            }
            let path = env::var("LOCAL_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_LOCAL_STORE_PATH));
            tokio::spawn(storage_supervisor::run(state, move || {
                let path = path.clone();
                async move {
                    let store = LocalScoreStore::open(path).await?;
                    Ok::<_, StorageError>(Arc::new(store) as Arc<dyn ScoreStore>)
                }
            }));
        }
    }
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
