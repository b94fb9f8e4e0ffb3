//! Playvex sync engine entrypoint wiring local storage, the identity provider, the remote
//! mirror supervisor and the HTTP/SSE layers.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use playvex_sync::{
    auth::{AuthProvider, MemoryAuthProvider},
    config::SyncConfig,
    dao::{
        kv::{FileKv, LocalKv},
        mirror::{RemoteMirror, memory::MemoryMirror},
        storage::StorageError,
    },
    routes,
    services::{account_service, storage_supervisor},
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = SyncConfig::load();
    let kv = LocalKv::new(Arc::new(
        FileKv::new(config.data_dir.clone()).with_quota(config.storage_quota_bytes),
    ));
    let app_state = AppState::new(config, kv, auth_provider());

    spawn_mirror_supervisor(&app_state);
    spawn_readiness(&app_state);

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Identity provider selected by `PLAYVEX_AUTH` (`memory` by default, `none` to run unconfigured).
fn auth_provider() -> Option<Arc<dyn AuthProvider>> {
    match env::var("PLAYVEX_AUTH").unwrap_or_default().trim() {
        "none" => {
            info!("no identity provider configured; running local-only");
            None
        }
        "" | "memory" => Some(Arc::new(MemoryAuthProvider::new())),
        other => {
            warn!(provider = other, "unknown identity provider; using the in-memory one");
            Some(Arc::new(MemoryAuthProvider::new()))
        }
    }
}

/// Start the mirror supervisor for the backend chosen by `PLAYVEX_MIRROR`.
fn spawn_mirror_supervisor(state: &SharedState) {
    let backend = env::var("PLAYVEX_MIRROR").unwrap_or_else(|_| "memory".into());
    let state = state.clone();
    match backend.trim() {
        "none" => info!("remote mirror disabled; staying in degraded mode"),
        #[cfg(feature = "couch-store")]
        "couch" => {
            use playvex_sync::dao::mirror::couchdb::{CouchConfig, CouchMirror};

            tokio::spawn(storage_supervisor::run(state, || async {
                let config = CouchConfig::from_env()?;
                let mirror = CouchMirror::connect(config).await?;
                Ok::<_, StorageError>(Arc::new(mirror) as Arc<dyn RemoteMirror>)
            }));
        }
        #[cfg(feature = "mongo-store")]
        "mongo" => {
            use playvex_sync::dao::mirror::mongodb::{MongoConfig, MongoMirror};

            tokio::spawn(storage_supervisor::run(state, || async {
                let config = MongoConfig::from_env().await?;
                let mirror = MongoMirror::connect(config).await?;
                Ok::<_, StorageError>(Arc::new(mirror) as Arc<dyn RemoteMirror>)
            }));
        }
        other => {
            if other != "memory" {
                warn!(backend = other, "unknown or disabled mirror backend; using the in-memory one");
            }
            let mirror = MemoryMirror::new();
            tokio::spawn(storage_supervisor::run(state, move || {
                let mirror = mirror.clone();
                async move { Ok(Arc::new(mirror) as Arc<dyn RemoteMirror>) }
            }));
        }
    }
}

/// Run the first readiness check in the background, then keep following the identity
/// provider; local operations never wait for either.
fn spawn_readiness(state: &SharedState) {
    let state = state.clone();
    tokio::spawn(async move {
        match account_service::ensure_ready(&state).await {
            Ok(session) => info!(account_id = ?session.account_id, "identity ready"),
            Err(err) => warn!(error = %err, "identity unavailable; progress stays on this device"),
        }
        account_service::follow_provider(state).await;
    });
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

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
