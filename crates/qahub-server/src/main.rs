//! QAHub server binary.
//!
//! Starts the RPC server with structured logging, database initialization,
//! the notification consumer and the Stream Hub, and shuts everything down
//! gracefully on SIGTERM/SIGINT.

use std::net::SocketAddr;

use qahub_server::{app, background, config, AppState};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("QAHUB_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration: the server cannot start without valid config");

    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    let pool = qahub_db::create_pool(
        &config.database.path,
        qahub_db::DbRuntimeSettings {
            busy_timeout_ms: config.database.busy_timeout_ms,
            pool_max_size: config.database.pool_max_size,
        },
    )
    .expect("failed to create database pool, check database.path in config");

    {
        let conn = pool
            .get()
            .expect("failed to get database connection for migrations");
        let applied = qahub_db::run_migrations(&conn).expect("failed to run database migrations");
        if applied > 0 {
            tracing::info!(count = applied, "applied database migrations");
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (state, hub_task) = AppState::from_config(&config, pool.clone(), shutdown_rx.clone())
        .expect("failed to initialize token authority");

    let consumer_task = background::spawn_notification_consumer(
        pool.clone(),
        state.notifications.clone(),
        &config.events,
        shutdown_rx.clone(),
    );
    let purge_task = tokio::spawn(background::start_revocation_purge_task(
        pool,
        config.auth.revocation_purge_interval_secs,
        shutdown_rx,
    ));

    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting qahub server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address, is another process using this port?");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .expect("server error");

    for (name, task) in [
        ("notification consumer", consumer_task),
        ("revocation purge", purge_task),
        ("stream hub", hub_task),
    ] {
        if let Err(e) = task.await {
            tracing::error!(task = name, "background task ended abnormally: {}", e);
        }
    }

    tracing::info!("qahub server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal, then tells every
/// background task and open stream to stop.
async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }

    let _ = shutdown_tx.send(true);
}
