//! Call bridge binary.
//!
//! Starts an axum HTTP server with structured logging, database initialization,
//! and graceful shutdown on SIGTERM/SIGINT.

use callbridge_server::call_control::{CallControl, LoggingCallControl, TwilioCallControl};
use callbridge_server::registry::SessionRegistry;
use callbridge_server::session::ShutdownReason;
use callbridge_server::{app, config, AppState};
use callbridge_tools::{HttpToolBackend, ToolBackend};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("CALLBRIDGE_CONFIG_PATH") {
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
        .expect("failed to load configuration; the server cannot start without valid config");

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

    let (pool, applied) = callbridge_db::open(
        &config.database.path,
        callbridge_db::DbRuntimeSettings {
            busy_timeout_ms: config.database.busy_timeout_ms,
            pool_max_size: config.database.pool_max_size,
        },
    )
    .expect("failed to open database; check database.path in config");
    if applied > 0 {
        tracing::info!(count = applied, "applied database migrations");
    }

    if !config.businesses.is_empty() {
        let conn = pool
            .get()
            .expect("failed to get database connection for business profiles");
        for profile in &config.businesses {
            callbridge_calls::upsert_business(&conn, profile)
                .expect("failed to store business profile from config");
            tracing::info!(
                business_id = profile.business_id,
                phone_number = profile.phone_number,
                "business profile loaded"
            );
        }
    }

    let model = config
        .model
        .build_adapter()
        .expect("failed to build voice model adapter; check the [model] section");
    tracing::info!(provider = model.provider(), "voice model configured");

    let tools: Arc<dyn ToolBackend> = Arc::new(HttpToolBackend::new(
        config.tools.base_url.clone(),
        config.tools.api_key.clone(),
        Duration::from_millis(config.tools.timeout_ms),
    ));

    let call_control: Arc<dyn CallControl> = if config.telephony.has_credentials() {
        Arc::new(TwilioCallControl::new(
            config.telephony.api_base.clone(),
            config.telephony.account_sid.clone(),
            config.telephony.auth_token.clone(),
        ))
    } else {
        tracing::warn!("telephony credentials not configured; hangups and transfers are logged only");
        Arc::new(LoggingCallControl)
    };

    let registry = SessionRegistry::new();
    let state = AppState {
        pool,
        registry: registry.clone(),
        model,
        model_audio: config.model.session_audio_format(),
        tools,
        call_control,
        settings: config.session_settings(),
        public_url: config.server.public_url.clone(),
    };

    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting call bridge");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address; is another process using this port?");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let notified = registry.shutdown_all(ShutdownReason::ServerShutdown);
            if notified > 0 {
                tracing::info!(sessions = notified, "closing live call sessions");
            }
        })
        .await
        .expect("server error");

    tracing::info!("call bridge shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
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
}
