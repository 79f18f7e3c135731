use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::{HeaderValue, Method, header};
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use helpdesk_api::AppStateInner;
use helpdesk_api::config::Config;
use helpdesk_api::routes::router;
use helpdesk_api::tokens::TokenService;
use helpdesk_db::{Database, StoreOptions};

/// Startup gives up if the store cannot answer within this long.
const STORE_PING_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "helpdesk=debug,helpdesk_api=debug,helpdesk_db=info,tower_http=debug".into()
            }),
        )
        .init();

    let config = Config::from_env().context("invalid configuration")?;
    let tokens = TokenService::new(&config.tokens).context("invalid token configuration")?;

    let db = Arc::new(open_store(&config).await?);

    let seed_db = db.clone();
    let seed = config.seed.clone();
    tokio::task::spawn_blocking(move || helpdesk_api::seed::run(&seed_db, &seed))
        .await
        .context("seeding task panicked")??;

    let state = AppStateInner::new(db, tokens, config.cookie.clone());

    let app = router(state)
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(cors_layer(&config.cors_origin)?)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Helpdesk server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Helpdesk server stopped");
    Ok(())
}

async fn open_store(config: &Config) -> anyhow::Result<Database> {
    let path = config.db_path.clone();
    let opts = StoreOptions {
        readers: config.db_readers,
        busy_timeout: config.db_busy_timeout,
    };

    let opened = tokio::time::timeout(
        STORE_PING_TIMEOUT,
        tokio::task::spawn_blocking(move || -> anyhow::Result<Database> {
            let db = Database::open(&path, &opts)?;
            db.ping()?;
            Ok(db)
        }),
    )
    .await
    .with_context(|| format!("store did not respond within {:?}", STORE_PING_TIMEOUT))?
    .context("store open task panicked")??;

    info!(
        "Store ready at {} ({} readers)",
        config.db_path.display(),
        config.db_readers
    );
    Ok(opened)
}

/// Browser clients send the refresh cookie, so the origin must be explicit.
fn cors_layer(origin: &str) -> anyhow::Result<CorsLayer> {
    let origin = HeaderValue::from_str(origin)
        .with_context(|| format!("CORS_ORIGIN is not a valid header value: {}", origin))?;
    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]))
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
