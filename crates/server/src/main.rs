//! Cobro server entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use cobro_ads::AdEventClient;
use cobro_config::Settings;
use cobro_core::{LineRegistry, SeenMessages};
use cobro_ingest::{InboundRouter, ReceiptPipeline};
use cobro_persistence::SupabaseClient;
use cobro_server::bridge::SidecarFactory;
use cobro_server::{create_router, AppState};
use cobro_session::LineSessionManager;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Config is fatal: a missing or mismatched service-role key must not
    // reach the serving loop.
    let settings = match Settings::from_env() {
        Ok(s) => Arc::new(s),
        Err(e) => {
            eprintln!("fatal: {e}");
            std::process::exit(1);
        }
    };

    init_tracing(&settings);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting cobro server");

    // A single bad message must never take the process down; panics in
    // spawned tasks are logged here.
    std::panic::set_hook(Box::new(|info| {
        tracing::error!(panic = %info, "unexpected panic caught");
    }));

    let store = SupabaseClient::new(&settings.supabase.url, &settings.supabase.service_role);
    let storage = store.storage(&settings.supabase.receipts_bucket);

    let registry = Arc::new(LineRegistry::new());
    let seen = Arc::new(SeenMessages::new());
    let ads = AdEventClient::new();

    let pipeline = ReceiptPipeline::new(
        store.clone(),
        storage,
        ads.clone(),
        settings.features.mp_force_x1000,
    );
    let router = InboundRouter::new(
        Arc::clone(&registry),
        Arc::clone(&seen),
        store.clone(),
        ads.clone(),
        Arc::clone(&pipeline),
    );

    let factory = SidecarFactory::new(
        std::env::var("WA_BRIDGE_CMD").ok(),
        settings.wa.browser_path.clone(),
    );
    let sessions = LineSessionManager::new(
        Arc::clone(&registry),
        store.clone(),
        factory,
        Arc::clone(&router) as Arc<dyn cobro_session::MessageHandler>,
        settings.wa.data_path.clone(),
    );
    tokio::spawn(Arc::clone(&sessions).run_health_probe());

    let state = AppState {
        settings: Arc::clone(&settings),
        registry,
        seen,
        store,
        sessions,
        router,
    };
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port).parse()?;
    tracing::info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
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
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C, shutting down");
        }
        _ = terminate => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }
}

fn init_tracing(settings: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "cobro={},tower_http=info",
            settings.observability.log_level
        )
        .into()
    });

    let subscriber = tracing_subscriber::registry().with(env_filter);
    let fmt_layer = if settings.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    subscriber.with(fmt_layer).init();
}
