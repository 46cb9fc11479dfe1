//! Service entry point

use std::net::SocketAddr;
use std::path::PathBuf;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use policy_qa_config::Settings;
use policy_qa_server::{build_engine, create_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::var("POLICY_QA_CONFIG").ok().map(PathBuf::from);
    let settings = Settings::load(config_path.as_deref())?;

    let metrics = PrometheusBuilder::new().install_recorder()?;

    tracing::info!(
        collection = %settings.vector_store.collection,
        model = %settings.llm.model_path,
        "Starting policy QA server"
    );

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port).parse()?;

    let engine = build_engine(settings).await?;
    let router = create_router(AppState { engine, metrics });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received");
}
