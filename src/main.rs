use eyre::{WrapErr, eyre};
use merchant_analyzer::{
    api::{AppState, router},
    jobs::{JobQueue, Retention, queue_capacity_from_env},
    pipeline::Pipeline,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    init_tracing();
    if let Err(err) = run().await {
        error!(target: "analyzer.api", "server crashed: {err:?}");
    }
}

async fn run() -> eyre::Result<()> {
    let pipeline = Pipeline::from_env();
    let config = pipeline.config();
    info!(
        target: "analyzer.api",
        primary = %config.primary,
        alternate = config.alternate_enabled,
        budget_ms = config.budget.as_millis() as u64,
        "pipeline configured"
    );

    let (queue, _worker) =
        JobQueue::spawn_with(pipeline.clone(), queue_capacity_from_env(), Retention::from_env());
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|err| eyre!("prometheus recorder: {err}"))?;
    let app = router(AppState::new(pipeline, queue, prometheus_handle));

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target: "analyzer.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("binding {addr}"))?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
