use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod app;
mod common;
mod config;
mod error;
mod infrastructure;
mod modules;
mod routes;
mod state;
mod workers;

#[cfg(test)]
mod test_support;

use config::settings::AppConfig;
use infrastructure::api::client::ApiClient;
use infrastructure::db::pool::connect_to_db;
use infrastructure::media::ffmpeg::FfmpegTool;
use infrastructure::redis::client::RedisService;
use infrastructure::storage::publisher::StoragePublisher;
use infrastructure::storage::s3::StorageService;
use modules::uploads::recorder::{ErrorRecorder, PgErrorSink};
use modules::uploads::repository::PgJobStore;
use modules::uploads::service::{PipelineSettings, UploadPipeline};
use workers::finalizer::{ClaimLoop, RetryPolicy};
use workers::status::WorkerStatus;
use workers::trigger::{self, EventListener};

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true))
            .with(env_filter)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    init_tracing();

    // reqwest and sqlx both pull in rustls; pick one provider up front.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = AppConfig::new().context("loading configuration")?;
    info!(worker_id = %config.worker_id, "Starting upload finalizer...");

    let db = connect_to_db(&config.database_url).await.context("connecting to PostgreSQL")?;
    let redis = RedisService::new(&config.redis_url, &config.event_channel).context("configuring Redis")?;
    let storage = StorageService::new(&config.storage);
    let api = ApiClient::new(config.api_server_url.clone(), config.api_auth_token.clone())?;

    let status = Arc::new(WorkerStatus::new(config.worker_id.clone()));
    let store = Arc::new(PgJobStore::new(db.clone()));
    let pipeline = UploadPipeline::new(
        PipelineSettings::from_config(&config),
        store.clone(),
        Arc::new(FfmpegTool::new(&config.media)),
        StoragePublisher::new(Arc::new(storage)),
        Arc::new(api),
    );
    let recorder = ErrorRecorder::new(config.worker_id.clone(), Arc::new(PgErrorSink::new(db)));
    let claim_loop = ClaimLoop::new(
        config.worker_id.clone(),
        store,
        pipeline,
        recorder,
        RetryPolicy {
            max_attempts: config.max_attempts,
            retry_delay: config.retry_delay,
        },
        status.clone(),
    );

    let (wake_tx, wake_rx) = trigger::wake_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let listener = EventListener::new(Arc::new(redis), wake_tx.clone(), status.clone());
    let events = listener
        .connect()
        .await
        .context("subscribing to upload events")?;

    let listener_task = tokio::spawn(listener.run(events, shutdown_rx.clone()));
    let poller_task = tokio::spawn(trigger::run_poller(wake_tx, config.poll_interval, shutdown_rx.clone()));
    let claim_task = tokio::spawn(claim_loop.run(wake_rx, shutdown_rx.clone()));

    let addr = format!("0.0.0.0:{}", config.server_port);
    let app = app::create_app(state::AppState::new(config, status));
    let tcp = tokio::net::TcpListener::bind(&addr).await.context("binding status server")?;
    info!("Status server running on http://{}", addr);

    let mut server_shutdown = shutdown_rx;
    let server = tokio::spawn(async move {
        axum::serve(tcp, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.changed().await;
            })
            .await
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutting down...");
    let _ = shutdown_tx.send(true);

    for (name, task) in [("listener", listener_task), ("poller", poller_task), ("claim loop", claim_task)] {
        if let Err(e) = task.await {
            error!("{} task failed: {}", name, e);
        }
    }
    match server.await {
        Ok(Err(e)) => error!("Status server failed: {}", e),
        Err(e) => error!("Status server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    info!("Upload finalizer stopped");
    Ok(())
}
