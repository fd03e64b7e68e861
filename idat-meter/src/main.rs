//! IDAT Meter - simulated electrical meter publishing telemetry over MQTT
//!
//! Publishes one reading per metric every tick and applies the remote
//! multiplier received on the control topic. Stop with Ctrl-C.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use idat_meter::{
    stop_channel, ControlListener, ControlState, IntervalTicker, MeterConfig, MetricGenerator,
    MqttBroker, PublishLoop,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("idat_meter=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("⚡ IDAT meter publisher starting...");

    let config = MeterConfig::load().await.context("Failed to load configuration")?;

    let control = ControlState::new();
    let listener = Arc::new(ControlListener::new(control.clone()));
    let broker = MqttBroker::start(&config.mqtt, listener);

    let generator = match config.publish.seed {
        Some(seed) => {
            info!("Using fixed seed {} for readings", seed);
            MetricGenerator::seeded(seed)
        }
        None => MetricGenerator::from_entropy(),
    };
    let mut publish_loop = PublishLoop::new(broker, control, generator);

    let (stop_handle, stop_signal) = stop_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Publication stopped by user");
            stop_handle.request_stop();
        }
    });

    info!("Press Ctrl-C to stop publishing.");
    let mut ticker = IntervalTicker::new(config.publish.interval());
    let stats = publish_loop
        .run(&mut ticker, stop_signal)
        .await
        .context("Telemetry publication failed")?;

    info!(
        cycles = stats.cycles,
        published = stats.published,
        failed = stats.failed,
        "Publisher stopped"
    );
    Ok(())
}
