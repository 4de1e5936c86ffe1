//! Notification service: consumes "order created" events from RabbitMQ.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info};

use order_events::adapters::{
    ConnectionManager, RabbitMqDeliverySource, SubscriptionOptions, Topology,
};
use order_events::application::{NotificationConsumer, NotificationHandler, StopReason};
use order_events::config::AppConfig;
use order_events::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    telemetry::init(&config.logging).context("Failed to initialise logging")?;

    let manager = ConnectionManager::from_config(&config.rabbitmq);
    let session = match manager.connect().await {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, "Giving up on RabbitMQ");
            return Err(e).context("Could not connect to RabbitMQ");
        }
    };

    let mut source = RabbitMqDeliverySource::subscribe(
        session,
        manager.dialer().clone(),
        Topology::from_config(&config.rabbitmq, &config.consumer),
        SubscriptionOptions::from_config(&config),
    )
    .await
    .context("Failed to subscribe to the order queue")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let consumer = NotificationConsumer::new(Arc::new(NotificationHandler::new()), &config.consumer);
    let stats = consumer.run(&mut source, shutdown_rx).await;
    source.close().await;

    info!(
        acked = stats.acked,
        rejected = stats.rejected,
        dead_lettered = stats.dead_lettered,
        "Notification service stopped"
    );

    match stats.stopped_by {
        StopReason::Shutdown => Ok(()),
        StopReason::SourceClosed => anyhow::bail!("RabbitMQ subscription ended unexpectedly"),
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            error!(error = %e, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
