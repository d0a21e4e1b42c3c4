use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use syncthing_state_engine::metering::{
    NetworkCostProvider, StaticCostProvider, UnsupportedCostProvider,
};
use syncthing_state_engine::{Config, MonitorError, Notification, SyncEngine, SyncthingClient};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        error!(error = %e, "Monitor failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), MonitorError> {
    let config = Config::load().await;
    let client = SyncthingClient::discover(&config).await?;

    let cost: Arc<dyn NetworkCostProvider> = if config.metered_networks.is_empty() {
        Arc::new(UnsupportedCostProvider)
    } else {
        Arc::new(StaticCostProvider::new(config.metered_networks.clone()))
    };

    let engine = SyncEngine::new(Arc::new(client), &config, cost);
    let mut notifications = engine.subscribe();
    engine.start().await?;
    info!(
        devices = engine.fetch_all_devices().len(),
        folders = engine.fetch_all_folders().len(),
        "Monitoring Syncthing, press Ctrl-C to stop"
    );
    for device in engine.device_snapshots() {
        info!(
            device = %device.id,
            name = %device.name,
            connected = device.connected,
            paused = device.paused,
            "Known device"
        );
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            received = notifications.recv() => match received {
                Ok(notification) => log_notification(&notification),
                Err(RecvError::Lagged(missed)) => warn!(missed, "Notification log fell behind"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    engine.stop().await;
    info!("Stopped");
    Ok(())
}

fn log_notification(notification: &Notification) {
    match notification {
        Notification::DeviceConnected { device_id, address } => {
            info!(device = %device_id, address = ?address, "Device connected")
        }
        Notification::DeviceDisconnected { device_id } => {
            info!(device = %device_id, "Device disconnected")
        }
        Notification::DevicePaused { device_id } => info!(device = %device_id, "Device paused"),
        Notification::DeviceResumed { device_id } => info!(device = %device_id, "Device resumed"),
        Notification::FoldersChanged => info!("Folder list changed"),
        Notification::FolderSyncStateChanged {
            folder_id,
            old_state,
            new_state,
        } => info!(folder = %folder_id, from = ?old_state, to = ?new_state, "Folder state changed"),
        Notification::FolderStatusChanged { folder_id, status } => info!(
            folder = %folder_id,
            completion = %format!("{:.1}%", status.completion()),
            need_files = status.need_files,
            "Folder status"
        ),
        Notification::FolderErrorsChanged { folder_id, errors } => {
            info!(folder = %folder_id, errors = errors.len(), "Folder errors changed")
        }
        Notification::TransferStarted(transfer) => {
            info!(folder = %transfer.folder_id, path = %transfer.path, "Transfer started")
        }
        Notification::TransferStateChanged(transfer) => info!(
            folder = %transfer.folder_id,
            path = %transfer.path,
            progress = %format!("{:.1}%", transfer.progress_percent()),
            rate = ?transfer.bytes_per_second,
            "Transfer progress"
        ),
        Notification::TransferCompleted(transfer) => match &transfer.error {
            Some(err) => warn!(folder = %transfer.folder_id, path = %transfer.path, error = %err, "Transfer failed"),
            None => info!(folder = %transfer.folder_id, path = %transfer.path, "Transfer completed"),
        },
        Notification::FolderSynchronizationFinished {
            folder_id,
            transfers,
        } => info!(folder = %folder_id, files = transfers.len(), "Folder synchronization finished"),
        Notification::EventsSkipped => warn!("Events were skipped, reloading state"),
    }
}
