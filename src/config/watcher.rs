use crate::error::{LightError, Result};
use crate::event::LightEvent;
use notify::Watcher as _;
use notify_debouncer_mini::{new_debouncer, DebouncedEvent, DebouncedEventKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEBOUNCE: Duration = Duration::from_millis(500);

/// Watch the config file and publish `ConfigReloaded` for every valid change.
///
/// # Errors
/// Returns `LightError::Watcher` if the file watcher cannot be started.
pub async fn watch_config(
    config_path: PathBuf,
    tx: broadcast::Sender<LightEvent>,
    cancel: CancellationToken,
) -> Result<()> {
    let (change_tx, mut change_rx) = mpsc::channel::<()>(4);
    let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();

    // The debouncer lives on a blocking thread for as long as we are running.
    let path = config_path.clone();
    let thread_cancel = cancel.clone();
    tokio::task::spawn_blocking(move || {
        watch_blocking(&path, change_tx, ready_tx, &thread_cancel);
    });

    ready_rx
        .await
        .map_err(|_| LightError::Watcher("watcher thread exited".to_string()))??;
    info!("watching config file: {}", config_path.display());

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!("config watcher shutting down");
                return Ok(());
            }
            changed = change_rx.recv() => {
                if changed.is_none() {
                    return Ok(());
                }
                reload(&config_path, &tx);
            }
        }
    }
}

fn watch_blocking(
    path: &Path,
    change_tx: mpsc::Sender<()>,
    ready_tx: tokio::sync::oneshot::Sender<Result<()>>,
    cancel: &CancellationToken,
) {
    let handler = move |events: std::result::Result<Vec<DebouncedEvent>, notify::Error>| {
        match events {
            Ok(events) if events.iter().any(|e| e.kind == DebouncedEventKind::Any) => {
                // A full channel already holds a pending reload.
                let _ = change_tx.try_send(());
            }
            Ok(_) => {}
            Err(e) => warn!("file watcher error: {e}"),
        }
    };

    let mut debouncer = match new_debouncer(DEBOUNCE, handler) {
        Ok(d) => d,
        Err(e) => {
            let _ = ready_tx.send(Err(LightError::Watcher(e.to_string())));
            return;
        }
    };

    if let Err(e) = debouncer
        .watcher()
        .watch(path, notify::RecursiveMode::NonRecursive)
    {
        let _ = ready_tx.send(Err(LightError::Watcher(e.to_string())));
        return;
    }
    let _ = ready_tx.send(Ok(()));

    while !cancel.is_cancelled() {
        std::thread::sleep(DEBOUNCE);
    }
}

/// Load the file again and publish it. An invalid file keeps the old config.
fn reload(path: &Path, tx: &broadcast::Sender<LightEvent>) -> bool {
    match crate::config::load(path) {
        Ok(config) => {
            info!("config reloaded");
            let _ = tx.send(LightEvent::ConfigReloaded(Arc::new(config)));
            true
        }
        Err(e) => {
            warn!("config reload failed, keeping old config: {e}");
            false
        }
    }
}
