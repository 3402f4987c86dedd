use crate::bus::credentials::{CredentialSource, StaticPassword, TokenExchange};
use crate::bus::redis::RedisConnector;
use crate::bus::BusConnector;
use crate::config::schema::{AppConfig, BusConfig};
use crate::config::watcher;
use crate::device::kuando::KuandoDriver;
use crate::error::Result;
use crate::event::LightEvent;
use crate::ingest::{ChannelListener, ConnectionSupervisor};
use crate::light::{palette::describe, LightController};
use arc_swap::ArcSwap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const CHANNEL_CAPACITY: usize = 256;

/// Run the busylight daemon until SIGINT or a `Shutdown` event.
///
/// # Errors
/// Returns `LightError` if a fatal error occurs in any subsystem.
pub async fn run(config: AppConfig, config_path: PathBuf) -> Result<()> {
    let cancel = CancellationToken::new();
    let (tx, _) = broadcast::channel::<LightEvent>(CHANNEL_CAPACITY);

    let shared_config = Arc::new(ArcSwap::from_pointee(config));

    // Subscribe before any task can publish.
    let mut rx = tx.subscribe();

    let light_handle = spawn_light_controller(&tx, &cancel, &shared_config);
    let listener_handle = spawn_listener(&tx, &cancel, &shared_config);
    let watcher_handle = spawn_config_watcher(&tx, &cancel, &config_path);

    info!(
        "busylightd running for user {}",
        shared_config.load().user.username
    );

    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            () = async { tokio::signal::ctrl_c().await.ok(); } => {
                info!("received SIGINT, shutting down");
                break;
            }
            event = rx.recv() => {
                match event {
                    Ok(e) => e,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("event loop lagged, missed {n} events");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };

        if handle_event(event, &shared_config) {
            break;
        }
    }

    info!("daemon shutting down...");
    cancel.cancel();

    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        let _ = light_handle.await;
        let _ = listener_handle.await;
        let _ = watcher_handle.await;
    })
    .await;

    info!("daemon stopped");
    Ok(())
}

fn credentials_for(bus: &BusConfig) -> Arc<dyn CredentialSource> {
    match &bus.password {
        Some(password) if !password.is_empty() => Arc::new(StaticPassword(password.clone())),
        _ => {
            let url = bus
                .auth_url
                .clone()
                .unwrap_or_else(|| TokenExchange::default_url(&bus.host));
            Arc::new(TokenExchange::new(url, bus.token.clone()))
        }
    }
}

fn spawn_listener(
    tx: &broadcast::Sender<LightEvent>,
    cancel: &CancellationToken,
    config: &Arc<ArcSwap<AppConfig>>,
) -> tokio::task::JoinHandle<()> {
    let config = config.load_full();
    let connector: Arc<dyn BusConnector> = Arc::new(RedisConnector::new(
        config.bus.host.clone(),
        config.bus.port,
        credentials_for(&config.bus),
    ));
    let supervisor = ConnectionSupervisor::new(connector, &config.bus, tx.clone(), cancel.clone());
    let listener = ChannelListener::new(&config.user, config.bus.poll_timeout(), tx.clone());
    tokio::spawn(async move {
        if let Err(e) = listener.run(supervisor).await {
            error!("bus listener error: {e}");
        }
    })
}

fn spawn_light_controller(
    tx: &broadcast::Sender<LightEvent>,
    cancel: &CancellationToken,
    config: &Arc<ArcSwap<AppConfig>>,
) -> tokio::task::JoinHandle<()> {
    let light_tx = tx.clone();
    let rx = tx.subscribe();
    let light_cancel = cancel.clone();
    let settings = config.load().light.clone();
    tokio::spawn(async move {
        let controller = LightController::new(Box::new(KuandoDriver::new()), &settings, light_tx);
        if let Err(e) = controller.run(rx, light_cancel).await {
            error!("light controller error: {e}");
        }
    })
}

fn spawn_config_watcher(
    tx: &broadcast::Sender<LightEvent>,
    cancel: &CancellationToken,
    config_path: &std::path::Path,
) -> tokio::task::JoinHandle<()> {
    let watcher_tx = tx.clone();
    let watcher_cancel = cancel.clone();
    let watcher_path = config_path.to_path_buf();
    tokio::spawn(async move {
        if let Err(e) = watcher::watch_config(watcher_path, watcher_tx, watcher_cancel).await {
            error!("config watcher error: {e}");
        }
    })
}

/// Log and track a single event. Returns `true` if the daemon should shut down.
fn handle_event(event: LightEvent, shared_config: &Arc<ArcSwap<AppConfig>>) -> bool {
    match event {
        LightEvent::OverallStatus(status) => {
            info!("overall status: {}", describe(status));
        }

        LightEvent::GroupChanged { group, status, .. } => {
            debug!("group {group} is {status}");
        }

        LightEvent::TicketReceived {
            ticket,
            summary,
            popup_url,
            group,
        } => {
            info!(
                "ticket on {group}: {} {}",
                ticket.as_deref().unwrap_or("-"),
                summary.as_deref().unwrap_or("")
            );
            if let Some(url) = popup_url {
                debug!("popup url: {url}");
            }
        }

        LightEvent::PresenceChanged { username, presence } => {
            info!("{username} is now {presence}");
        }

        LightEvent::DeviceConnectivity { connected, name } => {
            if connected {
                info!("busylight connected: {name}");
            } else {
                info!("busylight disconnected, waiting for reconnect...");
            }
        }

        LightEvent::ConnectionPhase(phase) => {
            info!("bus connection: {phase:?}");
        }

        LightEvent::ConfigReloaded(new_config) => {
            let old = shared_config.load();
            if old.bus.host != new_config.bus.host
                || old.bus.port != new_config.bus.port
                || old.user.username != new_config.user.username
                || old.user.all_groups != new_config.user.all_groups
                || old.user.groups != new_config.user.groups
                || old.user.known_users != new_config.user.known_users
            {
                warn!("bus and user settings take effect after a restart");
            }
            shared_config.store(new_config);
        }

        LightEvent::StatusApplied(_)
        | LightEvent::ManualStatus { .. }
        | LightEvent::ReconnectDevice => {}

        LightEvent::Shutdown => {
            info!("shutdown event received");
            return true;
        }
    }

    false
}
