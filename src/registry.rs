use crate::device::Device;
use crate::error::{InfusionError, Result};
use crate::protocol::Event;
use crate::subscription::{DeviceReceiver, DeviceUpdate, EventReceiver};
use crate::types::Vid;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, watch};

const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle of the device list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryStatus {
    /// No discovery run has started
    Idle,
    /// Configuration is being downloaded or classified
    Discovering,
    /// Every classification has settled
    Ready,
    /// Discovery failed; the message describes why
    Failed(String),
}

#[derive(Default)]
struct RegistryState {
    devices: Vec<Device>,
    pending_requests: usize,
    parsing_done: bool,
}

/// In-memory list of classified devices
///
/// The list is complete once the configuration walk has finished and no
/// classification request is pending; [`DeviceRegistry::devices`] waits for
/// that point.
#[derive(Clone)]
pub struct DeviceRegistry {
    state: Arc<Mutex<RegistryState>>,
    status_tx: Arc<watch::Sender<RegistryStatus>>,
    update_tx: broadcast::Sender<DeviceUpdate>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        let (status_tx, _) = watch::channel(RegistryStatus::Idle);
        let (update_tx, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(RegistryState::default())),
            status_tx: Arc::new(status_tx),
            update_tx,
        }
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mark the start of a discovery run
    ///
    /// Returns `false` if a run already started or finished.
    pub fn begin_pass(&self) -> bool {
        self.status_tx.send_if_modified(|status| match status {
            RegistryStatus::Idle | RegistryStatus::Failed(_) => {
                *status = RegistryStatus::Discovering;
                true
            }
            _ => false,
        })
    }

    /// Mark the run as failed and release everyone waiting for devices
    pub fn fail_pass(&self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::error!("Discovery failed: {}", reason);
        {
            let mut state = self.state();
            state.pending_requests = 0;
            state.parsing_done = false;
        }
        self.status_tx.send_replace(RegistryStatus::Failed(reason));
    }

    /// Count a classification request that has been issued
    pub fn begin_request(&self) {
        self.state().pending_requests += 1;
    }

    /// Settle a classification request, registering its device if any
    pub fn complete_request(&self, device: Option<Device>) {
        {
            let mut state = self.state();
            if let Some(device) = device {
                if state.devices.iter().any(|d| d.vid() == device.vid()) {
                    tracing::warn!("Duplicate VID {} ignored ({})", device.vid(), device.name());
                } else {
                    state.devices.push(device);
                }
            }
            state.pending_requests = state.pending_requests.saturating_sub(1);
        }
        self.check_ready();
    }

    /// The configuration walk is over; no more requests will be counted
    pub fn finish_parsing(&self) {
        self.state().parsing_done = true;
        self.check_ready();
    }

    fn check_ready(&self) {
        let (ready, count, pending, parsing_done) = {
            let state = self.state();
            (
                state.parsing_done && state.pending_requests == 0,
                state.devices.len(),
                state.pending_requests,
                state.parsing_done,
            )
        };

        if ready {
            let changed = self.status_tx.send_if_modified(|status| {
                if *status == RegistryStatus::Discovering {
                    *status = RegistryStatus::Ready;
                    true
                } else {
                    false
                }
            });
            if changed {
                tracing::info!("Device registry ready with {} device(s)", count);
            }
        } else {
            tracing::debug!("Device registry not ready (parsed: {}, pending: {})", parsing_done, pending);
        }
    }

    pub fn status(&self) -> RegistryStatus {
        self.status_tx.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.status() == RegistryStatus::Ready
    }

    pub fn pending_requests(&self) -> usize {
        self.state().pending_requests
    }

    /// Wait for the complete device list
    ///
    /// Waits while no run has started or a run is in progress.
    pub async fn devices(&self) -> Result<Vec<Device>> {
        let mut rx = self.status_tx.subscribe();
        let status = rx
            .wait_for(|s| matches!(s, RegistryStatus::Ready | RegistryStatus::Failed(_)))
            .await
            .map_err(|_| InfusionError::ChannelError("Registry status channel closed".to_string()))?
            .clone();

        match status {
            RegistryStatus::Failed(reason) => Err(InfusionError::DiscoveryFailed(reason)),
            _ => Ok(self.state().devices.clone()),
        }
    }

    /// Devices registered so far, without waiting
    pub fn snapshot(&self) -> Vec<Device> {
        self.state().devices.clone()
    }

    pub fn device(&self, vid: Vid) -> Option<Device> {
        self.state().devices.iter().find(|d| d.vid() == vid).cloned()
    }

    /// Route a command channel event to the device it concerns
    pub fn apply_event(&self, event: &Event) -> Option<DeviceUpdate> {
        let vid = event.vid()?;
        let device = self.device(vid)?;
        let update = device.apply(event)?;
        let _ = self.update_tx.send(update.clone());
        Some(update)
    }

    /// Subscribe to device state changes
    pub fn subscribe(&self) -> DeviceReceiver {
        DeviceReceiver::new(self.update_tx.subscribe())
    }

    /// Keep device state in sync with the command channel
    pub(crate) fn spawn_tracker(&self, mut events: EventReceiver) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(Event::Disconnected) => {
                        tracing::warn!("Command session lost, device state is no longer live");
                    }
                    Ok(event) => {
                        registry.apply_event(&event);
                    }
                    Err(InfusionError::ConnectionClosed) => break,
                    Err(e) => tracing::warn!("Device tracker: {}", e),
                }
            }
            tracing::debug!("Device tracker stopped");
        })
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
