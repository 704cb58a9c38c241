use crate::error::{InfusionError, Result};
use crate::protocol::Event;
use crate::types::Vid;
use tokio::sync::broadcast;

/// Live state change of a registered device
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceUpdate {
    /// Load level and derived power state changed
    Load { vid: Vid, brightness: u8, power: bool },

    /// Thermostat temperature changed
    Temperature { vid: Vid, celsius: f64 },
}

impl DeviceUpdate {
    pub fn vid(&self) -> Vid {
        match self {
            DeviceUpdate::Load { vid, .. } | DeviceUpdate::Temperature { vid, .. } => *vid,
        }
    }
}

/// Receiver for raw command channel events
pub type EventReceiver = Subscription<Event>;

/// Receiver for device state changes
pub type DeviceReceiver = Subscription<DeviceUpdate>;

/// Broadcast receiver wrapper mapping channel errors onto [`InfusionError`]
pub struct Subscription<T> {
    rx: broadcast::Receiver<T>,
}

impl<T: Clone> Subscription<T> {
    pub(crate) fn new(rx: broadcast::Receiver<T>) -> Self {
        Self { rx }
    }

    /// Receive the next item
    ///
    /// Fails with `ConnectionClosed` once every sender has been dropped.
    pub async fn recv(&mut self) -> Result<T> {
        self.rx.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => InfusionError::ConnectionClosed,
            broadcast::error::RecvError::Lagged(n) => {
                InfusionError::ChannelError(format!("Lagged by {} messages", n))
            }
        })
    }

    /// Try to receive an item without blocking
    ///
    /// Returns `None` if nothing is available.
    pub fn try_recv(&mut self) -> Result<Option<T>> {
        match self.rx.try_recv() {
            Ok(item) => Ok(Some(item)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(InfusionError::ConnectionClosed),
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                Err(InfusionError::ChannelError(format!("Lagged by {} messages", n)))
            }
        }
    }
}
