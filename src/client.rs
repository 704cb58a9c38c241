use crate::classifier::{Classified, Classifier, InterfaceProbe};
use crate::config::ControllerConfig;
use crate::connection::CommandSession;
use crate::device::Device;
use crate::discovery::ConfigSession;
use crate::error::Result;
use crate::project::parse_project;
use crate::registry::DeviceRegistry;
use crate::subscription::{DeviceReceiver, EventReceiver};
use crate::types::{InterfaceTable, Vid};
use std::sync::{Arc, RwLock};

/// Client for a Vantage InFusion controller
///
/// Holds the long-lived command session, the interface table learned during
/// discovery and the device registry. The configuration session is opened
/// only for the duration of [`InfusionController::discover`].
pub struct InfusionController {
    config: ControllerConfig,
    session: Arc<CommandSession>,
    interfaces: Arc<RwLock<InterfaceTable>>,
    registry: DeviceRegistry,
    classifier: Classifier,
}

impl InfusionController {
    /// Connect the command session to the controller
    ///
    /// # Example
    ///
    /// ```no_run
    /// use vantage_infusion::{ControllerConfig, InfusionController};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let controller = InfusionController::connect(ControllerConfig::new("192.168.1.50")).await?;
    ///     controller.discover().await?;
    ///     for device in controller.devices().await? {
    ///         println!("{} {} ({})", device.vid(), device.name(), device.kind());
    ///     }
    ///     Ok(())
    /// }
    /// ```
    pub async fn connect(config: ControllerConfig) -> Result<Self> {
        tracing::info!("VantagePlatform for InFusion Controller at {}", config.host);
        let session =
            CommandSession::connect(&config.host, config.command_port, config.session_options()).await?;
        Ok(Self::with_session(config, session))
    }

    /// Build a controller around an existing command session
    pub fn with_session(config: ControllerConfig, session: CommandSession) -> Self {
        let registry = DeviceRegistry::new();
        registry.spawn_tracker(session.subscribe());

        Self {
            classifier: Classifier::new(config.relay_policy.clone()),
            config,
            session: Arc::new(session),
            interfaces: Arc::new(RwLock::new(InterfaceTable::new())),
            registry,
        }
    }

    /// Download the project and classify its objects
    ///
    /// Returns once the registry is ready. A second call after a successful
    /// run does nothing.
    pub async fn discover(&self) -> Result<()> {
        if !self.registry.begin_pass() {
            tracing::warn!("Discovery already ran, ignoring");
            return Ok(());
        }

        let outcome = match ConfigSession::from_config(&self.config)
            .run(&self.config.host, self.config.config_port)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                self.registry.fail_pass(e.to_string());
                return Err(e);
            }
        };

        self.classify_project(outcome.interfaces, &outcome.project_xml).await
    }

    /// Classify an already downloaded project with the given interface table
    async fn classify_project(&self, interfaces: InterfaceTable, project_xml: &str) -> Result<()> {
        *self.interfaces.write().unwrap_or_else(|e| e.into_inner()) = interfaces;

        let objects = match parse_project(project_xml) {
            Ok(objects) => objects,
            Err(e) => {
                self.registry.fail_pass(e.to_string());
                return Err(e);
            }
        };

        let resolver = self.resolver();
        let session = self.session.clone();
        self.classifier
            .run(&objects, &resolver, &self.registry, |c: Classified| {
                Device::new(session.clone(), c.vid, c.name, c.kind)
            })
            .await;

        tracing::info!("VantagePlatform for InFusion Controller (is open for business)");
        Ok(())
    }

    fn resolver(&self) -> InterfaceResolver {
        InterfaceResolver {
            session: self.session.clone(),
            interfaces: self.interfaces.clone(),
        }
    }

    /// Wait for and return the complete device list
    pub async fn devices(&self) -> Result<Vec<Device>> {
        self.registry.devices().await
    }

    pub fn device(&self, vid: Vid) -> Option<Device> {
        self.registry.device(vid)
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Interface table learned during the last discovery
    pub fn interfaces(&self) -> InterfaceTable {
        self.interfaces.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn session(&self) -> Arc<CommandSession> {
        self.session.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Subscribe to raw command channel events
    pub fn subscribe_events(&self) -> EventReceiver {
        self.session.subscribe()
    }

    /// Subscribe to device state changes
    pub fn subscribe_devices(&self) -> DeviceReceiver {
        self.registry.subscribe()
    }

    /// Ask whether object `vid` implements the named interface
    ///
    /// Interfaces the controller never advertised are reported unsupported
    /// without touching the network.
    pub async fn supports_interface(&self, vid: Vid, interface: &str) -> Result<bool> {
        self.resolver().probe(vid, interface).await
    }
}

/// Resolves interface names and probes them over the command session
struct InterfaceResolver {
    session: Arc<CommandSession>,
    interfaces: Arc<RwLock<InterfaceTable>>,
}

impl InterfaceResolver {
    async fn probe(&self, vid: Vid, interface: &str) -> Result<bool> {
        let iid = self
            .interfaces
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(interface);

        match iid {
            Some(iid) => self.session.probe_interface_support(vid, iid).await,
            None => {
                tracing::debug!("Interface {} not advertised, VID {} treated as unsupported", interface, vid);
                Ok(false)
            }
        }
    }
}

impl InterfaceProbe for InterfaceResolver {
    async fn supports(&self, vid: Vid, interface: &str) -> bool {
        self.probe(vid, interface).await.unwrap_or_else(|e| {
            tracing::warn!("Interface probe {} for VID {} failed: {}", interface, vid, e);
            false
        })
    }
}
