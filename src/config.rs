use crate::types::Vid;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

/// Default control port
pub const COMMAND_PORT: u16 = 3001;

/// Default configuration port
pub const CONFIG_PORT: u16 = 2001;

const DEFAULT_PROBE_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_COMMAND_PACING_MS: u64 = 1;
const DEFAULT_PROBE_PACING_MS: u64 = 5;

/// Site-specific overrides for loads that must never be dimmed
///
/// `relay_vids` forces classification as a relay even when the object
/// declares a power profile; `set_level_vids` switches those loads off with
/// `Load.SetLevel` instead of a ramp.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RelayPolicy {
    pub relay_vids: BTreeSet<Vid>,
    pub set_level_vids: BTreeSet<Vid>,
}

impl RelayPolicy {
    /// Policy with no overrides
    pub fn empty() -> Self {
        Self {
            relay_vids: BTreeSet::new(),
            set_level_vids: BTreeSet::new(),
        }
    }

    pub fn is_forced_relay(&self, vid: Vid) -> bool {
        self.relay_vids.contains(&vid)
    }

    pub fn uses_set_level(&self, vid: Vid) -> bool {
        self.set_level_vids.contains(&vid)
    }
}

impl Default for RelayPolicy {
    fn default() -> Self {
        Self {
            relay_vids: [244, 237, 238, 251].into_iter().collect(),
            set_level_vids: [244, 237, 238].into_iter().collect(),
        }
    }
}

/// Settings for a controller endpoint
///
/// Deserializable from the host's configuration file; every field except
/// `host` has a default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub host: String,
    pub command_port: u16,
    pub config_port: u16,

    /// Reuse the cached project file instead of downloading it
    pub use_cache: bool,

    /// Where the downloaded project file is stored
    pub cache_path: PathBuf,

    /// Optional JSON dump of the interface table, for debugging
    pub interface_dump_path: Option<PathBuf>,

    /// Milliseconds to wait for a capability probe reply once it is written;
    /// `None` waits forever
    pub probe_timeout_ms: Option<u64>,

    pub command_pacing_ms: u64,
    pub probe_pacing_ms: u64,

    pub relay_policy: RelayPolicy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            command_port: COMMAND_PORT,
            config_port: CONFIG_PORT,
            use_cache: false,
            cache_path: std::env::temp_dir().join("vantage.dc"),
            interface_dump_path: None,
            probe_timeout_ms: Some(DEFAULT_PROBE_TIMEOUT_MS),
            command_pacing_ms: DEFAULT_COMMAND_PACING_MS,
            probe_pacing_ms: DEFAULT_PROBE_PACING_MS,
            relay_policy: RelayPolicy::default(),
        }
    }
}

impl ControllerConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    pub fn ports(mut self, command_port: u16, config_port: u16) -> Self {
        self.command_port = command_port;
        self.config_port = config_port;
        self
    }

    pub fn use_cache(mut self, enabled: bool) -> Self {
        self.use_cache = enabled;
        self
    }

    pub fn cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = path.into();
        self
    }

    pub fn interface_dump_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.interface_dump_path = Some(path.into());
        self
    }

    pub fn probe_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.probe_timeout_ms = timeout.map(millis);
        self
    }

    pub fn pacing(mut self, command: Duration, probe: Duration) -> Self {
        self.command_pacing_ms = millis(command);
        self.probe_pacing_ms = millis(probe);
        self
    }

    pub fn relay_policy(mut self, policy: RelayPolicy) -> Self {
        self.relay_policy = policy;
        self
    }

    /// Options for the command session derived from these settings
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            command_pacing: Duration::from_millis(self.command_pacing_ms),
            probe_pacing: Duration::from_millis(self.probe_pacing_ms),
            probe_timeout: self.probe_timeout_ms.map(Duration::from_millis),
            relay_policy: self.relay_policy.clone(),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Pacing, timeout and policy knobs of a command session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Pause after each state-changing command
    pub command_pacing: Duration,
    /// Pause before each capability probe
    pub probe_pacing: Duration,
    pub probe_timeout: Option<Duration>,
    pub relay_policy: RelayPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        ControllerConfig::default().session_options()
    }
}
