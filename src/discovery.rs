use crate::config::ControllerConfig;
use crate::error::{InfusionError, Result};
use crate::types::InterfaceTable;
use crate::xml::{ConfigResponse, XmlAccumulator, GET_BACKUP_REQUEST, GET_INTERFACES_REQUEST};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

const READ_CHUNK_SIZE: usize = 8192;

/// Result of one discovery run on the configuration port
#[derive(Debug, Clone)]
pub struct DiscoveryOutcome {
    /// Interface name to id mapping advertised by the controller
    pub interfaces: InterfaceTable,
    /// Decoded project file
    pub project_xml: String,
    /// Whether the project came from the local cache instead of the controller
    pub from_cache: bool,
}

/// Single-use session on the controller's configuration port
///
/// Asks for the interface catalog, then for the project backup (unless a
/// cached copy may be used), and closes the socket once the project is in
/// hand.
#[derive(Debug, Clone)]
pub struct ConfigSession {
    use_cache: bool,
    cache_path: PathBuf,
    interface_dump_path: Option<PathBuf>,
}

impl ConfigSession {
    pub fn new(use_cache: bool, cache_path: impl Into<PathBuf>) -> Self {
        Self {
            use_cache,
            cache_path: cache_path.into(),
            interface_dump_path: None,
        }
    }

    pub fn from_config(config: &ControllerConfig) -> Self {
        Self {
            use_cache: config.use_cache,
            cache_path: config.cache_path.clone(),
            interface_dump_path: config.interface_dump_path.clone(),
        }
    }

    /// Write the interface table as JSON to `path` after each catalog
    pub fn with_interface_dump(mut self, path: impl Into<PathBuf>) -> Self {
        self.interface_dump_path = Some(path.into());
        self
    }

    /// Connect to the configuration port and run the exchange
    pub async fn run(&self, host: &str, port: u16) -> Result<DiscoveryOutcome> {
        tracing::info!("Connecting config session to {}:{}", host, port);
        let stream = TcpStream::connect((host, port)).await?;
        self.run_over(stream).await
    }

    /// Run the exchange over an already established transport
    pub async fn run_over<S>(&self, mut stream: S) -> Result<DiscoveryOutcome>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        stream.write_all(GET_INTERFACES_REQUEST.as_bytes()).await?;

        let mut accumulator = XmlAccumulator::new();
        let mut interfaces = InterfaceTable::new();
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];

        loop {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                tracing::warn!(
                    "Config session closed with {} byte(s) of incomplete response",
                    accumulator.buffered()
                );
                return Err(InfusionError::ConnectionClosed);
            }

            let Some(document) = accumulator.push(&chunk[..n]) else {
                continue;
            };

            match ConfigResponse::parse(&document) {
                Ok(ConfigResponse::Interfaces(table)) => {
                    tracing::info!("Controller advertises {} interface(s)", table.len());
                    self.dump_interfaces(&table).await;
                    interfaces = table;

                    if let Some(project_xml) = self.read_cache().await {
                        let _ = stream.shutdown().await;
                        return Ok(DiscoveryOutcome {
                            interfaces,
                            project_xml,
                            from_cache: true,
                        });
                    }

                    stream.write_all(GET_BACKUP_REQUEST.as_bytes()).await?;
                }
                Ok(ConfigResponse::Backup(project_xml)) => {
                    tracing::info!("Downloaded project file ({} bytes)", project_xml.len());
                    self.write_cache(&project_xml).await;
                    let _ = stream.shutdown().await;
                    return Ok(DiscoveryOutcome {
                        interfaces,
                        project_xml,
                        from_cache: false,
                    });
                }
                Ok(ConfigResponse::Other(root)) => {
                    tracing::debug!("Ignoring <{}> response on config session", root);
                }
                Err(e) => {
                    tracing::warn!("Discarding unusable config response: {}", e);
                }
            }
        }
    }

    async fn read_cache(&self) -> Option<String> {
        if !self.use_cache || !Path::new(&self.cache_path).exists() {
            return None;
        }
        match tokio::fs::read_to_string(&self.cache_path).await {
            Ok(xml) => {
                tracing::info!("Using cached project file {}", self.cache_path.display());
                Some(xml)
            }
            Err(e) => {
                tracing::warn!("Failed to read cached project {}: {}", self.cache_path.display(), e);
                None
            }
        }
    }

    async fn write_cache(&self, project_xml: &str) {
        if let Err(e) = tokio::fs::write(&self.cache_path, project_xml).await {
            tracing::warn!("Failed to cache project at {}: {}", self.cache_path.display(), e);
        }
    }

    async fn dump_interfaces(&self, table: &InterfaceTable) {
        let Some(path) = &self.interface_dump_path else {
            return;
        };
        let result = match serde_json::to_vec_pretty(table) {
            Ok(json) => tokio::fs::write(path, json).await.map_err(InfusionError::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            tracing::warn!("Failed to dump interface table to {}: {}", path.display(), e);
        }
    }
}
