use thiserror::Error;

/// Result type for InFusion operations
pub type Result<T> = std::result::Result<T, InfusionError>;

/// Errors that can occur when talking to an InFusion controller
#[derive(Error, Debug)]
pub enum InfusionError {
    /// Socket connect/read/write failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection was closed by the controller or dropped locally
    #[error("Connection closed")]
    ConnectionClosed,

    /// Request timed out waiting for a reply
    #[error("Request timeout")]
    Timeout,

    /// XML document could not be parsed
    #[error("XML error: {0}")]
    Xml(#[from] roxmltree::Error),

    /// Embedded file payload was not valid base64
    #[error("Base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// JSON serialization error (interface table dump)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid or unexpected response from the controller
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Channel receive error
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// Discovery run failed before the device list was complete
    #[error("Discovery failed: {0}")]
    DiscoveryFailed(String),

    /// Operation not available for this kind of device
    #[error("{operation} is not supported by {kind} device {vid}")]
    Unsupported {
        operation: &'static str,
        kind: crate::types::DeviceKind,
        vid: crate::types::Vid,
    },
}
