use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum SyncError {
    #[error("Attribute not found on device: {0}")]
    AttributeNotFound(String),

    #[error("Gateway transport failure: {0}")]
    Transport(String),

    #[error("Gateway command timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Feature not supported by device: {0}")]
    Unsupported(String),

    #[error("Device gateway is closed")]
    GatewayClosed,

    #[error("Sync engine has been disposed")]
    Disposed,

    #[error("Failed to decode attribute value: {0}")]
    Decode(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),

    #[error(transparent)]
    MqttError(#[from] rumqttc::ClientError),
}

impl SyncError {
    /// Whether the fault can be absorbed by falling back to polling. The
    /// others leave the binding failed until it is re-initialized.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            SyncError::GatewayClosed
                | SyncError::Disposed
                | SyncError::AttributeNotFound(_)
                | SyncError::Config(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
