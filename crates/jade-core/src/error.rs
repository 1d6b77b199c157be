//! Error types for the bridge, its backends and the client

use thiserror::Error;

use crate::types::PortClass;

/// Errors reported by a native audio connection
#[derive(Error, Debug)]
pub enum BackendError {
    /// Audio server not running or refused the client
    #[error("Failed to open audio server connection: {0}")]
    Open(String),

    /// Server refused a port registration
    #[error("Failed to register port `{name}': {reason}")]
    PortRegistration { name: String, reason: String },

    /// Failed to install the process callback
    #[error("Failed to activate client: {0}")]
    Activation(String),

    /// Port graph connection failed
    #[error("Failed to connect `{source_port}' to `{destination}': {reason}")]
    Connection {
        source_port: String,
        destination: String,
        reason: String,
    },

    /// No port with this full name on the server
    #[error("No such port `{0}'")]
    UnknownPort(String),

    /// Failed to deactivate or close the server connection
    #[error("Failed to close client: {0}")]
    Close(String),

    /// Operation requires an inactive (or active) connection
    #[error("Invalid backend state: {0}")]
    InvalidState(&'static str),
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors surfaced by the client to its caller
#[derive(Error, Debug)]
pub enum ClientError {
    /// A port with this name already exists in the same class
    #[error("Port name `{name}' already assigned ({class})")]
    DuplicateName { name: String, class: PortClass },

    /// The client has been closed
    #[error("Client is closed")]
    ClientClosed,

    /// Ports can only be added before activation
    #[error("Client is already active")]
    AlreadyActive,

    /// Operation requires an active client
    #[error("Client is not active")]
    NotActive,

    /// No port with this name in the given class
    #[error("No such {class} port `{name}'")]
    UnknownPort { name: String, class: PortClass },

    /// System port index out of range
    #[error("No system port at index {index} ({available} available)")]
    NoSuchSystemPort { index: usize, available: usize },

    /// Output buffer ratio outside `0..=MAX_BUFFER_RATIO`
    #[error("Invalid output buffer ratio: {0}")]
    InvalidBufferRatio(f32),

    /// The synthesis pump is already running for this client
    #[error("Synthesis pump already running")]
    PumpRunning,

    /// Failed to spawn a worker thread
    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        source: std::io::Error,
    },

    /// Queue construction failed
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Native connection failure
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors from port queue construction
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue capacity must be greater than zero")]
    ZeroCapacity,
}

/// Errors from a blocking or non-blocking send into a port queue
///
/// The value is handed back in every case.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SendError<T> {
    /// Queue full (non-blocking send only)
    #[error("Port queue is full")]
    Full(T),

    /// The caller's stop signal was raised while waiting
    #[error("Send cancelled")]
    Stopped(T),

    /// The bridge side of the queue is gone (client closed)
    #[error("Port is disconnected")]
    Disconnected(T),
}

impl<T> SendError<T> {
    pub fn into_inner(self) -> T {
        match self {
            SendError::Full(value) | SendError::Stopped(value) | SendError::Disconnected(value) => value,
        }
    }
}
