use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Sink schema is invalid: {0}")]
    BadSchema(String),

    #[error("Failed to bind '{address}': {reason}")]
    BindFailed { address: String, reason: String },

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Sink is not running")]
    NotRunning,

    #[error("ZMQ error: {0}")]
    Socket(#[from] zmq::Error),
}

pub type TransportResult<T> = Result<T, TransportError>;
