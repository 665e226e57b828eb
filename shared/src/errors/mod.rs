mod buffer_errors;
mod config_errors;
mod handler_errors;
mod protocol_errors;
mod transport_errors;

pub use buffer_errors::BufferError;
pub use config_errors::ConfigError;
pub use handler_errors::HandlerError;
pub use protocol_errors::ProtocolError;
pub use transport_errors::TransportError;

use thiserror::Error;

/// Unified producer-facing error. `save`/`save_batch` surface this after
/// performing their cleanup obligations.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Payload kind this backend does not stream.
    #[error("unsupported payload kind `{0}` for a streaming backend")]
    Unsupported(String),
}
