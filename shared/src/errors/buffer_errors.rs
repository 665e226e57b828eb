use thiserror::Error;

/// All errors that can occur in the shared-memory subsystem.
#[derive(Debug, Error)]
pub enum BufferError {
    /// A segment with this name is already linked in the OS namespace
    #[error("shared memory segment `{name}` already exists")]
    AlreadyExists { name: String },

    /// No segment with this name is linked
    #[error("shared memory segment `{name}` not found")]
    NotFound { name: String },

    /// The OS refused to size or map the segment
    #[error("out of shared memory sizing `{name}` to {size} bytes")]
    OutOfMemory { name: String, size: usize },

    /// Zero-length segments cannot be mapped
    #[error("refusing zero-length shared memory segment `{name}`")]
    InvalidSize { name: String },

    /// Any other OS-level failure
    #[error("shared memory operation on `{name}` failed: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}
