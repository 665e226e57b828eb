use thiserror::Error;

/// Malformed or inconsistent wire content and batch inputs.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// JSON decode/encode failure on an envelope
    #[error(transparent)]
    Malformed(#[from] serde_json::Error),

    /// A component named by the order has no declared mode
    #[error("component `{name}` appears in component_order but has no mode")]
    MissingComponentMode { name: String },

    /// A mode was declared for a component outside the order
    #[error("component_modes declares `{name}` which is not in component_order")]
    UnknownComponent { name: String },

    /// Length prefix exceeds the frame sanity cap
    #[error("frame of {len} bytes exceeds the {max} byte cap")]
    FrameTooLarge { len: u32, max: u32 },

    /// Image dimensionality outside the supported 1..=5 range
    #[error("image `{path}` has {ndim} dimensions, expected 1 to 5")]
    BadImageShape { path: String, ndim: usize },

    /// Pixel buffer does not match shape x dtype
    #[error("image `{path}` carries {actual} bytes, shape and dtype imply {expected}")]
    PixelLengthMismatch {
        path: String,
        expected: u64,
        actual: u64,
    },

    /// Batch inputs of differing lengths
    #[error("data list has {items} entries but path list has {paths}")]
    LengthMismatch { items: usize, paths: usize },
}
