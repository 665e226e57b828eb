use thiserror::Error;

/// Failures inside a receiver-side item handler or the viewer adapter it
/// drives. These are logged and acked negatively; they never take the
/// receiver down.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// An image item arrived without its pixel data
    #[error("item `{item_id}` has no pixel data")]
    MissingPixels { item_id: String },

    /// The viewer adapter rejected an operation
    #[error("viewer rejected {operation}: {reason}")]
    Viewer { operation: String, reason: String },
}
