pub mod backend;
pub mod queue_tracker;
pub mod transport;

pub use backend::{
    BatchOptions, FilenameParser, ImageArray, SendOutcome, SourceData, StreamingBackend,
};
pub use queue_tracker::{QueueTracker, QueueTrackerRegistry, StreamContext};
pub use transport::{PublishOutcome, TransportEndpoint, transport_url};
