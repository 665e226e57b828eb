pub mod accessor;
pub mod adapter;
pub mod cleanup;
pub mod dispatcher;
pub mod engine;
pub mod handlers;
pub mod item;
pub mod layer_key;
pub mod logger;
pub mod projection;

pub use adapter::{AckSink, AdapterFactory, HyperstackAxes, NullViewerAdapter, ViewerAdapter};
pub use dispatcher::{Dispatcher, DispatcherHandle};
pub use engine::DebouncedBatchEngine;
pub use item::{ResolvedPayload, StreamItem};
