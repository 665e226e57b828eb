//! Receiver dispatcher: accepts producer connections, decodes batch frames,
//! resolves shared-memory payloads, and feeds the debounced processor.
//!
//! Ack routing depends on the listener mode. In request/reply mode the
//! producer blocks until its buffers are consumed, so every item is acked
//! right after copy-out and handler status stays local. In publish mode
//! nothing is acked until a handler has run; status flows back on the same
//! connection the batch arrived on.
//!
//! Shared-memory duty: once a segment is opened here the receiver owns its
//! removal, copy success or not. Segments that cannot be opened were never
//! delivered and are the producer's to reclaim.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use log::{debug, error, info, warn};

use shared::config::{ChannelMode, EngineConfig, StreamConfig};
use shared::display::DisplayConfig;
use shared::errors::{ConfigError, StreamError, TransportError};
use shared::messages::batch::byte_len;
use shared::messages::{AckStatus, BatchMessage, DType, Envelope, Item, Payload, PayloadKind, codec};
use shared::shm::SharedMemoryBuffer;

use crate::accessor::ComponentAccessor;
use crate::adapter::{AckSink, AdapterFactory, ViewerAdapter};
use crate::engine::DebouncedBatchEngine;
use crate::handlers::{HandlerContext, HandlerRegistry, WindowGroups};
use crate::item::{ResolvedPayload, StreamItem};
use crate::projection::group_items_by_component_modes;

/// Context accumulated alongside pending items; last write wins across the
/// debounce window.
pub struct BatchContext {
    pub display: DisplayConfig,
    pub images_dir: Option<String>,
}

/// Per-connection processor: owns the debounce engine and the dispatch from
/// flushed items to handlers.
pub struct BatchProcessor {
    engine: DebouncedBatchEngine<StreamItem, BatchContext>,
}

impl BatchProcessor {
    pub fn new(
        engine_config: &EngineConfig,
        adapter: Arc<dyn ViewerAdapter>,
        registry: Arc<HandlerRegistry>,
        groups: Arc<WindowGroups>,
    ) -> Self {
        let engine = DebouncedBatchEngine::new(
            move |items: Vec<StreamItem>, context: BatchContext| {
                process_batch(adapter.as_ref(), &registry, &groups, &items, &context);
            },
            engine_config.debounce_delay_ms,
            engine_config.max_debounce_wait_ms,
        );
        BatchProcessor { engine }
    }

    pub fn enqueue(&self, items: Vec<StreamItem>, context: BatchContext) {
        self.engine.enqueue(items, context);
    }

    /// Force immediate processing of the pending batch.
    pub fn flush(&self) {
        self.engine.flush();
    }

    /// Discard pending items without dispatching them.
    pub fn cleanup(&self) {
        self.engine.cleanup();
    }
}

/// Project flushed items into windows and hand each payload kind to its
/// handler. Handler failures are logged and acked negatively; they never
/// terminate the receiver.
fn process_batch(
    adapter: &dyn ViewerAdapter,
    registry: &HandlerRegistry,
    groups: &WindowGroups,
    items: &[StreamItem],
    context: &BatchContext,
) {
    let display = &context.display;
    let grouped = group_items_by_component_modes(
        items,
        &display.component_modes,
        &display.component_order,
        context.images_dir.as_deref(),
        None,
    );

    for (window_key, window_items) in &grouped.windows {
        let no_labels = Vec::new();
        let labels = grouped
            .fixed_window_labels
            .get(window_key)
            .unwrap_or(&no_labels);

        if let Err(e) = adapter.ensure_window(window_key, labels) {
            warn!("could not open window `{window_key}`: {e}");
            for item in window_items {
                adapter.ack(&item.item_id, AckStatus::Error, Some(&e.to_string()));
            }
            continue;
        }

        for kind in [PayloadKind::Image, PayloadKind::Rois, PayloadKind::Points] {
            let kind_items: Vec<&StreamItem> = window_items
                .iter()
                .copied()
                .filter(|item| item.kind() == kind)
                .collect();
            if kind_items.is_empty() {
                continue;
            }

            let Some(handler) = registry.resolve(kind) else {
                warn!("no handler registered for `{kind}` items");
                for item in &kind_items {
                    adapter.ack(&item.item_id, AckStatus::Error, Some("no handler"));
                }
                continue;
            };

            let handler_context = HandlerContext {
                adapter,
                window_key,
                items: &kind_items,
                display,
                components: ComponentAccessor::new(
                    &display.component_modes,
                    &display.component_order,
                    &kind_items,
                ),
                images_dir: context.images_dir.as_deref(),
                groups,
            };

            match handler.handle(&handler_context) {
                Ok(()) => {
                    for item in &kind_items {
                        adapter.ack(&item.item_id, AckStatus::Ok, None);
                    }
                }
                Err(e) => {
                    error!("`{kind}` handler failed for window `{window_key}`: {e}");
                    for item in &kind_items {
                        adapter.ack(&item.item_id, AckStatus::Error, Some(&e.to_string()));
                    }
                }
            }
        }
    }
}

/// Copy every shared-memory payload out into owned storage. Returns the
/// resolved items plus `(item_id, reason)` for items that failed.
fn resolve_items(batch_items: Vec<Item>) -> (Vec<StreamItem>, Vec<(String, String)>) {
    let mut resolved = Vec::with_capacity(batch_items.len());
    let mut failures = Vec::new();

    for item in batch_items {
        let payload = match item.payload {
            Payload::Image { shape, dtype, shm_name } => {
                match copy_out(&shm_name, &shape, dtype) {
                    Ok(pixels) => ResolvedPayload::Image { shape, dtype, pixels },
                    Err(reason) => {
                        warn!("could not resolve image `{}`: {reason}", item.path);
                        failures.push((item.item_id, reason));
                        continue;
                    }
                }
            }
            Payload::Rois { rois } => ResolvedPayload::Rois { records: rois },
            Payload::Points { points, attributes } => {
                ResolvedPayload::Points { points, attributes }
            }
        };
        resolved.push(StreamItem {
            path: item.path,
            item_id: item.item_id,
            metadata: item.metadata,
            payload,
        });
    }

    (resolved, failures)
}

fn copy_out(shm_name: &str, shape: &[u64], dtype: DType) -> Result<Vec<u8>, String> {
    let expected =
        byte_len(shape, dtype).ok_or_else(|| "shape overflows the byte length".to_string())?;
    let buffer = SharedMemoryBuffer::open(shm_name).map_err(|e| e.to_string())?;

    let pixels = if (buffer.len() as u64) < expected {
        Err(format!(
            "segment `{shm_name}` holds {} bytes, expected {expected}",
            buffer.len()
        ))
    } else {
        Ok(buffer.bytes()[..expected as usize].to_vec())
    };

    drop(buffer);
    if let Err(e) = SharedMemoryBuffer::unlink(shm_name) {
        warn!("failed to unlink consumed segment `{shm_name}`: {e}");
    }
    pixels
}

fn receive_batch(
    batch: BatchMessage,
    mode: ChannelMode,
    reply_sink: &AckSink,
    processor: &BatchProcessor,
    peer: &str,
) {
    if let Err(e) = batch.validate() {
        warn!("malformed batch from `{peer}`: {e}");
        // Reject every item so a blocked request/reply producer is released.
        for item in &batch.images {
            reply_sink.send(&item.item_id, AckStatus::Error, Some(&e.to_string()));
        }
        return;
    }

    info!("received batch of {} items from `{peer}`", batch.images.len());
    let display = batch.display_config;
    let images_dir = batch.images_dir;
    let (resolved, failures) = resolve_items(batch.images);

    match mode {
        ChannelMode::Reqrep => {
            // Consumption acks: the producer is blocked on these and only
            // releases its buffer handles once every item has answered.
            for item in &resolved {
                reply_sink.send(&item.item_id, AckStatus::Ok, None);
            }
            for (item_id, reason) in &failures {
                reply_sink.send(item_id, AckStatus::Error, Some(reason));
            }
        }
        ChannelMode::Publish => {
            for (item_id, reason) in &failures {
                reply_sink.send(item_id, AckStatus::Error, Some(reason));
            }
        }
    }

    if !resolved.is_empty() {
        processor.enqueue(resolved, BatchContext { display, images_dir });
    }
}

fn handle_connection(
    stream: TcpStream,
    engine_config: EngineConfig,
    mode: ChannelMode,
    factory: AdapterFactory,
) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    let writer = match stream.try_clone() {
        Ok(writer) => Arc::new(Mutex::new(writer)),
        Err(e) => {
            error!("could not clone connection from `{peer}`: {e}");
            return;
        }
    };
    let reply_sink = AckSink::Stream(Arc::clone(&writer));
    // Handler-status acks only reach the wire in publish mode; request/reply
    // peers already got their consumption ack.
    let adapter_sink = match mode {
        ChannelMode::Publish => AckSink::Stream(writer),
        ChannelMode::Reqrep => AckSink::Inert,
    };

    let adapter = factory(adapter_sink);
    let registry = Arc::new(HandlerRegistry::with_default_handlers());
    let groups = Arc::new(WindowGroups::default());
    let processor = BatchProcessor::new(&engine_config, adapter, registry, groups);

    let mut reader = stream;
    loop {
        match codec::read_frame(&mut reader) {
            Ok(Some(frame)) => match codec::decode(&frame) {
                Ok(Envelope::Batch(batch)) => {
                    receive_batch(batch, mode, &reply_sink, &processor, &peer)
                }
                Ok(Envelope::Ack(_)) => warn!("unexpected ack frame from `{peer}`"),
                Err(e) => warn!("undecodable frame from `{peer}`: {e}"),
            },
            Ok(None) => break,
            Err(e) => {
                warn!("connection from `{peer}` failed: {e}");
                break;
            }
        }
    }

    // Do not let pending items die with the connection.
    processor.flush();
    debug!("connection from `{peer}` closed");
}

pub struct Dispatcher;

impl Dispatcher {
    /// Bind the listener declared in `[listener]` and start accepting
    /// producer connections, one named thread per connection.
    pub fn bind(config: Arc<StreamConfig>, factory: AdapterFactory) -> Result<DispatcherHandle, StreamError> {
        let listener_config = config.listener.clone().ok_or_else(|| {
            ConfigError::Validation("[listener] section is required to run a viewer host".into())
        })?;

        let listener = TcpListener::bind(&listener_config.bind).map_err(|source| {
            TransportError::Connect {
                destination: listener_config.bind.clone(),
                source,
            }
        })?;
        let addr = listener.local_addr().map_err(|source| TransportError::Connect {
            destination: listener_config.bind.clone(),
            source,
        })?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let accept_shutdown = Arc::clone(&shutdown);
        let engine_config = config.engine.clone();
        let mode = listener_config.mode;

        let accept = thread::Builder::new()
            .name("dispatcher_accept".into())
            .spawn(move || {
                for conn in listener.incoming() {
                    if accept_shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                    match conn {
                        Ok(stream) => {
                            let engine_config = engine_config.clone();
                            let factory = Arc::clone(&factory);
                            let spawned = thread::Builder::new()
                                .name("viewer_conn".into())
                                .spawn(move || {
                                    handle_connection(stream, engine_config, mode, factory)
                                });
                            if let Err(e) = spawned {
                                error!("failed to spawn connection thread: {e}");
                            }
                        }
                        Err(e) => warn!("accept failed: {e}"),
                    }
                }
                debug!("dispatcher accept loop exited");
            })
            .map_err(|source| TransportError::Connect {
                destination: "dispatcher_accept".into(),
                source,
            })?;

        info!(
            "viewer host listening on {addr} for {} ({mode} acks)",
            listener_config.viewer
        );
        Ok(DispatcherHandle {
            addr,
            shutdown,
            accept: Mutex::new(Some(accept)),
        })
    }
}

/// Running dispatcher. Connection threads outlive `stop` only until their
/// producers hang up; the accept loop itself is joined.
pub struct DispatcherHandle {
    addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    accept: Mutex<Option<JoinHandle<()>>>,
}

impl DispatcherHandle {
    /// Actual bound address; useful when the configuration asked for port 0.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Idempotent shutdown: raise the flag, poke the listener awake, join
    /// the accept loop.
    pub fn stop(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = TcpStream::connect(self.addr);
        if let Some(handle) = self.accept.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DispatcherHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::shm;
    use std::collections::BTreeMap;

    #[test]
    fn resolve_items_passes_inline_payloads_through() {
        let items = vec![Item {
            path: "rois.json".into(),
            item_id: "r1".into(),
            metadata: BTreeMap::new(),
            payload: Payload::Rois {
                rois: vec![vec![1, 2, 3]],
            },
        }];
        let (resolved, failures) = resolve_items(items);
        assert_eq!(resolved.len(), 1);
        assert!(failures.is_empty());
        match &resolved[0].payload {
            ResolvedPayload::Rois { records } => assert_eq!(records[0], vec![1, 2, 3]),
            other => panic!("expected rois, got {:?}", other.kind()),
        }
    }

    #[test]
    fn resolve_items_copies_out_and_unlinks_segments() {
        let name = shm::unique_name("test_");
        let mut buffer = SharedMemoryBuffer::create(&name, 4).unwrap();
        buffer.bytes_mut().copy_from_slice(&[1, 2, 3, 4]);
        drop(buffer);

        let items = vec![Item {
            path: "a.tif".into(),
            item_id: "i1".into(),
            metadata: BTreeMap::new(),
            payload: Payload::Image {
                shape: vec![4],
                dtype: DType::U8,
                shm_name: name.clone(),
            },
        }];
        let (resolved, failures) = resolve_items(items);
        assert!(failures.is_empty());
        match &resolved[0].payload {
            ResolvedPayload::Image { pixels, .. } => assert_eq!(pixels, &vec![1, 2, 3, 4]),
            other => panic!("expected image, got {:?}", other.kind()),
        }
        // The receiver is the unlinker on the success path.
        assert!(SharedMemoryBuffer::open(&name).is_err());
    }

    #[test]
    fn resolve_items_reports_missing_segments() {
        let items = vec![Item {
            path: "a.tif".into(),
            item_id: "gone".into(),
            metadata: BTreeMap::new(),
            payload: Payload::Image {
                shape: vec![4],
                dtype: DType::U8,
                shm_name: "/test_never_created".into(),
            },
        }];
        let (resolved, failures) = resolve_items(items);
        assert!(resolved.is_empty());
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "gone");
    }
}
