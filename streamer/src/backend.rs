//! Producer-side streaming backend.
//!
//! `save_batch` is the hot path: it stages image payloads into named
//! shared-memory segments, assembles one batch frame, registers every item
//! with the queue tracker, and hands the frame to the transport in the mode
//! the destination was configured with.
//!
//! Buffer hand-off rule on every path out of `save_batch`:
//!   - delivered (acked or queued on the publisher): close our handles,
//!     never unlink; the receiver unlinks after copying out.
//!   - dropped, failed, or timed out: close and unlink; the receiver never
//!     attached, so the name would otherwise leak.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use uuid::Uuid;

use shared::config::{ChannelMode, StreamConfig};
use shared::display::{ComponentValue, DisplayConfig, ViewerKind};
use shared::errors::{ProtocolError, StreamError, TransportError};
use shared::messages::batch::{byte_len, validate_shape};
use shared::messages::{AckStatus, BatchMessage, DType, Envelope, Item, Payload, codec};
use shared::shm::{self, SharedMemoryBuffer};

use crate::queue_tracker::StreamContext;
use crate::transport::{PublishOutcome, TransportEndpoint, transport_url};

/// Parses component metadata out of an origin filename. Injected by the
/// caller; the backend never interprets filenames itself.
pub trait FilenameParser: Send + Sync {
    fn parse_filename(&self, filename: &str) -> BTreeMap<String, ComponentValue>;
}

/// A numeric array staged for streaming: raw bytes plus the shape and dtype
/// needed to reinterpret them on the other side.
pub struct ImageArray {
    pub shape: Vec<u64>,
    pub dtype: DType,
    pub data: Vec<u8>,
}

/// Input payload offered to the backend.
pub enum SourceData {
    Image(ImageArray),
    Rois(Vec<Vec<u8>>),
    Points {
        points: Vec<Vec<f64>>,
        attributes: Option<BTreeMap<String, ComponentValue>>,
    },
    /// Textual artifacts (JSON, CSV) that file backends persist; streaming
    /// backends do not handle these.
    Text(String),
}

impl SourceData {
    fn kind_name(&self) -> &'static str {
        match self {
            SourceData::Image(_) => "image",
            SourceData::Rois(_) => "rois",
            SourceData::Points { .. } => "points",
            SourceData::Text(_) => "text",
        }
    }
}

/// Per-call options for `save`/`save_batch`.
pub struct BatchOptions<'a> {
    /// Destination name, resolved through `[destinations.<name>]`
    pub dest: &'a str,
    pub display_config: &'a DisplayConfig,
    pub parser: &'a dyn FilenameParser,
    pub step_name: &'a str,
    pub step_index: i64,
    /// Pre-built source value; defaults to the parent directory of the path
    pub source: Option<&'a str>,
    pub plate_path: Option<&'a str>,
    /// Plate images directory, forwarded so ROI windows land with their images
    pub images_dir: Option<&'a str>,
}

/// How a batch left the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Request/reply send, every item acked positively.
    Delivered,
    /// Queued on the publisher; acks arrive asynchronously.
    Published,
    /// Publisher queue was full; the batch was dropped and cleaned up.
    Dropped,
    /// Nothing to send.
    Empty,
}

/// Streaming storage backend for one viewer family.
pub struct StreamingBackend {
    viewer: ViewerKind,
    config: Arc<StreamConfig>,
    context: Arc<StreamContext>,
    endpoint: TransportEndpoint,
    /// Segments created but not yet handed off, keyed by OS name.
    buffers: Mutex<HashMap<String, SharedMemoryBuffer>>,
}

impl StreamingBackend {
    pub fn new(viewer: ViewerKind, config: Arc<StreamConfig>, context: Arc<StreamContext>) -> Self {
        let endpoint = TransportEndpoint::new(config.transport.clone());
        StreamingBackend {
            viewer,
            config,
            context,
            endpoint,
            buffers: Mutex::new(HashMap::new()),
        }
    }

    /// Stream a single payload. Payload kinds this backend does not handle
    /// are ignored without error; file backends own those.
    pub fn save(&self, data: SourceData, path: &str, opts: &BatchOptions<'_>) -> Result<(), StreamError> {
        if matches!(data, SourceData::Text(_)) {
            debug!("ignoring text payload `{path}` offered to a streaming backend");
            return Ok(());
        }
        self.save_batch(vec![data], &[path], opts).map(|_| ())
    }

    /// Stream a batch of payloads as one atomic message.
    pub fn save_batch(
        &self,
        data: Vec<SourceData>,
        paths: &[&str],
        opts: &BatchOptions<'_>,
    ) -> Result<SendOutcome, StreamError> {
        if data.len() != paths.len() {
            return Err(ProtocolError::LengthMismatch {
                items: data.len(),
                paths: paths.len(),
            }
            .into());
        }
        if data.is_empty() {
            return Ok(SendOutcome::Empty);
        }
        if let Some(bad) = data.iter().find(|d| matches!(d, SourceData::Text(_))) {
            return Err(StreamError::Unsupported(bad.kind_name().to_string()));
        }
        opts.display_config.validate()?;

        let dest = self.config.destination(opts.dest)?;
        let dest_key = dest.key();
        let mode = dest.mode;
        let url = transport_url(&dest.host, dest.port, mode);
        if dest.viewer != self.viewer {
            warn!(
                "destination `{}` is configured for {} but this backend streams to {}",
                opts.dest, dest.viewer, self.viewer
            );
        }

        // Stage payloads. Segment names created here must be unlinked if
        // anything below fails before hand-off.
        let mut created: Vec<String> = Vec::new();
        let built = self.build_items(data, paths, opts, &mut created);
        let (items, item_ids) = match built {
            Ok(pair) => pair,
            Err(e) => {
                self.release_buffers(&created, true);
                return Err(e);
            }
        };

        let message = BatchMessage::new(
            items,
            opts.display_config.clone(),
            opts.images_dir.map(str::to_string),
        );
        let frame = match codec::encode(&Envelope::from(message)) {
            Ok(frame) => frame,
            Err(e) => {
                self.release_buffers(&created, true);
                return Err(e.into());
            }
        };

        // Registration strictly precedes the send so a fast local ack can
        // never observe an unknown id.
        let tracker = self.context.trackers.get_or_create(&dest_key, self.viewer);
        for id in &item_ids {
            tracker.register_sent(id);
        }

        match mode {
            ChannelMode::Publish => {
                match self.endpoint.publish(&dest_key, frame, &tracker) {
                    Ok(PublishOutcome::Sent) => {
                        self.release_buffers(&created, false);
                        info!("published batch of {} items to `{url}`", item_ids.len());
                        Ok(SendOutcome::Published)
                    }
                    Ok(PublishOutcome::Busy) => {
                        warn!(
                            "viewer at `{url}` busy, dropped batch of {} items",
                            item_ids.len()
                        );
                        tracker.discard(&item_ids);
                        self.release_buffers(&created, true);
                        Ok(SendOutcome::Dropped)
                    }
                    Err(e) => {
                        tracker.discard(&item_ids);
                        self.release_buffers(&created, true);
                        Err(e.into())
                    }
                }
            }
            ChannelMode::Reqrep => {
                match self.endpoint.request(&dest_key, &frame, item_ids.len()) {
                    Ok(acks) => {
                        let mut negative: Option<TransportError> = None;
                        for ack in &acks {
                            let Some(id) = &ack.item_id else {
                                warn!("ack without item id from `{dest_key}`");
                                continue;
                            };
                            tracker.mark_ack(id, ack.status, ack.reason.as_deref());
                            if ack.status == AckStatus::Error && negative.is_none() {
                                negative = Some(TransportError::NegativeAck {
                                    item_id: id.clone(),
                                    reason: ack
                                        .reason
                                        .clone()
                                        .unwrap_or_else(|| "no reason given".into()),
                                });
                            }
                        }
                        match negative {
                            None => {
                                self.release_buffers(&created, false);
                                info!("delivered batch of {} items to `{url}`", item_ids.len());
                                Ok(SendOutcome::Delivered)
                            }
                            Some(e) => {
                                // Rejected segments were never consumed, so
                                // the unlink duty stays here. Names the
                                // receiver already removed unlink as a no-op.
                                self.release_buffers(&created, true);
                                Err(e.into())
                            }
                        }
                    }
                    Err(e) => {
                        tracker.discard(&item_ids);
                        self.release_buffers(&created, true);
                        Err(e.into())
                    }
                }
            }
        }
    }

    /// Scoped teardown: close publishers and unlink any segment that never
    /// reached a receiver.
    pub fn cleanup(&self) {
        self.endpoint.cleanup();
        let mut map = self.buffers.lock().unwrap();
        for (name, buf) in map.drain() {
            drop(buf);
            if let Err(e) = SharedMemoryBuffer::unlink(&name) {
                warn!("failed to clean up shared memory `{name}`: {e}");
            }
        }
        debug!("streaming backend for {} cleaned up", self.viewer);
    }

    fn build_items(
        &self,
        data: Vec<SourceData>,
        paths: &[&str],
        opts: &BatchOptions<'_>,
        created: &mut Vec<String>,
    ) -> Result<(Vec<Item>, Vec<String>), StreamError> {
        let mut items = Vec::with_capacity(data.len());
        let mut item_ids = Vec::with_capacity(data.len());

        for (payload, path) in data.into_iter().zip(paths) {
            let item_id = Uuid::new_v4().to_string();
            let metadata = self.component_metadata(path, opts);

            let payload = match payload {
                SourceData::Image(image) => {
                    validate_shape(path, &image.shape)?;
                    let expected =
                        byte_len(&image.shape, image.dtype).ok_or_else(|| {
                            ProtocolError::PixelLengthMismatch {
                                path: path.to_string(),
                                expected: u64::MAX,
                                actual: image.data.len() as u64,
                            }
                        })?;
                    if expected != image.data.len() as u64 {
                        return Err(ProtocolError::PixelLengthMismatch {
                            path: path.to_string(),
                            expected,
                            actual: image.data.len() as u64,
                        }
                        .into());
                    }

                    let name = shm::unique_name(self.viewer.shm_prefix());
                    let mut buffer = SharedMemoryBuffer::create(&name, image.data.len())?;
                    buffer.bytes_mut().copy_from_slice(&image.data);
                    created.push(name.clone());
                    self.buffers.lock().unwrap().insert(name.clone(), buffer);

                    Payload::Image {
                        shape: image.shape,
                        dtype: image.dtype,
                        shm_name: name,
                    }
                }
                SourceData::Rois(records) => Payload::Rois { rois: records },
                SourceData::Points { points, attributes } => {
                    Payload::Points { points, attributes }
                }
                SourceData::Text(_) => unreachable!("text payloads rejected above"),
            };

            items.push(Item {
                path: path.to_string(),
                item_id: item_id.clone(),
                metadata,
                payload,
            });
            item_ids.push(item_id);
        }

        Ok((items, item_ids))
    }

    /// Parse component metadata from the origin filename and enrich it with
    /// the virtual components receivers project on.
    fn component_metadata(
        &self,
        path: &str,
        opts: &BatchOptions<'_>,
    ) -> BTreeMap<String, ComponentValue> {
        let mut metadata = opts.parser.parse_filename(leaf(path));
        metadata.insert(
            "step_name".to_string(),
            ComponentValue::from(opts.step_name),
        );
        metadata.insert("step_index".to_string(), ComponentValue::Int(opts.step_index));

        let source = opts
            .source
            .map(str::to_string)
            .or_else(|| parent_leaf(path).map(str::to_string))
            .unwrap_or_else(|| "unknown_source".to_string());
        metadata.insert("source".to_string(), ComponentValue::Text(source));

        if let Some(plate_path) = opts.plate_path {
            metadata.insert("plate_path".to_string(), ComponentValue::from(plate_path));
        }
        metadata
    }

    fn release_buffers(&self, names: &[String], unlink: bool) {
        let mut map = self.buffers.lock().unwrap();
        for name in names {
            if let Some(buffer) = map.remove(name) {
                drop(buffer);
            }
            if unlink {
                if let Err(e) = SharedMemoryBuffer::unlink(name) {
                    warn!("failed to unlink dropped shared memory `{name}`: {e}");
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn endpoint(&self) -> &TransportEndpoint {
        &self.endpoint
    }

    #[cfg(test)]
    pub(crate) fn staged_buffer_count(&self) -> usize {
        self.buffers.lock().unwrap().len()
    }
}

impl Drop for StreamingBackend {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Final component of an opaque path-like identifier.
fn leaf(path: &str) -> &str {
    path.rsplit(['/', '\\'])
        .find(|part| !part.is_empty())
        .unwrap_or(path)
}

/// Name of the directory containing the leaf, when the identifier has one.
fn parent_leaf(path: &str) -> Option<&str> {
    let mut parts = path.rsplit(['/', '\\']).filter(|part| !part.is_empty());
    parts.next()?;
    parts.next()
}
