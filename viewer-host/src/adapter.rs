//! Viewer adapter contract.
//!
//! Everything a concrete viewer integration (napari RPC bridge, ImageJ
//! plugin) must provide lives behind this trait; the receiver core never
//! talks to a viewer directly. The inert placeholder adapter stands in when
//! the process must not load GUI or GPU-adjacent stacks.

use std::env;
use std::net::TcpStream;
use std::sync::{Arc, Mutex};

use log::{debug, warn};

use shared::constants::INERT_VIEWERS_ENV_VAR;
use shared::display::ComponentValue;
use shared::errors::HandlerError;
use shared::messages::{AckMessage, AckStatus, Envelope, codec};

use crate::item::StreamItem;

/// Where receiver-originated acks go.
///
/// `Stream` writes ack frames back on the connection the batch arrived on.
/// `Inert` swallows them; used when the consumption ack was already sent in
/// request/reply mode and handler status is only of local interest.
#[derive(Clone)]
pub enum AckSink {
    Stream(Arc<Mutex<TcpStream>>),
    Inert,
}

impl AckSink {
    pub fn send(&self, item_id: &str, status: AckStatus, reason: Option<&str>) {
        let ack = match status {
            AckStatus::Ok => AckMessage::ok(item_id),
            AckStatus::Error => AckMessage::error(item_id, reason.unwrap_or("handler failure")),
        };
        match self {
            AckSink::Stream(stream) => {
                let frame = match codec::encode(&Envelope::from(ack)) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("failed to encode ack for `{item_id}`: {e}");
                        return;
                    }
                };
                let mut guard = stream.lock().unwrap();
                if let Err(e) = codec::write_frame(&mut *guard, &frame) {
                    warn!("failed to send ack for `{item_id}`: {e}");
                }
            }
            AckSink::Inert => {
                debug!("local ack for `{item_id}`: {status:?}");
            }
        }
    }
}

/// Sorted component value tuples spanning the three hyperstack axes.
#[derive(Debug, Clone, Default)]
pub struct HyperstackAxes {
    pub channel_values: Vec<Vec<ComponentValue>>,
    pub slice_values: Vec<Vec<ComponentValue>>,
    pub frame_values: Vec<Vec<ComponentValue>>,
}

/// One item's ROI records prepared for display.
pub struct RoiBatch<'a> {
    pub item_id: &'a str,
    pub layer_key: String,
    pub records: &'a [Vec<u8>],
}

/// One item's point rows prepared for display.
pub struct PointsBatch<'a> {
    pub item_id: &'a str,
    pub layer_key: String,
    pub points: &'a [Vec<f64>],
}

/// Contract the receiver core drives. Implementations live outside the
/// core; only the inert placeholder ships here.
pub trait ViewerAdapter: Send + Sync {
    /// Create or focus the window for a key. Idempotent.
    fn ensure_window(
        &self,
        window_key: &str,
        fixed_labels: &[(String, ComponentValue)],
    ) -> Result<(), HandlerError>;

    /// Render a multidimensional image. Replace-by-key: rebuilding the same
    /// window with the same coordinates must converge, not accumulate.
    fn build_hyperstack(
        &self,
        window_key: &str,
        items: &[&StreamItem],
        axes: &HyperstackAxes,
    ) -> Result<(), HandlerError>;

    /// Attach ROI records to a window. Additions are a set union keyed by
    /// item id; the integer group id is stable per window.
    fn add_rois(
        &self,
        window_key: &str,
        rois: &[RoiBatch<'_>],
        group_id: i32,
        axes: &HyperstackAxes,
    ) -> Result<(), HandlerError>;

    /// Attach point annotations to a window.
    fn add_points(
        &self,
        window_key: &str,
        points: &[PointsBatch<'_>],
        axes: &HyperstackAxes,
    ) -> Result<(), HandlerError>;

    /// Report per-item handling status back toward the producer.
    fn ack(&self, item_id: &str, status: AckStatus, reason: Option<&str>);
}

/// Builds the adapter for one incoming connection, given the sink its acks
/// should travel through.
pub type AdapterFactory = Arc<dyn Fn(AckSink) -> Arc<dyn ViewerAdapter> + Send + Sync>;

/// Placeholder adapter: logs display operations, forwards acks, renders
/// nothing.
pub struct NullViewerAdapter {
    sink: AckSink,
}

impl NullViewerAdapter {
    pub fn new(sink: AckSink) -> Self {
        NullViewerAdapter { sink }
    }

    pub fn factory() -> AdapterFactory {
        Arc::new(|sink| {
            let adapter: Arc<dyn ViewerAdapter> = Arc::new(NullViewerAdapter::new(sink));
            adapter
        })
    }
}

impl ViewerAdapter for NullViewerAdapter {
    fn ensure_window(
        &self,
        window_key: &str,
        _fixed_labels: &[(String, ComponentValue)],
    ) -> Result<(), HandlerError> {
        debug!("inert viewer: ensure_window `{window_key}`");
        Ok(())
    }

    fn build_hyperstack(
        &self,
        window_key: &str,
        items: &[&StreamItem],
        axes: &HyperstackAxes,
    ) -> Result<(), HandlerError> {
        debug!(
            "inert viewer: hyperstack `{window_key}` from {} items ({}C x {}Z x {}T)",
            items.len(),
            axes.channel_values.len(),
            axes.slice_values.len(),
            axes.frame_values.len()
        );
        Ok(())
    }

    fn add_rois(
        &self,
        window_key: &str,
        rois: &[RoiBatch<'_>],
        group_id: i32,
        _axes: &HyperstackAxes,
    ) -> Result<(), HandlerError> {
        debug!(
            "inert viewer: {} roi batches for `{window_key}` (group {group_id})",
            rois.len()
        );
        Ok(())
    }

    fn add_points(
        &self,
        window_key: &str,
        points: &[PointsBatch<'_>],
        _axes: &HyperstackAxes,
    ) -> Result<(), HandlerError> {
        debug!(
            "inert viewer: {} point batches for `{window_key}`",
            points.len()
        );
        Ok(())
    }

    fn ack(&self, item_id: &str, status: AckStatus, reason: Option<&str>) {
        self.sink.send(item_id, status, reason);
    }
}

/// Substitute the inert adapter when the environment forbids real viewer
/// stacks; otherwise pass the given factory through.
pub fn factory_from_env(real: AdapterFactory) -> AdapterFactory {
    if env::var_os(INERT_VIEWERS_ENV_VAR).is_some() {
        debug!("{INERT_VIEWERS_ENV_VAR} set, substituting inert viewer adapters");
        NullViewerAdapter::factory()
    } else {
        real
    }
}
