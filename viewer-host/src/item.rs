//! Receiver-side item: the wire record after shared-memory resolution.
//!
//! Pixel data has been copied out of the producer's segment into owned
//! storage by the time one of these exists; the segment itself is already
//! unlinked.

use std::collections::BTreeMap;

use shared::display::ComponentValue;
use shared::messages::{DType, PayloadKind};

#[derive(Debug, Clone)]
pub enum ResolvedPayload {
    Image {
        shape: Vec<u64>,
        dtype: DType,
        pixels: Vec<u8>,
    },
    Rois {
        records: Vec<Vec<u8>>,
    },
    Points {
        points: Vec<Vec<f64>>,
        attributes: Option<BTreeMap<String, ComponentValue>>,
    },
}

impl ResolvedPayload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            ResolvedPayload::Image { .. } => PayloadKind::Image,
            ResolvedPayload::Rois { .. } => PayloadKind::Rois,
            ResolvedPayload::Points { .. } => PayloadKind::Points,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamItem {
    pub path: String,
    pub item_id: String,
    pub metadata: BTreeMap<String, ComponentValue>,
    pub payload: ResolvedPayload,
}

impl StreamItem {
    pub fn kind(&self) -> PayloadKind {
        self.payload.kind()
    }

    /// Component value from item metadata, defaulting to integer 0.
    pub fn component_value(&self, name: &str) -> ComponentValue {
        self.metadata.get(name).cloned().unwrap_or_default()
    }
}
