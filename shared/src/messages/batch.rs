//! Batch message: an ordered set of items shipped as one frame, with the
//! display configuration every item in the batch shares.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::display::{ComponentValue, DisplayConfig};
use crate::errors::ProtocolError;

/// Element type of an image buffer. Wire names follow the numpy convention
/// so existing receivers keep parsing them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DType {
    #[serde(rename = "uint8")]
    U8,
    #[serde(rename = "uint16")]
    U16,
    #[serde(rename = "int16")]
    I16,
    #[serde(rename = "uint32")]
    U32,
    #[serde(rename = "int32")]
    I32,
    #[serde(rename = "float32")]
    F32,
    #[serde(rename = "float64")]
    F64,
}

impl DType {
    /// Bytes per element.
    pub const fn size_in_bytes(self) -> u64 {
        match self {
            DType::U8 => 1,
            DType::U16 | DType::I16 => 2,
            DType::U32 | DType::I32 | DType::F32 => 4,
            DType::F64 => 8,
        }
    }
}

/// Payload kinds a handler registry dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum PayloadKind {
    Image,
    Rois,
    Points,
}

/// Per-item payload, discriminated on the wire by `data_type`.
///
/// Image pixels never ride in the frame; the item carries a reference to a
/// named shared-memory segment instead. ROI records are opaque bytes,
/// base64-encoded for transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "data_type", rename_all = "lowercase")]
pub enum Payload {
    Image {
        shape: Vec<u64>,
        dtype: DType,
        shm_name: String,
    },
    Rois {
        #[serde(with = "b64_records")]
        rois: Vec<Vec<u8>>,
    },
    Points {
        points: Vec<Vec<f64>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attributes: Option<BTreeMap<String, ComponentValue>>,
    },
}

impl Payload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Image { .. } => PayloadKind::Image,
            Payload::Rois { .. } => PayloadKind::Rois,
            Payload::Points { .. } => PayloadKind::Points,
        }
    }
}

/// The atomic unit transferred. `path` is an opaque origin identifier and is
/// never interpreted as a filesystem path on this side of the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub path: String,
    pub item_id: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, ComponentValue>,
    #[serde(flatten)]
    pub payload: Payload,
}

/// One wire batch: ordered items, the shared display configuration, a
/// timestamp, and the optional images-directory hint receivers use to
/// co-key ROI windows with their source images.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchMessage {
    pub images: Vec<Item>,
    pub display_config: DisplayConfig,
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images_dir: Option<String>,
}

impl BatchMessage {
    pub fn new(images: Vec<Item>, display_config: DisplayConfig, images_dir: Option<String>) -> Self {
        BatchMessage {
            images,
            display_config,
            timestamp: epoch_seconds(),
            images_dir,
        }
    }

    /// Validate the display contract and every image payload.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        self.display_config.validate()?;
        for item in &self.images {
            if let Payload::Image { shape, .. } = &item.payload {
                validate_shape(&item.path, shape)?;
            }
        }
        Ok(())
    }
}

/// Check the 1..=5 dimensionality contract for an image shape.
pub fn validate_shape(path: &str, shape: &[u64]) -> Result<(), ProtocolError> {
    if shape.is_empty() || shape.len() > 5 {
        return Err(ProtocolError::BadImageShape {
            path: path.to_string(),
            ndim: shape.len(),
        });
    }
    Ok(())
}

/// Byte length implied by a shape and dtype, if it fits in a u64.
pub fn byte_len(shape: &[u64], dtype: DType) -> Option<u64> {
    let mut total = dtype.size_in_bytes();
    for dim in shape {
        total = total.checked_mul(*dim)?;
    }
    Some(total)
}

/// Seconds since the Unix epoch as a float, the timestamp format receivers
/// expect.
pub fn epoch_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Serde codec for ROI byte records: a JSON array of base64 strings.
mod b64_records {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(records: &[Vec<u8>], ser: S) -> Result<S::Ok, S::Error> {
        ser.collect_seq(records.iter().map(|r| STANDARD.encode(r)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<Vec<u8>>, D::Error> {
        let encoded: Vec<String> = Vec::deserialize(de)?;
        encoded
            .iter()
            .map(|s| STANDARD.decode(s).map_err(D::Error::custom))
            .collect()
    }
}
