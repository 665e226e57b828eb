//! Display configuration: declared component order, per-component modes, and
//! the style information a viewer needs to render a batch.
//!
//! Component modes and order are plain data carried on the wire. Receivers
//! never introspect producer types; everything they need to project items
//! into windows, layers, and stack axes is declared here.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::ProtocolError;

/// Role a named component plays in the hyperstack projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ComponentMode {
    Window,
    Slice,
    Stack,
    Channel,
    Frame,
}

/// Viewer family a destination speaks to. Determines the shared-memory name
/// prefix and is part of the queue-tracker key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ViewerKind {
    Napari,
    Fiji,
}

impl ViewerKind {
    /// Shared-memory name prefix for this viewer family.
    pub fn shm_prefix(self) -> &'static str {
        match self {
            ViewerKind::Napari => crate::constants::NAPARI_SHM_PREFIX,
            ViewerKind::Fiji => crate::constants::FIJI_SHM_PREFIX,
        }
    }
}

/// A component value parsed from an item name: an integer or a short string.
///
/// Ordering is derived, so integer values sort before textual ones. That is
/// enough for the stable tuple indexing the receivers rely on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ComponentValue {
    Int(i64),
    Text(String),
}

impl Default for ComponentValue {
    fn default() -> Self {
        ComponentValue::Int(0)
    }
}

impl fmt::Display for ComponentValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentValue::Int(v) => write!(f, "{v}"),
            ComponentValue::Text(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for ComponentValue {
    fn from(v: i64) -> Self {
        ComponentValue::Int(v)
    }
}

impl From<&str> for ComponentValue {
    fn from(v: &str) -> Self {
        ComponentValue::Text(v.to_string())
    }
}

impl From<String> for ComponentValue {
    fn from(v: String) -> Self {
        ComponentValue::Text(v)
    }
}

/// Policy for images whose shapes differ within one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableSizePolicy {
    Skip,
    PadToLargest,
    CropToSmallest,
}

/// Declared projection layout plus style for one batch.
///
/// `style_id` is serialized as `colormap`; older producers emitted the same
/// value under `lut`, so both keys are accepted on decode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    #[serde(rename = "colormap", alias = "lut")]
    pub style_id: String,
    pub component_modes: BTreeMap<String, ComponentMode>,
    pub component_order: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_contrast: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable_size_handling: Option<VariableSizePolicy>,
}

impl DisplayConfig {
    /// Check the mode/order contract: every ordered component has a mode and
    /// no mode is declared for a component outside the order.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        for name in &self.component_order {
            if !self.component_modes.contains_key(name) {
                return Err(ProtocolError::MissingComponentMode { name: name.clone() });
            }
        }
        for name in self.component_modes.keys() {
            if !self.component_order.iter().any(|n| n == name) {
                return Err(ProtocolError::UnknownComponent { name: name.clone() });
            }
        }
        Ok(())
    }

    /// Mode of a named component, if declared.
    pub fn mode_of(&self, name: &str) -> Option<ComponentMode> {
        self.component_modes.get(name).copied()
    }
}
