//! Canonical layer-key construction from component metadata.
//!
//! Layer keys are built from slice-mode components only, in declared order.
//! Non-image payloads get a suffix so annotation layers never collide with
//! the image layer they annotate.

use std::collections::BTreeMap;

use shared::display::{ComponentMode, ComponentValue};
use shared::messages::PayloadKind;

/// Fallback layer key when no slice-mode component is present.
pub const DEFAULT_LAYER_KEY: &str = "default_layer";

/// Build the canonical layer key for one item's component values.
pub fn build_layer_key(
    component_info: &BTreeMap<String, ComponentValue>,
    component_modes: &BTreeMap<String, ComponentMode>,
    component_order: &[String],
    kind: PayloadKind,
) -> String {
    let mut parts: Vec<String> = Vec::new();
    for component in component_order {
        if component_modes.get(component) == Some(&ComponentMode::Slice) {
            if let Some(value) = component_info.get(component) {
                parts.push(format!("{component}_{value}"));
            }
        }
    }

    let layer_key = if parts.is_empty() {
        DEFAULT_LAYER_KEY.to_string()
    } else {
        parts.join("_")
    };

    match kind {
        PayloadKind::Rois => format!("{layer_key}_shapes"),
        PayloadKind::Points => format!("{layer_key}_points"),
        PayloadKind::Image => layer_key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (
        BTreeMap<String, ComponentValue>,
        BTreeMap<String, ComponentMode>,
        Vec<String>,
    ) {
        let info = [
            ("well".to_string(), ComponentValue::from("A01")),
            ("channel".to_string(), ComponentValue::from(2)),
            ("site".to_string(), ComponentValue::from(3)),
        ]
        .into();
        let modes = [
            ("well".to_string(), ComponentMode::Slice),
            ("channel".to_string(), ComponentMode::Stack),
            ("site".to_string(), ComponentMode::Slice),
        ]
        .into();
        let order = vec!["well".to_string(), "channel".to_string(), "site".to_string()];
        (info, modes, order)
    }

    #[test]
    fn uses_slice_components_and_payload_suffix() {
        let (info, modes, order) = setup();
        assert_eq!(
            build_layer_key(&info, &modes, &order, PayloadKind::Image),
            "well_A01_site_3"
        );
        assert_eq!(
            build_layer_key(&info, &modes, &order, PayloadKind::Rois),
            "well_A01_site_3_shapes"
        );
        assert_eq!(
            build_layer_key(&info, &modes, &order, PayloadKind::Points),
            "well_A01_site_3_points"
        );
    }

    #[test]
    fn missing_slice_components_fall_back_to_default() {
        let (_, modes, order) = setup();
        assert_eq!(
            build_layer_key(&BTreeMap::new(), &modes, &order, PayloadKind::Image),
            DEFAULT_LAYER_KEY
        );
    }

    #[test]
    fn re_projection_is_a_no_op() {
        let (info, modes, order) = setup();
        let first = build_layer_key(&info, &modes, &order, PayloadKind::Image);
        let second = build_layer_key(&info, &modes, &order, PayloadKind::Image);
        assert_eq!(first, second);
    }
}
