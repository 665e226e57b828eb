//! Window projection: group batch items into viewer windows using the
//! declared component modes.
//!
//! Window keys are deterministic: `{name}_{value}` fragments joined with
//! `_` over the window-mode components in declared order, or
//! `default_window` when no component has window mode. Grouping order is
//! deterministic as well; identical inputs always produce identical keys
//! and identical item assignment.

use std::collections::BTreeMap;

use shared::display::{ComponentMode, ComponentValue};
use shared::messages::PayloadKind;

use crate::item::StreamItem;

/// Fallback window key when no component has window mode.
pub const DEFAULT_WINDOW_KEY: &str = "default_window";

/// Rewrites a window-component value before it enters the key. Receives the
/// component name, the raw value, the item, and the optional images
/// directory hint.
pub type WindowValueNormalizer =
    fn(&str, &ComponentValue, &StreamItem, Option<&str>) -> ComponentValue;

/// Projection result for a single batch.
#[derive(Debug)]
pub struct GroupedWindowItems<'a> {
    pub window_components: Vec<String>,
    pub channel_components: Vec<String>,
    pub slice_components: Vec<String>,
    pub frame_components: Vec<String>,
    pub stack_components: Vec<String>,
    pub windows: BTreeMap<String, Vec<&'a StreamItem>>,
    pub fixed_window_labels: BTreeMap<String, Vec<(String, ComponentValue)>>,
}

/// ROI items carry a synthetic `source` value (a results path) that would
/// key them away from their images. Substitute the leaf of the images
/// directory so both land in the same window.
pub fn default_normalizer(
    component_name: &str,
    value: &ComponentValue,
    item: &StreamItem,
    images_dir: Option<&str>,
) -> ComponentValue {
    if component_name == "source" && item.kind() == PayloadKind::Rois {
        if let Some(dir) = images_dir {
            let text = value.to_string();
            if text.contains("_results") || text.contains('/') || text.contains('\\') {
                return ComponentValue::Text(leaf(dir).to_string());
            }
        }
    }
    value.clone()
}

/// Project items into window groups using declared component modes.
pub fn group_items_by_component_modes<'a>(
    items: &'a [StreamItem],
    component_modes: &BTreeMap<String, ComponentMode>,
    component_order: &[String],
    images_dir: Option<&str>,
    normalizer: Option<WindowValueNormalizer>,
) -> GroupedWindowItems<'a> {
    let normalizer = normalizer.unwrap_or(default_normalizer);

    let mut window_components = Vec::new();
    let mut channel_components = Vec::new();
    let mut slice_components = Vec::new();
    let mut frame_components = Vec::new();
    let mut stack_components = Vec::new();

    for name in component_order {
        let Some(mode) = component_modes.get(name) else {
            continue;
        };
        let bucket = match mode {
            ComponentMode::Window => &mut window_components,
            ComponentMode::Channel => &mut channel_components,
            ComponentMode::Slice => &mut slice_components,
            ComponentMode::Frame => &mut frame_components,
            ComponentMode::Stack => &mut stack_components,
        };
        bucket.push(name.clone());
    }

    let mut windows: BTreeMap<String, Vec<&'a StreamItem>> = BTreeMap::new();
    let mut fixed_window_labels: BTreeMap<String, Vec<(String, ComponentValue)>> = BTreeMap::new();

    for item in items {
        let mut key_parts: Vec<String> = Vec::new();
        let mut fixed_labels: Vec<(String, ComponentValue)> = Vec::new();

        for component in &window_components {
            let Some(raw) = item.metadata.get(component) else {
                continue;
            };
            let value = normalizer(component, raw, item, images_dir);
            key_parts.push(format!("{component}_{value}"));
            fixed_labels.push((component.clone(), value));
        }

        let window_key = if key_parts.is_empty() {
            DEFAULT_WINDOW_KEY.to_string()
        } else {
            key_parts.join("_")
        };

        windows.entry(window_key.clone()).or_default().push(item);
        fixed_window_labels.entry(window_key).or_insert(fixed_labels);
    }

    GroupedWindowItems {
        window_components,
        channel_components,
        slice_components,
        frame_components,
        stack_components,
        windows,
        fixed_window_labels,
    }
}

fn leaf(path: &str) -> &str {
    path.rsplit(['/', '\\'])
        .find(|part| !part.is_empty())
        .unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ResolvedPayload;

    fn item(kind: PayloadKind, metadata: &[(&str, ComponentValue)]) -> StreamItem {
        let payload = match kind {
            PayloadKind::Image => ResolvedPayload::Image {
                shape: vec![1],
                dtype: shared::messages::DType::U8,
                pixels: vec![0],
            },
            PayloadKind::Rois => ResolvedPayload::Rois { records: vec![] },
            PayloadKind::Points => ResolvedPayload::Points {
                points: vec![],
                attributes: None,
            },
        };
        StreamItem {
            path: "test".into(),
            item_id: "id".into(),
            metadata: metadata
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            payload,
        }
    }

    fn modes(pairs: &[(&str, ComponentMode)]) -> BTreeMap<String, ComponentMode> {
        pairs.iter().map(|(n, m)| (n.to_string(), *m)).collect()
    }

    fn order(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn groups_by_window_components_in_declared_order() {
        let items = vec![
            item(
                PayloadKind::Image,
                &[
                    ("well", ComponentValue::from("A01")),
                    ("channel", ComponentValue::from(1)),
                    ("z", ComponentValue::from(0)),
                ],
            ),
            item(
                PayloadKind::Image,
                &[
                    ("well", ComponentValue::from("A01")),
                    ("channel", ComponentValue::from(2)),
                    ("z", ComponentValue::from(0)),
                ],
            ),
        ];
        let grouped = group_items_by_component_modes(
            &items,
            &modes(&[
                ("well", ComponentMode::Window),
                ("channel", ComponentMode::Stack),
                ("z", ComponentMode::Slice),
            ]),
            &order(&["well", "channel", "z"]),
            None,
            None,
        );

        assert_eq!(grouped.window_components, vec!["well"]);
        assert_eq!(grouped.stack_components, vec!["channel"]);
        assert_eq!(grouped.slice_components, vec!["z"]);
        assert_eq!(grouped.windows.len(), 1);
        assert_eq!(grouped.windows["well_A01"].len(), 2);
        assert_eq!(
            grouped.fixed_window_labels["well_A01"],
            vec![("well".to_string(), ComponentValue::from("A01"))]
        );
    }

    #[test]
    fn roi_source_normalizes_to_images_dir_leaf() {
        let items = vec![
            item(
                PayloadKind::Rois,
                &[
                    ("source", ComponentValue::from("/tmp/foo_results")),
                    ("well", ComponentValue::from("A01")),
                    ("channel", ComponentValue::from(1)),
                ],
            ),
            item(
                PayloadKind::Image,
                &[
                    ("source", ComponentValue::from("step_1")),
                    ("well", ComponentValue::from("A01")),
                    ("channel", ComponentValue::from(1)),
                ],
            ),
        ];
        let grouped = group_items_by_component_modes(
            &items,
            &modes(&[
                ("source", ComponentMode::Window),
                ("well", ComponentMode::Frame),
                ("channel", ComponentMode::Channel),
            ]),
            &order(&["source", "well", "channel"]),
            Some("/my/plate/images"),
            None,
        );

        assert_eq!(grouped.window_components, vec!["source"]);
        assert_eq!(grouped.channel_components, vec!["channel"]);
        assert_eq!(grouped.frame_components, vec!["well"]);
        assert!(grouped.windows.contains_key("source_images"));
        assert!(grouped.windows.contains_key("source_step_1"));
    }

    #[test]
    fn image_source_is_never_normalized() {
        let items = vec![item(
            PayloadKind::Image,
            &[("source", ComponentValue::from("/tmp/foo_results"))],
        )];
        let grouped = group_items_by_component_modes(
            &items,
            &modes(&[("source", ComponentMode::Window)]),
            &order(&["source"]),
            Some("/my/plate/images"),
            None,
        );
        assert!(grouped.windows.contains_key("source_/tmp/foo_results"));
    }

    #[test]
    fn items_without_window_components_use_the_default_window() {
        let items = vec![item(PayloadKind::Image, &[("z", ComponentValue::from(0))])];
        let grouped = group_items_by_component_modes(
            &items,
            &modes(&[("z", ComponentMode::Slice)]),
            &order(&["z"]),
            None,
            None,
        );
        assert!(grouped.windows.contains_key(DEFAULT_WINDOW_KEY));
    }

    #[test]
    fn projection_is_deterministic() {
        let items = vec![
            item(PayloadKind::Image, &[("well", ComponentValue::from("B02"))]),
            item(PayloadKind::Image, &[("well", ComponentValue::from("A01"))]),
        ];
        let run = || {
            group_items_by_component_modes(
                &items,
                &modes(&[("well", ComponentMode::Window)]),
                &order(&["well"]),
                None,
                None,
            )
        };
        let first: Vec<String> = run().windows.keys().cloned().collect();
        let second: Vec<String> = run().windows.keys().cloned().collect();
        assert_eq!(first, second);
        assert_eq!(first, vec!["well_A01", "well_B02"]);
    }
}
