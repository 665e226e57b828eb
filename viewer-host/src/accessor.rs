//! Component metadata access over an arbitrary number of components.
//!
//! The accessor is a plain struct parametrized by the declared modes and
//! order; nothing here inspects item types beyond their metadata maps.

use std::collections::{BTreeMap, BTreeSet};

use shared::display::{ComponentMode, ComponentValue};

use crate::item::StreamItem;

pub struct ComponentAccessor<'a> {
    component_modes: &'a BTreeMap<String, ComponentMode>,
    component_order: &'a [String],
    items: &'a [&'a StreamItem],
}

impl<'a> ComponentAccessor<'a> {
    pub fn new(
        component_modes: &'a BTreeMap<String, ComponentMode>,
        component_order: &'a [String],
        items: &'a [&'a StreamItem],
    ) -> Self {
        ComponentAccessor {
            component_modes,
            component_order,
            items,
        }
    }

    /// All component names declared with the given mode, in declared order.
    pub fn get_by_mode(&self, mode: ComponentMode) -> Vec<&'a str> {
        self.component_order
            .iter()
            .filter(|name| self.component_modes.get(*name) == Some(&mode))
            .map(String::as_str)
            .collect()
    }

    /// Component value for an item, defaulting to integer 0.
    pub fn get_value(&self, item: &StreamItem, name: &str) -> ComponentValue {
        item.component_value(name)
    }

    /// Unique value tuples for the given components across all items,
    /// sorted for stable indexing.
    pub fn collect_values(&self, names: &[&str]) -> Vec<Vec<ComponentValue>> {
        let mut unique: BTreeSet<Vec<ComponentValue>> = BTreeSet::new();
        for item in self.items {
            unique.insert(
                names
                    .iter()
                    .map(|name| self.get_value(item, name))
                    .collect(),
            );
        }
        unique.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ResolvedPayload;
    use shared::messages::DType;

    fn item(metadata: &[(&str, ComponentValue)]) -> StreamItem {
        StreamItem {
            path: "p".into(),
            item_id: "i".into(),
            metadata: metadata
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            payload: ResolvedPayload::Image {
                shape: vec![1],
                dtype: DType::U8,
                pixels: vec![0],
            },
        }
    }

    #[test]
    fn get_by_mode_preserves_declared_order() {
        let modes: BTreeMap<String, ComponentMode> = [
            ("z".to_string(), ComponentMode::Slice),
            ("channel".to_string(), ComponentMode::Stack),
            ("site".to_string(), ComponentMode::Slice),
        ]
        .into();
        let order = vec!["site".to_string(), "channel".to_string(), "z".to_string()];
        let items: Vec<&StreamItem> = vec![];
        let accessor = ComponentAccessor::new(&modes, &order, &items);
        assert_eq!(accessor.get_by_mode(ComponentMode::Slice), vec!["site", "z"]);
        assert_eq!(accessor.get_by_mode(ComponentMode::Stack), vec!["channel"]);
        assert!(accessor.get_by_mode(ComponentMode::Window).is_empty());
    }

    #[test]
    fn missing_values_default_to_zero() {
        let modes = BTreeMap::new();
        let order: Vec<String> = vec![];
        let a = item(&[("channel", ComponentValue::from(1))]);
        let refs = vec![&a];
        let accessor = ComponentAccessor::new(&modes, &order, &refs);
        assert_eq!(accessor.get_value(&a, "z"), ComponentValue::Int(0));
    }

    #[test]
    fn collect_values_is_sorted_and_unique() {
        let modes = BTreeMap::new();
        let order: Vec<String> = vec![];
        let a = item(&[("channel", ComponentValue::from(2))]);
        let b = item(&[("channel", ComponentValue::from(1))]);
        let c = item(&[("channel", ComponentValue::from(2))]);
        let refs = vec![&a, &b, &c];
        let accessor = ComponentAccessor::new(&modes, &order, &refs);
        assert_eq!(
            accessor.collect_values(&["channel"]),
            vec![
                vec![ComponentValue::Int(1)],
                vec![ComponentValue::Int(2)],
            ]
        );
    }
}
