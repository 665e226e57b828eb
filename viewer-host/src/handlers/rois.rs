//! Handler for ROI payloads: viewer annotation groups.

use std::collections::HashSet;

use log::{debug, info};

use shared::display::ComponentMode;
use shared::errors::HandlerError;
use shared::messages::PayloadKind;

use crate::adapter::{HyperstackAxes, RoiBatch};
use crate::handlers::{HandlerContext, ItemHandler};
use crate::item::ResolvedPayload;
use crate::layer_key::build_layer_key;

pub struct RoisHandler;

impl ItemHandler for RoisHandler {
    fn data_type(&self) -> PayloadKind {
        PayloadKind::Rois
    }

    fn handle(&self, context: &HandlerContext<'_>) -> Result<(), HandlerError> {
        if context.items.is_empty() {
            return Ok(());
        }
        let group_id = context.groups.group_id(context.window_key);

        let axes = HyperstackAxes {
            channel_values: context
                .components
                .collect_values(&context.components.get_by_mode(ComponentMode::Channel)),
            slice_values: context
                .components
                .collect_values(&context.components.get_by_mode(ComponentMode::Slice)),
            frame_values: context
                .components
                .collect_values(&context.components.get_by_mode(ComponentMode::Frame)),
        };

        // ROI additions are a set union keyed by item id; a replayed item
        // must not duplicate its records.
        let mut seen: HashSet<&str> = HashSet::new();
        let mut batches: Vec<RoiBatch<'_>> = Vec::new();
        for item in context.items {
            if !seen.insert(&item.item_id) {
                debug!("skipping repeated roi item `{}`", item.item_id);
                continue;
            }
            let ResolvedPayload::Rois { records } = &item.payload else {
                continue;
            };
            if records.is_empty() {
                // Nothing to render; the item still acks positively.
                continue;
            }
            batches.push(RoiBatch {
                item_id: &item.item_id,
                layer_key: build_layer_key(
                    &item.metadata,
                    &context.display.component_modes,
                    &context.display.component_order,
                    PayloadKind::Rois,
                ),
                records,
            });
        }

        if batches.is_empty() {
            return Ok(());
        }

        let total: usize = batches.iter().map(|b| b.records.len()).sum();
        info!(
            "adding {total} rois to window `{}` (group {group_id})",
            context.window_key
        );
        context
            .adapter
            .add_rois(context.window_key, &batches, group_id, &axes)
    }
}
