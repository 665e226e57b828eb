//! Handler for point-annotation payloads.

use log::info;

use shared::display::ComponentMode;
use shared::errors::HandlerError;
use shared::messages::PayloadKind;

use crate::adapter::{HyperstackAxes, PointsBatch};
use crate::handlers::{HandlerContext, ItemHandler};
use crate::item::ResolvedPayload;
use crate::layer_key::build_layer_key;

pub struct PointsHandler;

impl ItemHandler for PointsHandler {
    fn data_type(&self) -> PayloadKind {
        PayloadKind::Points
    }

    fn handle(&self, context: &HandlerContext<'_>) -> Result<(), HandlerError> {
        if context.items.is_empty() {
            return Ok(());
        }

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

        let mut batches: Vec<PointsBatch<'_>> = Vec::new();
        for item in context.items {
            let ResolvedPayload::Points { points, .. } = &item.payload else {
                continue;
            };
            if points.is_empty() {
                continue;
            }
            batches.push(PointsBatch {
                item_id: &item.item_id,
                layer_key: build_layer_key(
                    &item.metadata,
                    &context.display.component_modes,
                    &context.display.component_order,
                    PayloadKind::Points,
                ),
                points,
            });
        }

        if batches.is_empty() {
            return Ok(());
        }

        let total: usize = batches.iter().map(|b| b.points.len()).sum();
        info!(
            "adding {total} points to window `{}`",
            context.window_key
        );
        context
            .adapter
            .add_points(context.window_key, &batches, &axes)
    }
}
