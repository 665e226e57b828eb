//! Handler for image payloads: hyperstack assembly.

use std::collections::HashMap;

use log::info;

use shared::display::ComponentMode;
use shared::errors::HandlerError;
use shared::messages::PayloadKind;

use crate::adapter::HyperstackAxes;
use crate::handlers::{HandlerContext, ItemHandler};
use crate::item::{ResolvedPayload, StreamItem};
use crate::layer_key::build_layer_key;

pub struct ImageHandler;

impl ItemHandler for ImageHandler {
    fn data_type(&self) -> PayloadKind {
        PayloadKind::Image
    }

    fn handle(&self, context: &HandlerContext<'_>) -> Result<(), HandlerError> {
        if context.items.is_empty() {
            return Ok(());
        }
        for item in context.items {
            if let ResolvedPayload::Image { pixels, .. } = &item.payload {
                if pixels.is_empty() {
                    return Err(HandlerError::MissingPixels {
                        item_id: item.item_id.clone(),
                    });
                }
            }
        }

        // Stack-mode components stand in for the channel axis when the
        // layout declares no channel-mode component; a napari stack and an
        // ImageJ channel axis are the same dimension seen from two viewers.
        let mut channel_components = context.components.get_by_mode(ComponentMode::Channel);
        if channel_components.is_empty() {
            channel_components = context.components.get_by_mode(ComponentMode::Stack);
        }
        let slice_components = context.components.get_by_mode(ComponentMode::Slice);
        let frame_components = context.components.get_by_mode(ComponentMode::Frame);

        let axes = HyperstackAxes {
            channel_values: context.components.collect_values(&channel_components),
            slice_values: context.components.collect_values(&slice_components),
            frame_values: context.components.collect_values(&frame_components),
        };

        info!(
            "building hyperstack `{}` from {} images ({}C x {}Z x {}T)",
            context.window_key,
            context.items.len(),
            axes.channel_values.len(),
            axes.slice_values.len(),
            axes.frame_values.len()
        );

        // Replace by coordinate: when a batch carries several items for the
        // same hyperstack position, the last one sent wins.
        let mut position: HashMap<String, usize> = HashMap::new();
        let mut selected: Vec<&StreamItem> = Vec::with_capacity(context.items.len());
        for item in context.items {
            let coordinate = self.coordinate_of(context, item, &channel_components, &frame_components);
            match position.get(&coordinate) {
                Some(&index) => selected[index] = item,
                None => {
                    position.insert(coordinate, selected.len());
                    selected.push(item);
                }
            }
        }

        context
            .adapter
            .build_hyperstack(context.window_key, &selected, &axes)
    }
}

impl ImageHandler {
    fn coordinate_of(
        &self,
        context: &HandlerContext<'_>,
        item: &StreamItem,
        channel_components: &[&str],
        frame_components: &[&str],
    ) -> String {
        let layer = build_layer_key(
            &item.metadata,
            &context.display.component_modes,
            &context.display.component_order,
            PayloadKind::Image,
        );
        let channel: Vec<String> = channel_components
            .iter()
            .map(|name| context.components.get_value(item, name).to_string())
            .collect();
        let frame: Vec<String> = frame_components
            .iter()
            .map(|name| context.components.get_value(item, name).to_string())
            .collect();
        format!("{layer}|{}|{}", channel.join(","), frame.join(","))
    }
}
