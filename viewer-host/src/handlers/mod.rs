//! Typed dispatch per payload kind.
//!
//! Handlers register in order; resolution is first match wins, with the
//! result cached per kind. The default set covers images, ROI records, and
//! point annotations.

pub mod image;
pub mod points;
pub mod rois;

use std::collections::HashMap;
use std::sync::Mutex;

use shared::display::DisplayConfig;
use shared::errors::HandlerError;
use shared::messages::PayloadKind;

use crate::accessor::ComponentAccessor;
use crate::adapter::ViewerAdapter;
use crate::item::StreamItem;

pub use image::ImageHandler;
pub use points::PointsHandler;
pub use rois::RoisHandler;

/// Everything a handler needs for one dispatch: the target adapter, the
/// window it works in, the items of its kind, the declared display layout,
/// generic component access, and per-connection window state.
pub struct HandlerContext<'a> {
    pub adapter: &'a dyn ViewerAdapter,
    pub window_key: &'a str,
    pub items: &'a [&'a StreamItem],
    pub display: &'a DisplayConfig,
    pub components: ComponentAccessor<'a>,
    pub images_dir: Option<&'a str>,
    pub groups: &'a WindowGroups,
}

pub trait ItemHandler: Send + Sync {
    /// Payload kind this handler registers for.
    fn data_type(&self) -> PayloadKind;

    fn can_handle(&self, kind: PayloadKind) -> bool {
        self.data_type() == kind
    }

    fn handle(&self, context: &HandlerContext<'_>) -> Result<(), HandlerError>;
}

/// Ordered handler registry with cached first-match resolution.
pub struct HandlerRegistry {
    handlers: Vec<Box<dyn ItemHandler>>,
    cache: Mutex<HashMap<PayloadKind, Option<usize>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        HandlerRegistry {
            handlers: Vec::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Registry preloaded with the built-in handlers.
    pub fn with_default_handlers() -> Self {
        let mut registry = HandlerRegistry::new();
        registry.register(Box::new(ImageHandler));
        registry.register(Box::new(RoisHandler));
        registry.register(Box::new(PointsHandler));
        registry
    }

    /// Append a handler. Registration order decides resolution priority.
    pub fn register(&mut self, handler: Box<dyn ItemHandler>) {
        self.handlers.push(handler);
        self.cache.lock().unwrap().clear();
    }

    /// First registered handler that can handle the kind, if any.
    pub fn resolve(&self, kind: PayloadKind) -> Option<&dyn ItemHandler> {
        let index = {
            let mut cache = self.cache.lock().unwrap();
            *cache.entry(kind).or_insert_with(|| {
                self.handlers.iter().position(|h| h.can_handle(kind))
            })
        };
        index.map(|i| self.handlers[i].as_ref())
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        HandlerRegistry::with_default_handlers()
    }
}

/// Stable integer group ids per window key, assigned on first use.
#[derive(Default)]
pub struct WindowGroups {
    groups: Mutex<HashMap<String, i32>>,
}

impl WindowGroups {
    pub fn group_id(&self, window_key: &str) -> i32 {
        let mut groups = self.groups.lock().unwrap();
        let next = groups.len() as i32 + 1;
        *groups.entry(window_key.to_string()).or_insert(next)
    }
}
