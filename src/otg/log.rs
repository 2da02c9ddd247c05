//! Gadget progress log
//!
//! Every line goes to `tracing` and, when a bus is attached, is republished
//! as a `[Gadget]` log event for the UI.

use std::sync::Arc;
use tracing::{info, warn};

use crate::events::{EventBus, SystemEvent};

#[derive(Clone, Default)]
pub struct GadgetLog {
    events: Option<Arc<EventBus>>,
}

impl GadgetLog {
    pub fn new(events: Option<Arc<EventBus>>) -> Self {
        Self { events }
    }

    pub fn info(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        info!("{}", message);
        self.publish(message);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        warn!("{}", message);
        self.publish(message);
    }

    fn publish(&self, message: &str) {
        if let Some(events) = &self.events {
            events.publish(SystemEvent::log(format!("[Gadget] {}", message)));
        }
    }
}
