use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::models::CoreResult;
use crate::scope::Scope;

pub type EventHandler = Arc<dyn Fn(&Scope) -> CoreResult<()> + Send + Sync>;

#[derive(Default)]
pub(crate) struct EventRegistry {
    handlers: Mutex<HashMap<String, Vec<EventHandler>>>,
}

impl EventRegistry {
    pub(crate) fn on(&self, event: &str, handler: EventHandler) {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event.to_string())
            .or_default()
            .push(handler);
    }

    /// Snapshot in registration order; handlers run without the lock held.
    pub(crate) fn handlers_for(&self, event: &str) -> Vec<EventHandler> {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .cloned()
            .unwrap_or_default()
    }
}
