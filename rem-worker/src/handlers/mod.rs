//! Task handlers
//!
//! One handler per task type. A handler returns its result payload or an
//! error; the worker loop owns the complete/fail transition and the quota
//! accounting, so handlers never touch queue state.

pub mod dreaming;
pub mod file;
pub mod news;
pub mod reading;

use async_trait::async_trait;
use rem_core::{RemError, Task};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;

#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// The `task_type` this handler serves.
    fn task_type(&self) -> &str;

    /// Usage resource consumed, for the quota gate.
    fn resource_type(&self) -> &str {
        rem_queue::resources::REQUESTS
    }

    async fn handle(&self, task: &Task) -> Result<JsonValue, RemError>;
}

/// Dispatch table keyed by task type.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) {
        self.handlers
            .insert(handler.task_type().to_string(), handler);
    }

    pub fn get(&self, task_type: &str) -> Option<&Arc<dyn TaskHandler>> {
        self.handlers.get(task_type)
    }

    pub fn task_types(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}
