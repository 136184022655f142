//! Host function registry and event bus
//!
//! Rules reach outside the context through two seams: named host
//! functions (`execute_function` actions, failures propagate) and
//! named events (`trigger_event` actions, listener failures are
//! isolated).

use engram_core::{Error, Metadata, Result, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

/// A host function callable from a rule action
///
/// Receives the evaluation context and the action payload.
pub type RuleFunction = Box<dyn Fn(&mut Metadata, Option<&Value>) -> Result<Value> + Send + Sync>;

/// Registry of named host functions
#[derive(Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, RuleFunction>,
}

impl FunctionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function under a name
    ///
    /// Names must be non-empty and unique.
    pub fn register<F>(&mut self, name: &str, function: F) -> Result<()>
    where
        F: Fn(&mut Metadata, Option<&Value>) -> Result<Value> + Send + Sync + 'static,
    {
        if name.is_empty() {
            return Err(Error::RuleValidation(
                "Function name is empty".to_string(),
            ));
        }
        if self.functions.contains_key(name) {
            return Err(Error::RuleValidation(format!(
                "Function already registered: {}",
                name
            )));
        }
        self.functions.insert(name.to_string(), Box::new(function));
        debug!("Registered rule function {}", name);
        Ok(())
    }

    /// Check whether a function is registered
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Call a registered function, erroring on unknown names
    pub fn call(
        &self,
        name: &str,
        context: &mut Metadata,
        payload: Option<&Value>,
    ) -> Result<Value> {
        let function = self
            .functions
            .get(name)
            .ok_or_else(|| Error::UnknownFunction(name.to_string()))?;
        function(context, payload)
    }
}

/// An event listener
///
/// Receives the event name and a read-only view of the context.
pub type EventListener = Box<dyn Fn(&str, &Metadata) -> Result<()> + Send + Sync>;

/// Synchronous event bus for `trigger_event` actions
///
/// One failing listener never blocks the others or the rule pass.
#[derive(Default)]
pub struct EventBus {
    listeners: HashMap<String, Vec<EventListener>>,
}

impl EventBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a listener to an event name
    pub fn subscribe<F>(&mut self, event: &str, listener: F)
    where
        F: Fn(&str, &Metadata) -> Result<()> + Send + Sync + 'static,
    {
        self.listeners
            .entry(event.to_string())
            .or_default()
            .push(Box::new(listener));
    }

    /// Number of listeners for an event
    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.get(event).map(Vec::len).unwrap_or(0)
    }

    /// Deliver an event to every listener, isolating failures
    ///
    /// Returns the number of listeners that handled the event.
    pub fn emit(&self, event: &str, context: &Metadata) -> usize {
        let Some(listeners) = self.listeners.get(event) else {
            debug!("Event {} has no listeners", event);
            return 0;
        };

        let mut delivered = 0;
        for listener in listeners {
            match listener(event, context) {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Listener for event {} failed: {}", event, e),
            }
        }
        delivered
    }
}
