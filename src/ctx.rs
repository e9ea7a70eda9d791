use crate::error::ContextError;
use crate::value::Value;
use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// State shared by every phase of one workflow execution.
///
/// Holds named attributes plus the event that started the workflow. The
/// engine creates one per execution and drops it when the execution ends.
pub struct WorkflowContext {
    store: Mutex<HashMap<String, Value>>,
    trigger_event: Value,
}

impl WorkflowContext {
    pub fn new(trigger_event: Value) -> Self {
        Self {
            store: Mutex::new(HashMap::new()),
            trigger_event,
        }
    }

    /// Insert or replace `name`. Passing `None` removes it.
    pub fn set_attribute(&self, name: &str, value: Option<Value>) -> Result<(), ContextError> {
        if name.is_empty() {
            return Err(ContextError::InvalidArgument("attribute name must not be empty"));
        }
        let mut store = self.lock();
        match value {
            Some(value) => {
                store.insert(name.to_string(), value);
            }
            None => {
                store.remove(name);
            }
        }
        Ok(())
    }

    /// Shorthand for `set_attribute(name, Some(Value::new(value)))`.
    pub fn insert<T: Any + Send + Sync>(&self, name: &str, value: T) -> Result<(), ContextError> {
        self.set_attribute(name, Some(Value::new(value)))
    }

    /// `None` when the attribute is absent.
    pub fn get_attribute(&self, name: &str) -> Option<Value> {
        self.lock().get(name).cloned()
    }

    pub fn attribute<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.get_attribute(name).and_then(|v| v.downcast::<T>())
    }

    pub fn remove_attribute(&self, name: &str) {
        self.lock().remove(name);
    }

    /// Names present at the time of the call; later writes are not reflected.
    pub fn attribute_names(&self) -> BTreeSet<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn trigger_event(&self) -> &Value {
        &self.trigger_event
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowContext")
            .field("attributes", &self.attribute_names())
            .field("trigger_event", &self.trigger_event)
            .finish()
    }
}
