use crate::value::{SemanticType, Value};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Supplies collaborators that are not part of the workflow's own state:
/// repositories, clients, configuration. Consulted last, after the context,
/// LLM, trigger event and carried results.
pub trait Injector: Send + Sync {
    /// `None` when no value of `ty` is available.
    fn resolve(&self, ty: SemanticType) -> Option<Value>;
}

/// An in-memory injector holding one value per type.
#[derive(Debug, Default, Clone)]
pub struct Beans {
    beans: HashMap<SemanticType, Value>,
}

impl Beans {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a bean; a later bean of the same type replaces the earlier one.
    pub fn with<T: Any + Send + Sync>(mut self, bean: T) -> Self {
        self.insert(Value::new(bean));
        self
    }

    pub fn with_arc<T: Any + Send + Sync>(mut self, bean: Arc<T>) -> Self {
        self.insert(Value::from_arc(bean));
        self
    }

    pub fn insert(&mut self, bean: Value) {
        self.beans.insert(bean.semantic_type(), bean);
    }

    pub fn len(&self) -> usize {
        self.beans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beans.is_empty()
    }
}

impl Injector for Beans {
    fn resolve(&self, ty: SemanticType) -> Option<Value> {
        self.beans.get(&ty).cloned()
    }
}
