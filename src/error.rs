use crate::agent::{PhaseId, PhaseKind, ReturnKind};
use crate::value::SemanticType;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// A node in the error-class tree that exception handlers match against.
///
/// Classes form a single-inheritance chain through `parent`. A handler that
/// declares class `C` catches any error whose class is `C` or a descendant of
/// `C`; among several candidates the one with the fewest hops wins.
///
/// Classes compare by address, so two classes with the same name are still
/// distinct. Declare application classes as `static`, never `const`: every
/// use of a `const` item is a fresh copy with its own address.
///
/// ```rust
/// use agent_lifecycle::error::{self, ErrorClass};
///
/// static VALIDATION: ErrorClass = ErrorClass::new("ValidationError", &error::ANY);
/// assert_eq!(VALIDATION.distance_to(&error::ANY), Some(1));
/// ```
pub struct ErrorClass {
    name: &'static str,
    parent: Option<&'static ErrorClass>,
}

/// Root of every error class.
pub static ANY: ErrorClass = ErrorClass::root("Error");

/// Failures raised by the engine itself rather than by a phase body.
pub static WORKFLOW: ErrorClass = ErrorClass::new("WorkflowError", &ANY);

/// A phase method parameter could not be supplied.
pub static UNRESOLVABLE_PARAMETER: ErrorClass =
    ErrorClass::new("UnresolvableParameterError", &WORKFLOW);

/// A call through the LLM facade failed.
pub static LLM: ErrorClass = ErrorClass::new("LlmError", &ANY);

impl ErrorClass {
    pub const fn root(name: &'static str) -> Self {
        Self { name, parent: None }
    }

    pub const fn new(name: &'static str, parent: &'static ErrorClass) -> Self {
        Self {
            name,
            parent: Some(parent),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn parent(&self) -> Option<&'static ErrorClass> {
        self.parent
    }

    /// Number of parent hops from `self` up to `ancestor`, or `None` if
    /// `ancestor` is not on the chain.
    pub fn distance_to(&self, ancestor: &ErrorClass) -> Option<usize> {
        let mut current = Some(self);
        let mut hops = 0;
        while let Some(class) = current {
            if class.same_as(ancestor) {
                return Some(hops);
            }
            hops += 1;
            current = class.parent.map(|p| p as &ErrorClass);
        }
        None
    }

    pub fn is_a(&self, ancestor: &ErrorClass) -> bool {
        self.distance_to(ancestor).is_some()
    }

    fn same_as(&self, other: &ErrorClass) -> bool {
        std::ptr::eq(self, other)
    }
}

impl PartialEq for ErrorClass {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl fmt::Debug for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// The failure a phase method returns instead of a value.
///
/// Cloning is cheap, which lets an exception handler re-raise the error it
/// was given.
#[derive(Debug, Clone, Error)]
#[error("{}: {}", .class.name(), .message)]
pub struct AgentError {
    class: &'static ErrorClass,
    message: String,
    #[source]
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl AgentError {
    pub fn new(class: &'static ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
            source: None,
        }
    }

    /// An error of the root class.
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(&ANY, message)
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn class(&self) -> &'static ErrorClass {
        self.class
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// True when this error's class is `class` or one of its descendants.
    pub fn is(&self, class: &ErrorClass) -> bool {
        self.class.is_a(class)
    }

    pub fn source_as<E: std::error::Error + 'static>(&self) -> Option<&E> {
        self.source.as_deref().and_then(|s| s.downcast_ref::<E>())
    }
}

/// No resolution strategy could supply a phase method parameter.
#[derive(Debug, Clone, Error)]
#[error("cannot resolve parameter {index} of type {ty} for {kind} method '{method}'")]
pub struct UnresolvableParameter {
    pub kind: PhaseKind,
    pub method: &'static str,
    pub index: usize,
    pub ty: SemanticType,
}

impl From<UnresolvableParameter> for AgentError {
    fn from(e: UnresolvableParameter) -> Self {
        AgentError::new(&UNRESOLVABLE_PARAMETER, e.to_string()).with_source(e)
    }
}

/// Structural problems found while registering an agent. An agent that fails
/// registration never runs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DescriptorError {
    #[error("agent '{agent}' declares no trigger method")]
    MissingTrigger { agent: String },

    #[error("agent '{agent}' declares more than one trigger: '{first}' and '{second}'")]
    MultipleTriggers {
        agent: String,
        first: &'static str,
        second: &'static str,
    },

    #[error("agent '{agent}' declares more than one outcome: '{first}' and '{second}'")]
    MultipleOutcomes {
        agent: String,
        first: &'static str,
        second: &'static str,
    },

    #[error("{kind} method '{method}' of agent '{agent}' may not return {returns}")]
    InvalidReturn {
        agent: String,
        kind: PhaseKind,
        method: &'static str,
        returns: ReturnKind,
    },

    #[error(
        "exception handler '{method}' of agent '{agent}' must declare exactly one exception parameter, found {found}"
    )]
    HandlerParameters {
        agent: String,
        method: &'static str,
        found: usize,
    },

    #[error("{kind} method '{method}' of agent '{agent}' declares an exception parameter")]
    MisplacedExceptionParameter {
        agent: String,
        kind: PhaseKind,
        method: &'static str,
    },

    #[error("agent '{agent}' has two handlers for {class}: '{first}' and '{second}'")]
    AmbiguousHandlers {
        agent: String,
        class: &'static str,
        first: &'static str,
        second: &'static str,
    },

    #[error("agent '{agent}' declares method '{method}' twice")]
    DuplicateMethod { agent: String, method: &'static str },

    #[error("duplicate agent name: {0}")]
    DuplicateAgent(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContextError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

/// What the caller of `start_workflow` receives when a workflow does not end
/// in `Completed` or `Halted`.
#[derive(Debug, Clone, Error)]
pub enum WorkflowError {
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("agent '{agent}' expects a trigger event of type {expected}, got {actual}")]
    TriggerMismatch {
        agent: String,
        expected: SemanticType,
        actual: SemanticType,
    },

    #[error("agent '{agent}' failed at {phase}: {error}")]
    Failed {
        agent: String,
        phase: PhaseId,
        #[source]
        error: AgentError,
    },
}

impl WorkflowError {
    /// The phase failure behind a `Failed` workflow.
    pub fn agent_error(&self) -> Option<&AgentError> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}
