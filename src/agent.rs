use crate::error::{AgentError, ErrorClass};
use crate::resolver::Args;
use crate::value::{SemanticType, Value};
use std::any::Any;
use std::fmt;

/// A type whose methods make up one workflow.
///
/// Implement `declare` to list the agent's lifecycle methods, then register
/// the type with an [`crate::EngineBuilder`]. By default a fresh instance is
/// created with `Default` for every workflow execution, so fields on the agent
/// are per-execution state. See [`Scope`] for sharing one instance instead.
///
/// ```rust
/// use agent_lifecycle::{Agent, AgentBuilder, Param, method};
///
/// #[derive(Default)]
/// struct Greeter;
///
/// impl Agent for Greeter {
///     fn declare(agent: AgentBuilder<Self>) -> AgentBuilder<Self> {
///         agent
///             .trigger(
///                 method("on_name")
///                     .param(Param::trigger::<String>())
///                     .returns_void(|_, _| Ok(())),
///             )
///             .decision(
///                 method("is_polite")
///                     .param(Param::trigger::<String>())
///                     .returns_bool(|_, args| Ok(!args.get::<String>(0)?.is_empty())),
///             )
///     }
/// }
/// ```
pub trait Agent: Default + Send + 'static {
    fn declare(agent: AgentBuilder<Self>) -> AgentBuilder<Self>;
}

/// How long one agent instance lives.
///
/// The workflow context and execution state belong to a single execution in
/// either scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Scope {
    /// A new instance per execution.
    #[default]
    Workflow,
    /// One instance shared by every execution of the agent. Executions of the
    /// same agent run one at a time.
    Application,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseKind {
    Trigger,
    Decision,
    Action,
    Outcome,
    ExceptionHandler,
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Trigger => "trigger",
            Self::Decision => "decision",
            Self::Action => "action",
            Self::Outcome => "outcome",
            Self::ExceptionHandler => "exception handler",
        })
    }
}

/// One phase method within an agent: its kind, its position among methods of
/// that kind, and its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseId {
    pub kind: PhaseKind,
    pub index: usize,
    pub method: &'static str,
}

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}] '{}'", self.kind, self.index, self.method)
    }
}

/// The declared return category of a phase method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    Void,
    Bool,
    Verdict,
    Object(SemanticType),
}

impl fmt::Display for ReturnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => f.write_str("void"),
            Self::Bool => f.write_str("boolean"),
            Self::Verdict => f.write_str("a verdict"),
            Self::Object(ty) => write!(f, "an object ({ty})"),
        }
    }
}

/// A decision's answer: whether to proceed, plus optional details that later
/// phases can take as a parameter.
#[derive(Debug, Clone)]
pub struct Verdict {
    success: bool,
    details: Option<Value>,
}

impl Verdict {
    pub fn new(success: bool, details: Option<Value>) -> Self {
        Self { success, details }
    }

    /// Proceed and carry `details` forward.
    pub fn proceed<T: Any + Send + Sync>(details: T) -> Self {
        Self::new(true, Some(Value::new(details)))
    }

    /// Stop the workflow. Any details are dropped with it.
    pub fn halt() -> Self {
        Self::new(false, None)
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    pub(crate) fn into_details(self) -> Option<Value> {
        self.details
    }
}

/// Where the resolver looks for a parameter's value.
#[derive(Debug, Clone, Copy)]
pub enum ParamSource {
    Context,
    Llm,
    TriggerEvent,
    PriorResult,
    Exception(&'static ErrorClass),
    Injectable,
}

/// One declared parameter of a phase method.
#[derive(Debug, Clone, Copy)]
pub struct Param {
    source: ParamSource,
    ty: SemanticType,
}

impl Param {
    /// The execution's [`crate::WorkflowContext`].
    pub fn context() -> Self {
        Self {
            source: ParamSource::Context,
            ty: SemanticType::of::<crate::WorkflowContext>(),
        }
    }

    /// The engine's configured LLM facade.
    pub fn llm() -> Self {
        Self {
            source: ParamSource::Llm,
            ty: SemanticType::of::<dyn crate::LargeLanguageModel>(),
        }
    }

    /// The event that started the workflow.
    pub fn trigger<T: Any>() -> Self {
        Self {
            source: ParamSource::TriggerEvent,
            ty: SemanticType::of::<T>(),
        }
    }

    /// A value returned by an earlier phase of the same execution.
    pub fn prior<T: Any>() -> Self {
        Self {
            source: ParamSource::PriorResult,
            ty: SemanticType::of::<T>(),
        }
    }

    /// The error being handled. Only exception handlers may declare one, and
    /// its class decides which failures the handler catches.
    pub fn exception(class: &'static ErrorClass) -> Self {
        Self {
            source: ParamSource::Exception(class),
            ty: SemanticType::of::<AgentError>(),
        }
    }

    /// A collaborator supplied by the engine's injector.
    pub fn injected<T: Any>() -> Self {
        Self {
            source: ParamSource::Injectable,
            ty: SemanticType::of::<T>(),
        }
    }

    pub fn source(&self) -> ParamSource {
        self.source
    }

    pub fn semantic_type(&self) -> SemanticType {
        self.ty
    }

    pub(crate) fn exception_class(&self) -> Option<&'static ErrorClass> {
        match self.source {
            ParamSource::Exception(class) => Some(class),
            _ => None,
        }
    }
}

/// What a phase body handed back, tagged by its declared return category.
#[derive(Debug)]
pub(crate) enum Returned {
    Void,
    Bool(bool),
    Verdict(Verdict),
    Object(Option<Value>),
}

type Body<A> = Box<dyn Fn(&mut A, &Args) -> Result<Returned, AgentError> + Send + Sync>;

/// Start declaring a phase method.
pub fn method(name: &'static str) -> MethodSignature {
    MethodSignature {
        name,
        params: Vec::new(),
    }
}

/// A method name and parameter list waiting for its body. Attaching the body
/// with one of the `returns_*` functions fixes the return category.
pub struct MethodSignature {
    name: &'static str,
    params: Vec<Param>,
}

impl MethodSignature {
    pub fn param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    pub fn returns_void<A, F>(self, body: F) -> PhaseMethod<A>
    where
        F: Fn(&mut A, &Args) -> Result<(), AgentError> + Send + Sync + 'static,
    {
        self.finish(
            ReturnKind::Void,
            Box::new(move |agent, args| body(agent, args).map(|()| Returned::Void)),
        )
    }

    pub fn returns_bool<A, F>(self, body: F) -> PhaseMethod<A>
    where
        F: Fn(&mut A, &Args) -> Result<bool, AgentError> + Send + Sync + 'static,
    {
        self.finish(
            ReturnKind::Bool,
            Box::new(move |agent, args| body(agent, args).map(Returned::Bool)),
        )
    }

    pub fn returns_verdict<A, F>(self, body: F) -> PhaseMethod<A>
    where
        F: Fn(&mut A, &Args) -> Result<Verdict, AgentError> + Send + Sync + 'static,
    {
        self.finish(
            ReturnKind::Verdict,
            Box::new(move |agent, args| body(agent, args).map(Returned::Verdict)),
        )
    }

    /// `None` plays the part of a null return.
    pub fn returns_object<A, T, F>(self, body: F) -> PhaseMethod<A>
    where
        T: Any + Send + Sync,
        F: Fn(&mut A, &Args) -> Result<Option<T>, AgentError> + Send + Sync + 'static,
    {
        self.finish(
            ReturnKind::Object(SemanticType::of::<T>()),
            Box::new(move |agent, args| {
                body(agent, args).map(|v| Returned::Object(v.map(Value::new)))
            }),
        )
    }

    fn finish<A>(self, returns: ReturnKind, body: Body<A>) -> PhaseMethod<A> {
        PhaseMethod {
            name: self.name,
            params: self.params,
            returns,
            body,
        }
    }
}

pub struct PhaseMethod<A> {
    name: &'static str,
    params: Vec<Param>,
    returns: ReturnKind,
    body: Body<A>,
}

impl<A> PhaseMethod<A> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn returns(&self) -> ReturnKind {
        self.returns
    }

    pub(crate) fn call(&self, agent: &mut A, args: &Args) -> Result<Returned, AgentError> {
        (self.body)(agent, args)
    }
}

impl<A> fmt::Debug for PhaseMethod<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseMethod")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("returns", &self.returns)
            .finish_non_exhaustive()
    }
}

/// Collects an agent's metadata and methods in declaration order. Validation
/// happens when the agent is registered.
pub struct AgentBuilder<A> {
    pub(crate) name: Option<String>,
    pub(crate) description: String,
    pub(crate) scope: Scope,
    pub(crate) methods: Vec<(PhaseKind, PhaseMethod<A>)>,
}

impl<A> AgentBuilder<A> {
    pub(crate) fn new() -> Self {
        Self {
            name: None,
            description: String::new(),
            scope: Scope::Workflow,
            methods: Vec::new(),
        }
    }

    /// Defaults to the type name in lowerCamelCase.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Keep one instance for every execution instead of a fresh one each time.
    pub fn application_scoped(mut self) -> Self {
        self.scope = Scope::Application;
        self
    }

    pub fn trigger(self, method: PhaseMethod<A>) -> Self {
        self.add(PhaseKind::Trigger, method)
    }

    pub fn decision(self, method: PhaseMethod<A>) -> Self {
        self.add(PhaseKind::Decision, method)
    }

    pub fn action(self, method: PhaseMethod<A>) -> Self {
        self.add(PhaseKind::Action, method)
    }

    pub fn outcome(self, method: PhaseMethod<A>) -> Self {
        self.add(PhaseKind::Outcome, method)
    }

    pub fn handle_exception(self, method: PhaseMethod<A>) -> Self {
        self.add(PhaseKind::ExceptionHandler, method)
    }

    fn add(mut self, kind: PhaseKind, method: PhaseMethod<A>) -> Self {
        self.methods.push((kind, method));
        self
    }
}
