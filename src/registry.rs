use crate::agent::{
    Agent, AgentBuilder, ParamSource, PhaseId, PhaseKind, PhaseMethod, ReturnKind, Scope,
};
use crate::error::{DescriptorError, ErrorClass, WorkflowError};
use crate::runner::{PhaseExecutor, Runtime, WorkflowOutcome};
use crate::value::{SemanticType, Value};
use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, OnceLock, PoisonError};
use tracing::debug;

/// An exception handler together with the error class it catches.
pub struct Handler<A> {
    class: &'static ErrorClass,
    method: PhaseMethod<A>,
}

impl<A> Handler<A> {
    pub fn class(&self) -> &'static ErrorClass {
        self.class
    }

    pub fn method(&self) -> &PhaseMethod<A> {
        &self.method
    }
}

/// The validated, immutable description of one agent type.
pub struct AgentDescriptor<A> {
    name: String,
    description: String,
    trigger: PhaseMethod<A>,
    decisions: Vec<PhaseMethod<A>>,
    actions: Vec<PhaseMethod<A>>,
    outcome: Option<PhaseMethod<A>>,
    handlers: Vec<Handler<A>>,
    scope: Scope,
    // Created on first execution of an application-scoped agent.
    shared: OnceLock<Mutex<A>>,
}

impl<A: Agent> AgentDescriptor<A> {
    /// Ask `A` to declare itself and validate the result.
    pub fn build() -> Result<Self, DescriptorError> {
        Self::from_builder(A::declare(AgentBuilder::new()), default_name::<A>())
    }
}

impl<A> AgentDescriptor<A> {
    pub(crate) fn from_builder(
        builder: AgentBuilder<A>,
        default_name: String,
    ) -> Result<Self, DescriptorError> {
        let agent = builder.name.unwrap_or(default_name);

        let mut seen = HashSet::new();
        let mut trigger: Option<PhaseMethod<A>> = None;
        let mut outcome: Option<PhaseMethod<A>> = None;
        let mut decisions = Vec::new();
        let mut actions = Vec::new();
        let mut handlers: Vec<Handler<A>> = Vec::new();

        for (kind, method) in builder.methods {
            if !seen.insert(method.name()) {
                return Err(DescriptorError::DuplicateMethod {
                    agent,
                    method: method.name(),
                });
            }
            check_return(&agent, kind, &method)?;

            let exception_classes: Vec<&'static ErrorClass> = method
                .params()
                .iter()
                .filter_map(|p| p.exception_class())
                .collect();

            match kind {
                PhaseKind::ExceptionHandler => {
                    let &[class] = exception_classes.as_slice() else {
                        return Err(DescriptorError::HandlerParameters {
                            agent,
                            method: method.name(),
                            found: exception_classes.len(),
                        });
                    };
                    if let Some(other) = handlers.iter().find(|h| *h.class == *class) {
                        return Err(DescriptorError::AmbiguousHandlers {
                            agent,
                            class: class.name(),
                            first: other.method.name(),
                            second: method.name(),
                        });
                    }
                    handlers.push(Handler { class, method });
                    continue;
                }
                _ if !exception_classes.is_empty() => {
                    return Err(DescriptorError::MisplacedExceptionParameter {
                        agent,
                        kind,
                        method: method.name(),
                    });
                }
                _ => {}
            }

            match kind {
                PhaseKind::Trigger => {
                    if let Some(first) = &trigger {
                        return Err(DescriptorError::MultipleTriggers {
                            agent,
                            first: first.name(),
                            second: method.name(),
                        });
                    }
                    trigger = Some(method);
                }
                PhaseKind::Outcome => {
                    if let Some(first) = &outcome {
                        return Err(DescriptorError::MultipleOutcomes {
                            agent,
                            first: first.name(),
                            second: method.name(),
                        });
                    }
                    outcome = Some(method);
                }
                PhaseKind::Decision => decisions.push(method),
                PhaseKind::Action => actions.push(method),
                PhaseKind::ExceptionHandler => unreachable!("handlers are collected above"),
            }
        }

        let Some(trigger) = trigger else {
            return Err(DescriptorError::MissingTrigger { agent });
        };

        Ok(Self {
            name: agent,
            description: builder.description,
            trigger,
            decisions,
            actions,
            outcome,
            handlers,
            scope: builder.scope,
            shared: OnceLock::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn trigger(&self) -> &PhaseMethod<A> {
        &self.trigger
    }

    pub fn decisions(&self) -> &[PhaseMethod<A>] {
        &self.decisions
    }

    pub fn actions(&self) -> &[PhaseMethod<A>] {
        &self.actions
    }

    pub fn outcome(&self) -> Option<&PhaseMethod<A>> {
        self.outcome.as_ref()
    }

    pub fn handlers(&self) -> &[Handler<A>] {
        &self.handlers
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// The event type the trigger declares, if it declares one.
    pub fn trigger_event_type(&self) -> Option<SemanticType> {
        self.trigger
            .params()
            .iter()
            .find(|p| matches!(p.source(), ParamSource::TriggerEvent))
            .map(|p| p.semantic_type())
    }

    /// Trigger, decisions, actions and outcome in execution order.
    pub(crate) fn steps(&self) -> impl Iterator<Item = (PhaseId, &PhaseMethod<A>)> {
        let groups: [(PhaseKind, &[PhaseMethod<A>]); 4] = [
            (PhaseKind::Trigger, std::slice::from_ref(&self.trigger)),
            (PhaseKind::Decision, self.decisions.as_slice()),
            (PhaseKind::Action, self.actions.as_slice()),
            (PhaseKind::Outcome, self.outcome.as_slice()),
        ];
        groups.into_iter().flat_map(|(kind, methods)| {
            methods.iter().enumerate().map(move |(index, method)| {
                let id = PhaseId {
                    kind,
                    index,
                    method: method.name(),
                };
                (id, method)
            })
        })
    }
}

fn check_return<A>(agent: &str, kind: PhaseKind, method: &PhaseMethod<A>) -> Result<(), DescriptorError> {
    let returns = method.returns();
    let allowed = match kind {
        PhaseKind::Trigger | PhaseKind::Action => {
            matches!(returns, ReturnKind::Void | ReturnKind::Object(_))
        }
        PhaseKind::Decision => !matches!(returns, ReturnKind::Void),
        PhaseKind::Outcome | PhaseKind::ExceptionHandler => matches!(returns, ReturnKind::Void),
    };
    if allowed {
        Ok(())
    } else {
        Err(DescriptorError::InvalidReturn {
            agent: agent.to_string(),
            kind,
            method: method.name(),
            returns,
        })
    }
}

/// `my_crate::agents::FraudDetector` becomes `fraudDetector`.
fn default_name<A>() -> String {
    let full = std::any::type_name::<A>();
    let path = full.split('<').next().unwrap_or(full);
    let short = path.rsplit("::").next().unwrap_or(path);
    let mut chars = short.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Read-only metadata about a registered agent, available without knowing
/// its type.
pub trait AgentInfo {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// Names of the agent's methods of `kind`, in declaration order.
    fn method_names(&self, kind: PhaseKind) -> Vec<&'static str>;
    fn trigger_event_type(&self) -> Option<SemanticType>;
    fn scope(&self) -> Scope;
}

impl<A> AgentInfo for AgentDescriptor<A> {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn method_names(&self, kind: PhaseKind) -> Vec<&'static str> {
        match kind {
            PhaseKind::Trigger => vec![self.trigger.name()],
            PhaseKind::Decision => self.decisions.iter().map(|m| m.name()).collect(),
            PhaseKind::Action => self.actions.iter().map(|m| m.name()).collect(),
            PhaseKind::Outcome => self.outcome.iter().map(|m| m.name()).collect(),
            PhaseKind::ExceptionHandler => self.handlers.iter().map(|h| h.method.name()).collect(),
        }
    }

    fn trigger_event_type(&self) -> Option<SemanticType> {
        AgentDescriptor::trigger_event_type(self)
    }

    fn scope(&self) -> Scope {
        self.scope
    }
}

pub(crate) trait ErasedAgent: Send + Sync {
    fn info(&self) -> &dyn AgentInfo;
    fn as_any(&self) -> &dyn Any;
    fn execute(&self, event: Value, runtime: &Runtime) -> Result<WorkflowOutcome, WorkflowError>;
}

impl<A: Agent> ErasedAgent for AgentDescriptor<A> {
    fn info(&self) -> &dyn AgentInfo {
        self
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn execute(&self, event: Value, runtime: &Runtime) -> Result<WorkflowOutcome, WorkflowError> {
        match self.scope {
            Scope::Workflow => {
                let mut agent = A::default();
                PhaseExecutor::new(self, runtime, &mut agent, event).run()
            }
            Scope::Application => {
                let shared = self.shared.get_or_init(|| Mutex::new(A::default()));
                // A panicking phase leaves the instance as it was; keep serving it.
                let mut agent = shared.lock().unwrap_or_else(PoisonError::into_inner);
                PhaseExecutor::new(self, runtime, &mut agent, event).run()
            }
        }
    }
}

/// Descriptors for every registered agent, keyed by name and by type.
/// Populated before the engine is built and read-only afterwards.
#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Box<dyn ErasedAgent>>,
    by_type: HashMap<TypeId, String>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and validate `A`'s descriptor and store it.
    pub fn register<A: Agent>(&mut self) -> Result<&AgentDescriptor<A>, DescriptorError> {
        let descriptor = AgentDescriptor::<A>::build()?;
        let name = descriptor.name().to_string();
        if self.agents.contains_key(&name) {
            return Err(DescriptorError::DuplicateAgent(name));
        }
        debug!(
            agent = %name,
            decisions = descriptor.decisions().len(),
            actions = descriptor.actions().len(),
            handlers = descriptor.handlers().len(),
            scope = ?descriptor.scope(),
            "agent registered"
        );
        self.by_type.insert(TypeId::of::<A>(), name.clone());
        self.agents.insert(name.clone(), Box::new(descriptor));
        self.lookup::<A>()
            .ok_or_else(|| DescriptorError::DuplicateAgent(name))
    }

    pub fn lookup<A: Agent>(&self) -> Option<&AgentDescriptor<A>> {
        let name = self.by_type.get(&TypeId::of::<A>())?;
        self.agents.get(name)?.as_any().downcast_ref()
    }

    pub fn lookup_name(&self, name: &str) -> Option<&dyn AgentInfo> {
        self.agents.get(name).map(|a| a.info())
    }

    pub fn name_of<A: Agent>(&self) -> Option<&str> {
        self.by_type.get(&TypeId::of::<A>()).map(String::as_str)
    }

    /// Registered agent names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.agents.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub(crate) fn get(&self, name: &str) -> Option<&dyn ErasedAgent> {
        self.agents.get(name).map(|a| a.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Param, Verdict, method};
    use crate::error::{self, ErrorClass};

    static VALIDATION: ErrorClass = ErrorClass::new("ValidationError", &error::ANY);

    struct Pr;

    fn noop_trigger<A>(name: &'static str) -> PhaseMethod<A> {
        method(name)
            .param(Param::trigger::<Pr>())
            .returns_void(|_, _| Ok(()))
    }

    fn describe<A>(builder: AgentBuilder<A>) -> Result<AgentDescriptor<A>, DescriptorError> {
        AgentDescriptor::from_builder(builder, "test".into())
    }

    #[derive(Default)]
    struct Docs;

    impl Agent for Docs {
        fn declare(agent: AgentBuilder<Self>) -> AgentBuilder<Self> {
            agent
                .description("writes docs")
                .trigger(noop_trigger("detect"))
                .decision(method("needs_docs").returns_bool(|_, _| Ok(true)))
                .action(method("write").returns_object(|_, _| Ok(Some("doc"))))
                .action(method("review").returns_void(|_, _| Ok(())))
                .outcome(method("apply").returns_void(|_, _| Ok(())))
                .handle_exception(
                    method("on_error")
                        .param(Param::exception(&error::ANY))
                        .returns_void(|_, _| Ok(())),
                )
        }
    }

    #[derive(Default)]
    struct Named;

    impl Agent for Named {
        fn declare(agent: AgentBuilder<Self>) -> AgentBuilder<Self> {
            agent.name("Docs").trigger(noop_trigger("t"))
        }
    }

    // --- descriptor shape ---

    #[test]
    fn build_valid_descriptor() {
        let d = AgentDescriptor::<Docs>::build().unwrap();
        assert_eq!(d.name(), "docs");
        assert_eq!(d.description(), "writes docs");
        assert_eq!(d.trigger().name(), "detect");
        assert_eq!(d.decisions().len(), 1);
        assert_eq!(d.actions().len(), 2);
        assert_eq!(d.outcome().unwrap().name(), "apply");
        assert_eq!(d.handlers().len(), 1);
        assert!(d.trigger_event_type().unwrap().is::<Pr>());
        assert_eq!(d.scope(), Scope::Workflow);
    }

    #[test]
    fn steps_follow_lifecycle_order() {
        let d = AgentDescriptor::<Docs>::build().unwrap();
        let steps: Vec<String> = d.steps().map(|(id, _)| id.to_string()).collect();
        assert_eq!(
            steps,
            vec![
                "trigger[0] 'detect'",
                "decision[0] 'needs_docs'",
                "action[0] 'write'",
                "action[1] 'review'",
                "outcome[0] 'apply'",
            ]
        );
    }

    #[test]
    fn default_name_is_lower_camel_case() {
        assert_eq!(default_name::<Docs>(), "docs");
        assert_eq!(default_name::<Vec<u8>>(), "vec");
    }

    // --- trigger / outcome counts ---

    #[test]
    fn missing_trigger_rejected() {
        let b: AgentBuilder<()> = AgentBuilder::new().action(method("a").returns_void(|_, _| Ok(())));
        let err = describe(b).err().unwrap();
        assert_eq!(err, DescriptorError::MissingTrigger { agent: "test".into() });
    }

    #[test]
    fn second_trigger_rejected() {
        let b: AgentBuilder<()> = AgentBuilder::new()
            .trigger(noop_trigger("a"))
            .trigger(noop_trigger("b"));
        let err = describe(b).err().unwrap();
        assert!(matches!(
            err,
            DescriptorError::MultipleTriggers { first: "a", second: "b", .. }
        ));
    }

    #[test]
    fn second_outcome_rejected() {
        let b: AgentBuilder<()> = AgentBuilder::new()
            .trigger(noop_trigger("t"))
            .outcome(method("o1").returns_void(|_, _| Ok(())))
            .outcome(method("o2").returns_void(|_, _| Ok(())));
        let err = describe(b).err().unwrap();
        assert!(matches!(err, DescriptorError::MultipleOutcomes { .. }));
    }

    #[test]
    fn outcome_is_optional() {
        let b: AgentBuilder<()> = AgentBuilder::new().trigger(noop_trigger("t"));
        assert!(describe(b).unwrap().outcome().is_none());
    }

    // --- return categories ---

    #[test]
    fn trigger_returning_bool_rejected() {
        let b: AgentBuilder<()> =
            AgentBuilder::new().trigger(method("t").returns_bool(|_, _| Ok(true)));
        let err = describe(b).err().unwrap();
        assert!(matches!(
            err,
            DescriptorError::InvalidReturn { kind: PhaseKind::Trigger, returns: ReturnKind::Bool, .. }
        ));
    }

    #[test]
    fn trigger_returning_object_allowed() {
        let b: AgentBuilder<()> =
            AgentBuilder::new().trigger(method("t").returns_object(|_, _| Ok(Some(1u8))));
        assert!(describe(b).is_ok());
    }

    #[test]
    fn outcome_returning_object_rejected() {
        let b: AgentBuilder<()> = AgentBuilder::new()
            .trigger(noop_trigger("t"))
            .outcome(method("o").returns_object(|_, _| Ok(Some(1u8))));
        let err = describe(b).err().unwrap();
        assert!(matches!(
            err,
            DescriptorError::InvalidReturn { kind: PhaseKind::Outcome, .. }
        ));
    }

    #[test]
    fn void_decision_rejected() {
        let b: AgentBuilder<()> = AgentBuilder::new()
            .trigger(noop_trigger("t"))
            .decision(method("d").returns_void(|_, _| Ok(())));
        assert!(matches!(
            describe(b).err().unwrap(),
            DescriptorError::InvalidReturn { kind: PhaseKind::Decision, .. }
        ));
    }

    #[test]
    fn verdict_action_rejected() {
        let b: AgentBuilder<()> = AgentBuilder::new()
            .trigger(noop_trigger("t"))
            .action(method("a").returns_verdict(|_, _| Ok(Verdict::halt())));
        assert!(matches!(
            describe(b).err().unwrap(),
            DescriptorError::InvalidReturn { kind: PhaseKind::Action, .. }
        ));
    }

    // --- exception handlers ---

    #[test]
    fn handler_without_exception_param_rejected() {
        let b: AgentBuilder<()> = AgentBuilder::new()
            .trigger(noop_trigger("t"))
            .handle_exception(method("h").param(Param::context()).returns_void(|_, _| Ok(())));
        let err = describe(b).err().unwrap();
        assert!(matches!(err, DescriptorError::HandlerParameters { found: 0, .. }));
    }

    #[test]
    fn handler_with_two_exception_params_rejected() {
        let b: AgentBuilder<()> = AgentBuilder::new().trigger(noop_trigger("t")).handle_exception(
            method("h")
                .param(Param::exception(&error::ANY))
                .param(Param::exception(&VALIDATION))
                .returns_void(|_, _| Ok(())),
        );
        let err = describe(b).err().unwrap();
        assert!(matches!(err, DescriptorError::HandlerParameters { found: 2, .. }));
    }

    #[test]
    fn non_void_handler_rejected() {
        let b: AgentBuilder<()> = AgentBuilder::new().trigger(noop_trigger("t")).handle_exception(
            method("h")
                .param(Param::exception(&error::ANY))
                .returns_bool(|_, _| Ok(true)),
        );
        let err = describe(b).err().unwrap();
        assert!(matches!(
            err,
            DescriptorError::InvalidReturn { kind: PhaseKind::ExceptionHandler, .. }
        ));
    }

    #[test]
    fn exception_param_outside_handler_rejected() {
        let b: AgentBuilder<()> = AgentBuilder::new().trigger(noop_trigger("t")).action(
            method("a")
                .param(Param::exception(&error::ANY))
                .returns_void(|_, _| Ok(())),
        );
        let err = describe(b).err().unwrap();
        assert!(matches!(
            err,
            DescriptorError::MisplacedExceptionParameter { kind: PhaseKind::Action, .. }
        ));
    }

    #[test]
    fn handlers_for_same_class_rejected() {
        let handler = |name| {
            method(name)
                .param(Param::exception(&VALIDATION))
                .returns_void(|_: &mut (), _| Ok(()))
        };
        let b: AgentBuilder<()> = AgentBuilder::new()
            .trigger(noop_trigger("t"))
            .handle_exception(handler("h1"))
            .handle_exception(handler("h2"));
        let err = describe(b).err().unwrap();
        assert_eq!(
            err,
            DescriptorError::AmbiguousHandlers {
                agent: "test".into(),
                class: "ValidationError",
                first: "h1",
                second: "h2",
            }
        );
    }

    #[test]
    fn handlers_for_same_named_classes_are_distinct() {
        static OTHER_VALIDATION: ErrorClass = ErrorClass::new("ValidationError", &error::ANY);
        let b: AgentBuilder<()> = AgentBuilder::new()
            .trigger(noop_trigger("t"))
            .handle_exception(
                method("h1")
                    .param(Param::exception(&VALIDATION))
                    .returns_void(|_, _| Ok(())),
            )
            .handle_exception(
                method("h2")
                    .param(Param::exception(&OTHER_VALIDATION))
                    .returns_void(|_, _| Ok(())),
            );
        assert_eq!(describe(b).unwrap().handlers().len(), 2);
    }

    #[test]
    fn duplicate_method_name_rejected() {
        let b: AgentBuilder<()> = AgentBuilder::new()
            .trigger(noop_trigger("same"))
            .action(method("same").returns_void(|_, _| Ok(())));
        assert!(matches!(
            describe(b).err().unwrap(),
            DescriptorError::DuplicateMethod { method: "same", .. }
        ));
    }

    // --- registry ---

    #[test]
    fn register_then_lookup_by_type_and_name() {
        let mut registry = AgentRegistry::new();
        registry.register::<Docs>().unwrap();

        assert_eq!(registry.lookup::<Docs>().unwrap().name(), "docs");
        let info = registry.lookup_name("docs").unwrap();
        assert_eq!(info.description(), "writes docs");
        assert_eq!(info.method_names(PhaseKind::Action), vec!["write", "review"]);
        assert_eq!(info.method_names(PhaseKind::ExceptionHandler), vec!["on_error"]);
        assert_eq!(registry.name_of::<Docs>(), Some("docs"));
        assert!(registry.lookup::<Named>().is_none());
    }

    #[test]
    fn application_scope_is_recorded() {
        let b: AgentBuilder<()> = AgentBuilder::new()
            .application_scoped()
            .trigger(noop_trigger("t"));
        let d = describe(b).unwrap();
        assert_eq!(d.scope(), Scope::Application);
        assert_eq!(AgentInfo::scope(&d), Scope::Application);
    }

    #[test]
    fn duplicate_agent_name_rejected() {
        let mut registry = AgentRegistry::new();
        registry.register::<Named>().unwrap();
        registry.register::<Docs>().unwrap();
        assert_eq!(registry.names(), vec!["Docs", "docs"]);

        let err = registry.register::<Named>().err().unwrap();
        assert_eq!(err, DescriptorError::DuplicateAgent("Docs".into()));
        assert_eq!(registry.len(), 2);
    }
}
