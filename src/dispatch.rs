use crate::agent::PhaseKind;
use crate::error::AgentError;
use crate::registry::Handler;
use crate::resolver::ParameterResolver;
use tracing::{debug, warn};

/// How a phase failure was settled.
#[derive(Debug)]
pub(crate) enum Dispatch {
    /// A handler returned normally; the workflow resumes at the next phase.
    Recovered { handler: &'static str },
    /// No handler matched, or the chosen handler failed in turn. `error` is
    /// what the caller sees.
    Propagate {
        error: AgentError,
        handler: Option<&'static str>,
    },
}

/// Routes a failed phase to the agent's most specific exception handler.
pub struct ExceptionDispatcher<'a, A> {
    handlers: &'a [Handler<A>],
}

impl<'a, A> ExceptionDispatcher<'a, A> {
    pub fn new(handlers: &'a [Handler<A>]) -> Self {
        Self { handlers }
    }

    /// The handler whose declared class is closest to `error`'s class.
    /// Registration rejects two handlers for one class, so there are no ties.
    pub fn select(&self, error: &AgentError) -> Option<&'a Handler<A>> {
        self.handlers
            .iter()
            .filter_map(|h| error.class().distance_to(h.class()).map(|d| (d, h)))
            .min_by_key(|(distance, _)| *distance)
            .map(|(_, h)| h)
    }

    /// Invoke the selected handler. A failure inside the handler is not
    /// dispatched again.
    pub(crate) fn dispatch(
        &self,
        error: AgentError,
        agent: &mut A,
        resolver: ParameterResolver<'_>,
    ) -> Dispatch {
        let Some(handler) = self.select(&error) else {
            debug!(class = %error.class(), "no matching exception handler");
            return Dispatch::Propagate {
                error,
                handler: None,
            };
        };

        let method = handler.method();
        let name = method.name();
        debug!(handler = name, class = %handler.class(), "dispatching to exception handler");

        let resolver = resolver.exception(&error);
        let result = resolver
            .resolve(PhaseKind::ExceptionHandler, name, method.params())
            .map_err(AgentError::from)
            .and_then(|args| method.call(agent, &args));

        match result {
            Ok(_) => Dispatch::Recovered { handler: name },
            Err(raised) => {
                warn!(handler = name, error = %raised, "exception handler failed");
                Dispatch::Propagate {
                    error: raised,
                    handler: Some(name),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentBuilder, Param, method};
    use crate::ctx::WorkflowContext;
    use crate::error::{self, ErrorClass};
    use crate::registry::AgentDescriptor;
    use crate::value::Value;
    use std::sync::Arc;

    static VALIDATION: ErrorClass = ErrorClass::new("ValidationError", &error::ANY);
    static SCHEMA: ErrorClass = ErrorClass::new("SchemaError", &VALIDATION);
    static TIMEOUT: ErrorClass = ErrorClass::new("TimeoutError", &error::ANY);

    #[derive(Default)]
    struct Seen(Vec<&'static str>);

    fn recording(name: &'static str, class: &'static ErrorClass) -> crate::agent::PhaseMethod<Seen> {
        method(name)
            .param(Param::exception(class))
            .returns_void(move |seen: &mut Seen, _| {
                seen.0.push(name);
                Ok(())
            })
    }

    fn descriptor() -> AgentDescriptor<Seen> {
        let builder = AgentBuilder::new()
            .trigger(method("t").returns_void(|_, _| Ok(())))
            .handle_exception(recording("on_any", &error::ANY))
            .handle_exception(recording("on_validation", &VALIDATION))
            .handle_exception(
                method("on_timeout")
                    .param(Param::exception(&TIMEOUT))
                    .returns_void(|_, args| Err(args.error(0)?.clone())),
            );
        AgentDescriptor::from_builder(builder, "test".into()).unwrap()
    }

    fn context() -> Arc<WorkflowContext> {
        Arc::new(WorkflowContext::new(Value::new(())))
    }

    // --- select ---

    #[test]
    fn narrowest_handler_wins() {
        let d = descriptor();
        let dispatcher = ExceptionDispatcher::new(d.handlers());
        let err = AgentError::new(&VALIDATION, "bad");
        assert_eq!(dispatcher.select(&err).unwrap().method().name(), "on_validation");
    }

    #[test]
    fn descendant_class_uses_nearest_ancestor_handler() {
        let d = descriptor();
        let dispatcher = ExceptionDispatcher::new(d.handlers());
        let err = AgentError::new(&SCHEMA, "bad schema");
        assert_eq!(dispatcher.select(&err).unwrap().method().name(), "on_validation");
    }

    #[test]
    fn root_handler_catches_everything_else() {
        let d = descriptor();
        let dispatcher = ExceptionDispatcher::new(d.handlers());
        let err = AgentError::new(&error::LLM, "down");
        assert_eq!(dispatcher.select(&err).unwrap().method().name(), "on_any");
    }

    #[test]
    fn no_handlers_selects_nothing() {
        let dispatcher: ExceptionDispatcher<'_, Seen> = ExceptionDispatcher::new(&[]);
        assert!(dispatcher.select(&AgentError::other("x")).is_none());
    }

    // --- dispatch ---

    #[test]
    fn handler_returning_normally_recovers() {
        let d = descriptor();
        let ctx = context();
        let mut seen = Seen::default();
        let out = ExceptionDispatcher::new(d.handlers()).dispatch(
            AgentError::new(&VALIDATION, "bad"),
            &mut seen,
            ParameterResolver::new(&ctx),
        );
        assert!(matches!(out, Dispatch::Recovered { handler: "on_validation" }));
        assert_eq!(seen.0, vec!["on_validation"]);
    }

    #[test]
    fn rethrowing_handler_propagates_without_second_dispatch() {
        let d = descriptor();
        let ctx = context();
        let mut seen = Seen::default();
        let out = ExceptionDispatcher::new(d.handlers()).dispatch(
            AgentError::new(&TIMEOUT, "slow"),
            &mut seen,
            ParameterResolver::new(&ctx),
        );
        match out {
            Dispatch::Propagate { error, handler } => {
                assert_eq!(handler, Some("on_timeout"));
                assert_eq!(error.message(), "slow");
            }
            other => panic!("unexpected {other:?}"),
        }
        // on_any would match the re-raised error but is never consulted.
        assert!(seen.0.is_empty());
    }

    #[test]
    fn unmatched_error_propagates_unchanged() {
        let builder: AgentBuilder<Seen> = AgentBuilder::new()
            .trigger(method("t").returns_void(|_, _| Ok(())))
            .handle_exception(recording("on_validation", &VALIDATION));
        let d = AgentDescriptor::from_builder(builder, "test".into()).unwrap();
        let ctx = context();
        let out = ExceptionDispatcher::new(d.handlers()).dispatch(
            AgentError::new(&TIMEOUT, "slow"),
            &mut Seen::default(),
            ParameterResolver::new(&ctx),
        );
        assert!(matches!(
            out,
            Dispatch::Propagate { handler: None, error: ref e } if e.is(&TIMEOUT)
        ));
    }

    #[test]
    fn handler_with_unresolvable_parameter_propagates() {
        struct Missing;
        let builder: AgentBuilder<Seen> = AgentBuilder::new()
            .trigger(method("t").returns_void(|_, _| Ok(())))
            .handle_exception(
                method("h")
                    .param(Param::exception(&error::ANY))
                    .param(Param::injected::<Missing>())
                    .returns_void(|_, _| Ok(())),
            );
        let d = AgentDescriptor::from_builder(builder, "test".into()).unwrap();
        let ctx = context();
        let out = ExceptionDispatcher::new(d.handlers()).dispatch(
            AgentError::other("boom"),
            &mut Seen::default(),
            ParameterResolver::new(&ctx),
        );
        assert!(matches!(
            out,
            Dispatch::Propagate { handler: Some("h"), error: ref e }
                if e.is(&error::UNRESOLVABLE_PARAMETER)
        ));
    }
}
