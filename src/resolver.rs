use crate::agent::{Param, ParamSource, PhaseKind};
use crate::ctx::WorkflowContext;
use crate::error::{self, AgentError, UnresolvableParameter};
use crate::inject::Injector;
use crate::llm::LargeLanguageModel;
use crate::value::Value;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

#[derive(Clone)]
enum Arg {
    Value(Value),
    Context(Arc<WorkflowContext>),
    Llm(Arc<dyn LargeLanguageModel>),
    Error(AgentError),
}

impl Arg {
    fn describe(&self) -> &'static str {
        match self {
            Self::Value(_) => "a value",
            Self::Context(_) => "the workflow context",
            Self::Llm(_) => "the language model",
            Self::Error(_) => "an error",
        }
    }
}

/// The resolved arguments of one phase method call, in declaration order.
#[derive(Clone, Default)]
pub struct Args {
    items: Vec<Arg>,
}

impl Args {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The value at `index`, downcast to `T`.
    pub fn get<T: Any>(&self, index: usize) -> Result<&T, AgentError> {
        self.value(index)?.downcast_ref::<T>().ok_or_else(|| {
            misuse(format!(
                "argument {index} is not a {}",
                std::any::type_name::<T>()
            ))
        })
    }

    /// The value at `index` as it was carried, identity intact.
    pub fn value(&self, index: usize) -> Result<&Value, AgentError> {
        match self.item(index)? {
            Arg::Value(v) => Ok(v),
            other => Err(misuse(format!("argument {index} is {}", other.describe()))),
        }
    }

    pub fn context(&self, index: usize) -> Result<&WorkflowContext, AgentError> {
        match self.item(index)? {
            Arg::Context(ctx) => Ok(ctx),
            other => Err(misuse(format!("argument {index} is {}", other.describe()))),
        }
    }

    pub fn llm(&self, index: usize) -> Result<&dyn LargeLanguageModel, AgentError> {
        match self.item(index)? {
            Arg::Llm(llm) => Ok(llm.as_ref()),
            other => Err(misuse(format!("argument {index} is {}", other.describe()))),
        }
    }

    /// The error being handled, for exception handlers.
    pub fn error(&self, index: usize) -> Result<&AgentError, AgentError> {
        match self.item(index)? {
            Arg::Error(e) => Ok(e),
            other => Err(misuse(format!("argument {index} is {}", other.describe()))),
        }
    }

    fn item(&self, index: usize) -> Result<&Arg, AgentError> {
        self.items.get(index).ok_or_else(|| {
            misuse(format!(
                "argument {index} out of range ({} declared)",
                self.items.len()
            ))
        })
    }
}

impl fmt::Debug for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.items.iter().map(Arg::describe))
            .finish()
    }
}

fn misuse(msg: String) -> AgentError {
    AgentError::new(&error::WORKFLOW, msg)
}

type Strategy = fn(&ParameterResolver<'_>, &Param) -> Option<Arg>;

/// Tried in order for each parameter; the first strategy that yields a value
/// wins.
const STRATEGIES: [(&str, Strategy); 6] = [
    ("context", from_context),
    ("llm", from_llm),
    ("trigger-event", from_trigger_event),
    ("prior-result", from_prior_results),
    ("exception", from_exception),
    ("injector", from_injector),
];

/// Builds the argument list for a phase method from the state of one
/// execution. Resolution looks only at each parameter's category and type,
/// never at its name.
pub struct ParameterResolver<'a> {
    context: &'a Arc<WorkflowContext>,
    llm: Option<&'a Arc<dyn LargeLanguageModel>>,
    injector: Option<&'a dyn Injector>,
    carried: &'a [Value],
    exception: Option<&'a AgentError>,
}

impl<'a> ParameterResolver<'a> {
    pub fn new(context: &'a Arc<WorkflowContext>) -> Self {
        Self {
            context,
            llm: None,
            injector: None,
            carried: &[],
            exception: None,
        }
    }

    pub fn llm(mut self, llm: Option<&'a Arc<dyn LargeLanguageModel>>) -> Self {
        self.llm = llm;
        self
    }

    pub fn injector(mut self, injector: Option<&'a dyn Injector>) -> Self {
        self.injector = injector;
        self
    }

    /// Results carried so far, oldest first.
    pub fn carried(mut self, carried: &'a [Value]) -> Self {
        self.carried = carried;
        self
    }

    /// The error being dispatched to an exception handler.
    pub fn exception(mut self, error: &'a AgentError) -> Self {
        self.exception = Some(error);
        self
    }

    pub fn resolve(
        &self,
        kind: PhaseKind,
        method: &'static str,
        params: &[Param],
    ) -> Result<Args, UnresolvableParameter> {
        let mut items = Vec::with_capacity(params.len());
        for (index, param) in params.iter().enumerate() {
            let resolved = STRATEGIES
                .iter()
                .find_map(|(name, strategy)| strategy(self, param).map(|arg| (*name, arg)));

            let Some((strategy, arg)) = resolved else {
                return Err(UnresolvableParameter {
                    kind,
                    method,
                    index,
                    ty: param.semantic_type(),
                });
            };
            trace!(method, index, strategy, "parameter resolved");
            items.push(arg);
        }
        Ok(Args { items })
    }
}

fn from_context(r: &ParameterResolver<'_>, param: &Param) -> Option<Arg> {
    matches!(param.source(), ParamSource::Context).then(|| Arg::Context(Arc::clone(r.context)))
}

fn from_llm(r: &ParameterResolver<'_>, param: &Param) -> Option<Arg> {
    if !matches!(param.source(), ParamSource::Llm) {
        return None;
    }
    r.llm.map(|llm| Arg::Llm(Arc::clone(llm)))
}

fn from_trigger_event(r: &ParameterResolver<'_>, param: &Param) -> Option<Arg> {
    let event = r.context.trigger_event();
    (matches!(param.source(), ParamSource::TriggerEvent)
        && event.semantic_type() == param.semantic_type())
    .then(|| Arg::Value(event.clone()))
}

// Carried values newest first, so a later phase's value shadows an earlier
// one of the same type. The trigger event is the last resort.
fn from_prior_results(r: &ParameterResolver<'_>, param: &Param) -> Option<Arg> {
    if !matches!(param.source(), ParamSource::PriorResult) {
        return None;
    }
    let event = r.context.trigger_event();
    r.carried
        .iter()
        .rev()
        .chain(std::iter::once(event))
        .find(|v| v.semantic_type() == param.semantic_type())
        .map(|v| Arg::Value(v.clone()))
}

fn from_exception(r: &ParameterResolver<'_>, param: &Param) -> Option<Arg> {
    if !matches!(param.source(), ParamSource::Exception(_)) {
        return None;
    }
    r.exception.map(|e| Arg::Error(e.clone()))
}

fn from_injector(r: &ParameterResolver<'_>, param: &Param) -> Option<Arg> {
    if matches!(
        param.source(),
        ParamSource::Context | ParamSource::Llm | ParamSource::Exception(_)
    ) {
        return None;
    }
    r.injector?.resolve(param.semantic_type()).map(Arg::Value)
}
