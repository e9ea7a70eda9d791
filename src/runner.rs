use crate::agent::{PhaseId, PhaseKind, PhaseMethod, Returned};
use crate::ctx::WorkflowContext;
use crate::dispatch::{Dispatch, ExceptionDispatcher};
use crate::error::{AgentError, WorkflowError};
use crate::inject::Injector;
use crate::llm::LargeLanguageModel;
use crate::registry::AgentDescriptor;
use crate::resolver::ParameterResolver;
use crate::value::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn};

/// What a completed phase method did to the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Continued without producing a value.
    Proceeded,
    /// Continued and carried a value forward.
    Carried,
    /// A decision stopped the workflow.
    Halted,
}

/// Passed to `on_phase` hooks after each phase method returns normally.
pub struct PhaseEvent<'a> {
    pub agent: &'a str,
    pub phase: PhaseId,
    pub disposition: Disposition,
    pub duration: Duration,
    pub step_number: usize,
    /// State after the phase's result was applied.
    pub state: &'a ExecutionState,
}

/// Passed to `on_error` hooks when a phase method fails, once the failure
/// has been dispatched.
pub struct ErrorEvent<'a> {
    pub agent: &'a str,
    pub phase: PhaseId,
    pub error: &'a AgentError,
    /// The exception handler that was chosen, if any.
    pub handler: Option<&'static str>,
    pub recovered: bool,
    pub step_number: usize,
}

pub(crate) type PhaseHook = Arc<dyn Fn(&PhaseEvent<'_>) + Send + Sync>;
pub(crate) type ErrorHook = Arc<dyn Fn(&ErrorEvent<'_>) + Send + Sync>;

/// Everything an execution borrows from the engine.
#[derive(Clone, Default)]
pub(crate) struct Runtime {
    pub(crate) llm: Option<Arc<dyn LargeLanguageModel>>,
    pub(crate) injector: Option<Arc<dyn Injector>>,
    pub(crate) on_phase: Vec<PhaseHook>,
    pub(crate) on_error: Vec<ErrorHook>,
}

impl Runtime {
    fn resolver<'r>(
        &'r self,
        context: &'r Arc<WorkflowContext>,
        carried: &'r [Value],
    ) -> ParameterResolver<'r> {
        ParameterResolver::new(context)
            .llm(self.llm.as_ref())
            .injector(self.injector.as_deref())
            .carried(carried)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Created,
    TriggerRunning,
    DecisionRunning(usize),
    ActionRunning(usize),
    OutcomeRunning,
    Completed,
    Halted,
    Failed,
}

impl Phase {
    fn running(id: PhaseId) -> Self {
        match id.kind {
            PhaseKind::Trigger => Self::TriggerRunning,
            PhaseKind::Decision => Self::DecisionRunning(id.index),
            PhaseKind::Action => Self::ActionRunning(id.index),
            PhaseKind::Outcome => Self::OutcomeRunning,
            PhaseKind::ExceptionHandler => unreachable!("handlers never run as a step"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Completed,
    DecisionHalted,
    ExceptionPropagated,
}

/// Where one execution is and what it has produced so far.
#[derive(Debug)]
pub struct ExecutionState {
    phase: Phase,
    carried: Vec<Value>,
    termination: Option<Termination>,
}

impl ExecutionState {
    fn new() -> Self {
        Self {
            phase: Phase::Created,
            carried: Vec::new(),
            termination: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The most recent value a phase produced.
    pub fn latest_result(&self) -> Option<&Value> {
        self.carried.last()
    }

    /// Every carried value, oldest first.
    pub fn carried(&self) -> &[Value] {
        &self.carried
    }

    pub fn termination(&self) -> Option<Termination> {
        self.termination
    }

    fn enter(&mut self, phase: Phase) {
        debug!(?phase, "entering phase");
        self.phase = phase;
    }

    fn terminate(&mut self, termination: Termination) {
        self.phase = match termination {
            Termination::Completed => Phase::Completed,
            Termination::DecisionHalted => Phase::Halted,
            Termination::ExceptionPropagated => Phase::Failed,
        };
        self.termination = Some(termination);
    }
}

/// How a workflow ended when it did not fail.
#[derive(Debug, Clone)]
pub enum WorkflowOutcome {
    /// Every phase ran (or was recovered). `result` is the last value carried.
    Completed { result: Option<Value> },
    /// A decision stopped the workflow.
    Halted { phase: PhaseId },
}

impl WorkflowOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    pub fn is_halted(&self) -> bool {
        matches!(self, Self::Halted { .. })
    }
}

enum Step {
    Proceed(Option<Value>),
    Halt,
}

/// Map a phase method's return to proceed/halt. The variant is fixed by the
/// method's declared return category.
fn interpret(kind: PhaseKind, returned: Returned) -> Step {
    match (kind, returned) {
        (PhaseKind::Decision, Returned::Bool(true)) => Step::Proceed(None),
        (PhaseKind::Decision, Returned::Bool(false)) => Step::Halt,
        (PhaseKind::Decision, Returned::Verdict(v)) if v.success() => {
            Step::Proceed(v.into_details())
        }
        (PhaseKind::Decision, Returned::Verdict(_)) => Step::Halt,
        (PhaseKind::Decision, Returned::Object(None)) => Step::Halt,
        (_, Returned::Object(value)) => Step::Proceed(value),
        _ => Step::Proceed(None),
    }
}

/// Runs one workflow execution from trigger to a terminal state. Owns the
/// context, which is dropped when `run` returns. The agent instance is
/// borrowed so that an application-scoped one outlives the execution.
pub(crate) struct PhaseExecutor<'a, A> {
    descriptor: &'a AgentDescriptor<A>,
    runtime: &'a Runtime,
    agent: &'a mut A,
    context: Arc<WorkflowContext>,
    state: ExecutionState,
    step_number: usize,
}

impl<'a, A> PhaseExecutor<'a, A> {
    pub(crate) fn new(
        descriptor: &'a AgentDescriptor<A>,
        runtime: &'a Runtime,
        agent: &'a mut A,
        event: Value,
    ) -> Self {
        Self {
            descriptor,
            runtime,
            agent,
            context: Arc::new(WorkflowContext::new(event)),
            state: ExecutionState::new(),
            step_number: 0,
        }
    }

    pub(crate) fn run(mut self) -> Result<WorkflowOutcome, WorkflowError> {
        let descriptor = self.descriptor;
        let span = info_span!("workflow", agent = %descriptor.name());
        let _guard = span.enter();
        debug!("workflow started");

        for (phase, method) in descriptor.steps() {
            self.step_number += 1;
            self.state.enter(Phase::running(phase));

            let start = Instant::now();
            let result = self.invoke(phase, method);
            let duration = start.elapsed();

            match result {
                Ok(returned) => match interpret(phase.kind, returned) {
                    Step::Proceed(carried) => {
                        let disposition = if carried.is_some() {
                            Disposition::Carried
                        } else {
                            Disposition::Proceeded
                        };
                        if let Some(value) = carried {
                            self.state.carried.push(value);
                        }
                        self.emit_phase(phase, disposition, duration);
                    }
                    Step::Halt => {
                        self.state.terminate(Termination::DecisionHalted);
                        self.emit_phase(phase, Disposition::Halted, duration);
                        info!(%phase, "workflow halted");
                        return Ok(WorkflowOutcome::Halted { phase });
                    }
                },
                Err(error) => {
                    warn!(%phase, %error, "phase failed");
                    match self.dispatch(phase, error) {
                        Ok(()) => continue,
                        Err(error) => {
                            self.state.terminate(Termination::ExceptionPropagated);
                            info!(%phase, "workflow failed");
                            return Err(WorkflowError::Failed {
                                agent: descriptor.name().to_string(),
                                phase,
                                error,
                            });
                        }
                    }
                }
            }
        }

        self.state.terminate(Termination::Completed);
        info!(steps = self.step_number, "workflow completed");
        Ok(WorkflowOutcome::Completed {
            result: self.state.latest_result().cloned(),
        })
    }

    fn invoke(&mut self, phase: PhaseId, method: &PhaseMethod<A>) -> Result<Returned, AgentError> {
        let args = self
            .runtime
            .resolver(&self.context, &self.state.carried)
            .resolve(phase.kind, method.name(), method.params())?;
        method.call(&mut *self.agent, &args)
    }

    /// `Ok` when a handler recovered; otherwise the error for the caller.
    fn dispatch(&mut self, phase: PhaseId, error: AgentError) -> Result<(), AgentError> {
        let dispatcher = ExceptionDispatcher::new(self.descriptor.handlers());
        let resolver = self.runtime.resolver(&self.context, &self.state.carried);
        let original = error.clone();

        match dispatcher.dispatch(error, &mut *self.agent, resolver) {
            Dispatch::Recovered { handler } => {
                info!(%phase, handler, "recovered from phase failure");
                self.emit_error(phase, &original, Some(handler), true);
                Ok(())
            }
            Dispatch::Propagate { error, handler } => {
                self.emit_error(phase, &error, handler, false);
                Err(error)
            }
        }
    }

    fn emit_phase(&self, phase: PhaseId, disposition: Disposition, duration: Duration) {
        let event = PhaseEvent {
            agent: self.descriptor.name(),
            phase,
            disposition,
            duration,
            step_number: self.step_number,
            state: &self.state,
        };
        for hook in &self.runtime.on_phase {
            hook(&event);
        }
    }

    fn emit_error(&self, phase: PhaseId, error: &AgentError, handler: Option<&'static str>, recovered: bool) {
        let event = ErrorEvent {
            agent: self.descriptor.name(),
            phase,
            error,
            handler,
            recovered,
            step_number: self.step_number,
        };
        for hook in &self.runtime.on_error {
            hook(&event);
        }
    }
}
