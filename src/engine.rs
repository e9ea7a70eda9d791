use crate::agent::Agent;
use crate::error::{DescriptorError, WorkflowError};
use crate::inject::Injector;
use crate::llm::LargeLanguageModel;
use crate::registry::AgentRegistry;
use crate::runner::{ErrorEvent, PhaseEvent, Runtime, WorkflowOutcome};
use crate::value::Value;
use std::any::Any;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Runs registered agents. Cheap to share across threads; every call to
/// [`Engine::start_workflow`] gets its own agent instance, context and
/// execution state.
pub struct Engine {
    registry: AgentRegistry,
    runtime: Runtime,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Run the agent registered as `name` against `event` until it
    /// completes, halts or fails.
    pub fn start_workflow(&self, name: &str, event: Value) -> Result<WorkflowOutcome, WorkflowError> {
        let agent = self
            .registry
            .get(name)
            .ok_or_else(|| WorkflowError::UnknownAgent(name.to_string()))?;

        if let Some(expected) = agent.info().trigger_event_type() {
            let actual = event.semantic_type();
            if expected != actual {
                return Err(WorkflowError::TriggerMismatch {
                    agent: name.to_string(),
                    expected,
                    actual,
                });
            }
        }

        debug!(agent = name, event = %event.semantic_type(), "starting workflow");
        agent.execute(event, &self.runtime)
    }

    /// Typed shortcut for [`Engine::start_workflow`].
    pub fn start<A: Agent, E: Any + Send + Sync>(&self, event: E) -> Result<WorkflowOutcome, WorkflowError> {
        let name = self
            .registry
            .name_of::<A>()
            .ok_or_else(|| WorkflowError::UnknownAgent(std::any::type_name::<A>().to_string()))?;
        self.start_workflow(name, Value::new(event))
    }
}

/// Collects agents and collaborators for an [`Engine`].
#[derive(Default)]
pub struct EngineBuilder {
    registry: AgentRegistry,
    error: Option<DescriptorError>,
    runtime: Runtime,
}

impl EngineBuilder {
    /// Register `A`. A rejected descriptor is reported by `build`.
    pub fn register<A: Agent>(mut self) -> Self {
        if self.error.is_none() {
            if let Err(e) = self.registry.register::<A>() {
                self.error = Some(e);
            }
        }
        self
    }

    pub fn llm(mut self, llm: Arc<dyn LargeLanguageModel>) -> Self {
        self.runtime.llm = Some(llm);
        self
    }

    pub fn injector(mut self, injector: Arc<dyn Injector>) -> Self {
        self.runtime.injector = Some(injector);
        self
    }

    /// Called after every phase method that returns normally.
    pub fn on_phase(mut self, cb: impl Fn(&PhaseEvent<'_>) + Send + Sync + 'static) -> Self {
        self.runtime.on_phase.push(Arc::new(cb));
        self
    }

    /// Called when a phase method fails, after exception dispatch.
    pub fn on_error(mut self, cb: impl Fn(&ErrorEvent<'_>) + Send + Sync + 'static) -> Self {
        self.runtime.on_error.push(Arc::new(cb));
        self
    }

    /// Log every phase and failure through `tracing`.
    pub fn with_tracing(self) -> Self {
        self.on_phase(|e| {
            info!(
                step = e.step_number,
                agent = e.agent,
                phase = %e.phase,
                disposition = ?e.disposition,
                secs = e.duration.as_secs_f64(),
                "phase finished"
            );
        })
        .on_error(|e| {
            warn!(
                step = e.step_number,
                agent = e.agent,
                phase = %e.phase,
                handler = e.handler,
                recovered = e.recovered,
                error = %e.error,
                "phase failed"
            );
        })
    }

    pub fn build(self) -> Result<Engine, DescriptorError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        debug!(agents = self.registry.len(), "engine built");
        Ok(Engine {
            registry: self.registry,
            runtime: self.runtime,
        })
    }
}
