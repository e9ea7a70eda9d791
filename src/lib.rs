//! An execution engine for agents with a fixed lifecycle.
//!
//! An agent declares one trigger, any number of decisions and actions, an
//! optional outcome, and exception handlers. The [`Engine`] runs them in that
//! order for every event it is handed. Decisions can stop the workflow;
//! values returned by earlier phases are handed to later ones by type; a
//! failure is routed to the most specific handler, which can recover and let
//! the workflow continue.
//!
//! # Quick start
//!
//! ```rust
//! use agent_lifecycle::{Agent, AgentBuilder, Engine, Param, Verdict, WorkflowOutcome, method};
//!
//! struct Order { amount: u32 }
//! struct Approved { limit: u32 }
//!
//! #[derive(Default)]
//! struct Approver;
//!
//! impl Agent for Approver {
//!     fn declare(agent: AgentBuilder<Self>) -> AgentBuilder<Self> {
//!         agent
//!             .trigger(method("on_order").param(Param::trigger::<Order>()).returns_void(|_, _| Ok(())))
//!             .decision(
//!                 method("within_limit")
//!                     .param(Param::trigger::<Order>())
//!                     .returns_verdict(|_, args| {
//!                         let order = args.get::<Order>(0)?;
//!                         Ok(if order.amount <= 100 {
//!                             Verdict::proceed(Approved { limit: 100 })
//!                         } else {
//!                             Verdict::halt()
//!                         })
//!                     }),
//!             )
//!             .action(
//!                 method("approve")
//!                     .param(Param::prior::<Approved>())
//!                     .returns_object(|_, args| Ok(Some(args.get::<Approved>(0)?.limit))),
//!             )
//!     }
//! }
//!
//! let engine = Engine::builder().register::<Approver>().build().unwrap();
//!
//! let done = engine.start::<Approver, _>(Order { amount: 40 }).unwrap();
//! let WorkflowOutcome::Completed { result: Some(limit) } = done else { panic!() };
//! assert_eq!(limit.downcast_ref::<u32>(), Some(&100));
//!
//! let halted = engine.start::<Approver, _>(Order { amount: 400 }).unwrap();
//! assert!(halted.is_halted());
//! ```

mod agent;
mod ctx;
mod dispatch;
mod engine;
pub mod error;
mod inject;
mod llm;
mod registry;
mod resolver;
mod runner;
mod value;

pub use agent::{
    Agent, AgentBuilder, MethodSignature, Param, ParamSource, PhaseId, PhaseKind, PhaseMethod,
    ReturnKind, Scope, Verdict, method,
};
pub use ctx::WorkflowContext;
pub use dispatch::ExceptionDispatcher;
pub use engine::{Engine, EngineBuilder};
pub use error::{
    AgentError, ContextError, DescriptorError, ErrorClass, UnresolvableParameter, WorkflowError,
};
pub use inject::{Beans, Injector};
pub use llm::{LargeLanguageModel, LlmError, strip_code_fences};
pub use registry::{AgentDescriptor, AgentInfo, AgentRegistry, Handler};
pub use resolver::{Args, ParameterResolver};
pub use runner::{
    Disposition, ErrorEvent, ExecutionState, Phase, PhaseEvent, Termination, WorkflowOutcome,
};
pub use value::{SemanticType, Value};
