#![deny(missing_docs)]
//! # relay — umbrella crate
//!
//! A single import surface for the relay agent-delegation core: a
//! persistent conversational Orchestrator that decomposes user requests
//! into a dependency DAG of subtasks and dispatches them to a
//! parallel-thread Executor. Re-exports the individual crates behind
//! feature flags, plus a `prelude` for the happy path.

#[cfg(feature = "core")]
pub use layer0;
#[cfg(feature = "collector")]
pub use relay_collector;
#[cfg(feature = "core")]
pub use relay_bridge;
#[cfg(feature = "core")]
pub use relay_bus;
#[cfg(feature = "core")]
pub use relay_driver;
#[cfg(feature = "executor")]
pub use relay_executor;
#[cfg(feature = "hooks")]
pub use relay_hooks;
#[cfg(any(feature = "planning", feature = "orchestrator"))]
pub use relay_memory;
#[cfg(feature = "orchestrator")]
pub use relay_orchestrator;
#[cfg(feature = "planning")]
pub use relay_planner;
#[cfg(any(feature = "state-memory", feature = "state-fs"))]
pub use relay_state;
#[cfg(feature = "core")]
pub use relay_types;

/// Happy-path imports for composing a relay session.
pub mod prelude {
    #[cfg(feature = "core")]
    pub use layer0::content::{Content, ContentBlock};
    #[cfg(feature = "core")]
    pub use layer0::effect::Scope;
    #[cfg(feature = "core")]
    pub use layer0::id::{AgentId, ScopeId, SessionId, WorkflowId};
    #[cfg(feature = "core")]
    pub use layer0::state::{StateReader, StateStore};

    #[cfg(feature = "core")]
    pub use relay_types::{
        concat_final_assistant_text, AgentMessageLog, AgentType, Event, EventKind, MessageEntry,
        Subtask, SubtaskState, Task, TaskStatus,
    };

    #[cfg(feature = "core")]
    pub use relay_driver::{AgentDriver, DriverError, DriverEvent, DriverHandle, StopReason};

    #[cfg(feature = "core")]
    pub use relay_bridge::{bridge, BridgeError, BridgeOutcome};

    #[cfg(feature = "hooks")]
    pub use relay_hooks::HookRegistry;

    #[cfg(any(feature = "state-memory", feature = "state-fs"))]
    pub use relay_state::SnapshotStore;
    #[cfg(feature = "state-fs")]
    pub use relay_state::FsStore;
    #[cfg(feature = "state-memory")]
    pub use relay_state::MemoryStore;

    #[cfg(feature = "planning")]
    pub use relay_memory::MemoryClient;
    #[cfg(feature = "planning")]
    pub use relay_planner::{decompose_and_query_memory, PlanError, PlannerConfig};

    #[cfg(feature = "executor")]
    pub use relay_executor::{DriverFactory, ExecError, Executor, ExecutorConfig, SubtaskContext};

    #[cfg(feature = "orchestrator")]
    pub use relay_orchestrator::{
        EndReason, ExecutionResult, OrchError, Orchestrator, OrchestratorConfig,
        OrchestratorContext, OrchestratorDriverFactory, OrchestratorHandle, PlannerDriverFactory,
    };

    #[cfg(feature = "collector")]
    pub use relay_collector::{collect, ToolCallRecord};
}
