// src/lib.rs
//
// One module per component, in the dependency order they're built in
// (leaves first): connection pool, LLM client, model registry/router,
// reasoning-stream manager, event store, agent, orchestrator, then the
// lifecycle/gateway facade, with configuration, errors, and metrics as
// cross-cutting concerns.

pub mod agent;
pub mod config;
pub mod error;
pub mod event_store;
pub mod gateway;
pub mod lifecycle;
pub mod llm_client;
pub mod metrics;
pub mod model;
pub mod orchestration;
pub mod pool;
pub mod reasoning_stream;
pub mod router;

// Re-export the pieces most callers need without navigating the whole
// module hierarchy.
pub use agent::{Agent, AgentResponse};
pub use config::Config;
pub use error::OrchestraError;
pub use event_store::{Event, EventStore, EventType};
pub use llm_client::{GenerateOptions, LlmClient, StreamChunk};
pub use model::{Complexity, ModelInfo, ModelSelection, TaskType, Tier};
pub use orchestration::{Orchestrator, RunResult, ValidationOutcome};
pub use pool::ConnectionPool;
pub use reasoning_stream::{ReasoningEvent, ReasoningStreamManager};
pub use router::{ModelRegistry, ModelRouter};
