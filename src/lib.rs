//! DAG-orchestrated multi-stage LLM agents.
//!
//! An agent is a directed acyclic graph of named stages; each stage may
//! issue LLM completion requests, invoke tools, and consult a multi-source
//! memory manager. See `dag`, `stage`, `processor`, `executor`, and
//! `memory` for the core subsystems, and `session` for the public
//! session-facing API.

pub mod assembly;
pub mod dag;
pub mod error;
pub mod executor;
pub mod llm;
pub mod memory;
pub mod message;
pub mod processor;
pub mod session;
pub mod spec;
pub mod stage;
pub mod telemetry;
pub mod tools;

pub use error::{AgentError, ErrorClass};
pub use executor::run_sync;
pub use message::{Message, Part, Role};
pub use spec::{AgentConfig, AgentSpec, MemorySourceSpec};
pub use stage::{AgentModule, ErrorPolicy, LLMCall, StageSpec};

#[cfg(test)]
mod test_logging {
    use ctor::ctor;

    #[ctor]
    fn init_test_logging() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}
