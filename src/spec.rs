//! The frozen, externally-produced agent definition.
//!
//! This crate accepts an already-parsed `AgentSpec` — no macro system, no
//! DSL parser; those are left to an external collaborator.

use std::sync::Arc;

use crate::memory::MemorySource;
use crate::processor::DEFAULT_MAX_TOOL_ITERATIONS;
use crate::stage::StageSpec;

/// A named, already-initialized memory backend plus whether it should become
/// the manager's default source.
pub struct MemorySourceSpec {
    pub name: String,
    pub backend: Arc<dyn MemorySource>,
    pub default: bool,
}

/// Agent-wide tunables.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub max_tool_iterations: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            max_tool_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
        }
    }
}

/// Immutable, produced externally: the full definition of one agent.
///
/// Frozen at session start — nothing in this crate mutates an `AgentSpec`
/// once a session has begun.
pub struct AgentSpec {
    pub stages: Vec<StageSpec>,
    pub memory_sources: Vec<MemorySourceSpec>,
    pub config: AgentConfig,
}

impl AgentSpec {
    pub fn new(stages: Vec<StageSpec>) -> Self {
        AgentSpec {
            stages,
            memory_sources: Vec::new(),
            config: AgentConfig::default(),
        }
    }

    pub fn with_memory_source(mut self, spec: MemorySourceSpec) -> Self {
        self.memory_sources.push(spec);
        self
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }
}
