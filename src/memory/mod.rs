//! Multi-source memory substrate (C2/C3).
//!
//! `source` defines the single-backend contract every memory backend must
//! implement; `in_memory` is the reference backend; `manager` is the
//! multi-source router exposed to the rest of the crate and, through
//! `crate::tools::memory_tools`, to the LLM.

pub mod in_memory;
pub mod manager;
pub mod source;

pub use in_memory::InMemorySource;
pub use manager::MemoryManager;
pub use source::{MemoryItem, MemoryMetadata, MemorySource, RetrieveOpts, SearchOpts, StoreOpts};
