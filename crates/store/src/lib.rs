//! Persistence backends for Aegis.
//!
//! - [`InMemoryStore`]: turns, summaries and tasks in process memory.
//! - [`FileMessageStore`]: append-only JSONL turn log per conversation.

pub mod file;
pub mod in_memory;

pub use file::FileMessageStore;
pub use in_memory::InMemoryStore;
