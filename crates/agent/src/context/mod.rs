//! Context window management.
//!
//! Fits a conversation into a model's context window:
//!
//! | Section | Source | When it does not fit |
//! |---------|--------|----------------------|
//! | System prompt | Agent profile | Never trimmed |
//! | Memories | Caller-supplied facts | Clipped to the memories quota |
//! | Summary | Message store | Clipped to the summary quota |
//! | Messages | Turn history | Oldest turns dropped, then summarized |
//!
//! Token counts come from [`aegis_core::token::estimate_tokens`].

pub mod budget;
pub mod compress;
pub mod summarize;
pub mod window;

pub use budget::{Budget, allocate_budget};
pub use compress::{compress_tool_output, compress_tool_results};
pub use summarize::DroppedSummarizer;
pub use window::{ContextWindow, ContextWindowManager, SUMMARY_MARKER, total_tokens_used};
