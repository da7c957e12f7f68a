//! Provider plumbing for Aegis.
//!
//! Backends implement `aegis_core::Provider`; this crate layers the
//! cross-provider concerns on top: an ordered failover chain, a shared
//! per-provider rate limiter, and a router that assembles both from
//! configuration.

pub mod fallback;
pub mod rate_limit;
pub mod router;

pub use fallback::FallbackProvider;
pub use rate_limit::RateLimiter;
pub use router::ProviderRouter;
