//! Failover-aware response caching and prefix search for a car catalog read API.
//!
//! The pieces compose around one store connection manager: the response cache and the
//! search index both read the active connection per operation and degrade to direct
//! computation when no store is reachable.

pub mod cache;
pub mod catalog;
pub mod codec;
pub mod config;
pub mod error;
pub mod infra;
pub mod scheduler;
pub mod search;
pub mod store;

pub(crate) mod util;
