//! dhtscope Core - Shared types and the DHT engine interface
//!
//! This crate provides the building blocks shared by the dhtscope
//! crawler: node identifiers, contacts, durable node records, the stats
//! snapshot and the trait the crawler uses to drive a DHT engine.

pub mod engine;
pub mod error;
pub mod types;

pub use engine::{BucketNode, DhtEngine, EngineEvent};
pub use error::{Error, Result};
pub use types::*;

/// Number of ranked items kept in a stats snapshot
pub const TOP_K: usize = 10;
