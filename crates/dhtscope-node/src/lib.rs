//! dhtscope Node Library
//!
//! This library provides the crawler node: the persistent node store, the
//! periodic aggregator, live event handling and the read-only HTTP API.

pub mod aggregator;
pub mod api;
pub mod config;
pub mod context;
pub mod geo;
pub mod live;
pub mod store;
