//! Error types for dhtscope

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid node id length: expected 20 bytes, got {0}")]
    InvalidIdSize(usize),

    #[error("Invalid node id: {0}")]
    InvalidId(#[from] hex::FromHexError),

    #[error("Timed out waiting for the DHT to become ready")]
    Timeout,

    #[error("Lookup failed: {0}")]
    Lookup(String),

    #[error("Join failed: {0}")]
    Join(String),

    #[error("DHT engine was shut down")]
    EngineShutdown,
}

pub type Result<T> = std::result::Result<T, Error>;
