// Network module
// UDP discovery handshake and TCP frame streaming

pub mod client;
pub mod discovery;
pub mod protocol;
pub mod server;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Discovery timed out after {0} attempt(s)")]
    DiscoveryTimeout(u32),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Connection closed mid-frame")]
    PartialFrame,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
