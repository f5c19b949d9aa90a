// Stream client connection
// Discovery plus the persistent TCP connection the read loop runs on

use super::NetworkError;
use super::discovery;
use crate::config::StreamConfig;
use std::net::SocketAddr;
use tokio::net::TcpStream;

pub struct StreamClient {
    stream: TcpStream,
    peer: SocketAddr,
}

impl StreamClient {
    /// Connect directly to a known stream endpoint.
    pub async fn connect(addr: SocketAddr) -> Result<Self, NetworkError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| NetworkError::ConnectionFailed(format!("{}: {}", addr, e)))?;
        stream.set_nodelay(true)?;
        log::info!("Connected to stream server {}", addr);
        Ok(Self { stream, peer: addr })
    }

    /// Locate the server via the discovery handshake, then connect.
    pub async fn discover_and_connect(
        config: &StreamConfig,
        device_name: &str,
    ) -> Result<Self, NetworkError> {
        let endpoint = discovery::discover_server(config, device_name).await?;
        Self::connect(endpoint).await
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn into_stream(self) -> TcpStream {
        self.stream
    }
}
