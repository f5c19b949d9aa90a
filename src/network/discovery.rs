// UDP discovery handshake
// A viewer broadcasts HELLO:<deviceName>; the server answers INFO:<tcpPort>
//
// Trusted-local-network assumption: the exchange is unauthenticated. That is
// a documented boundary limitation, not an oversight.

use super::NetworkError;
use crate::config::StreamConfig;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;
use tokio::time::timeout;

const HELLO_PREFIX: &str = "HELLO:";
const INFO_PREFIX: &str = "INFO:";

/// Largest datagram either side will look at.
const MAX_DATAGRAM: usize = 256;

pub fn format_hello(device_name: &str) -> String {
    format!("{}{}", HELLO_PREFIX, device_name)
}

pub fn parse_hello(msg: &str) -> Option<&str> {
    msg.strip_prefix(HELLO_PREFIX)
}

pub fn format_info(stream_port: u16) -> String {
    format!("{}{}", INFO_PREFIX, stream_port)
}

pub fn parse_info(msg: &str) -> Option<u16> {
    msg.strip_prefix(INFO_PREFIX)?.trim().parse().ok()
}

/// Passive, stateless discovery responder.
///
/// Every HELLO gets a fresh INFO reply, so duplicated or retried requests
/// are harmless. Shares nothing with the stream server beyond the
/// published port number.
pub struct DiscoveryResponder {
    socket: UdpSocket,
    stream_port: u16,
}

impl DiscoveryResponder {
    /// Bind the responder. `bind_addr` is usually
    /// `0.0.0.0:<discovery_port>`; tests pass port 0.
    pub async fn bind(bind_addr: SocketAddr, stream_port: u16) -> Result<Self, NetworkError> {
        let socket = UdpSocket::bind(bind_addr).await?;
        log::info!(
            "Discovery responder listening on {}, advertising stream port {}",
            socket.local_addr()?,
            stream_port
        );
        Ok(Self {
            socket,
            stream_port,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        Ok(self.socket.local_addr()?)
    }

    /// Answer HELLOs until the task is dropped.
    pub async fn run(&self) -> Result<(), NetworkError> {
        let reply = format_info(self.stream_port);
        let mut buf = [0u8; MAX_DATAGRAM];

        loop {
            let (len, peer) = self.socket.recv_from(&mut buf).await?;
            let msg = String::from_utf8_lossy(&buf[..len]);
            match parse_hello(&msg) {
                Some(device) => {
                    log::info!("Discovery hello from {} ({})", device.trim(), peer);
                    if let Err(e) = self.socket.send_to(reply.as_bytes(), peer).await {
                        log::warn!("Failed to answer discovery hello from {}: {}", peer, e);
                    }
                }
                None => {
                    log::debug!("Ignoring non-hello datagram from {}", peer);
                }
            }
        }
    }
}

/// Broadcast targets for the hello: the limited broadcast address plus every
/// IPv4 interface broadcast address we can enumerate.
fn broadcast_targets(discovery_port: u16) -> Vec<SocketAddr> {
    let mut targets = vec![SocketAddr::new(
        IpAddr::V4(Ipv4Addr::BROADCAST),
        discovery_port,
    )];

    if let Ok(interfaces) = if_addrs::get_if_addrs() {
        for iface in interfaces {
            if iface.is_loopback() {
                continue;
            }
            if let if_addrs::IfAddr::V4(ref v4) = iface.addr {
                if let Some(bcast) = v4.broadcast {
                    targets.push(SocketAddr::new(IpAddr::V4(bcast), discovery_port));
                }
            }
        }
    }

    targets.dedup();
    targets
}

/// Broadcast hellos until a server answers, then return its stream endpoint.
///
/// Retries `config.discovery_attempts` times with a per-attempt reply
/// timeout before failing with `DiscoveryTimeout`.
pub async fn discover_server(
    config: &StreamConfig,
    device_name: &str,
) -> Result<SocketAddr, NetworkError> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.set_broadcast(true)?;

    let hello = format_hello(device_name);
    let targets = broadcast_targets(config.discovery_port);
    let mut buf = [0u8; MAX_DATAGRAM];

    for attempt in 1..=config.discovery_attempts {
        log::debug!(
            "Discovery attempt {}/{} to {} target(s)",
            attempt,
            config.discovery_attempts,
            targets.len()
        );
        for target in &targets {
            if let Err(e) = socket.send_to(hello.as_bytes(), target).await {
                log::debug!("Broadcast to {} failed: {}", target, e);
            }
        }

        match timeout(config.discovery_timeout, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, peer))) => {
                let msg = String::from_utf8_lossy(&buf[..len]);
                if let Some(port) = parse_info(&msg) {
                    let endpoint = SocketAddr::new(peer.ip(), port);
                    log::info!("Discovered stream endpoint {}", endpoint);
                    return Ok(endpoint);
                }
                log::debug!("Ignoring malformed discovery reply from {}", peer);
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                log::debug!("Discovery attempt {} timed out", attempt);
            }
        }
    }

    Err(NetworkError::DiscoveryTimeout(config.discovery_attempts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn hello_and_info_round_trip() {
        assert_eq!(parse_hello("HELLO:Headset-1"), Some("Headset-1"));
        assert_eq!(parse_hello(&format_hello("Quest")), Some("Quest"));
        assert_eq!(parse_info("INFO:48531"), Some(48531));
        assert_eq!(parse_info(&format_info(1234)), Some(1234));
        assert_eq!(parse_hello("INFO:48531"), None);
        assert_eq!(parse_info("HELLO:x"), None);
        assert_eq!(parse_info("INFO:notaport"), None);
    }

    #[tokio::test]
    async fn responder_answers_hello_with_bound_port() {
        let responder = DiscoveryResponder::bind("127.0.0.1:0".parse().unwrap(), 48531)
            .await
            .unwrap();
        let responder_addr = responder.local_addr().unwrap();
        let responder = Arc::new(responder);
        let task = tokio::spawn({
            let responder = responder.clone();
            async move { responder.run().await }
        });

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client
            .send_to(b"HELLO:TestDevice", responder_addr)
            .await
            .unwrap();

        let mut buf = [0u8; 64];
        let (len, from) = timeout(std::time::Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .expect("no discovery reply")
            .unwrap();
        assert_eq!(from, responder_addr);
        let reply = String::from_utf8_lossy(&buf[..len]).to_string();
        assert_eq!(parse_info(&reply), Some(48531));

        task.abort();
    }

    #[tokio::test]
    async fn duplicate_hellos_each_get_a_reply() {
        let responder = DiscoveryResponder::bind("127.0.0.1:0".parse().unwrap(), 40000)
            .await
            .unwrap();
        let responder_addr = responder.local_addr().unwrap();
        let responder = Arc::new(responder);
        let task = tokio::spawn({
            let responder = responder.clone();
            async move { responder.run().await }
        });

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut buf = [0u8; 64];
        for _ in 0..3 {
            client
                .send_to(b"HELLO:Retry", responder_addr)
                .await
                .unwrap();
            let (len, _) =
                timeout(std::time::Duration::from_secs(2), client.recv_from(&mut buf))
                    .await
                    .expect("no discovery reply")
                    .unwrap();
            assert_eq!(parse_info(&String::from_utf8_lossy(&buf[..len])), Some(40000));
        }

        task.abort();
    }

    #[tokio::test]
    async fn discovery_times_out_without_server() {
        let config = StreamConfig {
            // Unlikely to have a responder in the test environment
            discovery_port: 1,
            discovery_attempts: 1,
            discovery_timeout: std::time::Duration::from_millis(50),
            ..StreamConfig::default()
        };
        match discover_server(&config, "TestDevice").await {
            Err(NetworkError::DiscoveryTimeout(1)) => {}
            other => panic!("expected DiscoveryTimeout, got {:?}", other.map(|_| ())),
        }
    }
}
