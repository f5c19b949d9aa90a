// Stream server
// Frames and transmits stereo pairs over one persistent TCP connection
//
// Backpressure is drop-oldest, never block: the producer writes the latest
// pair into a single watch slot and the sender always encodes the newest
// published pair. Anything superseded while encoding or sending is dropped,
// because staleness is worse than loss for a live stream.
//
// Multi-client policy: first client wins. While a connection is being
// served, later connections are accepted and immediately closed.

use super::NetworkError;
use crate::config::StreamConfig;
use crate::encoder::{self, RawStereoFrame};
use crate::network::protocol::{CodecTag, StreamFrame};
use bytes::Bytes;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Semaphore, watch};

/// Producer-side push interface. Cloneable; pushing overwrites any frame
/// the sender has not yet picked up.
#[derive(Clone)]
pub struct FrameSink {
    tx: watch::Sender<Option<Arc<RawStereoFrame>>>,
}

impl FrameSink {
    /// Publish the newest stereo pair, superseding any unsent one.
    pub fn push(&self, frame: RawStereoFrame) {
        self.tx.send_replace(Some(Arc::new(frame)));
    }
}

/// Per-connection bookkeeping, observable by the host.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    pub peer: SocketAddr,
    pub codec: CodecTag,
    pub last_frame_id: u32,
    pub last_activity: Instant,
}

pub struct StreamServer {
    listener: TcpListener,
    config: StreamConfig,
    rx: watch::Receiver<Option<Arc<RawStereoFrame>>>,
    state: Arc<Mutex<Option<ConnectionState>>>,
    client_slot: Arc<Semaphore>,
}

impl StreamServer {
    /// Bind the server and return it together with the producer's sink.
    pub async fn bind(
        config: StreamConfig,
        bind_addr: SocketAddr,
    ) -> Result<(Self, FrameSink), NetworkError> {
        let (tx, rx) = watch::channel(None);
        let listener = TcpListener::bind(bind_addr).await?;
        log::info!("Stream server listening on {}", listener.local_addr()?);

        Ok((
            Self {
                listener,
                config,
                rx,
                state: Arc::new(Mutex::new(None)),
                client_slot: Arc::new(Semaphore::new(1)),
            },
            FrameSink { tx },
        ))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        Ok(self.listener.local_addr()?)
    }

    /// State of the currently served connection, if any.
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.state.lock().clone()
    }

    /// Accept loop. Runs until the listener fails.
    pub async fn run(&self) -> Result<(), NetworkError> {
        loop {
            let (socket, peer) = self.listener.accept().await?;
            match self.client_slot.clone().try_acquire_owned() {
                Ok(permit) => {
                    log::info!("Streaming to {}", peer);
                    let rx = self.rx.clone();
                    let config = self.config.clone();
                    let state = self.state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(socket, peer, rx, config, &state).await {
                            log::warn!("Connection to {} ended: {}", peer, e);
                        } else {
                            log::info!("Connection to {} closed", peer);
                        }
                        *state.lock() = None;
                        drop(permit);
                    });
                }
                Err(_) => {
                    log::warn!("Rejecting {}: already serving a client", peer);
                    drop(socket);
                }
            }
        }
    }
}

async fn serve_connection(
    mut socket: TcpStream,
    peer: SocketAddr,
    mut rx: watch::Receiver<Option<Arc<RawStereoFrame>>>,
    config: StreamConfig,
    state: &Mutex<Option<ConnectionState>>,
) -> Result<(), NetworkError> {
    socket.set_nodelay(true)?;

    // The codec choice needs the eye dimensions, so wait for the first pair.
    let first = loop {
        if let Some(frame) = rx.borrow_and_update().clone() {
            break frame;
        }
        if rx.changed().await.is_err() {
            // Producer gone before the first frame
            return Ok(());
        }
    };

    // Probed exactly once per connection, never revisited mid-stream
    let mut stereo_encoder = encoder::select_encoder(&config, first.width, first.height)
        .map_err(|e| NetworkError::ConnectionFailed(format!("Encoder selection: {}", e)))?;
    let codec = stereo_encoder.tag();
    log::info!("Negotiated codec {} for {}", codec, peer);

    *state.lock() = Some(ConnectionState {
        peer,
        codec,
        last_frame_id: 0,
        last_activity: Instant::now(),
    });

    let mut frame_id: u32 = 0;
    let mut pending = Some(first);

    loop {
        let raw = match pending.take() {
            Some(raw) => raw,
            None => {
                if rx.changed().await.is_err() {
                    // Producer dropped; nothing more to stream
                    return Ok(());
                }
                match rx.borrow_and_update().clone() {
                    Some(raw) => raw,
                    None => continue,
                }
            }
        };

        let (left, right) = match stereo_encoder.encode_pair(&raw) {
            Ok(pair) => pair,
            Err(e) => {
                log::warn!("Encode failed, dropping frame: {}", e);
                continue;
            }
        };

        frame_id = frame_id.wrapping_add(1);
        let frame = StreamFrame {
            frame_id,
            codec,
            left: Bytes::from(left),
            right: Bytes::from(right),
        };

        // Header + both payloads as one ordered unit; a partial frame is
        // never interleaved with another frame's bytes.
        socket.write_all(&frame.encode()).await?;

        if let Some(s) = state.lock().as_mut() {
            s.last_frame_id = frame_id;
            s.last_activity = Instant::now();
        }
    }
}
