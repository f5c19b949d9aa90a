// Viewer-side decode pipeline
// Read loop -> codec detection -> decode -> latest-complete-frame slot

use crate::decoder::{self, StereoDecoder, StereoImage};
use crate::network::NetworkError;
use crate::network::client::StreamClient;
use crate::network::protocol::{CodecTag, FrameCodec};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::watch;

/// Caches the first frame's codec tag; every later frame must match.
/// A mismatch is a protocol violation, never a renegotiation.
#[derive(Debug, Default)]
pub struct ProtocolDetector {
    detected: Option<CodecTag>,
}

impl ProtocolDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn detected(&self) -> Option<CodecTag> {
        self.detected
    }

    /// Observe a frame's tag. The first observation fixes the decode path
    /// for the connection.
    pub fn observe(&mut self, tag: CodecTag) -> Result<CodecTag, NetworkError> {
        match self.detected {
            None => {
                log::info!("Detected stream codec: {}", tag);
                self.detected = Some(tag);
                Ok(tag)
            }
            Some(expected) if expected == tag => Ok(tag),
            Some(expected) => Err(NetworkError::Protocol(format!(
                "Codec tag changed mid-stream: {} -> {}",
                expected, tag
            ))),
        }
    }
}

/// "Latest complete frame" hand-off between decode and render.
///
/// Only ever holds the frame with the maximum id seen so far; an older
/// frame arriving after a newer one has been published is ignored. The
/// render thread consumes non-destructively, so absent a new frame it
/// redraws the previous one instead of stalling.
#[derive(Default)]
pub struct FrameSlot {
    latest: Mutex<Option<Arc<StereoImage>>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a decoded frame. Returns false when the frame is stale
    /// (its id is not greater than the currently held one).
    pub fn publish(&self, image: StereoImage) -> bool {
        let mut latest = self.latest.lock();
        match latest.as_ref() {
            Some(current) if image.frame_id <= current.frame_id => false,
            _ => {
                *latest = Some(Arc::new(image));
                true
            }
        }
    }

    pub fn latest(&self) -> Option<Arc<StereoImage>> {
        self.latest.lock().clone()
    }

    /// The held frame, only if newer than `last_seen_id`.
    pub fn newer_than(&self, last_seen_id: Option<u32>) -> Option<Arc<StereoImage>> {
        let latest = self.latest.lock();
        match (latest.as_ref(), last_seen_id) {
            (Some(frame), Some(seen)) if frame.frame_id <= seen => None,
            (frame, _) => frame.cloned(),
        }
    }
}

/// Run the connection's read loop until the peer closes, a protocol
/// violation occurs, or `stop` signals.
///
/// Bytes accumulate in a `FrameCodec` across partial reads. The first
/// complete frame fixes the decode path; decoded pairs land in `slot`.
/// Decoder failures skip the frame and keep the stream alive; protocol
/// errors tear the connection down so discovery can restart from zero.
pub async fn run_stream(
    client: StreamClient,
    slot: Arc<FrameSlot>,
    mut stop: watch::Receiver<bool>,
) -> Result<(), NetworkError> {
    let peer = client.peer();
    let mut stream = client.into_stream();
    let mut codec = FrameCodec::new();
    let mut detector = ProtocolDetector::new();
    let mut stereo_decoder: Option<Box<dyn StereoDecoder>> = None;
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        tokio::select! {
            read = stream.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    return if codec.has_partial() {
                        // Closed mid-frame: discard the partial buffer
                        Err(NetworkError::PartialFrame)
                    } else {
                        log::info!("Stream from {} closed", peer);
                        Ok(())
                    };
                }
                codec.feed(&buf[..n]);

                while let Some(frame) = codec.decode()? {
                    let tag = detector.observe(frame.codec)?;
                    if stereo_decoder.is_none() {
                        let d = decoder::create_decoder(tag).map_err(|e| {
                            NetworkError::ConnectionFailed(format!("Decoder init for {}: {}", tag, e))
                        })?;
                        stereo_decoder = Some(d);
                    }
                    let Some(active) = stereo_decoder.as_mut() else {
                        continue;
                    };

                    match active.decode_pair(&frame) {
                        Ok(Some(image)) => {
                            if !slot.publish(image) {
                                log::debug!("Dropping stale frame {}", frame.frame_id);
                            }
                        }
                        Ok(None) => {} // codec still buffering
                        Err(e) => {
                            log::warn!("Decoder failure on frame {}, skipping: {}", frame.frame_id, e);
                        }
                    }
                }
            }
            _ = stop.changed() => {
                log::info!("Stopping stream from {}", peer);
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamConfig;
    use crate::encoder::RawStereoFrame;
    use crate::network::server::StreamServer;
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    fn image(frame_id: u32, width: u32, height: u32) -> StereoImage {
        let size = (width * height * 4) as usize;
        StereoImage {
            frame_id,
            width,
            height,
            left: vec![frame_id as u8; size],
            right: vec![frame_id as u8; size],
        }
    }

    #[test]
    fn detector_fixes_codec_on_first_frame() {
        let mut detector = ProtocolDetector::new();
        assert_eq!(detector.detected(), None);
        assert_eq!(detector.observe(CodecTag::Hw264).unwrap(), CodecTag::Hw264);
        assert_eq!(detector.detected(), Some(CodecTag::Hw264));
        assert!(detector.observe(CodecTag::Hw264).is_ok());
        assert!(matches!(
            detector.observe(CodecTag::SoftImg),
            Err(NetworkError::Protocol(_))
        ));
    }

    #[test]
    fn slot_keeps_maximum_frame_id() {
        let slot = FrameSlot::new();
        assert!(slot.publish(image(1, 2, 2)));
        assert!(slot.publish(image(2, 2, 2)));
        // An older frame arriving late is ignored
        assert!(!slot.publish(image(1, 2, 2)));
        assert_eq!(slot.latest().unwrap().frame_id, 2);
    }

    #[test]
    fn late_frame_never_regresses_rendered_content() {
        // Frame 2 rendered first; frame 1 arrives late and must be ignored
        let slot = FrameSlot::new();
        assert!(slot.publish(image(2, 4, 4)));
        let rendered = slot.latest().unwrap();
        assert!(!slot.publish(image(1, 4, 4)));
        let after = slot.latest().unwrap();
        assert_eq!(after.frame_id, rendered.frame_id);
        assert_eq!(after.left, rendered.left);
    }

    #[test]
    fn newer_than_gates_redraws() {
        let slot = FrameSlot::new();
        assert!(slot.newer_than(None).is_none());
        slot.publish(image(5, 2, 2));
        assert_eq!(slot.newer_than(None).unwrap().frame_id, 5);
        assert!(slot.newer_than(Some(5)).is_none());
        assert_eq!(slot.newer_than(Some(4)).unwrap().frame_id, 5);
    }

    #[test]
    fn dimension_change_between_frames_is_published() {
        let slot = FrameSlot::new();
        slot.publish(image(1, 16, 16));
        slot.publish(image(2, 32, 8));
        let latest = slot.latest().unwrap();
        assert_eq!((latest.width, latest.height), (32, 8));
    }

    async fn wait_for_frame(slot: &FrameSlot, min_id: u32) -> Arc<StereoImage> {
        timeout(Duration::from_secs(5), async {
            loop {
                if let Some(frame) = slot.latest() {
                    if frame.frame_id >= min_id {
                        return frame;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("no frame within timeout")
    }

    #[tokio::test]
    async fn loopback_pipeline_decodes_pushed_frames() {
        let config = StreamConfig {
            force_software_encode: true,
            ..StreamConfig::default()
        };
        let (server, sink) = StreamServer::bind(config, "127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let server = Arc::new(server);
        let accept = tokio::spawn(async move { server.run().await });

        sink.push(RawStereoFrame::new(
            16,
            16,
            vec![240u8; 16 * 16 * 4],
            vec![15u8; 16 * 16 * 4],
        ));

        let client = StreamClient::connect(addr).await.unwrap();
        let slot = Arc::new(FrameSlot::new());
        let (stop_tx, stop_rx) = watch::channel(false);
        let reader = tokio::spawn(run_stream(client, slot.clone(), stop_rx));

        let first = wait_for_frame(&slot, 1).await;
        assert_eq!((first.width, first.height), (16, 16));
        assert_eq!(first.left.len(), 16 * 16 * 4);

        sink.push(RawStereoFrame::new(
            16,
            16,
            vec![100u8; 16 * 16 * 4],
            vec![100u8; 16 * 16 * 4],
        ));
        let second = wait_for_frame(&slot, 2).await;
        assert!(second.frame_id > first.frame_id);

        stop_tx.send(true).unwrap();
        timeout(Duration::from_secs(5), reader)
            .await
            .expect("reader did not stop")
            .unwrap()
            .unwrap();
        accept.abort();
    }

    #[tokio::test]
    async fn second_session_renders_after_reconnect() {
        let config = StreamConfig {
            force_software_encode: true,
            ..StreamConfig::default()
        };

        // First session runs and is torn down
        let (server, sink) = StreamServer::bind(config.clone(), "127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let accept = tokio::spawn(async move { server.run().await });
        sink.push(RawStereoFrame::new(
            8,
            8,
            vec![70u8; 8 * 8 * 4],
            vec![70u8; 8 * 8 * 4],
        ));

        let client = StreamClient::connect(addr).await.unwrap();
        let slot = Arc::new(FrameSlot::new());
        let (stop_tx, stop_rx) = watch::channel(false);
        let reader = tokio::spawn(run_stream(client, slot.clone(), stop_rx));
        wait_for_frame(&slot, 1).await;
        stop_tx.send(true).unwrap();
        timeout(Duration::from_secs(5), reader)
            .await
            .expect("reader did not stop")
            .unwrap()
            .unwrap();
        accept.abort();

        // Reconnection: the new server restarts frame ids at 1, and the
        // viewer-side slot restarts with the session. State carried over
        // from the old session would reject the restarted ids as stale.
        let (server, sink) = StreamServer::bind(config, "127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let accept = tokio::spawn(async move { server.run().await });
        sink.push(RawStereoFrame::new(
            16,
            16,
            vec![200u8; 16 * 16 * 4],
            vec![30u8; 16 * 16 * 4],
        ));

        let client = StreamClient::connect(addr).await.unwrap();
        let slot = Arc::new(FrameSlot::new());
        let (stop_tx, stop_rx) = watch::channel(false);
        let reader = tokio::spawn(run_stream(client, slot.clone(), stop_rx));

        let frame = wait_for_frame(&slot, 1).await;
        assert_eq!(frame.frame_id, 1);
        assert_eq!((frame.width, frame.height), (16, 16));

        stop_tx.send(true).unwrap();
        timeout(Duration::from_secs(5), reader)
            .await
            .expect("reader did not stop")
            .unwrap()
            .unwrap();
        accept.abort();
    }

    #[tokio::test]
    async fn mid_stream_tag_change_is_a_protocol_error() {
        use crate::encoder::StereoEncoder;
        use crate::network::protocol::StreamFrame;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let writer = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();

            let mut enc = crate::encoder::jpeg::JpegEncoder::new(50).unwrap();
            let raw = RawStereoFrame::new(8, 8, vec![1u8; 8 * 8 * 4], vec![2u8; 8 * 8 * 4]);
            let (left, right) = enc.encode_pair(&raw).unwrap();

            let good = StreamFrame {
                frame_id: 1,
                codec: CodecTag::SoftImg,
                left: Bytes::from(left),
                right: Bytes::from(right),
            };
            socket.write_all(&good.encode()).await.unwrap();

            // Same connection suddenly claims the video codec
            let violation = StreamFrame {
                frame_id: 2,
                codec: CodecTag::Hw264,
                left: Bytes::from_static(&[0, 0, 0, 1]),
                right: Bytes::from_static(&[0, 0, 0, 1]),
            };
            socket.write_all(&violation.encode()).await.unwrap();
            // Hold the socket open so the client sees the bytes, not EOF
            tokio::time::sleep(Duration::from_secs(2)).await;
        });

        let client = StreamClient::connect(addr).await.unwrap();
        let slot = Arc::new(FrameSlot::new());
        let (_stop_tx, stop_rx) = watch::channel(false);

        let result = timeout(
            Duration::from_secs(5),
            run_stream(client, slot.clone(), stop_rx),
        )
        .await
        .expect("pipeline did not finish");
        assert!(matches!(result, Err(NetworkError::Protocol(_))));

        // The first, valid frame still made it through
        assert_eq!(slot.latest().unwrap().frame_id, 1);
        writer.abort();
    }

    #[tokio::test]
    async fn connection_closed_mid_frame_is_partial_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let writer = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            // A header promising more bytes than will ever arrive
            let header = crate::network::protocol::WireHeader {
                codec: CodecTag::SoftImg,
                frame_id: 1,
                left_size: 1000,
                right_size: 1000,
            };
            socket.write_all(&header.encode()).await.unwrap();
            socket.write_all(&[0u8; 100]).await.unwrap();
            // Drop the socket mid-frame
        });

        let client = StreamClient::connect(addr).await.unwrap();
        let slot = Arc::new(FrameSlot::new());
        let (_stop_tx, stop_rx) = watch::channel(false);

        let result = timeout(Duration::from_secs(5), run_stream(client, slot, stop_rx))
            .await
            .expect("pipeline did not finish");
        assert!(matches!(result, Err(NetworkError::PartialFrame)));
        writer.await.unwrap();
    }
}
