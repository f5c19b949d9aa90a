// Stereolink server host
// Runs discovery + stream server and feeds a synthetic stereo test pattern
// in place of a real visual source

use anyhow::Result;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use stereolink::network::discovery::DiscoveryResponder;
use stereolink::{FrameSink, RawStereoFrame, StreamConfig, StreamServer};

const EYE_WIDTH: u32 = 1024;
const EYE_HEIGHT: u32 = 1024;
const FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Animated gradient, phase-shifted per eye so left and right are
/// visibly distinct in the viewer.
fn test_pattern(width: u32, height: u32, tick: u32, eye_phase: u8) -> Vec<u8> {
    let mut rgba = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            let r = ((x + tick as u32) % 256) as u8;
            let g = ((y + tick as u32 / 2) % 256) as u8;
            let b = eye_phase;
            rgba.extend_from_slice(&[r, g, b, 255]);
        }
    }
    rgba
}

async fn produce_frames(sink: FrameSink) {
    let mut ticker = tokio::time::interval(FRAME_INTERVAL);
    let mut tick: u32 = 0;
    loop {
        ticker.tick().await;
        tick = tick.wrapping_add(1);
        let left = test_pattern(EYE_WIDTH, EYE_HEIGHT, tick, 40);
        let right = test_pattern(EYE_WIDTH, EYE_HEIGHT, tick, 200);
        sink.push(RawStereoFrame::new(EYE_WIDTH, EYE_HEIGHT, left, right));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = StreamConfig::default();
    let stream_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.stream_port));
    let (server, sink) = StreamServer::bind(config.clone(), stream_addr).await?;
    let stream_port = server.local_addr()?.port();

    let discovery_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.discovery_port));
    let responder = DiscoveryResponder::bind(discovery_addr, stream_port).await?;
    tokio::spawn(async move {
        if let Err(e) = responder.run().await {
            log::error!("Discovery responder failed: {}", e);
        }
    });

    tokio::spawn(produce_frames(sink));

    let server = Arc::new(server);
    log::info!("Stereolink server running; streaming on port {}", stream_port);
    server.run().await?;
    Ok(())
}
