// Stereolink viewer host
// Discovers a server, runs the decode pipeline, and presents stereo frames
// in a window standing in for the head-mounted display surface

use anyhow::{Result, bail};
use std::sync::Arc;
use std::time::Duration;
use stereolink::pipeline::run_stream;
use stereolink::{FrameSlot, StreamClient, StreamConfig, ViewerEvent, ViewerWindow};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = StreamConfig::default();
    let device_name = StreamConfig::device_name();

    let viewer = ViewerWindow::create("Stereolink Viewer", 1600, 900, config.clear_color)?;

    'session: while viewer.is_open() {
        // Discovery restarts from zero after every teardown, and so does
        // viewer-side frame state: ids begin at 1 again on a new
        // connection, so a slot carried across sessions would reject
        // every new frame as stale.
        let slot = Arc::new(FrameSlot::new());
        let client = match StreamClient::discover_and_connect(&config, &device_name).await {
            Ok(client) => client,
            Err(e) => {
                log::warn!("Discovery failed: {}; retrying", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut reader = tokio::spawn(run_stream(client, slot.clone(), stop_rx));
        let mut last_presented: Option<u32> = None;

        loop {
            while let Some(event) = viewer.try_recv_event() {
                match event {
                    ViewerEvent::CloseRequested => {
                        let _ = stop_tx.send(true);
                        let _ = (&mut reader).await;
                        break 'session;
                    }
                    ViewerEvent::Fatal(msg) => {
                        let _ = stop_tx.send(true);
                        let _ = (&mut reader).await;
                        bail!("Renderer failed: {}", msg);
                    }
                    ViewerEvent::Resized(w, h) => log::debug!("Viewer resized to {}x{}", w, h),
                    ViewerEvent::Focused(_) => {}
                }
            }

            if !viewer.is_open() {
                let _ = stop_tx.send(true);
                let _ = (&mut reader).await;
                break 'session;
            }

            if let Some(frame) = slot.newer_than(last_presented) {
                last_presented = Some(frame.frame_id);
                if viewer.present(frame).is_err() {
                    let _ = stop_tx.send(true);
                    let _ = (&mut reader).await;
                    break 'session;
                }
            }

            if reader.is_finished() {
                match (&mut reader).await {
                    Ok(Ok(())) => log::info!("Stream ended; rediscovering"),
                    Ok(Err(e)) => log::warn!("Stream error: {}; rediscovering", e),
                    Err(e) => log::error!("Read loop panicked: {}", e),
                }
                continue 'session;
            }

            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    viewer.close();
    log::info!("Viewer closed");
    Ok(())
}
