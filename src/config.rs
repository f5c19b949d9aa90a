// Stream configuration
// Well-known endpoints and tuning knobs shared by server and viewer

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default UDP port for the discovery handshake.
pub const DEFAULT_DISCOVERY_PORT: u16 = 48530;

/// Default TCP port for the frame stream.
pub const DEFAULT_STREAM_PORT: u16 = 48531;

/// Configuration shared by the stream server and the viewer pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// UDP port the discovery responder listens on.
    pub discovery_port: u16,
    /// TCP port the stream server listens on.
    pub stream_port: u16,
    /// JPEG quality (1-100) for the software image path.
    /// 25 is the validated operating point: ~60 Mbps, ~20 FPS, ~95 ms
    /// end-to-end on reference hardware.
    pub image_quality: u8,
    /// Skip the H.264 probe and always use the image path.
    pub force_software_encode: bool,
    /// H.264 target bitrate in bits per second.
    pub video_bitrate: u32,
    /// Discovery broadcast attempts before giving up.
    pub discovery_attempts: u32,
    /// Per-attempt discovery reply timeout.
    pub discovery_timeout: Duration,
    /// Clear color for the stereo renderer (RGBA, 0.0-1.0).
    pub clear_color: [f64; 4],
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            discovery_port: DEFAULT_DISCOVERY_PORT,
            stream_port: DEFAULT_STREAM_PORT,
            image_quality: 25,
            force_software_encode: false,
            video_bitrate: 20_000_000,
            discovery_attempts: 3,
            discovery_timeout: Duration::from_secs(1),
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl StreamConfig {
    /// Device name announced during discovery; falls back to "stereolink"
    /// when the hostname cannot be read.
    pub fn device_name() -> String {
        hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "stereolink".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_quality_is_validated_operating_point() {
        let config = StreamConfig::default();
        assert_eq!(config.image_quality, 25);
        assert!((1..=100).contains(&config.image_quality));
    }

    #[test]
    fn default_ports_are_distinct() {
        let config = StreamConfig::default();
        assert_ne!(config.discovery_port, config.stream_port);
    }
}
