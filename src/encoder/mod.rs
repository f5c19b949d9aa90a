// Stereo frame encoder module
// H.264 video encoding with JPEG image fallback

pub mod h264;
pub mod jpeg;

use crate::config::StreamConfig;
use crate::network::protocol::CodecTag;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("Failed to initialize encoder: {0}")]
    InitError(String),
    #[error("Encoding failed: {0}")]
    EncodeError(String),
    #[error("Video encoder not available")]
    HardwareNotAvailable,
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),
}

/// Raw stereo pair as pushed by the frame producer: tightly packed RGBA8,
/// identical dimensions per eye.
#[derive(Debug, Clone)]
pub struct RawStereoFrame {
    pub width: u32,
    pub height: u32,
    pub left: Vec<u8>,
    pub right: Vec<u8>,
}

impl RawStereoFrame {
    pub fn new(width: u32, height: u32, left: Vec<u8>, right: Vec<u8>) -> Self {
        Self {
            width,
            height,
            left,
            right,
        }
    }

    fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }

    pub fn validate(&self) -> Result<(), EncoderError> {
        if self.left.len() != self.expected_len() || self.right.len() != self.expected_len() {
            return Err(EncoderError::InvalidFrame(format!(
                "Expected {} bytes per eye at {}x{}, got left={} right={}",
                self.expected_len(),
                self.width,
                self.height,
                self.left.len(),
                self.right.len()
            )));
        }
        Ok(())
    }
}

/// Stereo pair encoder, fixed to one codec for a connection's lifetime.
pub trait StereoEncoder: Send {
    /// Codec tag written into every frame header.
    fn tag(&self) -> CodecTag;

    /// Encode both eyes of one raw frame.
    fn encode_pair(&mut self, frame: &RawStereoFrame) -> Result<(Vec<u8>, Vec<u8>), EncoderError>;

    /// Get encoder info
    fn info(&self) -> &str;
}

/// Select the encoder for a new connection.
///
/// The H.264 path is probed exactly once; on failure (or when forced by
/// config) the JPEG image path is used. The choice is never revisited
/// mid-stream.
pub fn select_encoder(
    config: &StreamConfig,
    width: u32,
    height: u32,
) -> Result<Box<dyn StereoEncoder>, EncoderError> {
    if !config.force_software_encode {
        match h264::H264Encoder::new(width, height, config.video_bitrate) {
            Ok(enc) => {
                log::info!("Using H.264 video encoder ({}x{} per eye)", width, height);
                return Ok(Box::new(enc));
            }
            Err(e) => log::warn!("H.264 encoder not available: {}, falling back to JPEG", e),
        }
    } else {
        log::info!("Software image encode forced by config");
    }

    log::info!(
        "Using JPEG image encoder (quality {})",
        config.image_quality
    );
    Ok(Box::new(jpeg::JpegEncoder::new(config.image_quality)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forced_software_selects_jpeg() {
        let config = StreamConfig {
            force_software_encode: true,
            ..StreamConfig::default()
        };
        let encoder = select_encoder(&config, 64, 64).unwrap();
        assert_eq!(encoder.tag(), CodecTag::SoftImg);
    }

    #[test]
    fn raw_frame_validation() {
        let good = RawStereoFrame::new(2, 2, vec![0; 16], vec![0; 16]);
        assert!(good.validate().is_ok());

        let bad = RawStereoFrame::new(2, 2, vec![0; 15], vec![0; 16]);
        assert!(matches!(bad.validate(), Err(EncoderError::InvalidFrame(_))));
    }
}
