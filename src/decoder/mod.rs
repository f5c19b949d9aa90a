// Stereo frame decoder module
// Decode path is fixed per connection by the first frame's codec tag

pub mod h264;
pub mod jpeg;

use crate::network::protocol::{CodecTag, StreamFrame};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecoderError {
    #[error("Failed to initialize decoder: {0}")]
    InitError(String),
    #[error("Decoding failed: {0}")]
    DecodeError(String),
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// A fully decoded stereo pair ready for texture upload: tightly packed
/// RGBA8 per eye, identical dimensions.
#[derive(Debug, Clone)]
pub struct StereoImage {
    pub frame_id: u32,
    pub width: u32,
    pub height: u32,
    pub left: Vec<u8>,
    pub right: Vec<u8>,
}

/// Stereo pair decoder. `decode_pair` may return `Ok(None)` while the
/// codec is still buffering: decode completion is not guaranteed within the
/// call that submitted the payload.
pub trait StereoDecoder: Send {
    fn tag(&self) -> CodecTag;

    fn decode_pair(&mut self, frame: &StreamFrame) -> Result<Option<StereoImage>, DecoderError>;

    /// Get decoder info
    fn info(&self) -> &str;
}

/// Create the decoder matching the connection's detected codec tag.
pub fn create_decoder(tag: CodecTag) -> Result<Box<dyn StereoDecoder>, DecoderError> {
    match tag {
        CodecTag::Hw264 => {
            log::info!("Using H.264 video decoder");
            Ok(Box::new(h264::H264Decoder::new()?))
        }
        CodecTag::SoftImg => {
            log::info!("Using JPEG image decoder");
            Ok(Box::new(jpeg::JpegDecoder::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_matches_tag() {
        let decoder = create_decoder(CodecTag::SoftImg).unwrap();
        assert_eq!(decoder.tag(), CodecTag::SoftImg);

        let decoder = create_decoder(CodecTag::Hw264).unwrap();
        assert_eq!(decoder.tag(), CodecTag::Hw264);
    }
}
