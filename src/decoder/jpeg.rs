// JPEG image decode via the image crate
// A complete per-eye decode; corrupt payloads surface as DecoderError

use super::{DecoderError, StereoDecoder, StereoImage};
use crate::network::protocol::{CodecTag, StreamFrame};

pub struct JpegDecoder;

impl JpegDecoder {
    pub fn new() -> Self {
        Self
    }

    fn decode_eye(data: &[u8]) -> Result<(u32, u32, Vec<u8>), DecoderError> {
        let img = image::load_from_memory(data)
            .map_err(|e| DecoderError::DecodeError(format!("JPEG decode failed: {}", e)))?;
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok((width, height, rgba.into_raw()))
    }
}

impl Default for JpegDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl StereoDecoder for JpegDecoder {
    fn tag(&self) -> CodecTag {
        CodecTag::SoftImg
    }

    fn decode_pair(&mut self, frame: &StreamFrame) -> Result<Option<StereoImage>, DecoderError> {
        let (lw, lh, left) = Self::decode_eye(&frame.left)?;
        let (rw, rh, right) = Self::decode_eye(&frame.right)?;

        if (lw, lh) != (rw, rh) {
            return Err(DecoderError::InvalidData(format!(
                "Eye dimension mismatch: left {}x{}, right {}x{}",
                lw, lh, rw, rh
            )));
        }

        Ok(Some(StereoImage {
            frame_id: frame.frame_id,
            width: lw,
            height: lh,
            left,
            right,
        }))
    }

    fn info(&self) -> &str {
        "JPEG image"
    }
}
