// JPEG software image path
// Complete per-eye image encode via the image crate

use super::{EncoderError, RawStereoFrame, StereoEncoder};
use crate::network::protocol::CodecTag;
use image::ExtendedColorType;
use image::codecs::jpeg::JpegEncoder as ImageJpegEncoder;
use std::io::Cursor;

pub struct JpegEncoder {
    quality: u8,
}

impl JpegEncoder {
    pub fn new(quality: u8) -> Result<Self, EncoderError> {
        if !(1..=100).contains(&quality) {
            return Err(EncoderError::InitError(format!(
                "JPEG quality must be 1-100, got {}",
                quality
            )));
        }
        Ok(Self { quality })
    }

    fn encode_eye(&self, rgba: &[u8], width: u32, height: u32) -> Result<Vec<u8>, EncoderError> {
        // JPEG has no alpha channel; pack down to RGB first.
        let mut rgb = Vec::with_capacity(rgba.len() / 4 * 3);
        for px in rgba.chunks_exact(4) {
            rgb.extend_from_slice(&px[..3]);
        }

        let mut out = Cursor::new(Vec::new());
        let mut encoder = ImageJpegEncoder::new_with_quality(&mut out, self.quality);
        encoder
            .encode(&rgb, width, height, ExtendedColorType::Rgb8)
            .map_err(|e| EncoderError::EncodeError(format!("JPEG encode failed: {}", e)))?;

        Ok(out.into_inner())
    }
}

impl StereoEncoder for JpegEncoder {
    fn tag(&self) -> CodecTag {
        CodecTag::SoftImg
    }

    fn encode_pair(&mut self, frame: &RawStereoFrame) -> Result<(Vec<u8>, Vec<u8>), EncoderError> {
        frame.validate()?;
        let left = self.encode_eye(&frame.left, frame.width, frame.height)?;
        let right = self.encode_eye(&frame.right, frame.width, frame.height)?;
        Ok((left, right))
    }

    fn info(&self) -> &str {
        "JPEG image"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_out_of_range_rejected() {
        assert!(JpegEncoder::new(0).is_err());
        assert!(JpegEncoder::new(101).is_err());
        assert!(JpegEncoder::new(25).is_ok());
    }

    #[test]
    fn encode_produces_jpeg_magic() {
        let mut encoder = JpegEncoder::new(25).unwrap();
        let frame = RawStereoFrame::new(8, 8, vec![255u8; 8 * 8 * 4], vec![0u8; 8 * 8 * 4]);
        let (left, right) = encoder.encode_pair(&frame).unwrap();
        assert_eq!(&left[..2], &[0xFF, 0xD8]);
        assert_eq!(&right[..2], &[0xFF, 0xD8]);
    }
}
