// H.264 video decode using Cisco OpenH264
// One decoder instance per eye; output dimensions come from the bitstream

use super::{DecoderError, StereoDecoder, StereoImage};
use crate::network::protocol::{CodecTag, StreamFrame};
use openh264::decoder::Decoder;
use openh264::formats::YUVSource;

struct DecodedEye {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
}

pub struct H264Decoder {
    left: Decoder,
    right: Decoder,
    // The codec may complete one eye before the other; the finished eye
    // waits here until its sibling arrives.
    pending_left: Option<DecodedEye>,
    pending_right: Option<DecodedEye>,
}

impl H264Decoder {
    pub fn new() -> Result<Self, DecoderError> {
        Ok(Self {
            left: Self::make_decoder()?,
            right: Self::make_decoder()?,
            pending_left: None,
            pending_right: None,
        })
    }

    fn make_decoder() -> Result<Decoder, DecoderError> {
        Decoder::new()
            .map_err(|e| DecoderError::InitError(format!("Failed to create OpenH264 decoder: {}", e)))
    }

    /// Convert YUV420 planes to RGBA (BT.601).
    fn yuv420_to_rgba(
        y_data: &[u8],
        u_data: &[u8],
        v_data: &[u8],
        strides: (usize, usize, usize),
        width: u32,
        height: u32,
    ) -> Vec<u8> {
        let w = width as usize;
        let h = height as usize;
        let (y_stride, u_stride, v_stride) = strides;
        let mut rgba = vec![0u8; w * h * 4];

        for y in 0..h {
            for x in 0..w {
                let y_val = y_data[y * y_stride + x] as i32;
                let u_val = u_data[(y / 2) * u_stride + x / 2] as i32 - 128;
                let v_val = v_data[(y / 2) * v_stride + x / 2] as i32 - 128;

                let r = (y_val + ((v_val * 359) >> 8)).clamp(0, 255) as u8;
                let g = (y_val - ((u_val * 88 + v_val * 183) >> 8)).clamp(0, 255) as u8;
                let b = (y_val + ((u_val * 454) >> 8)).clamp(0, 255) as u8;

                let i = (y * w + x) * 4;
                rgba[i] = r;
                rgba[i + 1] = g;
                rgba[i + 2] = b;
                rgba[i + 3] = 255;
            }
        }

        rgba
    }

    fn decode_eye(decoder: &mut Decoder, data: &[u8]) -> Result<Option<DecodedEye>, DecoderError> {
        let maybe_yuv = decoder
            .decode(data)
            .map_err(|e| DecoderError::DecodeError(format!("Decode failed: {}", e)))?;

        // The decoder may buffer and emit nothing for this submission
        let Some(yuv) = maybe_yuv else {
            return Ok(None);
        };

        let (width, height) = yuv.dimensions();
        let width = width as u32;
        let height = height as u32;
        let rgba = Self::yuv420_to_rgba(yuv.y(), yuv.u(), yuv.v(), yuv.strides(), width, height);

        Ok(Some(DecodedEye {
            width,
            height,
            rgba,
        }))
    }
}

impl StereoDecoder for H264Decoder {
    fn tag(&self) -> CodecTag {
        CodecTag::Hw264
    }

    fn decode_pair(&mut self, frame: &StreamFrame) -> Result<Option<StereoImage>, DecoderError> {
        if let Some(eye) = Self::decode_eye(&mut self.left, &frame.left)? {
            self.pending_left = Some(eye);
        }
        if let Some(eye) = Self::decode_eye(&mut self.right, &frame.right)? {
            self.pending_right = Some(eye);
        }

        // Mid-resize skew between the eyes: hold both and wait for a match
        let ready = matches!(
            (&self.pending_left, &self.pending_right),
            (Some(l), Some(r)) if l.width == r.width && l.height == r.height
        );
        if !ready {
            return Ok(None);
        }

        let (Some(left), Some(right)) = (self.pending_left.take(), self.pending_right.take())
        else {
            return Ok(None);
        };

        Ok(Some(StereoImage {
            frame_id: frame.frame_id,
            width: left.width,
            height: left.height,
            left: left.rgba,
            right: right.rgba,
        }))
    }

    fn info(&self) -> &str {
        "OpenH264 video"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::h264::H264Encoder;
    use crate::encoder::{RawStereoFrame, StereoEncoder};
    use bytes::Bytes;

    #[test]
    fn yuv_to_rgba_neutral_gray() {
        let y = vec![128u8; 4];
        let u = vec![128u8; 1];
        let v = vec![128u8; 1];
        let rgba = H264Decoder::yuv420_to_rgba(&y, &u, &v, (2, 1, 1), 2, 2);
        assert_eq!(rgba.len(), 16);
        for px in rgba.chunks_exact(4) {
            assert_eq!(px[0], 128);
            assert_eq!(px[1], 128);
            assert_eq!(px[2], 128);
            assert_eq!(px[3], 255);
        }
    }

    #[test]
    fn corrupt_payload_is_an_error_not_a_panic() {
        let mut decoder = H264Decoder::new().unwrap();
        let frame = StreamFrame {
            frame_id: 1,
            codec: CodecTag::Hw264,
            left: Bytes::from_static(&[0x00, 0x00, 0x00, 0x01, 0xFF, 0xEE, 0xDD]),
            right: Bytes::from_static(&[0xDE, 0xAD]),
        };
        // Either a skipped frame or a decode error is acceptable; a panic is not.
        let _ = decoder.decode_pair(&frame);
    }

    #[test]
    fn encode_then_decode_recovers_dimensions() {
        let mut encoder = H264Encoder::new(64, 32, 2_000_000).unwrap();
        let mut decoder = H264Decoder::new().unwrap();

        let raw = RawStereoFrame::new(64, 32, vec![180u8; 64 * 32 * 4], vec![60u8; 64 * 32 * 4]);

        // Feed a few frames; the decoder is allowed to buffer before the
        // first complete output appears.
        let mut decoded = None;
        for frame_id in 1..=4u32 {
            let (left, right) = encoder.encode_pair(&raw).unwrap();
            let frame = StreamFrame {
                frame_id,
                codec: CodecTag::Hw264,
                left: Bytes::from(left),
                right: Bytes::from(right),
            };
            if let Some(img) = decoder.decode_pair(&frame).unwrap() {
                decoded = Some(img);
                break;
            }
        }

        let img = decoded.expect("no frame decoded after 4 submissions");
        assert_eq!((img.width, img.height), (64, 32));
        assert_eq!(img.left.len(), 64 * 32 * 4);
        assert_eq!(img.right.len(), 64 * 32 * 4);
    }
}
