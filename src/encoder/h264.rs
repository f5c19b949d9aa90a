// H.264 video path using Cisco OpenH264
// One elementary stream per eye

use super::{EncoderError, RawStereoFrame, StereoEncoder};
use crate::network::protocol::CodecTag;
use openh264::OpenH264API;
use openh264::encoder::{Encoder, EncoderConfig as H264Config};
use openh264::formats::YUVBuffer;

const TARGET_FPS: f32 = 60.0;

pub struct H264Encoder {
    left: Encoder,
    right: Encoder,
    width: u32,
    height: u32,
    bitrate: u32,
}

impl H264Encoder {
    /// Probe the codec by constructing both per-eye encoders. Failure here
    /// drives the selector to the JPEG fallback.
    pub fn new(width: u32, height: u32, bitrate: u32) -> Result<Self, EncoderError> {
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(EncoderError::InitError(format!(
                "H.264 requires even, non-zero dimensions (got {}x{})",
                width, height
            )));
        }

        let left = Self::make_encoder(bitrate)?;
        let right = Self::make_encoder(bitrate)?;

        Ok(Self {
            left,
            right,
            width,
            height,
            bitrate,
        })
    }

    fn make_encoder(bitrate: u32) -> Result<Encoder, EncoderError> {
        let api = OpenH264API::from_source();
        let config = H264Config::new()
            .set_bitrate_bps(bitrate)
            .max_frame_rate(TARGET_FPS)
            .enable_skip_frame(false); // Disable skip for consistent latency

        Encoder::with_api_config(api, config)
            .map_err(|e| EncoderError::InitError(format!("Failed to create OpenH264 encoder: {}", e)))
    }

    /// Convert RGBA to YUV420 (I420) for H.264 encoding.
    ///
    /// Y plane row-by-row, then UV planes in 2x2 blocks using the top-left
    /// pixel of each block.
    fn rgba_to_yuv420(rgba: &[u8], width: u32, height: u32) -> Vec<u8> {
        let w = width as usize;
        let h = height as usize;
        let rgba_stride = w * 4;

        let y_size = w * h;
        let uv_w = w / 2;
        let uv_h = h / 2;
        let uv_size = uv_w * uv_h;
        let mut yuv = vec![0u8; y_size + 2 * uv_size];

        let (y_plane, uv_planes) = yuv.split_at_mut(y_size);
        let (u_plane, v_plane) = uv_planes.split_at_mut(uv_size);

        for y in 0..h {
            let src_row = y * rgba_stride;
            let dst_row = y * w;
            for x in 0..w {
                let si = src_row + x * 4;
                let r = rgba[si] as i32;
                let g = rgba[si + 1] as i32;
                let b = rgba[si + 2] as i32;
                y_plane[dst_row + x] =
                    (((66 * r + 129 * g + 25 * b + 128) >> 8) + 16).clamp(0, 255) as u8;
            }
        }

        for by in 0..uv_h {
            let src_row = (by * 2) * rgba_stride;
            let uv_row = by * uv_w;
            for bx in 0..uv_w {
                let si = src_row + (bx * 2) * 4;
                let r = rgba[si] as i32;
                let g = rgba[si + 1] as i32;
                let b = rgba[si + 2] as i32;
                let ui = uv_row + bx;
                u_plane[ui] = (((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128).clamp(0, 255) as u8;
                v_plane[ui] = (((112 * r - 94 * g - 18 * b + 128) >> 8) + 128).clamp(0, 255) as u8;
            }
        }

        yuv
    }

    fn encode_eye(
        encoder: &mut Encoder,
        rgba: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, EncoderError> {
        let yuv = Self::rgba_to_yuv420(rgba, width, height);
        let buffer = YUVBuffer::from_vec(yuv, width as usize, height as usize);

        let bitstream = encoder
            .encode(&buffer)
            .map_err(|e| EncoderError::EncodeError(format!("Encode failed: {}", e)))?;

        Ok(bitstream.to_vec())
    }
}

impl StereoEncoder for H264Encoder {
    fn tag(&self) -> CodecTag {
        CodecTag::Hw264
    }

    fn encode_pair(&mut self, frame: &RawStereoFrame) -> Result<(Vec<u8>, Vec<u8>), EncoderError> {
        frame.validate()?;

        // Producer dimensions changed mid-connection: rebuild the per-eye
        // encoders. The codec tag does not change.
        if frame.width != self.width || frame.height != self.height {
            log::info!(
                "Eye dimensions changed {}x{} -> {}x{}, reinitializing H.264 encoders",
                self.width,
                self.height,
                frame.width,
                frame.height
            );
            self.left = Self::make_encoder(self.bitrate)?;
            self.right = Self::make_encoder(self.bitrate)?;
            self.width = frame.width;
            self.height = frame.height;
        }

        let left = Self::encode_eye(&mut self.left, &frame.left, frame.width, frame.height)?;
        let right = Self::encode_eye(&mut self.right, &frame.right, frame.width, frame.height)?;
        Ok((left, right))
    }

    fn info(&self) -> &str {
        "OpenH264 video"
    }
}
