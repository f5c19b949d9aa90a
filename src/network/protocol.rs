// Stream framing protocol
// Fixed-size binary header followed by the two eye payloads

use super::NetworkError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Header size: total_size(4) + codec_tag(4) + frame_id(4) + left_size(4) + right_size(4)
pub const HEADER_SIZE: usize = 20;

/// `total_size` counts every byte after the total_size field itself:
/// the remaining 16 header bytes plus both payloads.
pub const TOTAL_SIZE_BASE: u32 = (HEADER_SIZE - 4) as u32;

/// Maximum payload size per eye (16MB)
pub const MAX_EYE_PAYLOAD: usize = 16 * 1024 * 1024;

/// Codec selected for the lifetime of one connection.
///
/// The tag of the first frame fixes the decode path; a differing tag on a
/// later frame is a protocol violation, never a renegotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecTag {
    /// H.264 video path
    Hw264,
    /// JPEG software image path
    SoftImg,
}

impl CodecTag {
    pub const fn wire(self) -> [u8; 4] {
        match self {
            CodecTag::Hw264 => *b"H264",
            CodecTag::SoftImg => *b"SIMG",
        }
    }

    pub fn from_wire(tag: [u8; 4]) -> Result<Self, NetworkError> {
        match &tag {
            b"H264" => Ok(CodecTag::Hw264),
            b"SIMG" => Ok(CodecTag::SoftImg),
            other => Err(NetworkError::Protocol(format!(
                "Unknown codec tag: {:02X?}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for CodecTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecTag::Hw264 => write!(f, "H264"),
            CodecTag::SoftImg => write!(f, "SIMG"),
        }
    }
}

/// Fixed-size preamble sent once per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireHeader {
    pub codec: CodecTag,
    pub frame_id: u32,
    pub left_size: u32,
    pub right_size: u32,
}

impl WireHeader {
    pub fn total_size(&self) -> u32 {
        TOTAL_SIZE_BASE + self.left_size + self.right_size
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.total_size().to_be_bytes());
        buf[4..8].copy_from_slice(&self.codec.wire());
        buf[8..12].copy_from_slice(&self.frame_id.to_be_bytes());
        buf[12..16].copy_from_slice(&self.left_size.to_be_bytes());
        buf[16..20].copy_from_slice(&self.right_size.to_be_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, NetworkError> {
        if buf.len() < HEADER_SIZE {
            return Err(NetworkError::Protocol(format!(
                "Header too short: {} bytes (need {})",
                buf.len(),
                HEADER_SIZE
            )));
        }

        let total_size = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let codec = CodecTag::from_wire([buf[4], buf[5], buf[6], buf[7]])?;
        let frame_id = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
        let left_size = u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]);
        let right_size = u32::from_be_bytes([buf[16], buf[17], buf[18], buf[19]]);

        if left_size as usize > MAX_EYE_PAYLOAD || right_size as usize > MAX_EYE_PAYLOAD {
            return Err(NetworkError::Protocol(format!(
                "Payload too large: left={} right={} (max {} per eye)",
                left_size, right_size, MAX_EYE_PAYLOAD
            )));
        }

        let header = Self {
            codec,
            frame_id,
            left_size,
            right_size,
        };

        if total_size != header.total_size() {
            return Err(NetworkError::Protocol(format!(
                "Header size mismatch: total_size={} but {} + {} + {} = {}",
                total_size,
                TOTAL_SIZE_BASE,
                left_size,
                right_size,
                header.total_size()
            )));
        }

        Ok(header)
    }
}

/// One stereo frame in flight. Transient: constructed, transmitted or
/// decoded, then discarded.
#[derive(Debug, Clone)]
pub struct StreamFrame {
    pub frame_id: u32,
    pub codec: CodecTag,
    pub left: Bytes,
    pub right: Bytes,
}

impl StreamFrame {
    pub fn header(&self) -> WireHeader {
        WireHeader {
            codec: self.codec,
            frame_id: self.frame_id,
            left_size: self.left.len() as u32,
            right_size: self.right.len() as u32,
        }
    }

    /// Serialize header + payloads as a single ordered unit so a partial
    /// frame is never interleaved with another frame's bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.left.len() + self.right.len());
        buf.extend_from_slice(&self.header().encode());
        buf.extend_from_slice(&self.left);
        buf.extend_from_slice(&self.right);
        buf
    }
}

/// Streaming frame codec for handling partial reads.
///
/// Stream sockets do not guarantee message-aligned reads; bytes accumulate
/// here until a full header and both payloads are available.
pub struct FrameCodec {
    buffer: BytesMut,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
        }
    }

    /// Feed received bytes into the codec.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.put_slice(data);
    }

    /// Try to decode a complete frame from the buffer.
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    pub fn decode(&mut self) -> Result<Option<StreamFrame>, NetworkError> {
        if self.buffer.len() < HEADER_SIZE {
            return Ok(None);
        }

        let header = WireHeader::decode(&self.buffer[..HEADER_SIZE])?;
        let total_len = HEADER_SIZE + header.left_size as usize + header.right_size as usize;
        if self.buffer.len() < total_len {
            return Ok(None);
        }

        self.buffer.advance(HEADER_SIZE);
        let left = self.buffer.split_to(header.left_size as usize).freeze();
        let right = self.buffer.split_to(header.right_size as usize).freeze();

        Ok(Some(StreamFrame {
            frame_id: header.frame_id,
            codec: header.codec,
            left,
            right,
        }))
    }

    /// Discard any partially accumulated frame.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// True when bytes of an incomplete frame are pending.
    pub fn has_partial(&self) -> bool {
        !self.buffer.is_empty()
    }
}
