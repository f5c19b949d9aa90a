// Stereolink - low-latency stereo frame streaming for LAN head-mounted viewers
// Main library entry point

pub mod config;
pub mod decoder;
pub mod encoder;
pub mod network;
pub mod pipeline;
pub mod renderer;

pub use config::StreamConfig;
pub use decoder::StereoImage;
pub use encoder::RawStereoFrame;
pub use network::NetworkError;
pub use network::client::StreamClient;
pub use network::server::{ConnectionState, FrameSink, StreamServer};
pub use pipeline::{FrameSlot, ProtocolDetector};
pub use renderer::{ViewerEvent, ViewerHandle, ViewerWindow};
