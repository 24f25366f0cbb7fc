//! Video decoding module
//!
//! Provides the codec session lifecycle on top of a pluggable decoder backend.
//! The production backend decodes H.264 / HEVC / AV1 via FFmpeg.

pub mod annexb;
mod ffmpeg;
mod frame_pool;
mod session;

#[cfg(test)]
pub(crate) mod testing;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use ffmpeg::{FfmpegDecoder, FfmpegProvider};
pub use frame_pool::{BufferPool, PooledBuffer};
pub use session::{CodecSession, Drain};

/// Compressed video format negotiated with the remote host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    H264,
    Hevc,
    Av1,
}

impl CodecKind {
    /// FFmpeg decoder name for this codec.
    pub fn decoder_name(self) -> &'static str {
        match self {
            CodecKind::H264 => "h264",
            CodecKind::Hevc => "hevc",
            CodecKind::Av1 => "av1",
        }
    }
}

impl std::fmt::Display for CodecKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.decoder_name())
    }
}

impl std::str::FromStr for CodecKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "h264" | "avc" => Ok(CodecKind::H264),
            "hevc" | "h265" => Ok(CodecKind::Hevc),
            "av1" => Ok(CodecKind::Av1),
            other => Err(format!("unknown codec '{}'", other)),
        }
    }
}

/// Frame type tag supplied by the transport with each access unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// Independently decodable (IDR / IRAP / key) frame.
    Key,
    /// Frame predicted from earlier frames.
    Delta,
}

/// One encoded access unit, already in the elementary-stream framing the codec expects.
#[derive(Clone)]
pub struct EncodedPacket {
    pub data: Bytes,
    pub frame_type: FrameType,
    /// Arrival order assigned by the transport.
    pub sequence: u64,
}

impl EncodedPacket {
    pub fn new(data: impl Into<Bytes>, frame_type: FrameType, sequence: u64) -> Self {
        Self {
            data: data.into(),
            frame_type,
            sequence,
        }
    }

    #[inline]
    pub fn is_keyframe(&self) -> bool {
        self.frame_type == FrameType::Key
    }
}

impl std::fmt::Debug for EncodedPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodedPacket")
            .field("size", &self.data.len())
            .field("frame_type", &self.frame_type)
            .field("sequence", &self.sequence)
            .finish()
    }
}

/// Planar, chroma-subsampled layouts produced by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceFormat {
    /// Three planes: Y, U, V with 2x2 subsampled chroma.
    Yuv420p,
    /// Same layout as `Yuv420p` but full (JPEG) range.
    Yuvj420p,
    /// Two planes: Y and interleaved UV with 2x2 subsampled chroma.
    Nv12,
}

impl SourceFormat {
    /// Number of planes a frame of this format carries.
    pub fn plane_count(self) -> usize {
        match self {
            SourceFormat::Yuv420p | SourceFormat::Yuvj420p => 3,
            SourceFormat::Nv12 => 2,
        }
    }
}

/// One image plane with its row stride in bytes.
#[derive(Debug)]
pub struct Plane {
    pub data: PooledBuffer,
    pub stride: usize,
}

/// Decoded picture whose plane storage is borrowed from the session's pool.
///
/// Dropping the frame returns the storage for reuse, so callers must not
/// keep it past the conversion step.
#[derive(Debug)]
pub struct DecodedFrame {
    pub width: u32,
    pub height: u32,
    pub format: SourceFormat,
    pub planes: Vec<Plane>,
}

/// Result of asking the decoder for output.
#[derive(Debug)]
pub enum DecodeOutput {
    Frame(DecodedFrame),
    /// No more output for the input submitted so far.
    NeedsInput,
    /// The decoder was flushed and has nothing left.
    EndOfStream,
}

/// Errors that prevent a codec session from opening. Fatal to the session.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("no decoder available for codec {0}")]
    UnsupportedCodec(CodecKind),
    #[error("failed to allocate {kind} decoder context: {reason}")]
    ContextAllocFailed { kind: CodecKind, reason: String },
}

/// Per-packet decode failures. The session stays usable after any of these
/// except `SessionClosed`.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("packet rejected by decoder: {0}")]
    Rejected(String),
    #[error("decoder fault: {0}")]
    DecodeFault(String),
    #[error("codec session is closed")]
    SessionClosed,
}

/// Native decoder bound to a single codec.
pub trait DecoderBackend: Send {
    /// Feed one access unit.
    fn push(&mut self, packet: &EncodedPacket) -> Result<(), DecodeError>;

    /// Pull the next decoded frame, copying planes into `pool` storage.
    fn take(&mut self, pool: &BufferPool) -> Result<DecodeOutput, DecodeError>;

    /// Signal end of input. Buffered frames remain available from `take`,
    /// which reports `EndOfStream` once they are gone.
    fn flush(&mut self) -> Result<(), DecodeError>;
}

/// Resolves decoder backends for a codec kind.
pub trait DecoderProvider: Send {
    fn open(&self, kind: CodecKind) -> Result<Box<dyn DecoderBackend>, InitError>;
}
