use super::{
    BufferPool, CodecKind, DecodeError, DecodeOutput, DecodedFrame, DecoderBackend,
    DecoderProvider, EncodedPacket, InitError, Plane, SourceFormat,
};
use ac_ffmpeg::codec::Decoder;
use ac_ffmpeg::codec::video::frame::{PixelFormat, get_pixel_format};
use ac_ffmpeg::codec::video::scaler::{Algorithm, VideoFrameScaler};
use ac_ffmpeg::codec::video::{VideoDecoder, VideoFrame};
use ac_ffmpeg::packet::PacketMut;
use ac_ffmpeg::time::{TimeBase, Timestamp};

/// Decoder options tuned for interactive streaming: no frame reordering
/// delay, slice threading only.
const LOW_LATENCY_OPTIONS: &[(&str, &str)] = &[("flags", "low_delay"), ("thread_type", "slice")];

/// Opens FFmpeg decoders by codec kind.
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegProvider;

impl DecoderProvider for FfmpegProvider {
    fn open(&self, kind: CodecKind) -> Result<Box<dyn DecoderBackend>, InitError> {
        Ok(Box::new(FfmpegDecoder::new(kind)?))
    }
}

/// Pixel formats the color converter handles natively.
struct KnownFormats {
    yuv420p: PixelFormat,
    yuvj420p: PixelFormat,
    nv12: PixelFormat,
}

impl KnownFormats {
    fn new() -> Self {
        Self {
            yuv420p: get_pixel_format("yuv420p"),
            yuvj420p: get_pixel_format("yuvj420p"),
            nv12: get_pixel_format("nv12"),
        }
    }

    fn classify(&self, format: PixelFormat) -> Option<SourceFormat> {
        if format == self.yuv420p {
            Some(SourceFormat::Yuv420p)
        } else if format == self.yuvj420p {
            Some(SourceFormat::Yuvj420p)
        } else if format == self.nv12 {
            Some(SourceFormat::Nv12)
        } else {
            None
        }
    }
}

/// Scaler that brings any other decoder output (10-bit, 4:2:2, 4:4:4...)
/// down to yuv420p. Bound to one (format, width, height) triple.
struct Normalizer {
    scaler: VideoFrameScaler,
    source: (PixelFormat, usize, usize),
}

/// Video decoder using FFmpeg.
///
/// # Performance Optimizations
/// - Plane storage comes from the session pool and is reused across frames
/// - Optimized plane extraction with a fast path for unpadded strides
/// - Low-delay decoding with slice threading
pub struct FfmpegDecoder {
    kind: CodecKind,
    decoder: VideoDecoder,
    formats: KnownFormats,
    normalizer: Option<Normalizer>,
    frame_count: i64,
    flushed: bool,
}

// SAFETY: the decoder and scaler contexts are only ever touched by the thread
// that currently owns the `FfmpegDecoder`; FFmpeg does not tie them to the
// thread that created them.
unsafe impl Send for FfmpegDecoder {}

impl FfmpegDecoder {
    /// Create a new decoder for `kind`.
    pub fn new(kind: CodecKind) -> Result<Self, InitError> {
        let mut builder = VideoDecoder::builder(kind.decoder_name()).map_err(|e| {
            log::warn!("Decoder: {} not available: {}", kind, e);
            InitError::UnsupportedCodec(kind)
        })?;

        builder = builder.time_base(TimeBase::new(1, 90_000));
        for (k, v) in LOW_LATENCY_OPTIONS {
            builder = builder.set_option(k, v);
        }

        let decoder = builder
            .build()
            .map_err(|e| InitError::ContextAllocFailed {
                kind,
                reason: e.to_string(),
            })?;

        Ok(Self {
            kind,
            decoder,
            formats: KnownFormats::new(),
            normalizer: None,
            frame_count: 0,
            flushed: false,
        })
    }

    #[inline]
    fn next_pts(&mut self) -> Timestamp {
        self.frame_count += 1;
        Timestamp::new(self.frame_count, TimeBase::new(1, 90_000))
    }

    /// Return a frame in a format the converter understands, rebuilding the
    /// normalizing scaler when the source triple changes.
    fn normalize(&mut self, frame: VideoFrame) -> Result<(VideoFrame, SourceFormat), DecodeError> {
        if let Some(format) = self.formats.classify(frame.pixel_format()) {
            return Ok((frame, format));
        }

        let source = (frame.pixel_format(), frame.width(), frame.height());
        let stale = self
            .normalizer
            .as_ref()
            .is_none_or(|n| n.source != source);

        if stale {
            let scaler = VideoFrameScaler::builder()
                .source_pixel_format(source.0)
                .source_width(source.1)
                .source_height(source.2)
                .target_pixel_format(self.formats.yuv420p)
                .target_width(source.1)
                .target_height(source.2)
                .algorithm(Algorithm::FastBilinear)
                .build()
                .map_err(|e| DecodeError::DecodeFault(format!("scaler init failed: {}", e)))?;
            log::info!(
                "Decoder: normalizing {} output {}x{} to yuv420p",
                self.kind,
                source.1,
                source.2
            );
            self.normalizer = Some(Normalizer { scaler, source });
        }

        let normalizer = self
            .normalizer
            .as_mut()
            .ok_or_else(|| DecodeError::DecodeFault("scaler missing".to_string()))?;
        let scaled = normalizer
            .scaler
            .scale(&frame)
            .map_err(|e| DecodeError::DecodeFault(format!("scale failed: {}", e)))?;

        Ok((scaled, SourceFormat::Yuv420p))
    }
}

impl DecoderBackend for FfmpegDecoder {
    fn push(&mut self, packet: &EncodedPacket) -> Result<(), DecodeError> {
        let pts = self.next_pts();
        let av_packet = PacketMut::from(packet.data.as_ref()).with_pts(pts).freeze();

        self.decoder.try_push(av_packet).map_err(|_| {
            DecodeError::Rejected(format!("decoder refused packet #{}", packet.sequence))
        })
    }

    fn take(&mut self, pool: &BufferPool) -> Result<DecodeOutput, DecodeError> {
        match self.decoder.take() {
            Ok(Some(frame)) => {
                let (frame, format) = self.normalize(frame)?;
                Ok(DecodeOutput::Frame(copy_frame(&frame, format, pool)))
            }
            Ok(None) if self.flushed => Ok(DecodeOutput::EndOfStream),
            Ok(None) => Ok(DecodeOutput::NeedsInput),
            Err(e) => Err(DecodeError::DecodeFault(e.to_string())),
        }
    }

    fn flush(&mut self) -> Result<(), DecodeError> {
        self.decoder
            .try_flush()
            .map_err(|_| DecodeError::DecodeFault("decoder refused flush".to_string()))?;
        self.flushed = true;
        Ok(())
    }
}

/// Copy the planes of a native frame into pooled, unpadded buffers.
fn copy_frame(frame: &VideoFrame, format: SourceFormat, pool: &BufferPool) -> DecodedFrame {
    let w = frame.width();
    let h = frame.height();
    let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
    let native = frame.planes();

    let dims: &[(usize, usize)] = match format {
        SourceFormat::Yuv420p | SourceFormat::Yuvj420p => &[(w, h), (cw, ch), (cw, ch)],
        SourceFormat::Nv12 => &[(w, h), (cw * 2, ch)],
    };

    let planes = dims
        .iter()
        .enumerate()
        .map(|(i, &(pw, ph))| {
            let mut data = pool.take(pw * ph);
            extract_plane(&mut data, native[i].data(), native[i].line_size(), pw, ph);
            Plane { data, stride: pw }
        })
        .collect();

    DecodedFrame {
        width: w as u32,
        height: h as u32,
        format,
        planes,
    }
}

/// Extract a plane from padded source to contiguous destination.
///
/// # Performance
/// - Fast path: No padding -> single memcpy
/// - Fallback: Row-by-row copy
#[inline]
fn extract_plane(dst: &mut [u8], src: &[u8], stride: usize, width: usize, height: usize) {
    let total = width * height;

    // Fast path: No stride padding
    if stride == width && src.len() >= total && dst.len() >= total {
        dst[..total].copy_from_slice(&src[..total]);
        return;
    }

    // Fallback: Row-by-row copy
    for r in 0..height {
        let src_start = r * stride;
        let dst_start = r * width;
        if src_start + width > src.len() || dst_start + width > dst.len() {
            break;
        }
        dst[dst_start..dst_start + width].copy_from_slice(&src[src_start..src_start + width]);
    }
}
