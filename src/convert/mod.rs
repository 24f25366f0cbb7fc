//! Planar YUV to packed RGBA conversion
//!
//! A [`ConversionContext`] is bound to one (format, width, height) triple and
//! carries the fixed-point coefficients and output buffer pool for it. The
//! [`ResolutionManager`] decides when a context must be rebuilt.

mod resolution;

pub use resolution::{ContextDecision, ContextKey, ResolutionManager, decide};

use crate::decoder::{BufferPool, DecodedFrame, PooledBuffer, SourceFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bytes per pixel of the interchange format (RGBA, 8 bits per channel).
pub const BYTES_PER_PIXEL: usize = 4;

const FRAC_BITS: u32 = 14;
const ROUND: i32 = 1 << (FRAC_BITS - 1);

/// YUV to RGB matrix coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMatrix {
    Bt601,
    #[default]
    Bt709,
}

/// Quantization range of the source samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorRange {
    /// Y in 16..=235, chroma in 16..=240.
    #[default]
    Limited,
    Full,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConversionError {
    #[error("frame is {actual:?} but conversion context is bound to {expected:?}")]
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    #[error("frame format {actual:?} does not match context format {expected:?}")]
    FormatMismatch {
        expected: SourceFormat,
        actual: SourceFormat,
    },
    #[error("frame is missing plane {index}")]
    MissingPlane { index: usize },
    #[error("plane {index} holds {actual} bytes, needs {needed}")]
    PlaneTooSmall {
        index: usize,
        needed: usize,
        actual: usize,
    },
}

/// Q14 fixed-point conversion coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Coefficients {
    y_offset: i32,
    y_scale: i32,
    rv: i32,
    gu: i32,
    gv: i32,
    bu: i32,
}

impl Coefficients {
    fn new(matrix: ColorMatrix, range: ColorRange) -> Self {
        let (kr, kb) = match matrix {
            ColorMatrix::Bt601 => (0.299, 0.114),
            ColorMatrix::Bt709 => (0.2126, 0.0722),
        };
        let kg = 1.0 - kr - kb;
        let (y_offset, y_scale, c_scale) = match range {
            ColorRange::Limited => (16, 255.0 / 219.0, 255.0 / 224.0),
            ColorRange::Full => (0, 1.0, 1.0),
        };

        let fixed = |v: f64| (v * f64::from(1u32 << FRAC_BITS)).round() as i32;
        Self {
            y_offset,
            y_scale: fixed(y_scale),
            rv: fixed(2.0 * (1.0 - kr) * c_scale),
            gu: fixed(2.0 * kb * (1.0 - kb) / kg * c_scale),
            gv: fixed(2.0 * kr * (1.0 - kr) / kg * c_scale),
            bu: fixed(2.0 * (1.0 - kb) * c_scale),
        }
    }

    #[inline(always)]
    fn write(&self, y: u8, u: u8, v: u8, out: &mut [u8]) {
        let y = (i32::from(y) - self.y_offset) * self.y_scale + ROUND;
        let u = i32::from(u) - 128;
        let v = i32::from(v) - 128;
        out[0] = clamp((y + self.rv * v) >> FRAC_BITS);
        out[1] = clamp((y - self.gu * u - self.gv * v) >> FRAC_BITS);
        out[2] = clamp((y + self.bu * u) >> FRAC_BITS);
        out[3] = 255;
    }
}

#[inline(always)]
fn clamp(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// Precomputed state for converting one source triple to RGBA.
///
/// Never mutated in place: a different triple needs a new context.
pub struct ConversionContext {
    key: ContextKey,
    dst_stride: usize,
    coefficients: Coefficients,
    output: BufferPool,
}

impl ConversionContext {
    pub fn new(key: ContextKey, matrix: ColorMatrix, range: ColorRange, pool_size: usize) -> Self {
        // JPEG-range formats carry their range in the format itself
        let range = match key.format {
            SourceFormat::Yuvj420p => ColorRange::Full,
            _ => range,
        };

        Self {
            key,
            dst_stride: key.width as usize * BYTES_PER_PIXEL,
            coefficients: Coefficients::new(matrix, range),
            output: BufferPool::new(pool_size),
        }
    }

    pub fn key(&self) -> ContextKey {
        self.key
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.key.width, self.key.height)
    }

    /// Row stride of the packed destination buffer.
    pub fn dst_stride(&self) -> usize {
        self.dst_stride
    }

    /// Fresh allocations made by this context's output pool.
    pub fn allocations(&self) -> u64 {
        self.output.allocations()
    }
}

impl std::fmt::Debug for ConversionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionContext")
            .field("key", &self.key)
            .field("dst_stride", &self.dst_stride)
            .finish()
    }
}

/// Packed RGBA frame, `width * height * 4` bytes, rows `width * 4` apart.
#[derive(Debug)]
pub struct ConvertedFrame {
    pub width: u32,
    pub height: u32,
    pub data: PooledBuffer,
}

impl ConvertedFrame {
    pub fn stride(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }
}

/// Converts decoded frames into the packed interchange format.
#[derive(Debug, Default, Clone, Copy)]
pub struct ColorConverter;

impl ColorConverter {
    pub fn new() -> Self {
        Self
    }

    /// Convert `frame` using `ctx`, which must be bound to the frame's triple.
    pub fn convert(
        &self,
        frame: &DecodedFrame,
        ctx: &ConversionContext,
    ) -> Result<ConvertedFrame, ConversionError> {
        let key = ctx.key();
        if (frame.width, frame.height) != (key.width, key.height) {
            return Err(ConversionError::DimensionMismatch {
                expected: (key.width, key.height),
                actual: (frame.width, frame.height),
            });
        }
        if frame.format != key.format {
            return Err(ConversionError::FormatMismatch {
                expected: key.format,
                actual: frame.format,
            });
        }

        let (w, h) = (frame.width as usize, frame.height as usize);
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
        let mut out = ctx.output.take(ctx.dst_stride * h);
        let c = &ctx.coefficients;

        if out.is_empty() {
            return Ok(ConvertedFrame {
                width: frame.width,
                height: frame.height,
                data: out,
            });
        }

        match frame.format {
            SourceFormat::Yuv420p | SourceFormat::Yuvj420p => {
                let (y_plane, ys) = plane(frame, 0, w, h)?;
                let (u_plane, us) = plane(frame, 1, cw, ch)?;
                let (v_plane, vs) = plane(frame, 2, cw, ch)?;

                for (row, dst) in out.chunks_exact_mut(ctx.dst_stride).enumerate() {
                    let y_row = &y_plane[row * ys..row * ys + w];
                    let u_row = &u_plane[(row / 2) * us..(row / 2) * us + cw];
                    let v_row = &v_plane[(row / 2) * vs..(row / 2) * vs + cw];
                    for (x, px) in dst.chunks_exact_mut(BYTES_PER_PIXEL).enumerate() {
                        c.write(y_row[x], u_row[x / 2], v_row[x / 2], px);
                    }
                }
            }
            SourceFormat::Nv12 => {
                let (y_plane, ys) = plane(frame, 0, w, h)?;
                let (uv_plane, uvs) = plane(frame, 1, cw * 2, ch)?;

                for (row, dst) in out.chunks_exact_mut(ctx.dst_stride).enumerate() {
                    let y_row = &y_plane[row * ys..row * ys + w];
                    let uv_row = &uv_plane[(row / 2) * uvs..(row / 2) * uvs + cw * 2];
                    for (x, px) in dst.chunks_exact_mut(BYTES_PER_PIXEL).enumerate() {
                        let uv = (x / 2) * 2;
                        c.write(y_row[x], uv_row[uv], uv_row[uv + 1], px);
                    }
                }
            }
        }

        Ok(ConvertedFrame {
            width: frame.width,
            height: frame.height,
            data: out,
        })
    }
}

/// Validated plane data and stride holding `rows` rows of `row_bytes` bytes.
fn plane(
    frame: &DecodedFrame,
    index: usize,
    row_bytes: usize,
    rows: usize,
) -> Result<(&[u8], usize), ConversionError> {
    let p = frame
        .planes
        .get(index)
        .ok_or(ConversionError::MissingPlane { index })?;
    let stride = p.stride.max(row_bytes);
    let needed = if rows == 0 {
        0
    } else {
        stride * (rows - 1) + row_bytes
    };
    if p.data.len() < needed || p.stride < row_bytes {
        return Err(ConversionError::PlaneTooSmall {
            index,
            needed,
            actual: p.data.len(),
        });
    }
    Ok((&p.data, stride))
}
