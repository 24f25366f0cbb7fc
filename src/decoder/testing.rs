//! Scripted decoder backend for exercising sessions and the controller
//! without native FFmpeg.

use super::{
    BufferPool, CodecKind, DecodeError, DecodeOutput, DecodedFrame, DecoderBackend,
    DecoderProvider, EncodedPacket, InitError, Plane, SourceFormat,
};
use crate::utils::sos::SignalOfStop;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

/// What the scripted decoder does with the next pushed packet.
#[derive(Debug, Clone)]
pub(crate) enum Step {
    /// Refuse the packet at submit time.
    Reject,
    /// Accept the packet and emit `count` frames.
    Frames {
        format: SourceFormat,
        width: u32,
        height: u32,
        count: usize,
        luma: u8,
    },
    /// Accept the packet, emit `n` 64x32 frames, then fail the drain.
    FaultAfter(usize),
    /// Accept the packet but hold `n` 64x32 frames until the decoder is
    /// flushed, like a reordering decoder.
    Held(usize),
    /// Accept the packet and emit `before + after` 64x32 frames, cancelling
    /// `stop` while producing frame `before + 1`.
    CancelMidDrain {
        before: usize,
        after: usize,
        stop: SignalOfStop,
    },
}

impl Step {
    pub fn frames(format: SourceFormat, width: u32, height: u32, count: usize) -> Step {
        Step::Frames {
            format,
            width,
            height,
            count,
            luma: 128,
        }
    }

    pub fn frame_with_luma(width: u32, height: u32, luma: u8) -> Step {
        Step::Frames {
            format: SourceFormat::Yuvj420p,
            width,
            height,
            count: 1,
            luma,
        }
    }
}

#[derive(Default)]
struct ScriptState {
    steps: VecDeque<Step>,
    opened: usize,
    closed: usize,
}

#[derive(Clone, Default)]
pub(crate) struct ScriptedProvider {
    state: Arc<Mutex<ScriptState>>,
    unsupported: HashSet<CodecKind>,
    fail_alloc: bool,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn without_codec(mut self, kind: CodecKind) -> Self {
        self.unsupported.insert(kind);
        self
    }

    pub fn failing_alloc(mut self) -> Self {
        self.fail_alloc = true;
        self
    }

    /// Append steps consumed one per pushed packet.
    pub fn script(&self, steps: Vec<Step>) {
        self.state.lock().unwrap().steps.extend(steps);
    }

    pub fn opened(&self) -> usize {
        self.state.lock().unwrap().opened
    }

    pub fn closed(&self) -> usize {
        self.state.lock().unwrap().closed
    }
}

impl DecoderProvider for ScriptedProvider {
    fn open(&self, kind: CodecKind) -> Result<Box<dyn DecoderBackend>, InitError> {
        if self.unsupported.contains(&kind) {
            return Err(InitError::UnsupportedCodec(kind));
        }
        if self.fail_alloc {
            return Err(InitError::ContextAllocFailed {
                kind,
                reason: "scripted failure".to_string(),
            });
        }
        self.state.lock().unwrap().opened += 1;
        Ok(Box::new(ScriptedDecoder {
            state: Arc::clone(&self.state),
            pending: VecDeque::new(),
            held: VecDeque::new(),
            flushed: false,
        }))
    }
}

enum Pending {
    Frame {
        format: SourceFormat,
        width: u32,
        height: u32,
        luma: u8,
    },
    Fault,
    Cancel(SignalOfStop),
}

impl Pending {
    fn small_frame() -> Pending {
        Pending::Frame {
            format: SourceFormat::Yuv420p,
            width: 64,
            height: 32,
            luma: 128,
        }
    }
}

struct ScriptedDecoder {
    state: Arc<Mutex<ScriptState>>,
    pending: VecDeque<Pending>,
    held: VecDeque<Pending>,
    flushed: bool,
}

impl DecoderBackend for ScriptedDecoder {
    fn push(&mut self, packet: &EncodedPacket) -> Result<(), DecodeError> {
        let step = self.state.lock().unwrap().steps.pop_front();
        match step {
            None => {}
            Some(Step::Reject) => {
                return Err(DecodeError::Rejected(format!(
                    "scripted reject #{}",
                    packet.sequence
                )));
            }
            Some(Step::Frames {
                format,
                width,
                height,
                count,
                luma,
            }) => {
                for _ in 0..count {
                    self.pending.push_back(Pending::Frame {
                        format,
                        width,
                        height,
                        luma,
                    });
                }
            }
            Some(Step::FaultAfter(n)) => {
                self.pending.extend((0..n).map(|_| Pending::small_frame()));
                self.pending.push_back(Pending::Fault);
            }
            Some(Step::Held(n)) => {
                self.held.extend((0..n).map(|_| Pending::small_frame()));
            }
            Some(Step::CancelMidDrain {
                before,
                after,
                stop,
            }) => {
                self.pending.extend((0..before).map(|_| Pending::small_frame()));
                self.pending.push_back(Pending::Cancel(stop));
                self.pending.extend((0..after).map(|_| Pending::small_frame()));
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DecodeError> {
        self.pending.append(&mut self.held);
        self.flushed = true;
        Ok(())
    }

    fn take(&mut self, pool: &BufferPool) -> Result<DecodeOutput, DecodeError> {
        match self.pending.pop_front() {
            None if self.flushed => Ok(DecodeOutput::EndOfStream),
            None => Ok(DecodeOutput::NeedsInput),
            Some(Pending::Cancel(stop)) => {
                // Stop arrives while the decoder is producing the next frame
                stop.cancel();
                self.take(pool)
            }
            Some(Pending::Fault) => {
                // The rest of this packet's output is lost
                self.pending.clear();
                Err(DecodeError::DecodeFault("scripted fault".to_string()))
            }
            Some(Pending::Frame {
                format,
                width,
                height,
                luma,
            }) => Ok(DecodeOutput::Frame(synth_frame(
                pool, format, width, height, luma,
            ))),
        }
    }
}

impl Drop for ScriptedDecoder {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.closed += 1;
        }
    }
}

/// Build a flat-colored frame: every luma sample `luma`, neutral chroma.
pub(crate) fn synth_frame(
    pool: &BufferPool,
    format: SourceFormat,
    width: u32,
    height: u32,
    luma: u8,
) -> DecodedFrame {
    let (w, h) = (width as usize, height as usize);
    let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));

    let plane = |stride: usize, rows: usize, value: u8| {
        let mut data = pool.take(stride * rows);
        data.fill(value);
        Plane { data, stride }
    };

    let planes = match format {
        SourceFormat::Yuv420p | SourceFormat::Yuvj420p => vec![
            plane(w, h, luma),
            plane(cw, ch, 128),
            plane(cw, ch, 128),
        ],
        SourceFormat::Nv12 => vec![plane(w, h, luma), plane(cw * 2, ch, 128)],
    };

    DecodedFrame {
        width,
        height,
        format,
        planes,
    }
}
