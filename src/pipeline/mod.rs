//! Pipeline layer for streamview
//!
//! Wires the decoder, converter and display components into one real-time
//! video pipeline:
//! - Control: the `PipelineController` state machine and teardown ordering
//! - Transport: a bounded, non-blocking packet ingress in front of an async
//!   decode stage
//! - Health: shared counters for every drop point in the pipeline
//!
//! # Architecture
//!
//! ```text
//! PacketIngress → DecodeStage → PipelineController
//!     → CodecSession → ResolutionManager → ColorConverter
//!     → FrameSlot → Presenter → DisplaySink
//! ```

pub mod controller;
pub mod health;
pub mod stage;
pub mod state;

pub use controller::{PacketOutcome, PipelineController, PipelineError};
pub use health::{HealthSummary, PipelineHealth};
pub use stage::{DecodeStage, PacketIngress, PipelineStage};
pub use state::PipelineState;
