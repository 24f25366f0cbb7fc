//! Top-level decode → convert → present pipeline
//!
//! The controller is owned by the decode thread. It opens the codec session,
//! runs every inbound packet through submit, drain, context check, convert and
//! publish, and tears everything down in dependency order on stop. The only
//! thing it shares with the presentation thread is the staging slot behind the
//! [`PresentationDispatcher`].

use super::health::PipelineHealth;
use super::state::PipelineState;
use crate::config::PipelineConfig;
use crate::convert::{ColorConverter, ConversionError, ResolutionManager};
use crate::decoder::{
    CodecKind, CodecSession, DecodeError, DecoderProvider, EncodedPacket, InitError,
};
use crate::display::{PresentationDispatcher, PresentationReceiver, presentation_channel};
use crate::utils::sos::SignalOfStop;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("codec session failed to open: {0}")]
    Init(#[from] InitError),
    #[error("pipeline is {0}, not streaming")]
    NotStreaming(PipelineState),
    #[error("invalid pipeline transition {from} -> {to}")]
    InvalidTransition {
        from: PipelineState,
        to: PipelineState,
    },
}

/// How a drain of the codec session ended.
enum DrainEnd {
    Complete,
    Faulted,
    Cancelled,
}

/// What happened to one submitted packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketOutcome {
    pub frames_decoded: usize,
    pub frames_published: usize,
    /// The transport should ask the source for a keyframe.
    pub needs_keyframe: bool,
}

pub struct PipelineController {
    provider: Box<dyn DecoderProvider>,
    config: PipelineConfig,
    state: PipelineState,
    session: Option<CodecSession>,
    resolution: ResolutionManager,
    converter: ColorConverter,
    dispatcher: PresentationDispatcher,
    health: Arc<PipelineHealth>,
    sos: SignalOfStop,
    awaiting_keyframe: bool,
    consecutive_faults: u32,
}

impl PipelineController {
    /// Build an idle controller and the receiver the presentation thread
    /// attaches its display sink to.
    pub fn new(
        provider: Box<dyn DecoderProvider>,
        config: PipelineConfig,
    ) -> (Self, PresentationReceiver) {
        let health = Arc::new(PipelineHealth::new());
        let (dispatcher, receiver) = presentation_channel(Arc::clone(&health));
        let resolution = ResolutionManager::new(
            config.color_matrix,
            config.color_range,
            config.frame_pool_size,
        );

        let controller = Self {
            provider,
            state: PipelineState::Idle,
            session: None,
            resolution,
            converter: ColorConverter::new(),
            dispatcher,
            health,
            sos: SignalOfStop::new(),
            awaiting_keyframe: config.wait_for_keyframe,
            consecutive_faults: 0,
            config,
        };
        (controller, receiver)
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn health(&self) -> &Arc<PipelineHealth> {
        &self.health
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Handle for stopping the pipeline from another thread. The decode thread
    /// notices it before the next packet or frame and tears down itself.
    pub fn stop_handle(&self) -> SignalOfStop {
        self.sos.clone()
    }

    fn transition(&mut self, to: PipelineState) -> Result<(), PipelineError> {
        if !self.state.can_transition_to(&to) {
            return Err(PipelineError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        log::debug!("PipelineController: {} -> {}", self.state, to);
        self.state = to;
        Ok(())
    }

    /// Open the codec session for `kind` and start streaming.
    ///
    /// A session that fails to open leaves the controller `Stopped`.
    pub fn start(&mut self, kind: CodecKind) -> Result<(), PipelineError> {
        self.transition(PipelineState::Initializing)?;

        match CodecSession::open(&*self.provider, kind, self.config.frame_pool_size) {
            Ok(session) => {
                self.session = Some(session);
                self.transition(PipelineState::Streaming {
                    started_at: Instant::now(),
                })?;
                log::info!("PipelineController: streaming {}", kind);
                Ok(())
            }
            Err(e) => {
                log::error!("PipelineController: {}", e);
                self.stop();
                Err(e.into())
            }
        }
    }

    /// Run one packet through the whole pipeline.
    ///
    /// Packet-level failures are absorbed and reported through the outcome;
    /// only a pipeline that is not streaming yields an error.
    pub fn submit_packet(&mut self, packet: EncodedPacket) -> Result<PacketOutcome, PipelineError> {
        if self.sos.cancelled() {
            self.stop();
        }
        if !self.state.is_streaming() {
            return Err(PipelineError::NotStreaming(self.state));
        }

        self.health.record_packet_received();
        let sequence = packet.sequence;
        let mut outcome = PacketOutcome::default();

        if self.awaiting_keyframe {
            if !packet.is_keyframe() {
                log::debug!(
                    "PipelineController: packet #{} skipped, waiting for keyframe",
                    sequence
                );
                self.health.record_packet_skipped();
                outcome.needs_keyframe = true;
                return Ok(outcome);
            }
            log::info!("PipelineController: keyframe #{} received", sequence);
            self.awaiting_keyframe = false;
        }

        let Some(session) = self.session.as_mut() else {
            self.stop();
            return Err(PipelineError::NotStreaming(self.state));
        };

        match session.submit_packet(packet) {
            Ok(()) => {}
            Err(DecodeError::SessionClosed) => {
                log::warn!("PipelineController: codec session closed under us");
                self.stop();
                return Err(PipelineError::NotStreaming(self.state));
            }
            Err(e) => {
                log::warn!("PipelineController: packet #{} dropped: {}", sequence, e);
                self.health.record_packet_rejected();
                outcome.needs_keyframe = self.record_failure();
                return Ok(outcome);
            }
        }

        match self.drain(sequence, &mut outcome) {
            DrainEnd::Cancelled => {
                log::info!(
                    "PipelineController: stop requested mid-packet #{}",
                    sequence
                );
                self.stop();
            }
            DrainEnd::Faulted => outcome.needs_keyframe = self.record_failure(),
            DrainEnd::Complete => self.consecutive_faults = 0,
        }

        Ok(outcome)
    }

    /// End of input: flush the decoder and publish the frames it still held.
    ///
    /// The pipeline keeps streaming so the last frame can be presented, but
    /// the decoder takes no more packets. Call [`PipelineController::stop`]
    /// when done.
    pub fn flush(&mut self) -> Result<PacketOutcome, PipelineError> {
        if self.sos.cancelled() {
            self.stop();
        }
        if !self.state.is_streaming() {
            return Err(PipelineError::NotStreaming(self.state));
        }

        let mut outcome = PacketOutcome::default();
        let flushed = match self.session.as_mut() {
            Some(session) => session.flush(),
            None => Err(DecodeError::SessionClosed),
        };
        if let Err(e) = flushed {
            log::warn!("PipelineController: flush failed: {}", e);
            return Ok(outcome);
        }

        // Flushed frames belong to no particular packet
        if let DrainEnd::Cancelled = self.drain(u64::MAX, &mut outcome) {
            log::info!("PipelineController: stop requested while flushing");
            self.stop();
        }
        Ok(outcome)
    }

    /// Decode, convert and publish every frame the session has ready.
    fn drain(&mut self, sequence: u64, outcome: &mut PacketOutcome) -> DrainEnd {
        let Some(session) = self.session.as_mut() else {
            return DrainEnd::Complete;
        };
        let mut end = DrainEnd::Complete;

        for result in session.drain_frames() {
            if self.sos.cancelled() {
                return DrainEnd::Cancelled;
            }

            let frame = match result {
                Ok(frame) => frame,
                Err(e) => {
                    log::warn!(
                        "PipelineController: decode fault on packet #{}: {}",
                        sequence,
                        e
                    );
                    self.health.record_decode_fault();
                    end = DrainEnd::Faulted;
                    continue;
                }
            };
            outcome.frames_decoded += 1;
            self.health.record_frame_decoded();

            let rebuilds = self.resolution.rebuilds();
            let ctx = self
                .resolution
                .ensure_context(frame.format, frame.width, frame.height);
            let converted = self.converter.convert(&frame, ctx);
            // Plane storage goes back to the session pool here
            drop(frame);
            if self.resolution.rebuilds() != rebuilds {
                self.health.record_context_rebuild();
            }

            match converted {
                Ok(converted) => {
                    self.health.record_frame_converted();
                    if self.dispatcher.schedule_present(converted) {
                        outcome.frames_published += 1;
                    }
                }
                Err(e @ ConversionError::DimensionMismatch { .. }) => {
                    log::error!("PipelineController: {}", e);
                    self.health.record_conversion_failure();
                }
                Err(e) => {
                    log::warn!(
                        "PipelineController: frame of packet #{} dropped: {}",
                        sequence,
                        e
                    );
                    self.health.record_conversion_failure();
                }
            }
        }

        end
    }

    /// Count a failed packet. Returns true when the failure streak reached the
    /// threshold and the pipeline went back to waiting for a keyframe.
    fn record_failure(&mut self) -> bool {
        self.consecutive_faults += 1;
        let threshold = self.config.fault_threshold;
        if threshold == 0 || self.consecutive_faults < threshold {
            return false;
        }

        log::warn!(
            "PipelineController: {} consecutive failures, waiting for keyframe",
            self.consecutive_faults
        );
        self.consecutive_faults = 0;
        self.awaiting_keyframe = true;
        self.health.record_keyframe_request();
        true
    }

    /// Release every resource and enter `Stopped`. Idempotent.
    ///
    /// Order: conversion context, staged frame, presentation channel, codec
    /// session. Each release is a no-op when already done.
    pub fn stop(&mut self) {
        self.sos.cancel();
        if self.state.is_stopped() {
            return;
        }

        self.resolution.release();
        if self.dispatcher.clear() {
            log::debug!("PipelineController: dropped unpresented frame");
        }
        self.dispatcher.close();
        if let Some(mut session) = self.session.take() {
            session.close();
        }

        let from = self.state;
        self.state = PipelineState::Stopped;
        if let Some(streamed) = from.streaming_duration() {
            log::info!("PipelineController: streamed for {:.1?}", streamed);
        }
        log::info!(
            "PipelineController: {} -> Stopped. {}",
            from,
            self.health.summary()
        );
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        self.stop();
    }
}
