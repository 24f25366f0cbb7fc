//! Async decode stage and its network-facing ingress
//!
//! The transport hands packets to a [`PacketIngress`], which never blocks:
//! when the decode stage falls behind, new packets are dropped and counted.
//! The [`DecodeStage`] owns the controller and drives it from a tokio task.

use super::controller::{PipelineController, PipelineError};
use super::health::PipelineHealth;
use crate::decoder::{CodecKind, EncodedPacket};
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// How often a stage without traffic looks at its stop signal.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Trait for pipeline stages that process media data
#[async_trait]
pub trait PipelineStage: Send {
    /// Run the stage, processing data until shutdown signal
    async fn run(&mut self) -> Result<()>;

    /// Get the name of this stage for logging
    fn name(&self) -> &'static str;

    /// Gracefully shutdown the stage
    async fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Non-blocking entry point for inbound packets.
#[derive(Clone)]
pub struct PacketIngress {
    tx: mpsc::Sender<EncodedPacket>,
    health: Arc<PipelineHealth>,
}

impl PacketIngress {
    /// Queue `packet` for decoding. Returns false if it was dropped because
    /// the queue is full or the stage is gone.
    pub fn offer(&self, packet: EncodedPacket) -> bool {
        match self.tx.try_send(packet) {
            Ok(()) => true,
            Err(TrySendError::Full(packet)) => {
                debug!(
                    "PacketIngress: queue full, dropped packet #{}",
                    packet.sequence
                );
                self.health.record_ingress_drop();
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Decode stage: runs every queued packet through the pipeline controller
pub struct DecodeStage {
    controller: PipelineController,
    codec: CodecKind,
    input_rx: Option<mpsc::Receiver<EncodedPacket>>,
    keyframe_tx: Option<mpsc::Sender<u64>>,
}

impl DecodeStage {
    /// Create a decode stage for `codec` and the ingress that feeds it.
    pub fn new(controller: PipelineController, codec: CodecKind) -> (Self, PacketIngress) {
        let capacity = controller.config().ingress_capacity.max(1);
        let (tx, rx) = mpsc::channel::<EncodedPacket>(capacity);
        let ingress = PacketIngress {
            tx,
            health: Arc::clone(controller.health()),
        };

        let stage = Self {
            controller,
            codec,
            input_rx: Some(rx),
            keyframe_tx: None,
        };
        (stage, ingress)
    }

    /// Get the channel of keyframe requests, carrying the sequence number of
    /// the packet that triggered each one. Requests coalesce while unread.
    pub fn take_keyframe_requests(&mut self) -> mpsc::Receiver<u64> {
        let (tx, rx) = mpsc::channel::<u64>(1);
        self.keyframe_tx = Some(tx);
        rx
    }

    pub fn health(&self) -> &Arc<PipelineHealth> {
        self.controller.health()
    }

    pub fn controller(&self) -> &PipelineController {
        &self.controller
    }

    fn request_keyframe(&self, sequence: u64) {
        if let Some(tx) = &self.keyframe_tx {
            // A pending request already covers this one
            let _ = tx.try_send(sequence);
        }
    }
}

#[async_trait]
impl PipelineStage for DecodeStage {
    async fn run(&mut self) -> Result<()> {
        let mut input_rx = self
            .input_rx
            .take()
            .ok_or_else(|| anyhow::anyhow!("No input channel"))?;

        self.controller
            .start(self.codec)
            .with_context(|| format!("DecodeStage: cannot start {} pipeline", self.codec))?;

        let stop = self.controller.stop_handle();
        let mut health_tick = tokio::time::interval(self.controller.config().health_interval());
        let mut stop_poll = tokio::time::interval(STOP_POLL_INTERVAL);
        // Both intervals fire immediately once
        health_tick.tick().await;
        stop_poll.tick().await;

        info!("DecodeStage: started");

        loop {
            tokio::select! {
                packet = input_rx.recv() => {
                    let Some(packet) = packet else {
                        info!("DecodeStage: input channel closed");
                        if let Ok(outcome) = self.controller.flush() {
                            debug!("DecodeStage: {} frames flushed", outcome.frames_published);
                        }
                        break;
                    };
                    let sequence = packet.sequence;
                    match self.controller.submit_packet(packet) {
                        Ok(outcome) if outcome.needs_keyframe => self.request_keyframe(sequence),
                        Ok(_) => {}
                        Err(PipelineError::NotStreaming(state)) => {
                            info!("DecodeStage: pipeline {}, leaving", state);
                            break;
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                _ = health_tick.tick() => {
                    info!("DecodeStage: {}", self.controller.health().summary());
                }
                _ = stop_poll.tick() => {
                    if stop.cancelled() {
                        info!("DecodeStage: stop requested");
                        break;
                    }
                }
            }
        }

        self.controller.stop();
        info!(
            "DecodeStage: finished. {}",
            self.controller.health().summary()
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "DecodeStage"
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.controller.stop();
        Ok(())
    }
}
