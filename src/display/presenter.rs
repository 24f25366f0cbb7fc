//! Hand-off of converted frames to the display thread
//!
//! The decode side publishes into the shared [`FrameSlot`] and pokes a wake
//! channel of capacity one; the display side takes whatever is newest when it
//! gets around to it. A full wake channel means a wake-up is already pending,
//! so the poke is simply dropped.

use super::{DisplaySink, FrameSlot};
use crate::convert::ConvertedFrame;
use crate::pipeline::PipelineHealth;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Create the decode-side dispatcher and display-side receiver for one pipeline.
pub fn presentation_channel(
    health: Arc<PipelineHealth>,
) -> (PresentationDispatcher, PresentationReceiver) {
    let slot = Arc::new(FrameSlot::new());
    let (wake_tx, wake_rx) = mpsc::channel::<()>(1);

    (
        PresentationDispatcher {
            slot: Arc::clone(&slot),
            wake: Some(wake_tx),
            health: Arc::clone(&health),
        },
        PresentationReceiver {
            slot,
            wake: wake_rx,
            health,
        },
    )
}

/// Decode-side half: schedules frames for presentation.
pub struct PresentationDispatcher {
    slot: Arc<FrameSlot>,
    wake: Option<mpsc::Sender<()>>,
    health: Arc<PipelineHealth>,
}

impl PresentationDispatcher {
    /// Publish `frame` as the latest and request a present on the display thread.
    ///
    /// Returns false if the dispatcher is closed; the frame is dropped then.
    pub fn schedule_present(&self, frame: ConvertedFrame) -> bool {
        let Some(wake) = &self.wake else {
            return false;
        };

        if self.slot.publish(frame).is_some() {
            self.health.record_frame_superseded();
        }
        self.health.record_frame_published();

        match wake.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => true,
            Err(TrySendError::Closed(())) => {
                log::debug!("PresentationDispatcher: display side is gone");
                false
            }
        }
    }

    /// Drop any frame still waiting in the slot.
    pub fn clear(&self) -> bool {
        self.slot.clear()
    }

    /// Stop scheduling. The display side sees the channel close once it has
    /// drained the last wake-up. Idempotent.
    pub fn close(&mut self) {
        if self.wake.take().is_some() {
            log::debug!("PresentationDispatcher: closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.wake.is_none()
    }
}

/// Display-side half, before a sink is attached.
pub struct PresentationReceiver {
    slot: Arc<FrameSlot>,
    wake: mpsc::Receiver<()>,
    health: Arc<PipelineHealth>,
}

impl PresentationReceiver {
    pub fn attach<S: DisplaySink>(self, sink: S) -> Presenter<S> {
        Presenter {
            slot: self.slot,
            wake: self.wake,
            health: self.health,
            sink,
            size: None,
        }
    }
}

/// Writes the newest staged frame into a display sink.
///
/// Lives on the display thread for its whole life.
pub struct Presenter<S> {
    slot: Arc<FrameSlot>,
    wake: mpsc::Receiver<()>,
    health: Arc<PipelineHealth>,
    sink: S,
    size: Option<(u32, u32)>,
}

impl<S: DisplaySink> Presenter<S> {
    /// Present the latest frame, if any. Returns true if a frame was written.
    pub fn service(&mut self) -> bool {
        let Some(frame) = self.slot.take_latest() else {
            return false;
        };

        let size = (frame.width, frame.height);
        if self.size != Some(size) {
            log::info!("Presenter: surface size {}x{}", size.0, size.1);
            self.sink.ensure_size(size.0, size.1);
            self.size = Some(size);
        }

        self.sink.write_pixels(frame.pixels(), frame.width, frame.height);
        self.health.record_frame_presented();
        true
    }

    /// Block the current thread presenting frames until the dispatcher closes.
    ///
    /// Must not be called from inside an async runtime.
    pub fn run_blocking(mut self) -> S {
        while self.wake.blocking_recv().is_some() {
            self.service();
        }
        log::debug!("Presenter: dispatcher closed");
        self.sink
    }

    /// Async variant of [`Presenter::run_blocking`].
    pub async fn run(mut self) -> S {
        while self.wake.recv().await.is_some() {
            self.service();
        }
        log::debug!("Presenter: dispatcher closed");
        self.sink
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Size of the last presented frame.
    pub fn size(&self) -> Option<(u32, u32)> {
        self.size
    }
}
