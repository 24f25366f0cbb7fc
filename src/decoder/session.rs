use super::{
    BufferPool, CodecKind, DecodeError, DecodeOutput, DecodedFrame, DecoderBackend,
    DecoderProvider, EncodedPacket, InitError,
};

/// Decoder instance for one codec kind.
///
/// Owns the native decoder and the pool that backs decoded plane storage.
/// `close` releases the decoder exactly once; later calls are no-ops.
pub struct CodecSession {
    kind: CodecKind,
    backend: Option<Box<dyn DecoderBackend>>,
    planes: BufferPool,
    submitted: u64,
    flushed: bool,
}

impl CodecSession {
    /// Resolve and open a decoder for `kind`.
    pub fn open(
        provider: &dyn DecoderProvider,
        kind: CodecKind,
        pool_size: usize,
    ) -> Result<Self, InitError> {
        let backend = provider.open(kind)?;
        log::info!("CodecSession: opened {} decoder", kind);

        Ok(Self {
            kind,
            backend: Some(backend),
            // Three planes per frame
            planes: BufferPool::new(pool_size * 3),
            submitted: 0,
            flushed: false,
        })
    }

    pub fn is_open(&self) -> bool {
        self.backend.is_some()
    }

    /// Number of packets accepted by the decoder.
    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    /// Feed one access unit. A rejected packet is dropped, never retried.
    pub fn submit_packet(&mut self, packet: EncodedPacket) -> Result<(), DecodeError> {
        let backend = self.backend.as_mut().ok_or(DecodeError::SessionClosed)?;
        if self.flushed {
            return Err(DecodeError::Rejected(format!(
                "decoder already flushed, packet #{}",
                packet.sequence
            )));
        }

        // An empty packet would be taken as a flush request by the decoder
        if packet.data.is_empty() {
            return Err(DecodeError::Rejected(format!(
                "empty access unit #{}",
                packet.sequence
            )));
        }

        backend.push(&packet)?;
        self.submitted += 1;
        Ok(())
    }

    /// Drain every frame available for the input submitted so far.
    ///
    /// The iterator ends at "needs input" or "end of stream", or right after
    /// yielding a `DecodeFault`. It can be restarted after the next submit.
    pub fn drain_frames(&mut self) -> Drain<'_> {
        Drain {
            session: self,
            finished: false,
        }
    }

    /// Tell the decoder no more input follows. The next drain yields the
    /// frames it still holds and ends at end of stream. Idempotent.
    pub fn flush(&mut self) -> Result<(), DecodeError> {
        let backend = self.backend.as_mut().ok_or(DecodeError::SessionClosed)?;
        if !self.flushed {
            backend.flush()?;
            self.flushed = true;
            log::debug!("CodecSession: {} decoder flushed", self.kind);
        }
        Ok(())
    }

    /// Release the decoder. Idempotent.
    pub fn close(&mut self) {
        if self.backend.take().is_some() {
            log::info!(
                "CodecSession: closed {} decoder ({} packets submitted)",
                self.kind,
                self.submitted
            );
        }
    }
}

impl Drop for CodecSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Lazy, finite sequence of frames decoded from the last submission.
pub struct Drain<'a> {
    session: &'a mut CodecSession,
    finished: bool,
}

impl Iterator for Drain<'_> {
    type Item = Result<DecodedFrame, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let Some(backend) = self.session.backend.as_mut() else {
            self.finished = true;
            return Some(Err(DecodeError::SessionClosed));
        };

        match backend.take(&self.session.planes) {
            Ok(DecodeOutput::Frame(frame)) => Some(Ok(frame)),
            Ok(DecodeOutput::NeedsInput) | Ok(DecodeOutput::EndOfStream) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

impl std::iter::FusedIterator for Drain<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::testing::{ScriptedProvider, Step};
    use crate::decoder::{FrameType, SourceFormat};

    fn packet(seq: u64) -> EncodedPacket {
        EncodedPacket::new(vec![0, 0, 0, 1, 0x65, seq as u8], FrameType::Key, seq)
    }

    #[test]
    fn test_open_unsupported_codec() {
        let provider = ScriptedProvider::new().without_codec(CodecKind::Av1);
        let err = CodecSession::open(&provider, CodecKind::Av1, 4).err().unwrap();
        assert!(matches!(err, InitError::UnsupportedCodec(CodecKind::Av1)));
    }

    #[test]
    fn test_open_alloc_failure() {
        let provider = ScriptedProvider::new().failing_alloc();
        let err = CodecSession::open(&provider, CodecKind::H264, 4).err().unwrap();
        assert!(matches!(err, InitError::ContextAllocFailed { .. }));
    }

    #[test]
    fn test_drain_multiple_frames_per_packet() {
        let provider = ScriptedProvider::new();
        provider.script(vec![Step::frames(SourceFormat::Yuv420p, 64, 32, 3)]);
        let mut session = CodecSession::open(&provider, CodecKind::H264, 4).unwrap();

        session.submit_packet(packet(1)).unwrap();
        let frames: Vec<_> = session.drain_frames().collect();
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.as_ref().unwrap().width == 64));

        // Drain again without input: nothing left
        assert_eq!(session.drain_frames().count(), 0);
    }

    #[test]
    fn test_drain_zero_frames_is_not_an_error() {
        let provider = ScriptedProvider::new();
        provider.script(vec![Step::frames(SourceFormat::Yuv420p, 64, 32, 0)]);
        let mut session = CodecSession::open(&provider, CodecKind::H264, 4).unwrap();

        session.submit_packet(packet(1)).unwrap();
        assert_eq!(session.drain_frames().count(), 0);
    }

    #[test]
    fn test_rejected_packet_keeps_session_usable() {
        let provider = ScriptedProvider::new();
        provider.script(vec![
            Step::Reject,
            Step::frames(SourceFormat::Yuv420p, 64, 32, 1),
        ]);
        let mut session = CodecSession::open(&provider, CodecKind::H264, 4).unwrap();

        assert!(matches!(
            session.submit_packet(packet(1)),
            Err(DecodeError::Rejected(_))
        ));
        session.submit_packet(packet(2)).unwrap();
        assert_eq!(session.drain_frames().count(), 1);
        assert_eq!(session.submitted(), 1);
    }

    #[test]
    fn test_fault_ends_drain_for_this_packet_only() {
        let provider = ScriptedProvider::new();
        provider.script(vec![
            Step::FaultAfter(1),
            Step::frames(SourceFormat::Nv12, 64, 32, 2),
        ]);
        let mut session = CodecSession::open(&provider, CodecKind::H264, 4).unwrap();

        session.submit_packet(packet(1)).unwrap();
        let results: Vec<_> = session.drain_frames().collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(DecodeError::DecodeFault(_))));

        session.submit_packet(packet(2)).unwrap();
        assert_eq!(session.drain_frames().filter(|r| r.is_ok()).count(), 2);
    }

    #[test]
    fn test_empty_packet_rejected() {
        let provider = ScriptedProvider::new();
        let mut session = CodecSession::open(&provider, CodecKind::H264, 4).unwrap();
        let empty = EncodedPacket::new(Vec::new(), FrameType::Delta, 9);
        assert!(matches!(
            session.submit_packet(empty),
            Err(DecodeError::Rejected(_))
        ));
    }

    #[test]
    fn test_close_is_idempotent() {
        let provider = ScriptedProvider::new();
        let mut session = CodecSession::open(&provider, CodecKind::H264, 4).unwrap();
        session.close();
        session.close();
        assert!(!session.is_open());
        assert!(matches!(
            session.submit_packet(packet(1)),
            Err(DecodeError::SessionClosed)
        ));
        assert_eq!(provider.closed(), 1);
    }

    #[test]
    fn test_flush_drains_held_frames_to_end_of_stream() {
        let provider = ScriptedProvider::new();
        provider.script(vec![Step::Held(2)]);
        let mut session = CodecSession::open(&provider, CodecKind::H264, 4).unwrap();

        session.submit_packet(packet(1)).unwrap();
        assert_eq!(session.drain_frames().count(), 0);

        session.flush().unwrap();
        session.flush().unwrap();
        let frames: Vec<_> = session.drain_frames().collect();
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.is_ok()));

        // End of stream is terminal and not an error
        assert_eq!(session.drain_frames().count(), 0);
        assert!(matches!(
            session.submit_packet(packet(2)),
            Err(DecodeError::Rejected(_))
        ));
        assert_eq!(session.submitted(), 1);
    }

    #[test]
    fn test_flush_after_close() {
        let provider = ScriptedProvider::new();
        let mut session = CodecSession::open(&provider, CodecKind::H264, 4).unwrap();
        session.close();
        assert!(matches!(session.flush(), Err(DecodeError::SessionClosed)));
    }

    #[test]
    fn test_plane_storage_is_reused() {
        let provider = ScriptedProvider::new();
        provider.script(vec![
            Step::frames(SourceFormat::Yuv420p, 64, 32, 1),
            Step::frames(SourceFormat::Yuv420p, 64, 32, 1),
            Step::frames(SourceFormat::Yuv420p, 64, 32, 1),
        ]);
        let mut session = CodecSession::open(&provider, CodecKind::H264, 4).unwrap();

        for seq in 0..3 {
            session.submit_packet(packet(seq)).unwrap();
            for frame in session.drain_frames() {
                drop(frame.unwrap());
            }
        }
        // Only the first frame's three planes needed fresh storage
        assert_eq!(session.planes.allocations(), 3);
    }
}
