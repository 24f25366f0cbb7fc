//! Annex B elementary stream helpers
//!
//! Splits a start-code delimited H.264 / HEVC byte stream into access units
//! and tags keyframes. Used by the replay binary to stand in for the
//! transport; the pipeline itself never reframes packets.

use super::{CodecKind, EncodedPacket, FrameType};
use bytes::{BufMut, BytesMut};

const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// Iterate NAL unit payloads (start codes and trailing zero bytes removed).
pub fn nal_units(stream: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut pos = find_start_code(stream, 0);
    std::iter::from_fn(move || {
        let start = pos? + 3;
        let next = find_start_code(stream, start);
        let end = next.unwrap_or(stream.len());
        pos = next;

        let mut nal = &stream[start..end];
        while let [rest @ .., 0] = nal {
            nal = rest;
        }
        Some(nal)
    })
    .filter(|nal| !nal.is_empty())
}

/// Position of the next 3-byte start code (`00 00 01`) at or after `from`.
fn find_start_code(data: &[u8], from: usize) -> Option<usize> {
    if data.len() < 3 {
        return None;
    }
    (from..data.len() - 2)
        .find(|&i| data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NalClass {
    /// Coded slice; `first` when it starts a new picture.
    Slice { first: bool, keyframe: bool },
    /// Non-VCL unit that may only open an access unit (AUD, parameter sets, prefix SEI).
    Prefix,
    Other,
}

fn classify(codec: CodecKind, nal: &[u8]) -> NalClass {
    match codec {
        CodecKind::H264 => {
            let nal_type = nal[0] & 0x1F;
            match nal_type {
                // first_mb_in_slice is ue(v); a leading 1 bit means zero
                1..=5 => NalClass::Slice {
                    first: nal.get(1).is_some_and(|b| b & 0x80 != 0),
                    keyframe: nal_type == 5,
                },
                6..=9 | 14..=18 => NalClass::Prefix,
                _ => NalClass::Other,
            }
        }
        CodecKind::Hevc => {
            let nal_type = (nal[0] >> 1) & 0x3F;
            match nal_type {
                0..=31 => NalClass::Slice {
                    first: nal.get(2).is_some_and(|b| b & 0x80 != 0),
                    keyframe: (16..=23).contains(&nal_type),
                },
                32..=35 | 39 | 41..=44 | 48..=55 => NalClass::Prefix,
                _ => NalClass::Other,
            }
        }
        // AV1 is carried as OBUs, not Annex B
        CodecKind::Av1 => NalClass::Other,
    }
}

/// One complete access unit in Annex B framing.
#[derive(Debug, Clone)]
pub struct AccessUnit {
    pub data: Vec<u8>,
    pub keyframe: bool,
}

impl AccessUnit {
    pub fn into_packet(self, sequence: u64) -> EncodedPacket {
        let frame_type = if self.keyframe {
            FrameType::Key
        } else {
            FrameType::Delta
        };
        EncodedPacket::new(self.data, frame_type, sequence)
    }
}

/// Groups NAL units into access units.
pub struct AccessUnitSplitter {
    codec: CodecKind,
    buffer: BytesMut,
    has_slice: bool,
    keyframe: bool,
}

impl AccessUnitSplitter {
    pub fn new(codec: CodecKind) -> Self {
        Self {
            codec,
            buffer: BytesMut::new(),
            has_slice: false,
            keyframe: false,
        }
    }

    /// Feed one NAL unit. Returns the previous access unit when this NAL starts a new one.
    pub fn push(&mut self, nal: &[u8]) -> Option<AccessUnit> {
        if nal.is_empty() {
            return None;
        }

        let class = classify(self.codec, nal);
        let starts_new = self.has_slice
            && match class {
                NalClass::Prefix => true,
                NalClass::Slice { first, .. } => first,
                NalClass::Other => false,
            };

        let completed = if starts_new { self.take() } else { None };

        self.buffer.put_slice(&START_CODE);
        self.buffer.put_slice(nal);
        if let NalClass::Slice { keyframe, .. } = class {
            self.has_slice = true;
            self.keyframe |= keyframe;
        }

        completed
    }

    /// Flush the access unit being assembled, if it holds a slice.
    pub fn finish(&mut self) -> Option<AccessUnit> {
        if self.has_slice { self.take() } else { None }
    }

    fn take(&mut self) -> Option<AccessUnit> {
        let data = self.buffer.split().to_vec();
        let keyframe = self.keyframe;
        self.has_slice = false;
        self.keyframe = false;
        Some(AccessUnit { data, keyframe })
    }
}

/// Split a whole elementary stream into access units.
pub fn split_access_units(codec: CodecKind, stream: &[u8]) -> Vec<AccessUnit> {
    let mut splitter = AccessUnitSplitter::new(codec);
    let mut units: Vec<AccessUnit> = nal_units(stream)
        .filter_map(|nal| splitter.push(nal))
        .collect();
    units.extend(splitter.finish());
    units
}

/// Return true if the access unit contains a keyframe slice (H.264 IDR, HEVC IRAP).
pub fn contains_keyframe(codec: CodecKind, au: &[u8]) -> bool {
    nal_units(au).any(|nal| {
        matches!(classify(codec, nal), NalClass::Slice { keyframe: true, .. })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // H.264 NAL headers
    const SPS: &[u8] = &[0x67, 0x42, 0x00, 0x1f];
    const PPS: &[u8] = &[0x68, 0xce, 0x38, 0x80];
    const IDR_FIRST: &[u8] = &[0x65, 0x88, 0x84, 0x00];
    const IDR_NEXT: &[u8] = &[0x65, 0x40, 0x11, 0x22];
    const P_FIRST: &[u8] = &[0x41, 0x9a, 0x02, 0x03];

    fn annexb(nals: &[&[u8]], long: bool) -> Vec<u8> {
        let mut out = Vec::new();
        for nal in nals {
            if long {
                out.extend_from_slice(&START_CODE);
            } else {
                out.extend_from_slice(&[0, 0, 1]);
            }
            out.extend_from_slice(nal);
        }
        out
    }

    #[test]
    fn test_nal_units_mixed_start_codes() {
        let mut stream = annexb(&[SPS], true);
        stream.extend(annexb(&[PPS], false));
        let nals: Vec<_> = nal_units(&stream).collect();
        assert_eq!(nals, vec![SPS, PPS]);
    }

    #[test]
    fn test_nal_units_without_start_code() {
        assert_eq!(nal_units(&[0x65, 0x88]).count(), 0);
    }

    #[test]
    fn test_split_h264_access_units() {
        let stream = annexb(&[SPS, PPS, IDR_FIRST, IDR_NEXT, P_FIRST, P_FIRST], true);
        let units = split_access_units(CodecKind::H264, &stream);

        assert_eq!(units.len(), 3);
        assert!(units[0].keyframe);
        assert!(!units[1].keyframe);
        assert!(!units[2].keyframe);
        // SPS + PPS + two IDR slices stay together
        assert_eq!(nal_units(&units[0].data).count(), 4);
    }

    #[test]
    fn test_parameter_sets_open_next_unit() {
        let stream = annexb(&[SPS, PPS, IDR_FIRST, SPS, PPS, IDR_FIRST], true);
        let units = split_access_units(CodecKind::H264, &stream);
        assert_eq!(units.len(), 2);
        assert!(units.iter().all(|u| u.keyframe));
    }

    #[test]
    fn test_contains_keyframe() {
        assert!(contains_keyframe(CodecKind::H264, &annexb(&[SPS, IDR_FIRST], true)));
        assert!(!contains_keyframe(CodecKind::H264, &annexb(&[P_FIRST], true)));
    }

    #[test]
    fn test_hevc_irap_detection() {
        // IDR_W_RADL (19), first_slice_segment_in_pic_flag set
        let idr = [19 << 1, 0x01, 0x80, 0x00];
        // TRAIL_R (1)
        let trail = [1 << 1, 0x01, 0x80, 0x00];
        let stream = annexb(&[&idr, &trail], true);
        let units = split_access_units(CodecKind::Hevc, &stream);
        assert_eq!(units.len(), 2);
        assert!(units[0].keyframe);
        assert!(!units[1].keyframe);
    }

    #[test]
    fn test_into_packet_tags_frame_type() {
        let au = AccessUnit {
            data: annexb(&[IDR_FIRST], true),
            keyframe: true,
        };
        let packet = au.into_packet(3);
        assert!(packet.is_keyframe());
        assert_eq!(packet.sequence, 3);
    }
}
