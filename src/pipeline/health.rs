//! Health counters for the video pipeline

use std::sync::atomic::{AtomicU64, Ordering};

/// Health metrics for a pipeline
///
/// Shared between the decode side, the presentation side and the ingress.
/// All fields use relaxed atomics; they are statistics, not synchronization.
#[derive(Debug, Default)]
pub struct PipelineHealth {
    packets_received: AtomicU64,
    packets_rejected: AtomicU64,
    packets_skipped: AtomicU64,
    ingress_drops: AtomicU64,
    decode_faults: AtomicU64,
    keyframe_requests: AtomicU64,
    frames_decoded: AtomicU64,
    frames_converted: AtomicU64,
    conversion_failures: AtomicU64,
    context_rebuilds: AtomicU64,
    frames_published: AtomicU64,
    frames_superseded: AtomicU64,
    frames_presented: AtomicU64,
}

macro_rules! counters {
    ($($record:ident => $field:ident),* $(,)?) => {
        $(
            pub fn $record(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }

            pub fn $field(&self) -> u64 {
                self.$field.load(Ordering::Relaxed)
            }
        )*
    };
}

impl PipelineHealth {
    pub fn new() -> Self {
        Self::default()
    }

    counters! {
        record_packet_received => packets_received,
        record_packet_rejected => packets_rejected,
        record_packet_skipped => packets_skipped,
        record_ingress_drop => ingress_drops,
        record_decode_fault => decode_faults,
        record_keyframe_request => keyframe_requests,
        record_frame_decoded => frames_decoded,
        record_frame_converted => frames_converted,
        record_conversion_failure => conversion_failures,
        record_context_rebuild => context_rebuilds,
        record_frame_published => frames_published,
        record_frame_superseded => frames_superseded,
        record_frame_presented => frames_presented,
    }

    /// Percentage of published frames that never reached the display.
    pub fn supersede_rate(&self) -> f64 {
        let published = self.frames_published();
        if published == 0 {
            return 0.0;
        }
        (self.frames_superseded() as f64 / published as f64) * 100.0
    }

    /// Get a summary of health metrics
    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            packets_received: self.packets_received(),
            packets_rejected: self.packets_rejected(),
            packets_skipped: self.packets_skipped(),
            ingress_drops: self.ingress_drops(),
            decode_faults: self.decode_faults(),
            frames_decoded: self.frames_decoded(),
            frames_converted: self.frames_converted(),
            conversion_failures: self.conversion_failures(),
            context_rebuilds: self.context_rebuilds(),
            frames_presented: self.frames_presented(),
            frames_superseded: self.frames_superseded(),
            supersede_rate: self.supersede_rate(),
        }
    }
}

/// Snapshot of health metrics
#[derive(Debug, Clone, PartialEq)]
pub struct HealthSummary {
    pub packets_received: u64,
    pub packets_rejected: u64,
    pub packets_skipped: u64,
    pub ingress_drops: u64,
    pub decode_faults: u64,
    pub frames_decoded: u64,
    pub frames_converted: u64,
    pub conversion_failures: u64,
    pub context_rebuilds: u64,
    pub frames_presented: u64,
    pub frames_superseded: u64,
    pub supersede_rate: f64,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Health: {} packets ({} rejected, {} skipped, {} dropped at ingress), \
             {} decode faults, {} decoded, {} converted ({} failed, {} rebuilds), \
             {} presented ({} superseded, {:.2}%)",
            self.packets_received,
            self.packets_rejected,
            self.packets_skipped,
            self.ingress_drops,
            self.decode_faults,
            self.frames_decoded,
            self.frames_converted,
            self.conversion_failures,
            self.context_rebuilds,
            self.frames_presented,
            self.frames_superseded,
            self.supersede_rate
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_metrics() {
        let health = PipelineHealth::new();

        health.record_packet_received();
        health.record_packet_received();
        health.record_packet_rejected();
        for _ in 0..4 {
            health.record_frame_published();
        }
        health.record_frame_superseded();
        health.record_frame_presented();

        let summary = health.summary();
        assert_eq!(summary.packets_received, 2);
        assert_eq!(summary.packets_rejected, 1);
        assert_eq!(summary.frames_presented, 1);
        assert_eq!(summary.supersede_rate, 25.0);
        assert!(summary.to_string().contains("2 packets (1 rejected"));
    }

    #[test]
    fn test_supersede_rate_without_frames() {
        assert_eq!(PipelineHealth::new().supersede_rate(), 0.0);
    }
}
