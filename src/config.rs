use crate::convert::{ColorMatrix, ColorRange};
use crate::decoder::CodecKind;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Runtime knobs of the video pipeline.
///
/// Every field has a default, so a config file only needs the ones it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub codec: CodecKind,
    pub color_matrix: ColorMatrix,
    pub color_range: ColorRange,
    /// Frames worth of pooled storage kept by the decoder and the converter.
    pub frame_pool_size: usize,
    /// Drop delta packets until the first keyframe after start.
    pub wait_for_keyframe: bool,
    /// Consecutive failed packets before a keyframe is requested, 0 disables.
    pub fault_threshold: u32,
    /// Depth of the packet queue in front of the async decode stage.
    pub ingress_capacity: usize,
    pub health_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            codec: CodecKind::H264,
            color_matrix: ColorMatrix::Bt709,
            color_range: ColorRange::Limited,
            frame_pool_size: 4,
            wait_for_keyframe: true,
            fault_threshold: 10,
            ingress_capacity: 8,
            health_interval_secs: 30,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let config: PipelineConfig =
            serde_json::from_str(json).context("invalid pipeline configuration")?;
        Ok(config.sanitized())
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        Self::from_json_str(&json)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs.max(1))
    }

    fn sanitized(mut self) -> Self {
        self.frame_pool_size = self.frame_pool_size.max(1);
        self.ingress_capacity = self.ingress_capacity.max(1);
        self
    }
}

/// Returns a version as specified in Cargo.toml
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_use_defaults() {
        let config = PipelineConfig::from_json_str(r#"{ "codec": "hevc" }"#).unwrap();
        assert_eq!(config.codec, CodecKind::Hevc);
        assert_eq!(config.frame_pool_size, 4);
        assert_eq!(config.fault_threshold, 10);
        assert!(config.wait_for_keyframe);
    }

    #[test]
    fn test_full_config() {
        let json = r#"{
            "codec": "av1",
            "color_matrix": "bt601",
            "color_range": "full",
            "frame_pool_size": 0,
            "wait_for_keyframe": false,
            "fault_threshold": 3,
            "ingress_capacity": 16,
            "health_interval_secs": 5
        }"#;
        let config = PipelineConfig::from_json_str(json).unwrap();
        assert_eq!(config.color_matrix, ColorMatrix::Bt601);
        assert_eq!(config.color_range, ColorRange::Full);
        // Clamped to a usable pool
        assert_eq!(config.frame_pool_size, 1);
        assert_eq!(config.health_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_codec_is_an_error() {
        assert!(PipelineConfig::from_json_str(r#"{ "codec": "mpeg2" }"#).is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = PipelineConfig::from_json_file("/nonexistent/streamview.json").unwrap_err();
        assert!(err.to_string().contains("cannot read config file"));
    }
}
