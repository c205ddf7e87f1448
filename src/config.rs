//! Tunables for the bridge.
//!
//! The defaults reproduce the values the bridge has always used; a TOML file
//! only needs to name the fields it changes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Channels delivered by the capture sub-graph.
pub const CAPTURE_CHANNELS: usize = 2;

/// Live-input capture sub-graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Factory of the capture source element
    pub factory: String,
    /// Bytes per captured buffer. Unset, one render quantum of stereo F32 is
    /// captured per buffer.
    pub blocksize: Option<u64>,
    pub buffer_time_us: i64,
    pub latency_time_us: i64,
    /// Buffers held per channel sink before the oldest is dropped
    pub channel_sink_max_buffers: u64,
    /// Longest time a pull waits on one channel sink
    pub pull_timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            factory: "autoaudiosrc".into(),
            blocksize: None,
            buffer_time_us: 1451,
            latency_time_us: 1451,
            channel_sink_max_buffers: 4,
            pull_timeout_ms: 100,
        }
    }
}

impl CaptureConfig {
    /// Bytes per captured buffer for a render quantum of `frames` frames.
    pub fn blocksize_for(&self, frames: usize) -> u64 {
        self.blocksize
            .unwrap_or((frames.max(1) * CAPTURE_CHANNELS * std::mem::size_of::<f32>()) as u64)
    }

    pub fn pull_timeout(&self) -> Duration {
        Duration::from_millis(self.pull_timeout_ms)
    }
}

/// Ring buffer tuning applied to the output sink's device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkTuning {
    /// Factory of the output sink element
    pub factory: String,
    pub buffer_time_us: i64,
    pub latency_time_us: i64,
    pub drift_tolerance_us: i64,
}

impl Default for SinkTuning {
    fn default() -> Self {
        Self {
            factory: "autoaudiosink".into(),
            buffer_time_us: 100_000,
            latency_time_us: 100_000,
            drift_tolerance_us: 1_000_000,
        }
    }
}

/// Web Audio source element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Frames per render quantum
    pub frames: usize,
    pub sample_rate: f64,
    /// Capacity of each per-channel queue
    pub queue_max_buffers: u64,
    /// Back-off after an iteration with nothing to do. Defaults to one
    /// render quantum.
    pub idle_backoff_us: Option<u64>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            frames: 128,
            sample_rate: 44100.0,
            queue_max_buffers: 1,
            idle_backoff_us: None,
        }
    }
}

impl SourceConfig {
    pub fn idle_backoff(&self, frames: usize, sample_rate: f64) -> Duration {
        match self.idle_backoff_us {
            Some(us) => Duration::from_micros(us),
            None => quantum_duration(frames, sample_rate),
        }
    }
}

/// Wall-clock length of `frames` frames at `sample_rate`.
pub fn quantum_duration(frames: usize, sample_rate: f64) -> Duration {
    if sample_rate.is_finite() && sample_rate > 0.0 {
        Duration::from_secs_f64(frames as f64 / sample_rate)
    } else {
        Duration::from_millis(3)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub capture: CaptureConfig,
    pub sink: SinkTuning,
    pub source: SourceConfig,
    /// Directory searched by `load_resource`
    pub resources_dir: PathBuf,
}

impl BridgeConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = BridgeConfig::default();
        assert_eq!(config.capture.blocksize, None);
        assert_eq!(config.capture.blocksize_for(128), 1024);
        assert_eq!(config.capture.buffer_time_us, 1451);
        assert_eq!(config.sink.buffer_time_us, 100_000);
        assert_eq!(config.sink.drift_tolerance_us, 1_000_000);
        assert_eq!(config.source.frames, 128);
        assert_eq!(config.source.queue_max_buffers, 1);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = BridgeConfig::from_toml_str(
            r#"
            [capture]
            factory = "audiotestsrc"

            [sink]
            latency_time_us = 20000
            "#,
        )
        .unwrap();
        assert_eq!(config.capture.factory, "audiotestsrc");
        assert_eq!(config.capture.blocksize_for(1024), 8192);
        assert_eq!(config.sink.latency_time_us, 20_000);
        assert_eq!(config.sink.buffer_time_us, 100_000);
    }

    #[test]
    fn explicit_blocksize_wins() {
        let config = BridgeConfig::from_toml_str("[capture]\nblocksize = 2048").unwrap();
        assert_eq!(config.capture.blocksize_for(128), 2048);
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let err = BridgeConfig::from_toml_str("capture = 3").unwrap_err();
        assert!(matches!(err, crate::error::Error::Config(_)));
    }

    #[test]
    fn idle_backoff_defaults_to_one_quantum() {
        let source = SourceConfig::default();
        let backoff = source.idle_backoff(128, 44100.0);
        assert!(backoff > Duration::from_micros(2800) && backoff < Duration::from_micros(3000));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.toml");
        std::fs::write(&path, "[source]\nframes = 256\n").unwrap();
        assert_eq!(BridgeConfig::load(&path).unwrap().source.frames, 256);
    }
}
