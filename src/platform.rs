//! Entry points the host platform calls into.
//!
//! [`PlatformClient`] creates output devices and loads the audio resources
//! bundled with the engine (impulse responses, UI sounds).

use std::io::Cursor;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::device::{AudioDevice, OutputDevice};
use crate::elements::audioconvert::{deinterleave_channels, LinearResampler};
use crate::error::{Error, Result};
use crate::graph::Registry;
use crate::render::RenderHandle;

/// Make sure the element registry exists. Safe to call any number of times.
pub fn initialize_audio_backend() -> bool {
    let registry = Registry::global();
    debug!(factories = registry.factory_names().len(), "audio backend initialized");
    true
}

/// Decoded audio, one `Vec` per channel.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioBus {
    pub sample_rate: f64,
    pub channels: Vec<Vec<f32>>,
}

impl AudioBus {
    pub fn number_of_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }
}

pub struct PlatformClient {
    config: BridgeConfig,
    registry: Registry,
}

impl PlatformClient {
    pub fn new(config: BridgeConfig) -> Self {
        initialize_audio_backend();
        Self::with_registry(config, Registry::global().clone())
    }

    pub fn with_registry(config: BridgeConfig, registry: Registry) -> Self {
        Self { config, registry }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    fn resource_path(&self, name: &str) -> PathBuf {
        let path = self.config.resources_dir.join(name);
        if Path::new(name).extension().is_some() {
            path
        } else {
            path.with_extension("wav")
        }
    }

    /// Bytes of the named resource, `None` if it cannot be read.
    pub fn load_resource(&self, name: &str) -> Option<Vec<u8>> {
        let path = self.resource_path(name);
        match std::fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(resource = name, path = %path.display(), "cannot load resource: {e}");
                None
            }
        }
    }

    /// Decode a WAVE file into a bus at `sample_rate`, resampling if the
    /// file was recorded at another rate.
    pub fn decode_audio_resource(&self, data: &[u8], sample_rate: f64) -> Option<AudioBus> {
        match decode_wav(data, sample_rate) {
            Ok(bus) => Some(bus),
            Err(e) => {
                warn!("cannot decode audio resource: {e}");
                None
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_audio_device(
        &self,
        input_device_id: &str,
        buffer_size: usize,
        input_channels: u32,
        output_channels: u32,
        sample_rate: f64,
        handler: RenderHandle,
    ) -> Box<dyn AudioDevice> {
        info!(device = input_device_id, "creating audio device");
        Box::new(OutputDevice::new(
            input_device_id,
            buffer_size,
            input_channels,
            output_channels,
            sample_rate,
            handler,
            &self.config,
            &self.registry,
        ))
    }
}

fn decode_wav(data: &[u8], sample_rate: f64) -> Result<AudioBus> {
    let mut reader = hound::WavReader::new(Cursor::new(data))?;
    let spec = reader.spec();
    if spec.channels == 0 {
        return Err(Error::Decode("no channels".into()));
    }

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 * scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };
    let mut channels = deinterleave_channels(&samples, spec.channels as usize);

    let target = sample_rate.round();
    if target > 0.0 && target as u32 != spec.sample_rate {
        debug!(from = spec.sample_rate, to = target, "resampling resource");
        let mut resampler = LinearResampler::new(spec.sample_rate, target as u32, channels.len());
        channels = resampler.process(&channels);
    }

    Ok(AudioBus {
        sample_rate: if target > 0.0 { target } else { spec.sample_rate as f64 },
        channels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(rate: u32, frames: &[[i16; 2]]) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for frame in frames {
            writer.write_sample(frame[0]).unwrap();
            writer.write_sample(frame[1]).unwrap();
        }
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    #[test]
    fn decodes_planar_channels() {
        let client = PlatformClient::with_registry(BridgeConfig::default(), Registry::empty());
        let data = wav_bytes(44100, &[[16384, -16384], [0, 8192]]);
        let bus = client.decode_audio_resource(&data, 44100.0).unwrap();
        assert_eq!(bus.number_of_channels(), 2);
        assert_eq!(bus.channels[0], [0.5, 0.0]);
        assert_eq!(bus.channels[1], [-0.5, 0.25]);
    }

    #[test]
    fn resamples_to_the_requested_rate() {
        let client = PlatformClient::with_registry(BridgeConfig::default(), Registry::empty());
        let data = wav_bytes(22050, &[[0, 0]; 100]);
        let bus = client.decode_audio_resource(&data, 44100.0).unwrap();
        assert_eq!(bus.sample_rate, 44100.0);
        assert!((198..=200).contains(&bus.frames()));
    }

    #[test]
    fn garbage_does_not_decode() {
        let client = PlatformClient::with_registry(BridgeConfig::default(), Registry::empty());
        assert!(client.decode_audio_resource(b"definitely not audio", 44100.0).is_none());
    }

    #[test]
    fn resources_are_read_from_the_configured_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("click.wav"), wav_bytes(44100, &[[1, 1]])).unwrap();
        let config = BridgeConfig {
            resources_dir: dir.path().to_path_buf(),
            ..BridgeConfig::default()
        };
        let client = PlatformClient::with_registry(config, Registry::empty());

        let bytes = client.load_resource("click").unwrap();
        assert!(client.decode_audio_resource(&bytes, 44100.0).is_some());
        assert!(client.load_resource("missing").is_none());
    }

    #[test]
    fn backend_initializes_repeatedly() {
        assert!(initialize_audio_backend());
        assert!(initialize_audio_backend());
    }
}
