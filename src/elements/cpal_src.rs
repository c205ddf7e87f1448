//! Capture from the default CPAL input device.
//!
//! The input stream writes device samples into a ring buffer; a streaming
//! thread cuts them into `blocksize` blocks of interleaved stereo F32 and
//! pushes them downstream.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SupportedStreamConfig};
use parking_lot::Mutex;
use rtrb::{Producer, RingBuffer};
use tracing::{debug, error, warn};

use super::audioconvert::{deinterleave_channels, interleave_channels, remap_channels};
use super::{expect_i64, expect_u64};
use crate::buffer::Buffer;
use crate::caps::{AudioCaps, Caps};
use crate::error::{Error, Result};
use crate::graph::{
    CoreError, Element, ElementImpl, FlowReturn, Message, PadSpec, PropertyValue, Query,
    StateChange, StateChangeReturn, StreamStatus,
};

const OUTPUT_CHANNELS: usize = 2;

#[derive(Clone)]
struct Settings {
    blocksize: u64,
    buffer_time_us: i64,
    latency_time_us: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            blocksize: 1024,
            buffer_time_us: 200_000,
            latency_time_us: 10_000,
        }
    }
}

struct Opened {
    device: cpal::Device,
    config: SupportedStreamConfig,
}

struct Running {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

#[derive(Default)]
pub struct CpalSrc {
    settings: Mutex<Settings>,
    opened: Mutex<Option<Opened>>,
    running: Mutex<Option<Running>>,
}

impl CpalSrc {
    fn open(&self, element: &Element) -> bool {
        let host = cpal::default_host();
        let Some(device) = host.default_input_device() else {
            element.post_error(CoreError::Failed, "No audio input device", None);
            return false;
        };
        let config = match device.default_input_config() {
            Ok(config) => config,
            Err(e) => {
                element.post_error(CoreError::Failed, "Could not query input device", Some(e.to_string()));
                return false;
            }
        };

        debug!(
            element = %element.name(),
            device = %device.name().unwrap_or_default(),
            channels = config.channels(),
            rate = config.sample_rate().0,
            "opened input device"
        );
        let mut caps = AudioCaps::interleaved(OUTPUT_CHANNELS as u16, 0.0);
        caps.rate = config.sample_rate().0;
        element.set_pad_caps("src", Caps::Raw(caps));
        *self.opened.lock() = Some(Opened { device, config });
        true
    }

    fn start(&self, element: &Element) -> bool {
        let (device, config) = match &*self.opened.lock() {
            Some(opened) => (opened.device.clone(), opened.config.clone()),
            None => return false,
        };
        let Some(caps) = element.pad_caps("src") else {
            return false;
        };
        let settings = self.settings.lock().clone();
        let device_channels = config.channels() as usize;
        let sample_format = config.sample_format();
        let stream_config = config.config();
        let rate = stream_config.sample_rate.0 as i64;

        let frames = (settings.blocksize as usize / (OUTPUT_CHANNELS * 4)).max(1);
        let block = frames * device_channels;
        let capacity = ((rate * settings.buffer_time_us.max(0) / 1_000_000) as usize * device_channels)
            .max(block * 4)
            .next_power_of_two();
        let (producer, mut consumer) = RingBuffer::<f32>::new(capacity);

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let weak = element.downgrade();
        let name = element.name().to_owned();
        let spawned = thread::Builder::new().name(format!("{name}:src")).spawn(move || {
            let stream = match build_stream(&device, sample_format, &stream_config, producer) {
                Ok(stream) => stream,
                Err(e) => {
                    error!(element = %name, "failed to build input stream: {e}");
                    return;
                }
            };
            if let Err(e) = stream.play() {
                error!(element = %name, "failed to start input stream: {e}");
                return;
            }
            if let Some(element) = weak.upgrade() {
                element.post_message(Message::stream_status(&name, StreamStatus::Enter, &name));
            }

            let mut interleaved = vec![0.0f32; block];
            while !thread_stop.load(Ordering::Acquire) {
                if consumer.slots() < block {
                    thread::sleep(Duration::from_millis(1));
                    continue;
                }
                for sample in interleaved.iter_mut() {
                    *sample = consumer.pop().unwrap_or(0.0);
                }
                let planes = remap_channels(deinterleave_channels(&interleaved, device_channels), OUTPUT_CHANNELS);
                let refs: Vec<&[f32]> = planes.iter().map(Vec::as_slice).collect();
                let buffer = Buffer::from_samples(interleave_channels(&refs)).with_caps(caps.clone());

                let Some(element) = weak.upgrade() else {
                    break;
                };
                match element.push("src", buffer) {
                    FlowReturn::Ok | FlowReturn::NotLinked | FlowReturn::Flushing => {}
                    ret => {
                        warn!(element = %name, ?ret, "streaming stopped");
                        break;
                    }
                }
            }

            if let Some(element) = weak.upgrade() {
                element.post_message(Message::stream_status(&name, StreamStatus::Leave, &name));
            }
        });

        match spawned {
            Ok(thread) => {
                *self.running.lock() = Some(Running { stop, thread });
                true
            }
            Err(e) => {
                warn!(element = %element.name(), "failed to spawn capture thread: {e}");
                false
            }
        }
    }

    fn stop(&self) {
        if let Some(running) = self.running.lock().take() {
            running.stop.store(true, Ordering::Release);
            let _ = running.thread.join();
        }
    }
}

fn build_stream(
    device: &cpal::Device,
    sample_format: SampleFormat,
    stream_config: &cpal::StreamConfig,
    mut producer: Producer<f32>,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError> {
    let err_fn = |err| error!("CPAL stream error: {:?}", err);
    match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            stream_config,
            move |data: &[f32], _| {
                for sample in data {
                    let _ = producer.push(*sample);
                }
            },
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            stream_config,
            move |data: &[i16], _| {
                for sample in data {
                    let _ = producer.push(*sample as f32 / i16::MAX as f32);
                }
            },
            err_fn,
            None,
        ),
        SampleFormat::U16 => device.build_input_stream(
            stream_config,
            move |data: &[u16], _| {
                for sample in data {
                    let _ = producer.push(*sample as f32 / u16::MAX as f32 * 2.0 - 1.0);
                }
            },
            err_fn,
            None,
        ),
        _ => Err(cpal::BuildStreamError::StreamConfigNotSupported),
    }
}

impl ElementImpl for CpalSrc {
    fn static_pads(&self) -> Vec<PadSpec> {
        vec![PadSpec::src("src")]
    }

    fn change_state(&self, element: &Element, transition: StateChange) -> StateChangeReturn {
        match transition {
            StateChange::NullToReady => {
                if !self.open(element) {
                    return StateChangeReturn::Failure;
                }
            }
            StateChange::ReadyToPaused => return StateChangeReturn::NoPreroll,
            StateChange::PausedToPlaying => {
                if !self.start(element) {
                    return StateChangeReturn::Failure;
                }
            }
            StateChange::PlayingToPaused => {
                self.stop();
                return StateChangeReturn::NoPreroll;
            }
            StateChange::ReadyToNull => *self.opened.lock() = None,
            StateChange::PausedToReady => {}
        }
        StateChangeReturn::Success
    }

    fn query(&self, _element: &Element, query: &mut Query) -> bool {
        match query {
            Query::Latency { live, min, max } => {
                let settings = self.settings.lock();
                *live = true;
                *min = Duration::from_micros(settings.latency_time_us.max(0) as u64);
                *max = Some(Duration::from_micros(settings.buffer_time_us.max(0) as u64));
                true
            }
            Query::Caps { .. } => false,
        }
    }

    fn set_property(&self, element: &Element, name: &str, value: PropertyValue) -> Result<()> {
        let mut settings = self.settings.lock();
        match name {
            "blocksize" => settings.blocksize = expect_u64(name, &value)?,
            "buffer-time" => settings.buffer_time_us = expect_i64(name, &value)?,
            "latency-time" => settings.latency_time_us = expect_i64(name, &value)?,
            _ => {
                return Err(Error::UnknownProperty {
                    element: element.name().to_owned(),
                    property: name.to_owned(),
                })
            }
        }
        Ok(())
    }

    fn property(&self, name: &str) -> Option<PropertyValue> {
        let settings = self.settings.lock();
        Some(match name {
            "blocksize" => PropertyValue::UInt(settings.blocksize),
            "buffer-time" => PropertyValue::Int(settings.buffer_time_us),
            "latency-time" => PropertyValue::Int(settings.latency_time_us),
            _ => return None,
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for CpalSrc {
    fn drop(&mut self) {
        self.stop();
    }
}
