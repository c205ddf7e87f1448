//! Playback through the default CPAL output device.
//!
//! The CPAL stream runs on its own thread; `chain` feeds samples into a ring
//! buffer that the stream consumes. The wrapped device is exposed as child 0
//! of the element's child proxy once the element has reached `Ready`.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, SupportedStreamConfig};
use parking_lot::Mutex;
use rtrb::{Consumer, Producer, RingBuffer};
use tracing::{debug, error, trace, warn};

use super::audioconvert::{deinterleave_channels, interleave_channels, remap_channels};
use super::{expect_i64, invalid};
use crate::buffer::Buffer;
use crate::caps::{AudioCaps, Caps};
use crate::error::Result;
use crate::graph::{
    ChildProxy, CoreError, Element, ElementImpl, FlowReturn, PadSpec, PropertyValue, StateChange,
    StateChangeReturn,
};

/// Ring buffer tuning of the wrapped device, in microseconds.
struct DeviceChild {
    opened: AtomicBool,
    buffer_time_us: Mutex<i64>,
    latency_time_us: Mutex<i64>,
    drift_tolerance_us: Mutex<i64>,
}

impl DeviceChild {
    fn slot(&self, name: &str) -> Option<&Mutex<i64>> {
        match name {
            "buffer-time" => Some(&self.buffer_time_us),
            "latency-time" => Some(&self.latency_time_us),
            "drift-tolerance" => Some(&self.drift_tolerance_us),
            _ => None,
        }
    }
}

impl ChildProxy for DeviceChild {
    fn children_count(&self) -> usize {
        self.opened.load(Ordering::Acquire) as usize
    }

    fn set_child_property(&self, index: usize, name: &str, value: PropertyValue) -> Result<()> {
        if index >= self.children_count() {
            return Err(invalid(name, "no such child"));
        }
        let slot = self.slot(name).ok_or_else(|| invalid(name, "unknown device property"))?;
        *slot.lock() = expect_i64(name, &value)?;
        Ok(())
    }

    fn child_property(&self, index: usize, name: &str) -> Option<PropertyValue> {
        if index >= self.children_count() {
            return None;
        }
        self.slot(name).map(|slot| PropertyValue::Int(*slot.lock()))
    }
}

struct Opened {
    device: cpal::Device,
    config: SupportedStreamConfig,
}

struct Running {
    producer: Producer<f32>,
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

pub struct CpalSink {
    child: DeviceChild,
    opened: Mutex<Option<Opened>>,
    running: Mutex<Option<Running>>,
    /// Set by the stream callback when it ran dry
    had_underrun: Arc<AtomicBool>,
}

impl Default for CpalSink {
    fn default() -> Self {
        Self {
            child: DeviceChild {
                opened: AtomicBool::new(false),
                buffer_time_us: Mutex::new(200_000),
                latency_time_us: Mutex::new(10_000),
                drift_tolerance_us: Mutex::new(40_000),
            },
            opened: Mutex::new(None),
            running: Mutex::new(None),
            had_underrun: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl CpalSink {
    fn open(&self, element: &Element) -> bool {
        let host = cpal::default_host();
        let Some(device) = host.default_output_device() else {
            element.post_error(CoreError::Failed, "No audio output device", None);
            return false;
        };
        let config = match device.default_output_config() {
            Ok(config) => config,
            Err(e) => {
                element.post_error(CoreError::Failed, "Could not query output device", Some(e.to_string()));
                return false;
            }
        };

        debug!(
            element = %element.name(),
            device = %device.name().unwrap_or_default(),
            channels = config.channels(),
            rate = config.sample_rate().0,
            "opened output device"
        );
        let mut caps = AudioCaps::interleaved(config.channels(), 0.0);
        caps.rate = config.sample_rate().0;
        element.set_pad_caps("sink", Caps::Raw(caps));

        *self.opened.lock() = Some(Opened { device, config });
        self.child.opened.store(true, Ordering::Release);
        true
    }

    fn start(&self, element: &Element) -> bool {
        let (device, config) = match &*self.opened.lock() {
            Some(opened) => (opened.device.clone(), opened.config.clone()),
            None => return false,
        };
        let channels = config.channels() as usize;
        let sample_format = config.sample_format();
        let stream_config = config.config();
        let sample_rate = stream_config.sample_rate.0;

        let buffer_time = *self.child.buffer_time_us.lock();
        let buffer_samples = (sample_rate as i64 * buffer_time.max(0) / 1_000_000) as usize * channels;
        let buffer_size = buffer_samples.next_power_of_two().max(8192);
        let (producer, consumer) = RingBuffer::<f32>::new(buffer_size);

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let had_underrun = self.had_underrun.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}:device", element.name()))
            .spawn(move || {
                let stream = match build_stream(&device, sample_format, &stream_config, consumer, had_underrun) {
                    Ok(stream) => stream,
                    Err(e) => {
                        error!("failed to build output stream: {e}");
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    error!("failed to start output stream: {e}");
                    return;
                }

                // stream lives as long as this thread
                while !thread_stop.load(Ordering::Acquire) {
                    thread::park_timeout(Duration::from_millis(100));
                }
            });

        match spawned {
            Ok(thread) => {
                *self.running.lock() = Some(Running {
                    producer,
                    stop,
                    thread,
                });
                true
            }
            Err(e) => {
                warn!(element = %element.name(), "failed to spawn device thread: {e}");
                false
            }
        }
    }

    fn stop(&self) {
        if let Some(running) = self.running.lock().take() {
            running.stop.store(true, Ordering::Release);
            running.thread.thread().unpark();
            let _ = running.thread.join();
        }
    }
}

/// Open an output stream in the device's native sample format.
fn build_stream(
    device: &cpal::Device,
    sample_format: SampleFormat,
    stream_config: &cpal::StreamConfig,
    consumer: Consumer<f32>,
    had_underrun: Arc<AtomicBool>,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError> {
    match sample_format {
        SampleFormat::F32 => output_stream::<f32>(device, stream_config, consumer, had_underrun),
        SampleFormat::I16 => output_stream::<i16>(device, stream_config, consumer, had_underrun),
        SampleFormat::U16 => output_stream::<u16>(device, stream_config, consumer, had_underrun),
        _ => Err(cpal::BuildStreamError::StreamConfigNotSupported),
    }
}

fn output_stream<T>(
    device: &cpal::Device,
    stream_config: &cpal::StreamConfig,
    mut consumer: Consumer<f32>,
    had_underrun: Arc<AtomicBool>,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    device.build_output_stream(
        stream_config,
        move |data: &mut [T], _| {
            let available = consumer.slots().min(data.len());
            for sample in &mut data[..available] {
                let s = consumer.pop().unwrap_or(0.0);
                *sample = T::from_sample(s.clamp(-1.0, 1.0));
            }
            if available < data.len() {
                data[available..].fill(T::EQUILIBRIUM);
                had_underrun.store(true, Ordering::Relaxed);
            }
        },
        |err| error!("output stream error: {err}"),
        None,
    )
}

impl ElementImpl for CpalSink {
    fn static_pads(&self) -> Vec<PadSpec> {
        vec![PadSpec::sink("sink")]
    }

    fn change_state(&self, element: &Element, transition: StateChange) -> StateChangeReturn {
        match transition {
            StateChange::NullToReady => {
                if !self.open(element) {
                    return StateChangeReturn::Failure;
                }
            }
            StateChange::ReadyToPaused => {
                if !self.start(element) {
                    return StateChangeReturn::Failure;
                }
            }
            StateChange::PausedToReady => self.stop(),
            StateChange::ReadyToNull => {
                self.child.opened.store(false, Ordering::Release);
                *self.opened.lock() = None;
            }
            _ => {}
        }
        StateChangeReturn::Success
    }

    fn chain(&self, element: &Element, _pad: &str, buffer: Buffer) -> FlowReturn {
        let Some(caps) = buffer.audio_caps() else {
            return FlowReturn::NotNegotiated;
        };
        let device_channels = match &*self.opened.lock() {
            Some(opened) => opened.config.channels() as usize,
            None => return FlowReturn::Flushing,
        };

        let samples = if caps.channels as usize == device_channels {
            buffer.samples().to_vec()
        } else {
            let planes = remap_channels(
                deinterleave_channels(buffer.samples(), caps.channels as usize),
                device_channels,
            );
            let refs: Vec<&[f32]> = planes.iter().map(Vec::as_slice).collect();
            interleave_channels(&refs)
        };

        if self.had_underrun.swap(false, Ordering::Relaxed) {
            debug!(element = %element.name(), "device ran dry");
        }

        // wait for room up to one latency period, then drop the block
        let patience = Duration::from_micros(self.child.latency_time_us.lock().max(0) as u64);
        let deadline = Instant::now() + patience;
        loop {
            let mut guard = self.running.lock();
            let Some(running) = guard.as_mut() else {
                return FlowReturn::Flushing;
            };
            if running.producer.slots() >= samples.len() {
                for sample in &samples {
                    let _ = running.producer.push(*sample);
                }
                return FlowReturn::Ok;
            }
            if Instant::now() >= deadline {
                trace!(element = %element.name(), "device buffer full, dropping block");
                return FlowReturn::Ok;
            }
            drop(guard);
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn child_proxy(&self) -> Option<&dyn ChildProxy> {
        Some(&self.child)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.stop();
    }
}
