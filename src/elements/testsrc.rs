//! Live sine source.
//!
//! Produces interleaved F32 buffers paced against the wall clock while
//! `Playing`. Being live, it cannot preroll.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{expect_bool, expect_f64, expect_i64, expect_u64};
use crate::buffer::Buffer;
use crate::caps::{AudioCaps, Caps};
use crate::error::{Error, Result};
use crate::graph::{
    Element, ElementImpl, FlowReturn, Message, MessageKind, PadSpec, PropertyValue, Query,
    StateChange, StateChangeReturn, StreamStatus,
};

#[derive(Clone, Debug)]
struct Settings {
    is_live: bool,
    /// Bytes per buffer
    blocksize: u64,
    freq: f64,
    volume: f64,
    rate: u64,
    channels: u64,
    buffer_time_us: i64,
    latency_time_us: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            is_live: true,
            blocksize: 1024,
            freq: 440.0,
            volume: 0.25,
            rate: 44100,
            channels: 2,
            buffer_time_us: 200_000,
            latency_time_us: 10_000,
        }
    }
}

impl Settings {
    fn frames_per_buffer(&self) -> usize {
        let bytes_per_frame = self.channels.max(1) * 4;
        (self.blocksize / bytes_per_frame).max(1) as usize
    }
}

/// Phase-accumulating sine oscillator.
struct Oscillator {
    phase: f64,
    phase_inc: f64,
    amplitude: f32,
}

impl Oscillator {
    fn new(freq: f64, rate: u64, amplitude: f64) -> Self {
        Self {
            phase: 0.0,
            phase_inc: freq / rate.max(1) as f64,
            amplitude: amplitude.clamp(0.0, 1.0) as f32,
        }
    }

    /// Fill `frames` interleaved frames, every channel carrying the tone.
    fn fill(&mut self, frames: usize, channels: usize) -> Vec<f32> {
        let mut out = Vec::with_capacity(frames * channels);
        for _ in 0..frames {
            let sample = (self.phase * std::f64::consts::TAU).sin() as f32 * self.amplitude;
            out.extend(std::iter::repeat(sample).take(channels));
            self.phase += self.phase_inc;
            self.phase -= self.phase.floor();
        }
        out
    }
}

struct Running {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

#[derive(Default)]
pub struct AudioTestSrc {
    settings: Mutex<Settings>,
    running: Mutex<Option<Running>>,
}

impl AudioTestSrc {
    fn start(&self, element: &Element) -> bool {
        let settings = self.settings.lock().clone();
        let channels = settings.channels.max(1) as usize;
        let mut caps = AudioCaps::interleaved(channels as u16, 0.0);
        caps.rate = settings.rate as u32;
        let caps = Arc::new(Caps::Raw(caps));
        element.set_pad_caps("src", (*caps).clone());

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let weak = element.downgrade();
        let name = element.name().to_owned();
        let spawned = thread::Builder::new().name(format!("{name}:src")).spawn(move || {
            let frames = settings.frames_per_buffer();
            let period = Duration::from_secs_f64(frames as f64 / settings.rate.max(1) as f64);
            let mut oscillator = Oscillator::new(settings.freq, settings.rate, settings.volume);
            let mut next = Instant::now();

            if let Some(element) = weak.upgrade() {
                element.post_message(Message::stream_status(&name, StreamStatus::Enter, &name));
            }
            while !thread_stop.load(Ordering::Acquire) {
                let Some(element) = weak.upgrade() else {
                    break;
                };
                let buffer = Buffer::from_samples(oscillator.fill(frames, channels)).with_caps(caps.clone());
                match element.push("src", buffer) {
                    FlowReturn::Ok | FlowReturn::NotLinked | FlowReturn::Flushing => {}
                    ret => {
                        warn!(element = %name, ?ret, "streaming stopped");
                        break;
                    }
                }
                drop(element);

                if settings.is_live {
                    next += period;
                    let now = Instant::now();
                    if next > now {
                        thread::sleep(next - now);
                    } else {
                        next = now;
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
                warn!(element = %element.name(), "failed to spawn source thread: {e}");
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

impl ElementImpl for AudioTestSrc {
    fn static_pads(&self) -> Vec<PadSpec> {
        vec![PadSpec::src("src")]
    }

    fn change_state(&self, element: &Element, transition: StateChange) -> StateChangeReturn {
        let is_live = self.settings.lock().is_live;
        match transition {
            StateChange::ReadyToPaused => {
                element.post_message(Message::new(element.name(), MessageKind::Latency));
                if is_live {
                    return StateChangeReturn::NoPreroll;
                }
            }
            StateChange::PausedToPlaying => {
                if !self.start(element) {
                    return StateChangeReturn::Failure;
                }
                debug!(element = %element.name(), "producing");
            }
            StateChange::PlayingToPaused => {
                self.stop();
                if is_live {
                    return StateChangeReturn::NoPreroll;
                }
            }
            _ => {}
        }
        StateChangeReturn::Success
    }

    fn query(&self, _element: &Element, query: &mut Query) -> bool {
        match query {
            Query::Latency { live, min, max } => {
                let settings = self.settings.lock();
                *live = settings.is_live;
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
            "is-live" => settings.is_live = expect_bool(name, &value)?,
            "blocksize" => settings.blocksize = expect_u64(name, &value)?,
            "freq" => settings.freq = expect_f64(name, &value)?,
            "volume" => settings.volume = expect_f64(name, &value)?,
            "rate" => settings.rate = expect_u64(name, &value)?,
            "channels" => settings.channels = expect_u64(name, &value)?,
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
            "is-live" => PropertyValue::Bool(settings.is_live),
            "blocksize" => PropertyValue::UInt(settings.blocksize),
            "freq" => PropertyValue::Float(settings.freq),
            "volume" => PropertyValue::Float(settings.volume),
            "rate" => PropertyValue::UInt(settings.rate),
            "channels" => PropertyValue::UInt(settings.channels),
            "buffer-time" => PropertyValue::Int(settings.buffer_time_us),
            "latency-time" => PropertyValue::Int(settings.latency_time_us),
            _ => return None,
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for AudioTestSrc {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::fakesink::FakeSink;
    use crate::graph::{Pipeline, State};

    #[test]
    fn oscillator_stays_in_range() {
        let mut osc = Oscillator::new(1000.0, 48000, 0.5);
        let block = osc.fill(480, 2);
        assert_eq!(block.len(), 960);
        assert!(block.iter().all(|s| s.abs() <= 0.5));
        assert_eq!(block[2], block[3]);
    }

    #[test]
    fn live_source_does_not_preroll() {
        let pipeline = Pipeline::new("testsrc-test");
        let src = Element::new("audiotestsrc", "src", AudioTestSrc::default());
        let sink = Element::new("fakesink", "sink", FakeSink::default());
        pipeline.add_many(&[&src, &sink]).unwrap();
        src.link(&sink).unwrap();
        src.set_property("blocksize", 2048u64).unwrap();

        assert_eq!(pipeline.set_state(State::Paused), StateChangeReturn::NoPreroll);
        assert_eq!(pipeline.set_state(State::Playing), StateChangeReturn::Success);

        let fake = sink.imp_as::<FakeSink>().unwrap();
        assert!(fake.wait_for(2, Duration::from_secs(2)));
        assert_eq!(fake.received()[0].frames(), 256);
        pipeline.set_state(State::Null);
    }

    #[test]
    fn reports_latency() {
        let src = Element::new("audiotestsrc", "src", AudioTestSrc::default());
        src.set_property("latency-time", 1451i64).unwrap();
        let mut query = Query::latency();
        assert!(src.query(&mut query));
        assert!(matches!(query, Query::Latency { live: true, min, .. } if min == Duration::from_micros(1451)));
    }
}
