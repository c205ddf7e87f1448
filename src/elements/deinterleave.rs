//! Splits a multichannel stream into one mono source pad per channel.
//!
//! Pads are created when the first buffer arrives, since only then is the
//! channel count known. Each new pad is announced through `pad-added`, and
//! `no-more-pads` follows once every channel has its pad.

use std::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::audioconvert::{deinterleave_channels, split_planar};
use super::expect_bool;
use crate::buffer::Buffer;
use crate::caps::{AudioCaps, Caps, ChannelPosition, Layout};
use crate::error::{Error, Result};
use crate::graph::{Element, ElementImpl, FlowReturn, PadSpec, PropertyValue};

#[derive(Default)]
pub struct Deinterleave {
    keep_positions: Mutex<bool>,
    /// Source pads in channel order, with the caps stamped on their buffers
    pads: Mutex<Vec<(String, Arc<Caps>)>>,
}

impl Deinterleave {
    fn pad_caps(&self, caps: &AudioCaps, channel: usize) -> Caps {
        let position = if *self.keep_positions.lock() {
            caps.positions.get(channel).copied().unwrap_or(ChannelPosition::None)
        } else {
            ChannelPosition::None
        };
        let mut mono = AudioCaps::mono(0.0, position);
        mono.rate = caps.rate;
        Caps::Raw(mono)
    }

    /// Create one pad per channel and announce them.
    fn create_pads(&self, element: &Element, caps: &AudioCaps) -> Result<Vec<(String, Arc<Caps>)>> {
        let mut pads = Vec::with_capacity(caps.channels as usize);
        for channel in 0..caps.channels as usize {
            let name = format!("src_{channel}");
            let pad_caps = self.pad_caps(caps, channel);
            pads.push((name.clone(), Arc::new(pad_caps.clone())));
            element.add_pad(PadSpec::src(name).with_caps(pad_caps))?;
        }
        debug!(element = %element.name(), channels = caps.channels, "created channel pads");
        element.no_more_pads();
        Ok(pads)
    }
}

impl ElementImpl for Deinterleave {
    fn static_pads(&self) -> Vec<PadSpec> {
        vec![PadSpec::sink("sink")]
    }

    fn chain(&self, element: &Element, _pad: &str, buffer: Buffer) -> FlowReturn {
        let Some(caps) = buffer.audio_caps().cloned() else {
            warn!(element = %element.name(), "buffer without raw audio caps");
            return FlowReturn::NotNegotiated;
        };
        if !caps.is_fixed() {
            warn!(element = %element.name(), %caps, "caps not fixed");
            return FlowReturn::NotNegotiated;
        }

        let existing = self.pads.lock().clone();
        let pads = if existing.is_empty() {
            // handlers run without our lock held
            match self.create_pads(element, &caps) {
                Ok(pads) => {
                    *self.pads.lock() = pads.clone();
                    pads
                }
                Err(e) => {
                    warn!(element = %element.name(), "failed to create pads: {e}");
                    return FlowReturn::Error;
                }
            }
        } else if existing.len() != caps.channels as usize {
            warn!(
                element = %element.name(),
                have = existing.len(),
                got = caps.channels,
                "channel count changed mid-stream"
            );
            return FlowReturn::NotNegotiated;
        } else {
            existing
        };

        let planes = match caps.layout {
            Layout::Interleaved => deinterleave_channels(buffer.samples(), pads.len()),
            Layout::NonInterleaved => split_planar(buffer.samples(), pads.len()),
        };
        drop(buffer);

        let mut result = FlowReturn::NotLinked;
        for ((pad, pad_caps), plane) in pads.iter().zip(planes) {
            match element.push(pad, Buffer::from_samples(plane).with_caps(pad_caps.clone())) {
                FlowReturn::Ok => {
                    if result == FlowReturn::NotLinked {
                        result = FlowReturn::Ok;
                    }
                }
                FlowReturn::NotLinked => {}
                other => result = other,
            }
        }
        result
    }

    fn set_property(&self, element: &Element, name: &str, value: PropertyValue) -> Result<()> {
        match name {
            "keep-positions" => {
                *self.keep_positions.lock() = expect_bool(name, &value)?;
                Ok(())
            }
            _ => Err(Error::UnknownProperty {
                element: element.name().to_owned(),
                property: name.to_owned(),
            }),
        }
    }

    fn property(&self, name: &str) -> Option<PropertyValue> {
        match name {
            "keep-positions" => Some(PropertyValue::Bool(*self.keep_positions.lock())),
            _ => None,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::fakesink::FakeSink;
    use crate::graph::{Pipeline, State};

    #[test]
    fn pads_appear_on_first_buffer() {
        let pipeline = Pipeline::new("deinterleave-test");
        let split = Element::new("deinterleave", "split", Deinterleave::default());
        pipeline.add(&split).unwrap();
        split.set_property("keep-positions", true).unwrap();

        let added = Arc::new(Mutex::new(Vec::new()));
        let sinks = Arc::new(Mutex::new(Vec::new()));
        {
            let added = added.clone();
            let sinks = sinks.clone();
            let weak = pipeline.downgrade();
            split.connect_pad_added(move |element, pad| {
                added.lock().push(pad.to_owned());
                let pipeline = weak.upgrade().unwrap();
                let sink = Element::new("fakesink", &format!("sink-{pad}"), FakeSink::default());
                pipeline.add(&sink).unwrap();
                element.link_pads(Some(pad), &sink, None, crate::graph::LinkCheck::Caps).unwrap();
                sink.sync_state_with_parent();
                sinks.lock().push(sink);
            });
        }
        let done = Arc::new(Mutex::new(false));
        let done2 = done.clone();
        split.connect_no_more_pads(move |_| *done2.lock() = true);

        pipeline.set_state(State::Playing);
        let caps = Arc::new(Caps::Raw(AudioCaps::interleaved(2, 44100.0)));
        let flow = split.chain("sink", Buffer::from_samples(vec![1.0, -1.0, 2.0, -2.0]).with_caps(caps));

        assert_eq!(flow, FlowReturn::Ok);
        assert_eq!(*added.lock(), ["src_0", "src_1"]);
        assert!(*done.lock());

        let sinks = sinks.lock();
        let right = sinks[1].imp_as::<FakeSink>().unwrap().received();
        assert_eq!(right[0].samples(), [-1.0, -2.0]);
        assert_eq!(
            right[0].audio_caps().unwrap().first_position(),
            ChannelPosition::FrontRight
        );
    }

    #[test]
    fn caps_are_required() {
        let pipeline = Pipeline::new("deinterleave-test");
        let split = Element::new("deinterleave", "split", Deinterleave::default());
        pipeline.add(&split).unwrap();
        pipeline.set_state(State::Paused);
        assert_eq!(split.chain("sink", Buffer::silence(4)), FlowReturn::NotNegotiated);
        assert!(split.pad_names(crate::graph::PadDirection::Src).is_empty());
    }
}
