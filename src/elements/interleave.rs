//! Merges mono request pads into one interleaved stream.
//!
//! Channel order is the order in which the pads were requested. A frame block
//! is pushed once every pad has delivered a buffer; the push happens with the
//! collection lock held so blocks leave in the order they were completed.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::{trace, warn};

use super::audioconvert::interleave_channels;
use crate::buffer::Buffer;
use crate::caps::{AudioCaps, Caps, ChannelPosition};
use crate::graph::{Element, ElementImpl, FlowReturn, PadDirection, PadSpec};

/// Buffers one pad may run ahead of the others before the oldest is dropped.
const MAX_PENDING: usize = 8;

#[derive(Default)]
struct Collect {
    order: Vec<String>,
    pending: HashMap<String, VecDeque<Buffer>>,
    out_caps: Option<Arc<Caps>>,
}

impl Collect {
    fn complete(&self) -> bool {
        !self.order.is_empty()
            && self
                .order
                .iter()
                .all(|pad| self.pending.get(pad).is_some_and(|q| !q.is_empty()))
    }

    fn take_block(&mut self) -> Vec<Buffer> {
        self.order
            .iter()
            .filter_map(|pad| self.pending.get_mut(pad)?.pop_front())
            .collect()
    }
}

#[derive(Default)]
pub struct Interleave {
    collect: Mutex<Collect>,
}

fn output_caps(block: &[Buffer]) -> Option<AudioCaps> {
    let rate = block.iter().find_map(|b| b.audio_caps()).map(|c| c.rate)?;
    let positions = block
        .iter()
        .enumerate()
        .map(|(index, buffer)| match buffer.audio_caps().map(AudioCaps::first_position) {
            Some(ChannelPosition::None) | None => ChannelPosition::for_web_audio_index(index),
            Some(position) => position,
        })
        .collect();
    let mut caps = AudioCaps::interleaved(block.len() as u16, 0.0).with_positions(positions);
    caps.rate = rate;
    Some(caps)
}

impl ElementImpl for Interleave {
    fn static_pads(&self) -> Vec<PadSpec> {
        vec![PadSpec::src("src")]
    }

    fn request_pad(&self, element: &Element, template: &str) -> Option<PadSpec> {
        if template != "sink_%u" {
            return None;
        }
        let index = element.pad_names(PadDirection::Sink).len();
        let name = format!("sink_{index}");
        let mut collect = self.collect.lock();
        collect.order.push(name.clone());
        collect.pending.insert(name.clone(), VecDeque::new());
        Some(PadSpec::sink(name))
    }

    fn chain(&self, element: &Element, pad: &str, buffer: Buffer) -> FlowReturn {
        let mut guard = self.collect.lock();
        let collect = &mut *guard;
        let Some(queue) = collect.pending.get_mut(pad) else {
            return FlowReturn::NotLinked;
        };
        if queue.len() >= MAX_PENDING {
            warn!(element = %element.name(), pad, "pad running ahead, dropping oldest buffer");
            queue.pop_front();
        }
        queue.push_back(buffer);

        while collect.complete() {
            let block = collect.take_block();
            let Some(caps) = output_caps(&block) else {
                warn!(element = %element.name(), "input buffers carry no caps");
                return FlowReturn::NotNegotiated;
            };

            let current = collect
                .out_caps
                .as_ref()
                .filter(|current| current.as_audio() == Some(&caps))
                .cloned();
            let caps = match current {
                Some(current) => current,
                None => {
                    trace!(element = %element.name(), %caps, "output caps");
                    element.set_pad_caps("src", Caps::Raw(caps.clone()));
                    let caps = Arc::new(Caps::Raw(caps));
                    collect.out_caps = Some(caps.clone());
                    caps
                }
            };

            let planes: Vec<&[f32]> = block.iter().map(Buffer::samples).collect();
            let out = Buffer::from_samples(interleave_channels(&planes)).with_caps(caps);
            let ret = element.push("src", out);
            if !ret.is_ok() {
                return ret;
            }
        }
        FlowReturn::Ok
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::fakesink::FakeSink;
    use crate::graph::{LinkCheck, Pipeline, State};

    #[test]
    fn waits_for_every_channel() {
        let pipeline = Pipeline::new("interleave-test");
        let merge = Element::new("interleave", "merge", Interleave::default());
        let sink = Element::new("fakesink", "sink", FakeSink::default());
        pipeline.add_many(&[&merge, &sink]).unwrap();
        merge.link(&sink).unwrap();
        let left = merge.request_pad("sink_%u").unwrap();
        let right = merge.request_pad("sink_%u").unwrap();
        assert_eq!((left.as_str(), right.as_str()), ("sink_0", "sink_1"));
        pipeline.set_state(State::Playing);

        let mono = |position| Arc::new(Caps::Raw(AudioCaps::mono(44100.0, position)));
        let l = Buffer::from_samples(vec![1.0, 2.0]).with_caps(mono(ChannelPosition::FrontLeft));
        let r = Buffer::from_samples(vec![-1.0, -2.0]).with_caps(mono(ChannelPosition::FrontRight));

        // right arrives first; nothing leaves until left is there
        assert_eq!(merge.chain(&right, r), FlowReturn::Ok);
        let fake = sink.imp_as::<FakeSink>().unwrap();
        assert_eq!(fake.count(), 0);
        assert_eq!(merge.chain(&left, l), FlowReturn::Ok);

        let out = &fake.received()[0];
        assert_eq!(out.samples(), [1.0, -1.0, 2.0, -2.0]);
        let caps = out.audio_caps().unwrap();
        assert_eq!(caps.channels, 2);
        assert_eq!(caps.rate, 44100);
        assert_eq!(caps.positions, [ChannelPosition::FrontLeft, ChannelPosition::FrontRight]);
    }

    #[test]
    fn linking_without_pad_requests_one() {
        let merge = Element::new("interleave", "merge", Interleave::default());
        let upstream = Element::new("fakesink", "up", FakeSink::default());
        upstream.add_pad(PadSpec::src("src")).unwrap();
        upstream.link_pads(Some("src"), &merge, None, LinkCheck::Nothing).unwrap();
        assert!(merge.has_pad("sink_0"));
    }
}
