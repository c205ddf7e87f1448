//! Layout and channel-count conversion.
//!
//! The element adapts raw buffers to whatever the downstream pad asks for:
//! interleaved or planar, up- or down-mixed to its channel count, and
//! linearly resampled to its rate.

use std::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::buffer::Buffer;
use crate::caps::{AudioCaps, Caps, Layout};
use crate::graph::{Element, ElementImpl, FlowReturn, PadSpec};

/// Interleave equal-length channel planes into one frame-ordered block.
pub fn interleave_channels(planes: &[&[f32]]) -> Vec<f32> {
    let channels = planes.len();
    let frames = planes.iter().map(|p| p.len()).min().unwrap_or(0);
    let mut out = vec![0.0; frames * channels];
    for (ch, plane) in planes.iter().enumerate() {
        for (i, sample) in plane[..frames].iter().enumerate() {
            out[i * channels + ch] = *sample;
        }
    }
    out
}

/// Split a frame-ordered block into one plane per channel.
pub fn deinterleave_channels(samples: &[f32], channels: usize) -> Vec<Vec<f32>> {
    if channels == 0 {
        return Vec::new();
    }
    let frames = samples.len() / channels;
    let mut planes = vec![Vec::with_capacity(frames); channels];
    for frame in samples.chunks_exact(channels) {
        for (plane, sample) in planes.iter_mut().zip(frame) {
            plane.push(*sample);
        }
    }
    planes
}

/// Split a planar block (channel after channel) into planes.
pub fn split_planar(samples: &[f32], channels: usize) -> Vec<Vec<f32>> {
    if channels == 0 {
        return Vec::new();
    }
    let frames = samples.len() / channels;
    if frames == 0 {
        return vec![Vec::new(); channels];
    }
    samples
        .chunks_exact(frames)
        .take(channels)
        .map(<[f32]>::to_vec)
        .collect()
}

/// Map `planes` onto `channels` output channels.
///
/// Mono is duplicated to every output; otherwise each output reads the input
/// channel with the same index, or the last one when there are fewer inputs.
pub fn remap_channels(planes: Vec<Vec<f32>>, channels: usize) -> Vec<Vec<f32>> {
    let input_channels = planes.len();
    if input_channels == channels || input_channels == 0 {
        return planes;
    }
    (0..channels)
        .map(|out_ch| {
            let in_ch = if input_channels == 1 {
                0
            } else {
                out_ch.min(input_channels - 1)
            };
            planes[in_ch].clone()
        })
        .collect()
}

/// Linear-interpolating rate converter.
///
/// Keeps the last input frame and the fractional read position between
/// blocks, so consecutive blocks join without a discontinuity.
pub struct LinearResampler {
    from: u32,
    to: u32,
    /// Input frames advanced per output frame
    ratio: f64,
    position: f64,
    last: Vec<f32>,
    primed: bool,
}

impl LinearResampler {
    pub fn new(from: u32, to: u32, channels: usize) -> Self {
        Self {
            from,
            to,
            ratio: from as f64 / to.max(1) as f64,
            position: 0.0,
            last: vec![0.0; channels],
            primed: false,
        }
    }

    pub fn converts(&self, from: u32, to: u32, channels: usize) -> bool {
        self.from == from && self.to == to && self.last.len() == channels
    }

    pub fn process(&mut self, planes: &[Vec<f32>]) -> Vec<Vec<f32>> {
        let frames = planes.first().map_or(0, Vec::len);
        if frames == 0 || planes.len() != self.last.len() {
            return planes.to_vec();
        }

        // the previous block's last frame sits in front of this one
        let offset = usize::from(self.primed);
        let total = frames + offset;
        let at = |ch: usize, i: usize| if i < offset { self.last[ch] } else { planes[ch][i - offset] };

        let estimate = (frames as f64 / self.ratio).ceil() as usize + 1;
        let mut out = vec![Vec::with_capacity(estimate); planes.len()];
        let mut position = self.position;
        while position + 1.0 < total as f64 {
            let index = position as usize;
            let frac = (position - index as f64) as f32;
            for (ch, plane) in out.iter_mut().enumerate() {
                let a = at(ch, index);
                let b = at(ch, index + 1);
                plane.push(a + (b - a) * frac);
            }
            position += self.ratio;
        }

        self.position = position - (total - 1) as f64;
        for (last, plane) in self.last.iter_mut().zip(planes) {
            *last = plane[frames - 1];
        }
        self.primed = true;
        out
    }
}

#[derive(Default)]
pub struct AudioConvert {
    resampler: Mutex<Option<LinearResampler>>,
}

impl AudioConvert {
    fn convert(&self, element: &Element, buffer: Buffer, input: &AudioCaps, target: &AudioCaps) -> Buffer {
        let channels = input.channels as usize;
        let planes = match input.layout {
            Layout::Interleaved => deinterleave_channels(buffer.samples(), channels),
            Layout::NonInterleaved => split_planar(buffer.samples(), channels),
        };

        let planes = if target.rate != 0 && input.rate != target.rate {
            let mut resampler = self.resampler.lock();
            if !resampler
                .as_ref()
                .is_some_and(|r| r.converts(input.rate, target.rate, channels))
            {
                debug!(element = %element.name(), from = input.rate, to = target.rate, "resampling");
                *resampler = Some(LinearResampler::new(input.rate, target.rate, channels));
            }
            match resampler.as_mut() {
                Some(r) => r.process(&planes),
                None => planes,
            }
        } else {
            planes
        };
        let rate = if target.rate != 0 { target.rate } else { input.rate };

        let out_channels = if target.channels == 0 {
            channels
        } else {
            target.channels as usize
        };
        let planes = remap_channels(planes, out_channels);
        let refs: Vec<&[f32]> = planes.iter().map(Vec::as_slice).collect();
        let samples = match target.layout {
            Layout::Interleaved => interleave_channels(&refs),
            Layout::NonInterleaved => refs.concat(),
        };

        let positions = if target.positions.len() == out_channels {
            target.positions.clone()
        } else {
            input.positions.iter().copied().cycle().take(out_channels).collect()
        };
        let caps = AudioCaps {
            rate,
            channels: out_channels as u16,
            format: input.format,
            layout: target.layout,
            positions,
        };
        Buffer::from_samples(samples).with_caps(Arc::new(Caps::Raw(caps)))
    }
}

impl ElementImpl for AudioConvert {
    fn static_pads(&self) -> Vec<PadSpec> {
        vec![PadSpec::sink("sink"), PadSpec::src("src")]
    }

    fn chain(&self, element: &Element, _pad: &str, buffer: Buffer) -> FlowReturn {
        let peer = element.peer_caps("src");
        let target = peer.as_deref().and_then(Caps::as_audio).cloned();
        let input = buffer.audio_caps().cloned();
        let (Some(input), Some(target)) = (input, target) else {
            return element.push("src", buffer);
        };

        let needs_conversion = input.channels != target.channels
            || (input.rate != target.rate && target.rate != 0)
            || (input.layout != target.layout && input.channels > 1);
        if !needs_conversion {
            return element.push("src", buffer);
        }

        debug!(element = %element.name(), %input, %target, "converting");
        let converted = self.convert(element, buffer, &input, &target);
        element.push("src", converted)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caps::ChannelPosition;

    #[test]
    fn interleave_and_back() {
        let left = [1.0, 2.0, 3.0];
        let right = [-1.0, -2.0, -3.0];
        let block = interleave_channels(&[&left, &right]);
        assert_eq!(block, [1.0, -1.0, 2.0, -2.0, 3.0, -3.0]);
        assert_eq!(deinterleave_channels(&block, 2), vec![left.to_vec(), right.to_vec()]);
    }

    #[test]
    fn interleave_truncates_to_shortest() {
        let block = interleave_channels(&[&[1.0, 2.0], &[3.0]]);
        assert_eq!(block, [1.0, 3.0]);
    }

    #[test]
    fn mono_duplicates_to_stereo() {
        let planes = remap_channels(vec![vec![0.5, 0.25]], 2);
        assert_eq!(planes, vec![vec![0.5, 0.25], vec![0.5, 0.25]]);

        let planes = remap_channels(vec![vec![1.0], vec![2.0], vec![3.0]], 2);
        assert_eq!(planes, vec![vec![1.0], vec![2.0]]);
    }

    #[test]
    fn resampler_halves_and_joins_blocks() {
        let mut resampler = LinearResampler::new(48000, 24000, 1);
        let first = resampler.process(&[vec![0.0, 1.0, 2.0, 3.0]]);
        assert_eq!(first, vec![vec![0.0, 2.0]]);
        // continues from where the previous block left off
        let second = resampler.process(&[vec![4.0, 5.0, 6.0, 7.0]]);
        assert_eq!(second, vec![vec![4.0, 6.0]]);
    }

    #[test]
    fn resampler_upsamples_between_frames() {
        let mut resampler = LinearResampler::new(24000, 48000, 1);
        let out = resampler.process(&[vec![0.0, 1.0]]);
        assert_eq!(out, vec![vec![0.0, 0.5]]);
        let out = resampler.process(&[vec![2.0]]);
        assert_eq!(out, vec![vec![1.0, 1.5]]);
    }

    #[test]
    fn converts_planar_stereo_to_interleaved() {
        let element = Element::new("audioconvert", "convert", AudioConvert::default());
        let convert = element.imp_as::<AudioConvert>().unwrap();
        let input = AudioCaps::interleaved(2, 48000.0).with_layout(Layout::NonInterleaved);
        let target = AudioCaps::interleaved(2, 48000.0);
        let buffer = Buffer::from_samples(vec![1.0, 2.0, -1.0, -2.0]);

        let out = convert.convert(&element, buffer, &input, &target);
        assert_eq!(out.samples(), [1.0, -1.0, 2.0, -2.0]);
        let caps = out.audio_caps().unwrap();
        assert_eq!(caps.layout, Layout::Interleaved);
        assert_eq!(caps.positions, [ChannelPosition::FrontLeft, ChannelPosition::FrontRight]);
    }
}
