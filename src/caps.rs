//! Capability descriptors exchanged between pipeline stages.
//!
//! Every pad carries a [`Caps`] once negotiated. Raw audio is described by
//! [`AudioCaps`]; the encoded stream between the Web Audio source and the
//! decoder is the RIFF/WAVE container ([`Caps::Wav`]).

use core::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// Role of a single channel inside a multichannel stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelPosition {
    /// Unpositioned channel
    None,
    Mono,
    FrontLeft,
    FrontRight,
    FrontCenter,
    Lfe1,
    RearLeft,
    RearRight,
}

impl ChannelPosition {
    /// Position of a channel in the Web Audio channel ordering.
    ///
    /// Left, right, center (mono), LFE, surround left, surround right.
    pub fn for_web_audio_index(index: usize) -> Self {
        match index {
            0 => ChannelPosition::FrontLeft,
            1 => ChannelPosition::FrontRight,
            2 => ChannelPosition::FrontCenter,
            3 => ChannelPosition::Lfe1,
            4 => ChannelPosition::RearLeft,
            5 => ChannelPosition::RearRight,
            _ => ChannelPosition::None,
        }
    }

    /// The two positions accepted from the live-input sub-graph.
    #[inline]
    pub fn is_stereo(self) -> bool {
        matches!(self, ChannelPosition::FrontLeft | ChannelPosition::FrontRight)
    }

    pub fn name(self) -> &'static str {
        match self {
            ChannelPosition::None => "none",
            ChannelPosition::Mono => "mono",
            ChannelPosition::FrontLeft => "front-left",
            ChannelPosition::FrontRight => "front-right",
            ChannelPosition::FrontCenter => "front-center",
            ChannelPosition::Lfe1 => "lfe1",
            ChannelPosition::RearLeft => "rear-left",
            ChannelPosition::RearRight => "rear-right",
        }
    }

    /// Default positions for an interleaved stream of `channels` channels.
    pub fn default_layout(channels: u16) -> Vec<ChannelPosition> {
        match channels {
            1 => vec![ChannelPosition::Mono],
            n => (0..n as usize).map(Self::for_web_audio_index).collect(),
        }
    }
}

/// Sample encoding. Only 32-bit float is exchanged between stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SampleFormat {
    #[default]
    F32,
}

impl SampleFormat {
    /// Bits per sample
    #[inline]
    pub fn width(self) -> u16 {
        match self {
            SampleFormat::F32 => 32,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Layout {
    Interleaved,
    NonInterleaved,
}

/// Negotiated raw audio format.
///
/// The sample rate is kept in whole Hz: callers pass a real-valued rate and it
/// is rounded once, so two stages built from the same `f64` always agree.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AudioCaps {
    pub rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
    pub layout: Layout,
    pub positions: Vec<ChannelPosition>,
}

impl AudioCaps {
    /// Interleaved F32 caps with the default channel layout.
    pub fn interleaved(channels: u16, sample_rate: f64) -> Self {
        Self {
            rate: rate_to_hz(sample_rate),
            channels,
            format: SampleFormat::F32,
            layout: Layout::Interleaved,
            positions: ChannelPosition::default_layout(channels),
        }
    }

    /// Single-channel, non-interleaved F32 caps at the given position.
    pub fn mono(sample_rate: f64, position: ChannelPosition) -> Self {
        Self {
            rate: rate_to_hz(sample_rate),
            channels: 1,
            format: SampleFormat::F32,
            layout: Layout::NonInterleaved,
            positions: vec![position],
        }
    }

    pub fn with_positions(mut self, positions: Vec<ChannelPosition>) -> Self {
        self.positions = positions;
        self
    }

    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    /// Position of the first channel, the one checked on pulled buffers.
    #[inline]
    pub fn first_position(&self) -> ChannelPosition {
        self.positions.first().copied().unwrap_or(ChannelPosition::None)
    }

    #[inline]
    pub fn width(&self) -> u16 {
        self.format.width()
    }

    #[inline]
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * (self.width() as usize / 8)
    }

    /// Whether the descriptor is complete enough for data to flow.
    pub fn is_fixed(&self) -> bool {
        self.rate > 0 && self.channels > 0 && self.positions.len() == self.channels as usize
    }

    /// Two descriptors are compatible when data described by one can be
    /// handed to a pad expecting the other without conversion.
    ///
    /// Unpositioned channels match any position.
    pub fn is_compatible(&self, other: &AudioCaps) -> bool {
        self.rate == other.rate
            && self.channels == other.channels
            && self.format == other.format
            && (self.layout == other.layout || self.channels == 1)
            && self
                .positions
                .iter()
                .zip(other.positions.iter())
                .all(|(a, b)| {
                    a == b || *a == ChannelPosition::None || *b == ChannelPosition::None
                })
    }
}

impl fmt::Display for AudioCaps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let layout = match self.layout {
            Layout::Interleaved => "interleaved",
            Layout::NonInterleaved => "non-interleaved",
        };
        write!(
            f,
            "audio/x-raw, rate={}, channels={}, format=F32LE, layout={}, positions=<{}>",
            self.rate,
            self.channels,
            layout,
            self.positions.iter().map(|p| p.name()).join(",")
        )
    }
}

/// Capability descriptor of a pad or buffer.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Caps {
    Raw(AudioCaps),
    /// RIFF/WAVE container stream
    Wav,
}

impl Caps {
    pub fn as_audio(&self) -> Option<&AudioCaps> {
        match self {
            Caps::Raw(caps) => Some(caps),
            Caps::Wav => None,
        }
    }

    pub fn can_intersect(&self, other: &Caps) -> bool {
        match (self, other) {
            (Caps::Raw(a), Caps::Raw(b)) => a.is_compatible(b),
            (Caps::Wav, Caps::Wav) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Caps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Caps::Raw(caps) => caps.fmt(f),
            Caps::Wav => f.write_str("audio/x-wav"),
        }
    }
}

impl From<AudioCaps> for Caps {
    fn from(caps: AudioCaps) -> Self {
        Caps::Raw(caps)
    }
}

#[inline]
fn rate_to_hz(sample_rate: f64) -> u32 {
    if sample_rate.is_finite() && sample_rate > 0.0 {
        sample_rate.round() as u32
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn web_audio_channel_order() {
        assert_eq!(ChannelPosition::for_web_audio_index(0), ChannelPosition::FrontLeft);
        assert_eq!(ChannelPosition::for_web_audio_index(1), ChannelPosition::FrontRight);
        assert_eq!(ChannelPosition::for_web_audio_index(2), ChannelPosition::FrontCenter);
        assert_eq!(ChannelPosition::for_web_audio_index(3), ChannelPosition::Lfe1);
        assert_eq!(ChannelPosition::for_web_audio_index(4), ChannelPosition::RearLeft);
        assert_eq!(ChannelPosition::for_web_audio_index(5), ChannelPosition::RearRight);
        assert_eq!(ChannelPosition::for_web_audio_index(6), ChannelPosition::None);
    }

    #[test]
    fn stereo_caps() {
        let caps = AudioCaps::interleaved(2, 44100.0);
        assert_eq!(caps.rate, 44100);
        assert_eq!(caps.layout, Layout::Interleaved);
        assert_eq!(
            caps.positions,
            vec![ChannelPosition::FrontLeft, ChannelPosition::FrontRight]
        );
        assert!(caps.is_fixed());
        assert_eq!(caps.bytes_per_frame(), 8);
    }

    #[test]
    fn invalid_rate_is_not_fixed() {
        assert!(!AudioCaps::interleaved(2, 0.0).is_fixed());
        assert!(!AudioCaps::interleaved(2, f64::NAN).is_fixed());
        assert!(!AudioCaps::interleaved(0, 44100.0).is_fixed());
    }

    #[test]
    fn compatibility() {
        let left = AudioCaps::mono(48000.0, ChannelPosition::FrontLeft);
        let right = AudioCaps::mono(48000.0, ChannelPosition::FrontRight);
        let any = AudioCaps::mono(48000.0, ChannelPosition::None);
        assert!(!left.is_compatible(&right));
        assert!(left.is_compatible(&any));
        assert!(!left.is_compatible(&AudioCaps::mono(44100.0, ChannelPosition::FrontLeft)));
        assert!(!Caps::Wav.can_intersect(&Caps::Raw(left)));
    }

    #[test]
    fn display() {
        let caps = AudioCaps::interleaved(2, 44100.0);
        assert_eq!(
            caps.to_string(),
            "audio/x-raw, rate=44100, channels=2, format=F32LE, layout=interleaved, positions=<front-left,front-right>"
        );
    }
}
