//! Buffers handed between pipeline stages.
//!
//! A [`Buffer`] is moved from producer to consumer on every hand-off, so the
//! receiving stage owns it and releases it by dropping it.

use std::sync::Arc;

use crate::caps::{AudioCaps, Caps};

#[derive(Clone, Debug, PartialEq)]
pub enum BufferData {
    /// Raw F32 samples, interleaved or planar according to the caps
    Samples(Vec<f32>),
    /// Encoded container bytes
    Bytes(Vec<u8>),
}

/// A block of audio plus the capability descriptor it was negotiated with.
#[derive(Clone, Debug, PartialEq)]
pub struct Buffer {
    data: BufferData,
    caps: Option<Arc<Caps>>,
}

impl Buffer {
    pub fn from_samples(samples: Vec<f32>) -> Self {
        Self {
            data: BufferData::Samples(samples),
            caps: None,
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            data: BufferData::Bytes(bytes),
            caps: None,
        }
    }

    /// A zeroed buffer of `len` samples.
    pub fn silence(len: usize) -> Self {
        Self::from_samples(vec![0.0; len])
    }

    pub fn with_caps(mut self, caps: Arc<Caps>) -> Self {
        self.caps = Some(caps);
        self
    }

    /// Attach `caps` unless the buffer already carries a descriptor.
    ///
    /// Returns whether the buffer ends up carrying `caps`.
    pub fn stamp_caps(&mut self, caps: &Arc<Caps>) -> bool {
        match &self.caps {
            Some(existing) => existing.can_intersect(caps),
            None => {
                self.caps = Some(caps.clone());
                true
            }
        }
    }

    #[inline]
    pub fn caps(&self) -> Option<&Caps> {
        self.caps.as_deref()
    }

    #[inline]
    pub fn caps_arc(&self) -> Option<&Arc<Caps>> {
        self.caps.as_ref()
    }

    #[inline]
    pub fn audio_caps(&self) -> Option<&AudioCaps> {
        self.caps().and_then(Caps::as_audio)
    }

    #[inline]
    pub fn data(&self) -> &BufferData {
        &self.data
    }

    /// Samples of a raw buffer; empty for encoded buffers.
    pub fn samples(&self) -> &[f32] {
        match &self.data {
            BufferData::Samples(s) => s,
            BufferData::Bytes(_) => &[],
        }
    }

    pub fn samples_mut(&mut self) -> &mut [f32] {
        match &mut self.data {
            BufferData::Samples(s) => s,
            BufferData::Bytes(_) => &mut [],
        }
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.data {
            BufferData::Bytes(b) => Some(b),
            BufferData::Samples(_) => None,
        }
    }

    pub fn into_data(self) -> BufferData {
        self.data
    }

    /// Number of samples, or bytes for encoded buffers.
    pub fn len(&self) -> usize {
        match &self.data {
            BufferData::Samples(s) => s.len(),
            BufferData::Bytes(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frames held by a raw buffer (samples per channel).
    pub fn frames(&self) -> usize {
        let channels = self.audio_caps().map(|c| c.channels as usize).unwrap_or(1);
        self.samples().len() / channels.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caps::ChannelPosition;

    #[test]
    fn stamp_only_when_unset() {
        let left = Arc::new(Caps::Raw(AudioCaps::mono(44100.0, ChannelPosition::FrontLeft)));
        let right = Arc::new(Caps::Raw(AudioCaps::mono(44100.0, ChannelPosition::FrontRight)));

        let mut buffer = Buffer::silence(4);
        assert!(buffer.stamp_caps(&left));
        assert!(!buffer.stamp_caps(&right));
        assert_eq!(buffer.audio_caps().unwrap().first_position(), ChannelPosition::FrontLeft);
    }

    #[test]
    fn frames_follow_channels() {
        let caps = Arc::new(Caps::Raw(AudioCaps::interleaved(2, 48000.0)));
        let buffer = Buffer::silence(256).with_caps(caps);
        assert_eq!(buffer.frames(), 128);
        assert!(Buffer::from_bytes(vec![1, 2, 3]).samples().is_empty());
    }
}
