//! Streaming RIFF/WAVE encoder and parser.
//!
//! The encoder writes a header for an open-ended stream (data size zero)
//! ahead of the first samples, then raw little-endian F32 frames. The parser
//! reads that header, creates its source pad with the negotiated caps, and
//! turns the remaining bytes back into samples.

use std::any::Any;
use std::io::Cursor;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::buffer::Buffer;
use crate::caps::{AudioCaps, Caps, Layout};
use crate::error::{Error, Result};
use crate::graph::{CoreError, Element, ElementImpl, FlowReturn, PadSpec};

/// Header of a float WAVE stream with an unknown length.
pub fn stream_header(channels: u16, sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut cursor = Cursor::new(Vec::new());
    hound::WavWriter::new(&mut cursor, spec)?.finalize()?;
    Ok(cursor.into_inner())
}

/// Offset of the first sample byte, once the header is complete.
///
/// `Ok(None)` means more bytes are needed.
pub fn find_data_offset(bytes: &[u8]) -> Result<Option<usize>> {
    if bytes.len() < 12 {
        return Ok(None);
    }
    if &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(Error::Decode("not a RIFF/WAVE stream".into()));
    }

    let mut pos = 12;
    while pos + 8 <= bytes.len() {
        let id = &bytes[pos..pos + 4];
        let size = u32::from_le_bytes([bytes[pos + 4], bytes[pos + 5], bytes[pos + 6], bytes[pos + 7]]) as usize;
        if id == b"data" {
            return Ok(Some(pos + 8));
        }
        // chunks are padded to even sizes
        pos += 8 + size + (size & 1);
    }
    Ok(None)
}

fn samples_to_bytes(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 4);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

// ---- encoder ----

#[derive(Default)]
pub struct WavEnc {
    format: Mutex<Option<AudioCaps>>,
}

impl ElementImpl for WavEnc {
    fn static_pads(&self) -> Vec<PadSpec> {
        vec![PadSpec::sink("sink"), PadSpec::src("src").with_caps(Caps::Wav)]
    }

    fn chain(&self, element: &Element, _pad: &str, buffer: Buffer) -> FlowReturn {
        let Some(caps) = buffer.audio_caps() else {
            warn!(element = %element.name(), "raw audio caps required");
            return FlowReturn::NotNegotiated;
        };
        if caps.layout != Layout::Interleaved && caps.channels > 1 {
            warn!(element = %element.name(), %caps, "interleaved input required");
            return FlowReturn::NotNegotiated;
        }

        let mut bytes = {
            let mut format = self.format.lock();
            match &*format {
                Some(current) if current.rate == caps.rate && current.channels == caps.channels => {
                    Vec::with_capacity(buffer.len() * 4)
                }
                Some(current) => {
                    warn!(element = %element.name(), from = %current, to = %caps, "format changed mid-stream");
                    return FlowReturn::NotNegotiated;
                }
                None => match stream_header(caps.channels, caps.rate) {
                    Ok(header) => {
                        debug!(element = %element.name(), %caps, "writing stream header");
                        *format = Some(caps.clone());
                        header
                    }
                    Err(e) => {
                        element.post_error(CoreError::Negotiation, "Could not write WAVE header", Some(e.to_string()));
                        return FlowReturn::Error;
                    }
                },
            }
        };

        bytes.extend(samples_to_bytes(buffer.samples()));
        element.push("src", Buffer::from_bytes(bytes).with_caps(Arc::new(Caps::Wav)))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ---- parser ----

#[derive(Default)]
struct Parse {
    header: Vec<u8>,
    caps: Option<Arc<Caps>>,
    /// Trailing bytes that did not fill a whole frame
    leftover: Vec<u8>,
}

/// Parses a WAVE stream. Its `src` pad only exists once the header has been
/// read, so consumers link from a `pad-added` handler.
#[derive(Default)]
pub struct WavParse {
    parse: Mutex<Parse>,
}

impl WavParse {
    /// Read the stream format from a complete header.
    fn read_format(header: &[u8]) -> Result<AudioCaps> {
        let reader = hound::WavReader::new(Cursor::new(header))?;
        let spec = reader.spec();
        if spec.sample_format != hound::SampleFormat::Float || spec.bits_per_sample != 32 {
            return Err(Error::Decode(format!(
                "unsupported sample format {:?}/{} bits",
                spec.sample_format, spec.bits_per_sample
            )));
        }
        let mut caps = AudioCaps::interleaved(spec.channels, 0.0);
        caps.rate = spec.sample_rate;
        Ok(caps)
    }

    /// Turn the data bytes into a sample buffer, keeping partial frames.
    fn decode(parse: &mut Parse, data: &[u8], caps: &Arc<Caps>) -> Option<Buffer> {
        let frame = caps.as_audio().map_or(4, AudioCaps::bytes_per_frame).max(4);
        parse.leftover.extend_from_slice(data);
        let usable = parse.leftover.len() / frame * frame;
        if usable == 0 {
            return None;
        }
        let samples = parse.leftover[..usable]
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        parse.leftover.drain(..usable);
        Some(Buffer::from_samples(samples).with_caps(caps.clone()))
    }
}

impl ElementImpl for WavParse {
    fn static_pads(&self) -> Vec<PadSpec> {
        vec![PadSpec::sink("sink")]
    }

    fn chain(&self, element: &Element, _pad: &str, buffer: Buffer) -> FlowReturn {
        let Some(bytes) = buffer.bytes() else {
            warn!(element = %element.name(), "encoded input required");
            return FlowReturn::NotNegotiated;
        };

        let existing = self.parse.lock().caps.clone();
        let (caps, data) = match existing {
            Some(caps) => (caps, bytes.to_vec()),
            None => {
                let (header, rest) = {
                    let mut parse = self.parse.lock();
                    parse.header.extend_from_slice(bytes);
                    match find_data_offset(&parse.header) {
                        Ok(Some(offset)) => {
                            let rest = parse.header.split_off(offset);
                            (std::mem::take(&mut parse.header), rest)
                        }
                        Ok(None) => return FlowReturn::Ok,
                        Err(e) => {
                            drop(parse);
                            element.post_error(CoreError::Negotiation, "Stream is not a WAVE file", Some(e.to_string()));
                            return FlowReturn::Error;
                        }
                    }
                };

                let format = match Self::read_format(&header) {
                    Ok(format) => format,
                    Err(e) => {
                        element.post_error(CoreError::Negotiation, "Unsupported WAVE format", Some(e.to_string()));
                        return FlowReturn::NotNegotiated;
                    }
                };
                debug!(element = %element.name(), %format, "parsed header");

                let caps = Arc::new(Caps::Raw(format));
                self.parse.lock().caps = Some(caps.clone());
                // pad-added handlers link downstream before any data is pushed
                if let Err(e) = element.add_pad(PadSpec::src("src").with_caps((*caps).clone())) {
                    warn!(element = %element.name(), "failed to add source pad: {e}");
                    return FlowReturn::Error;
                }
                element.no_more_pads();
                (caps, rest)
            }
        };

        let decoded = {
            let mut parse = self.parse.lock();
            Self::decode(&mut parse, &data, &caps)
        };
        match decoded {
            Some(out) => element.push("src", out),
            None => FlowReturn::Ok,
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
    use crate::graph::{LinkCheck, Pipeline, State};

    #[test]
    fn header_has_data_chunk() {
        let header = stream_header(2, 44100).unwrap();
        let offset = find_data_offset(&header).unwrap().unwrap();
        assert_eq!(offset, header.len());
        let caps = WavParse::read_format(&header).unwrap();
        assert_eq!((caps.channels, caps.rate), (2, 44100));
    }

    #[test]
    fn rejects_foreign_streams() {
        assert!(find_data_offset(b"OggS\0\0\0\0\0\0\0\0\0\0").is_err());
        assert_eq!(find_data_offset(b"RIFF").unwrap(), None);
    }

    #[test]
    fn encode_then_parse_through_pipeline() {
        let pipeline = Pipeline::new("wav-test");
        let enc = Element::new("wavenc", "enc", WavEnc::default());
        let parse = Element::new("wavparse", "parse", WavParse::default());
        let sink = Element::new("fakesink", "sink", FakeSink::default());
        pipeline.add_many(&[&enc, &parse, &sink]).unwrap();
        enc.link(&parse).unwrap();
        assert!(!parse.has_pad("src"));

        let sink_handle = sink.clone();
        parse.connect_pad_added(move |parse, pad| {
            parse
                .link_pads(Some(pad), &sink_handle, Some("sink"), LinkCheck::Caps)
                .unwrap();
        });
        pipeline.set_state(State::Playing);

        let caps = Arc::new(Caps::Raw(AudioCaps::interleaved(2, 48000.0)));
        let samples = vec![0.25, -0.25, 0.5, -0.5];
        assert_eq!(
            enc.chain("sink", Buffer::from_samples(samples.clone()).with_caps(caps.clone())),
            FlowReturn::Ok
        );
        assert_eq!(enc.chain("sink", Buffer::from_samples(samples.clone()).with_caps(caps)), FlowReturn::Ok);

        let received = sink.imp_as::<FakeSink>().unwrap().received();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].samples(), samples.as_slice());
        assert_eq!(received[1].audio_caps().unwrap().rate, 48000);
    }

    #[test]
    fn partial_frames_are_held_back() {
        let caps = Arc::new(Caps::Raw(AudioCaps::interleaved(2, 48000.0)));
        let mut parse = Parse::default();
        let bytes = samples_to_bytes(&[1.0, 2.0, 3.0]);
        let out = WavParse::decode(&mut parse, &bytes, &caps).unwrap();
        assert_eq!(out.samples(), [1.0, 2.0]);
        assert_eq!(parse.leftover.len(), 4);
    }
}
