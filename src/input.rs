//! Live audio input as per-channel buffers.
//!
//! [`LiveInputPipeline`] captures from a live source and splits the stream
//! into one channel sink per channel:
//!
//! ```text
//! capture -> audioconvert -> capsfilter(F32 stereo) -> deinterleave
//!                                                        |-> queue -> appsink (src_0)
//!                                                        '-> queue -> appsink (src_1)
//! ```
//!
//! Channel branches are attached as the deinterleaver announces its pads.
//! The pipeline only reports ready after `no-more-pads`, and from then on
//! [`LiveInputPipeline::pull_channel_buffers`] returns one buffer per channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::buffer::Buffer;
use crate::bus_handler::BusMessageHandler;
use crate::caps::{AudioCaps, Caps, ChannelPosition};
use crate::config::{quantum_duration, BridgeConfig, CaptureConfig};
use crate::elements::appsink::AppSink;
use crate::graph::{
    Element, LinkCheck, Pipeline, PropertyValue, Query, Registry, SignalHandlerId, State,
    StateChangeReturn, WeakPipeline,
};

/// Source of per-channel input for the Web Audio source element.
pub trait ChannelInput: Send + Sync {
    /// Whether pulls will return buffers.
    fn is_ready(&self) -> bool;

    /// One buffer per channel. Invalid buffers are dropped, so fewer than the
    /// channel count may come back.
    fn pull_channel_buffers(&self) -> Vec<Buffer>;

    /// Answer a query on behalf of the input, typically latency.
    fn send_query(&self, query: &mut Query) -> bool;
}

/// A pulled buffer is usable when it carries fixed raw caps whose first
/// channel is front-left or front-right.
pub fn is_valid_channel_buffer(buffer: &Buffer) -> bool {
    match buffer.audio_caps() {
        Some(caps) => caps.rate > 0 && caps.channels > 0 && caps.width() > 0 && caps.first_position().is_stereo(),
        None => false,
    }
}

struct Shared {
    pipeline: WeakPipeline,
    registry: Registry,
    capture: CaptureConfig,
    queue_max_buffers: u64,
    /// Channel sinks, newest first
    sinks: Mutex<Vec<Element>>,
    ready: AtomicBool,
}

impl Shared {
    /// Attach a queue and channel sink to the deinterleaver's new `pad`.
    fn handle_new_channel_pad(&self, deinterleave: &Element, pad: &str) {
        let Some(pipeline) = self.pipeline.upgrade() else {
            return;
        };
        let (Some(queue), Some(sink)) = (
            self.registry.make("queue", None),
            self.registry.make("appsink", None),
        ) else {
            error!(pad, "cannot build channel branch, queue or appsink missing");
            return;
        };

        for (element, name, value) in [
            (&queue, "max-size-buffers", PropertyValue::UInt(self.queue_max_buffers)),
            (&sink, "max-buffers", PropertyValue::UInt(self.capture.channel_sink_max_buffers)),
            (&sink, "drop", PropertyValue::Bool(true)),
        ] {
            if let Err(e) = element.set_property(name, value) {
                warn!(pad, element = %element.name(), "not setting {name}: {e}");
            }
        }

        let linked = pipeline
            .add_many(&[&queue, &sink])
            .and_then(|_| deinterleave.link_pads(Some(pad), &queue, Some("sink"), LinkCheck::Caps))
            .and_then(|_| queue.link_pads(Some("src"), &sink, Some("sink"), LinkCheck::Nothing));
        if let Err(e) = linked {
            warn!(pad, "failed to attach channel sink: {e}");
            pipeline.remove(&queue);
            pipeline.remove(&sink);
            return;
        }

        sink.sync_state_with_parent();
        queue.sync_state_with_parent();
        debug!(pad, sink = %sink.name(), "attached channel sink");
        self.sinks.lock().insert(0, sink);
    }

    fn channel_pads_configured(&self) {
        info!(channels = self.sinks.lock().len(), "live input ready");
        self.ready.store(true, Ordering::Release);
    }
}

/// Live capture split into per-channel sinks.
pub struct LiveInputPipeline {
    sample_rate: f64,
    frames: usize,
    pipeline: Pipeline,
    source: Option<Element>,
    deinterleave: Option<Element>,
    handlers: Vec<SignalHandlerId>,
    shared: Arc<Shared>,
}

impl LiveInputPipeline {
    /// Build the capture graph and start it. Unless the configuration pins a
    /// blocksize, every captured buffer holds `frames` frames, one render
    /// quantum.
    ///
    /// Never fails: a missing element is logged and leaves a pipeline that
    /// never becomes ready.
    pub fn new(sample_rate: f64, frames: usize, config: &BridgeConfig, registry: &Registry) -> Self {
        let pipeline = Pipeline::new("live-input");
        let shared = Arc::new(Shared {
            pipeline: pipeline.downgrade(),
            registry: registry.clone(),
            capture: config.capture.clone(),
            queue_max_buffers: config.source.queue_max_buffers,
            sinks: Mutex::new(Vec::new()),
            ready: AtomicBool::new(false),
        });
        BusMessageHandler::attach("input", &pipeline);

        let mut input = Self {
            sample_rate,
            frames: frames.max(1),
            pipeline,
            source: None,
            deinterleave: None,
            handlers: Vec::new(),
            shared,
        };
        if input.build(config, registry) {
            input.start();
        }
        input
    }

    fn build(&mut self, config: &BridgeConfig, registry: &Registry) -> bool {
        let capture = &config.capture;
        let make = |factory: &str| {
            let element = registry.make(factory, None);
            if element.is_none() {
                error!(factory, "live input element unavailable");
            }
            element
        };
        let (Some(source), Some(convert), Some(filter), Some(deinterleave)) = (
            make(&capture.factory),
            make("audioconvert"),
            make("capsfilter"),
            make("deinterleave"),
        ) else {
            return false;
        };

        for (name, value) in [
            ("rate", PropertyValue::UInt(self.sample_rate.round().max(0.0) as u64)),
            ("blocksize", PropertyValue::UInt(capture.blocksize_for(self.frames))),
            ("buffer-time", PropertyValue::Int(capture.buffer_time_us)),
            ("latency-time", PropertyValue::Int(capture.latency_time_us)),
        ] {
            if let Err(e) = source.set_property(name, value) {
                debug!(source = %source.name(), "not setting {name}: {e}");
            }
        }

        let stereo = Caps::Raw(AudioCaps::interleaved(2, self.sample_rate));
        if let Err(e) = filter.set_property("caps", stereo) {
            warn!("failed to set capture caps: {e}");
        }
        if let Err(e) = deinterleave.set_property("keep-positions", true) {
            warn!("cannot keep channel positions: {e}");
        }

        let shared = self.shared.clone();
        self.handlers.push(deinterleave.connect_pad_added(move |element, pad| {
            shared.handle_new_channel_pad(element, pad);
        }));
        let shared = self.shared.clone();
        self.handlers.push(deinterleave.connect_no_more_pads(move |_| {
            shared.channel_pads_configured();
        }));

        let built = self
            .pipeline
            .add_many(&[&source, &convert, &filter, &deinterleave])
            .and_then(|_| Element::link_many(&[&source, &convert, &filter]))
            .and_then(|_| filter.link_pads(Some("src"), &deinterleave, Some("sink"), LinkCheck::Nothing));
        if let Err(e) = built {
            error!("failed to assemble live input: {e}");
            return false;
        }

        for element in [&source, &convert, &filter, &deinterleave] {
            element.sync_state_with_parent();
        }
        self.source = Some(source);
        self.deinterleave = Some(deinterleave);
        true
    }

    /// Set the capture graph playing.
    pub fn start(&self) -> StateChangeReturn {
        debug!("starting live input");
        self.pipeline.set_state(State::Playing)
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Frames per captured buffer when the blocksize is derived.
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// The deinterleaver whose pads drive channel sink creation.
    pub fn deinterleave(&self) -> Option<&Element> {
        self.deinterleave.as_ref()
    }

    /// Channel sinks attached so far, newest first.
    pub fn channel_sinks(&self) -> Vec<Element> {
        self.shared.sinks.lock().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::Acquire)
    }

    /// Pull one buffer from every channel sink, in channel-sink order.
    ///
    /// Each pull waits at most the configured timeout. Buffers failing
    /// [`is_valid_channel_buffer`] are dropped here.
    pub fn pull_channel_buffers(&self) -> Vec<Buffer> {
        if !self.is_ready() {
            warn!("live input pulled before its channels were configured");
            return Vec::new();
        }
        let sinks = self.channel_sinks();
        if sinks.is_empty() {
            warn!("live input has no channel sinks");
            return Vec::new();
        }
        let timeout = self.shared.capture.pull_timeout();
        let mut buffers = Vec::with_capacity(sinks.len());
        for sink in &sinks {
            let Some(app) = sink.imp_as::<AppSink>() else {
                continue;
            };
            let Some(buffer) = app.pull(timeout) else {
                trace!(sink = %sink.name(), "no buffer");
                continue;
            };
            if is_valid_channel_buffer(&buffer) {
                buffers.push(buffer);
            } else {
                debug!(sink = %sink.name(), "dropping buffer with unusable caps");
            }
        }
        buffers
    }

    /// Forward a query to the capture source.
    pub fn send_query(&self, query: &mut Query) -> bool {
        match &self.source {
            Some(source) => source.query(query),
            None => false,
        }
    }
}

impl ChannelInput for LiveInputPipeline {
    fn is_ready(&self) -> bool {
        LiveInputPipeline::is_ready(self)
    }

    fn pull_channel_buffers(&self) -> Vec<Buffer> {
        LiveInputPipeline::pull_channel_buffers(self)
    }

    fn send_query(&self, query: &mut Query) -> bool {
        LiveInputPipeline::send_query(self, query)
    }
}

impl Drop for LiveInputPipeline {
    fn drop(&mut self) {
        if let Some(deinterleave) = &self.deinterleave {
            for id in self.handlers.drain(..) {
                deinterleave.disconnect(id);
            }
        }
        self.pipeline.set_state(State::Null);
        self.pipeline.bus().remove_watch();
    }
}

/// Stereo silence paced in real time, for devices without live input.
pub struct SilentInput {
    frames: usize,
    period: Duration,
    caps: [Arc<Caps>; 2],
    next: Mutex<Option<Instant>>,
}

impl SilentInput {
    pub fn new(sample_rate: f64, frames: usize) -> Self {
        let mono = |position| Arc::new(Caps::Raw(AudioCaps::mono(sample_rate, position)));
        Self {
            frames,
            period: quantum_duration(frames, sample_rate),
            caps: [mono(ChannelPosition::FrontLeft), mono(ChannelPosition::FrontRight)],
            next: Mutex::new(None),
        }
    }

    /// Sleep until the next quantum is due.
    fn pace(&self) {
        let mut next = self.next.lock();
        let now = Instant::now();
        let due = match *next {
            Some(due) if due > now => {
                thread::sleep(due - now);
                due
            }
            _ => now,
        };
        *next = Some(due + self.period);
    }
}

impl ChannelInput for SilentInput {
    fn is_ready(&self) -> bool {
        true
    }

    fn pull_channel_buffers(&self) -> Vec<Buffer> {
        self.pace();
        self.caps
            .iter()
            .map(|caps| Buffer::silence(self.frames).with_caps(caps.clone()))
            .collect()
    }

    fn send_query(&self, query: &mut Query) -> bool {
        match query {
            Query::Latency { live, min, max } => {
                *live = true;
                *min = self.period;
                *max = Some(self.period);
                true
            }
            Query::Caps { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;

    use super::*;
    use crate::graph::{ElementImpl, PadSpec};

    /// Capture source that never produces anything, so pads are only
    /// announced when a test adds them.
    #[derive(Default)]
    struct IdleSrc;

    impl ElementImpl for IdleSrc {
        fn static_pads(&self) -> Vec<PadSpec> {
            vec![PadSpec::src("src")]
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn idle_input() -> LiveInputPipeline {
        let registry = Registry::with_builtins();
        registry.register("idlesrc", |name| Element::new("idlesrc", name, IdleSrc));
        let mut config = BridgeConfig::default();
        config.capture.factory = "idlesrc".into();
        LiveInputPipeline::new(44100.0, 128, &config, &registry)
    }

    fn channel_caps(position: ChannelPosition) -> Caps {
        Caps::Raw(AudioCaps::mono(44100.0, position))
    }

    /// Announce front-left and front-right pads and finish enumeration.
    fn configure_stereo(input: &LiveInputPipeline) {
        let deinterleave = input.deinterleave().unwrap();
        deinterleave
            .add_pad(PadSpec::src("src_0").with_caps(channel_caps(ChannelPosition::FrontLeft)))
            .unwrap();
        deinterleave
            .add_pad(PadSpec::src("src_1").with_caps(channel_caps(ChannelPosition::FrontRight)))
            .unwrap();
        deinterleave.no_more_pads();
    }

    #[test]
    fn ready_only_after_no_more_pads() {
        let input = idle_input();
        let deinterleave = input.deinterleave().unwrap();
        assert!(!input.is_ready());

        deinterleave
            .add_pad(PadSpec::src("src_0").with_caps(channel_caps(ChannelPosition::FrontLeft)))
            .unwrap();
        assert!(!input.is_ready());
        assert_eq!(input.channel_sinks().len(), 1);

        deinterleave
            .add_pad(PadSpec::src("src_1").with_caps(channel_caps(ChannelPosition::FrontRight)))
            .unwrap();
        assert!(!input.is_ready());
        assert!(input.pull_channel_buffers().is_empty());

        deinterleave.no_more_pads();
        assert!(input.is_ready());
        assert_eq!(input.channel_sinks().len(), 2);
    }

    #[test]
    fn unrecognized_positions_never_leave_the_pull() {
        let input = idle_input();
        configure_stereo(&input);
        let sinks = input.channel_sinks();

        let center = Arc::new(channel_caps(ChannelPosition::FrontCenter));
        let left = Arc::new(channel_caps(ChannelPosition::FrontLeft));
        assert!(sinks[0].chain("sink", Buffer::silence(128).with_caps(center)).is_ok());
        assert!(sinks[1].chain("sink", Buffer::from_samples(vec![0.5; 128]).with_caps(left)).is_ok());

        let buffers = input.pull_channel_buffers();
        assert_eq!(buffers.len(), 1);
        assert_eq!(buffers[0].audio_caps().unwrap().first_position(), ChannelPosition::FrontLeft);
        assert_eq!(buffers[0].samples()[0], 0.5);
    }

    #[test]
    fn capture_blocks_follow_the_quantum() {
        let registry = Registry::with_builtins();
        let mut config = BridgeConfig::default();
        config.capture.factory = "audiotestsrc".into();
        let input = LiveInputPipeline::new(44100.0, 1024, &config, &registry);

        let deadline = Instant::now() + Duration::from_secs(2);
        while !input.is_ready() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(input.is_ready());
        let buffers = input.pull_channel_buffers();
        assert_eq!(buffers.len(), 2);
        assert!(buffers.iter().all(|b| b.frames() == 1024));
    }

    #[test]
    fn channel_buffer_validation() {
        let left = Arc::new(Caps::Raw(AudioCaps::mono(44100.0, ChannelPosition::FrontLeft)));
        let center = Arc::new(Caps::Raw(AudioCaps::mono(44100.0, ChannelPosition::FrontCenter)));
        let no_rate = Arc::new(Caps::Raw(AudioCaps::mono(0.0, ChannelPosition::FrontRight)));

        assert!(is_valid_channel_buffer(&Buffer::silence(4).with_caps(left)));
        assert!(!is_valid_channel_buffer(&Buffer::silence(4).with_caps(center)));
        assert!(!is_valid_channel_buffer(&Buffer::silence(4).with_caps(no_rate)));
        assert!(!is_valid_channel_buffer(&Buffer::silence(4)));
        assert!(!is_valid_channel_buffer(&Buffer::from_bytes(vec![0; 4]).with_caps(Arc::new(Caps::Wav))));
    }

    #[test]
    fn silent_input_is_paced() {
        let input = SilentInput::new(48000.0, 480);
        let start = Instant::now();
        for _ in 0..3 {
            let buffers = input.pull_channel_buffers();
            assert_eq!(buffers.len(), 2);
            assert!(buffers.iter().all(is_valid_channel_buffer));
        }
        // three 10ms quanta: the first is immediate
        assert!(start.elapsed() >= Duration::from_millis(19));
    }

    #[test]
    fn missing_capture_source_never_readies() {
        let mut config = BridgeConfig::default();
        config.capture.factory = "no-such-source".into();
        let input = LiveInputPipeline::new(44100.0, 128, &config, &Registry::with_builtins());
        assert!(!input.is_ready());
        assert!(input.pull_channel_buffers().is_empty());
        assert!(input.deinterleave().is_none());
    }
}
