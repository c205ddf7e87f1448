//! The Web Audio source element.
//!
//! A composite source that turns a host render callback into an encoded
//! stream on its single `src` pad:
//!
//! ```text
//! render() ─┬─> queue -> capsfilter(front-left)  -> audioconvert ─┬─> interleave -> wavenc -> [src]
//!           └─> queue -> capsfilter(front-right) -> audioconvert ─┘
//! ```
//!
//! A streaming task calls the callback once per render quantum while the
//! element is `Playing`. Every quantum pulls one buffer per input channel,
//! hands them to the callback together with zeroed output channels, and
//! pushes each output channel into its branch queue.
//!
//! Only stereo is built: two output branches, and exactly two input
//! channels are accepted.

use std::any::Any;
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, ReentrantMutex};
use tracing::{debug, error, info, trace, warn};

use crate::buffer::Buffer;
use crate::caps::{AudioCaps, Caps, ChannelPosition};
use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use crate::graph::{
    CoreError, Element, ElementImpl, FlowReturn, Iteration, LinkCheck, Message, PadSpec, Pipeline,
    PropertyValue, Query, Registry, State, StateChange, StateChangeReturn, StreamStatus,
    StreamingTask, TaskState, WeakElement,
};
use crate::input::{ChannelInput, LiveInputPipeline, SilentInput};
use crate::render::RenderHandle;

/// Factory name the source is registered under.
pub const WEB_AUDIO_SRC_FACTORY: &str = "webkitwebaudiosrc";

/// Output channels rendered per quantum.
// TODO: honour the output channel count requested by the device
const OUTPUT_CHANNELS: usize = 2;
const INPUT_CHANNELS: usize = 2;

/// Where the render callback's input channels come from.
pub enum SourceInput {
    /// A [`LiveInputPipeline`] built on the configured capture source
    Live,
    /// Stereo silence paced at the render rate
    Silent,
    Custom(Box<dyn ChannelInput>),
}

/// Construction-time parameters of the source.
pub struct WebAudioSrcSettings {
    pub sample_rate: f64,
    /// Frames per render quantum
    pub frames: usize,
    pub handler: Option<RenderHandle>,
    pub input: SourceInput,
    pub config: BridgeConfig,
    /// Where the internal elements are made from
    pub registry: Registry,
}

impl WebAudioSrcSettings {
    pub fn new(sample_rate: f64, handler: Option<RenderHandle>) -> Self {
        let config = BridgeConfig::default();
        Self {
            sample_rate,
            frames: config.source.frames,
            handler,
            input: SourceInput::Silent,
            config,
            registry: Registry::global().clone(),
        }
    }

    pub fn with_input(mut self, input: SourceInput) -> Self {
        self.input = input;
        self
    }

    /// Use `config`, taking the quantum size from it.
    pub fn with_config(mut self, config: BridgeConfig) -> Self {
        self.frames = config.source.frames;
        self.config = config;
        self
    }

    pub fn with_frames(mut self, frames: usize) -> Self {
        self.frames = frames;
        self
    }

    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }
}

impl Default for WebAudioSrcSettings {
    fn default() -> Self {
        let config = BridgeConfig::default();
        Self::new(config.source.sample_rate, None)
    }
}

/// What a single streaming iteration did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderOutcome {
    Rendered,
    NoHandler,
    InputNotReady,
    /// The input returned this many channels instead of two; nothing was
    /// rendered or pushed
    UnsupportedChannelCount(usize),
    /// The channel branches could not be built
    NotAssembled,
}

impl RenderOutcome {
    fn iteration(self) -> Iteration {
        match self {
            RenderOutcome::Rendered => Iteration::Continue,
            _ => Iteration::Idle,
        }
    }
}

/// State shared between the element and its streaming task.
struct SrcShared {
    frames: usize,
    handler: Option<RenderHandle>,
    input: OnceLock<Box<dyn ChannelInput>>,
    /// Head queue of every output branch, by channel index
    branches: OnceLock<Vec<Element>>,
    element: OnceLock<WeakElement>,
    renders: AtomicU64,
    warned_no_handler: AtomicBool,
}

impl SrcShared {
    fn element(&self) -> Option<Element> {
        self.element.get().and_then(WeakElement::upgrade)
    }

    fn post_stream_status(&self, status: StreamStatus) {
        if let Some(element) = self.element() {
            element.post_message(Message::stream_status(element.name(), status, element.name()));
        }
    }

    fn render_quantum(&self) -> RenderOutcome {
        let Some(handler) = &self.handler else {
            if !self.warned_no_handler.swap(true, Ordering::Relaxed) {
                warn!("no render handler, skipping quanta");
            }
            return RenderOutcome::NoHandler;
        };
        let (Some(input), Some(branches)) = (self.input.get(), self.branches.get()) else {
            return RenderOutcome::NotAssembled;
        };
        if !input.is_ready() {
            trace!("input not ready");
            return RenderOutcome::InputNotReady;
        }

        let mut buffers = input.pull_channel_buffers();
        if buffers.len() != INPUT_CHANNELS {
            warn!(channels = buffers.len(), "only stereo input is supported, skipping quantum");
            return RenderOutcome::UnsupportedChannelCount(buffers.len());
        }
        // channel sinks hand buffers over newest first
        buffers.sort_by_key(|buffer| {
            buffer
                .audio_caps()
                .map_or(true, |caps| caps.first_position() != ChannelPosition::FrontLeft)
        });

        let frames = self.frames;
        let planes: Vec<Cow<'_, [f32]>> =
            buffers.iter().map(|b| fit_to_quantum(b.samples(), frames)).collect();
        let inputs: Vec<&[f32]> = planes.iter().map(AsRef::as_ref).collect();
        let mut outputs = vec![vec![0.0f32; frames]; branches.len()];
        {
            let mut channels: Vec<&mut [f32]> = outputs.iter_mut().map(Vec::as_mut_slice).collect();
            handler.render(&inputs, &mut channels, frames);
        }
        self.renders.fetch_add(1, Ordering::AcqRel);

        for (channel, samples) in outputs.into_iter().enumerate().rev() {
            let queue = &branches[channel];
            let ret = queue.chain("sink", Buffer::from_samples(samples));
            if !ret.is_ok() {
                self.push_failed(queue, ret);
            }
        }
        RenderOutcome::Rendered
    }

    fn push_failed(&self, queue: &Element, ret: FlowReturn) {
        warn!(queue = %queue.name(), ?ret, "failed to push rendered channel");
        if let Some(element) = self.element() {
            element.post_error(
                CoreError::Pad,
                "Internal WebAudioSrc error",
                Some(format!("Failed to push buffer on {}:sink: {ret:?}", queue.name())),
            );
        }
    }
}

/// Trim or zero-pad an input channel to one quantum.
fn fit_to_quantum(samples: &[f32], frames: usize) -> Cow<'_, [f32]> {
    if samples.len() == frames {
        return Cow::Borrowed(samples);
    }
    let mut fitted = samples[..samples.len().min(frames)].to_vec();
    fitted.resize(frames, 0.0);
    Cow::Owned(fitted)
}

/// Forwards whatever reaches its sink pad out of the owner's `src` pad.
struct GhostPad {
    owner: WeakElement,
}

impl ElementImpl for GhostPad {
    fn static_pads(&self) -> Vec<PadSpec> {
        vec![PadSpec::sink("sink")]
    }

    fn chain(&self, _element: &Element, _pad: &str, buffer: Buffer) -> FlowReturn {
        match self.owner.upgrade() {
            Some(owner) => owner.push("src", buffer),
            None => FlowReturn::Flushing,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Inputs for the second construction phase.
struct Pending {
    input: SourceInput,
    config: BridgeConfig,
    registry: Registry,
}

struct Assembly {
    bin: Pipeline,
    /// Factories that could not be instantiated
    missing: Vec<String>,
    complete: bool,
}

pub struct WebAudioSrc {
    sample_rate: f64,
    shared: Arc<SrcShared>,
    /// Shared with the task; held across iterations and task state changes
    stream_lock: Arc<ReentrantMutex<()>>,
    task: StreamingTask,
    pending: Mutex<Option<Pending>>,
    assembly: OnceLock<Assembly>,
}

impl WebAudioSrc {
    /// Create a source element named `name`.
    pub fn new_element(name: &str, settings: WebAudioSrcSettings) -> Element {
        Element::new(WEB_AUDIO_SRC_FACTORY, name, Self::new(name, settings))
    }

    fn new(name: &str, settings: WebAudioSrcSettings) -> Self {
        let frames = settings.frames.max(1);
        let shared = Arc::new(SrcShared {
            frames,
            handler: settings.handler,
            input: OnceLock::new(),
            branches: OnceLock::new(),
            element: OnceLock::new(),
            renders: AtomicU64::new(0),
            warned_no_handler: AtomicBool::new(false),
        });

        let stream_lock = Arc::new(ReentrantMutex::new(()));
        let body = {
            let shared = shared.clone();
            move || shared.render_quantum().iteration()
        };
        let status = {
            let shared = shared.clone();
            move |status| shared.post_stream_status(status)
        };
        let task = StreamingTask::with_status(
            &format!("{name}:render"),
            stream_lock.clone(),
            settings.config.source.idle_backoff(frames, settings.sample_rate),
            body,
            status,
        );

        Self {
            sample_rate: settings.sample_rate,
            shared,
            stream_lock,
            task,
            pending: Mutex::new(Some(Pending {
                input: settings.input,
                config: settings.config,
                registry: settings.registry,
            })),
            assembly: OnceLock::new(),
        }
    }

    /// Run one iteration of the streaming loop on the calling thread.
    pub fn render_quantum(&self) -> RenderOutcome {
        let _stream = self.stream_lock.lock();
        self.shared.render_quantum()
    }

    /// How many times the render callback has been invoked.
    pub fn render_count(&self) -> u64 {
        self.shared.renders.load(Ordering::Acquire)
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn frames(&self) -> usize {
        self.shared.frames
    }

    pub fn task_state(&self) -> TaskState {
        self.task.state()
    }

    pub fn input(&self) -> Option<&dyn ChannelInput> {
        self.shared.input.get().map(|input| input.as_ref())
    }

    /// The bin holding the channel branches, multiplexer and encoder.
    pub fn internal_bin(&self) -> Option<&Pipeline> {
        self.assembly.get().map(|a| &a.bin)
    }

    /// Factories that were unavailable when the internals were built.
    pub fn missing_elements(&self) -> &[String] {
        self.assembly.get().map(|a| a.missing.as_slice()).unwrap_or(&[])
    }

    fn assemble(&self, element: &Element, config: &BridgeConfig, registry: &Registry) -> Assembly {
        let bin = Pipeline::new_internal(&format!("{}-bin", element.name()), element);
        let mut missing = Vec::new();
        let mut make = |factory: &str| {
            let made = registry.make(factory, None);
            if made.is_none() {
                missing.push(factory.to_owned());
            }
            made
        };

        let interleave = make("interleave");
        let encoder = make("wavenc");
        let (Some(interleave), Some(encoder)) = (interleave, encoder) else {
            return Assembly {
                bin,
                missing,
                complete: false,
            };
        };

        let ghost = Element::new(
            "ghostpad",
            &format!("{}-ghost", element.name()),
            GhostPad {
                owner: element.downgrade(),
            },
        );
        let head = bin
            .add_many(&[&interleave, &encoder, &ghost])
            .and_then(|_| interleave.link(&encoder))
            .and_then(|_| encoder.link_pads(Some("src"), &ghost, Some("sink"), LinkCheck::Nothing));
        if let Err(e) = head {
            error!(element = %element.name(), "failed to link encoder: {e}");
            return Assembly {
                bin,
                missing,
                complete: false,
            };
        }

        let mut queues = Vec::with_capacity(OUTPUT_CHANNELS);
        for channel in 0..OUTPUT_CHANNELS {
            let (Some(queue), Some(filter), Some(convert)) =
                (make("queue"), make("capsfilter"), make("audioconvert"))
            else {
                break;
            };
            let position = ChannelPosition::for_web_audio_index(channel);
            if let Err(e) = queue.set_property("max-size-buffers", config.source.queue_max_buffers) {
                warn!(channel, "cannot bound branch queue: {e}");
            }
            if let Err(e) = filter.set_property("caps", Caps::Raw(AudioCaps::mono(self.sample_rate, position))) {
                warn!(channel, "cannot set branch caps: {e}");
            }

            let linked = bin
                .add_many(&[&queue, &filter, &convert])
                .and_then(|_| Element::link_many(&[&queue, &filter, &convert]))
                .and_then(|_| convert.link_pads(Some("src"), &interleave, None, LinkCheck::Nothing));
            if let Err(e) = linked {
                error!(element = %element.name(), channel, "failed to build channel branch: {e}");
                break;
            }
            debug!(element = %element.name(), channel, position = position.name(), "channel branch ready");
            queues.push(queue);
        }

        let complete = queues.len() == OUTPUT_CHANNELS;
        if complete {
            let _ = self.shared.branches.set(queues);
        }
        Assembly {
            bin,
            missing,
            complete,
        }
    }

    fn report_missing(&self, element: &Element, assembly: &Assembly) {
        for factory in &assembly.missing {
            element.post_message(Message::missing_element(element.name(), factory));
            element.post_error(
                CoreError::MissingPlugin,
                &format!("Missing element '{factory}'"),
                Some(format!("{} cannot be assembled without {factory}", element.name())),
            );
        }
        if assembly.missing.is_empty() {
            element.post_error(CoreError::Failed, "Could not assemble WebAudioSrc", None);
        }
    }
}

impl ElementImpl for WebAudioSrc {
    fn static_pads(&self) -> Vec<PadSpec> {
        vec![PadSpec::src("src").with_caps(Caps::Wav)]
    }

    fn constructed(&self, element: &Element) {
        let _ = self.shared.element.set(element.downgrade());
        let Some(pending) = self.pending.lock().take() else {
            return;
        };

        let input: Box<dyn ChannelInput> = match pending.input {
            SourceInput::Live => Box::new(LiveInputPipeline::new(
                self.sample_rate,
                self.shared.frames,
                &pending.config,
                &pending.registry,
            )),
            SourceInput::Silent => Box::new(SilentInput::new(self.sample_rate, self.shared.frames)),
            SourceInput::Custom(input) => input,
        };
        let _ = self.shared.input.set(input);

        let assembly = self.assemble(element, &pending.config, &pending.registry);
        if !assembly.complete {
            warn!(element = %element.name(), missing = ?assembly.missing, "internals incomplete");
        }
        let _ = self.assembly.set(assembly);
    }

    fn change_state(&self, element: &Element, transition: StateChange) -> StateChangeReturn {
        let Some(assembly) = self.assembly.get() else {
            return StateChangeReturn::Failure;
        };
        if transition == StateChange::NullToReady && !assembly.complete {
            self.report_missing(element, assembly);
            return StateChangeReturn::Failure;
        }

        // stop rendering before the internals wind down
        if matches!(transition, StateChange::PlayingToPaused | StateChange::PausedToReady)
            && !self.task.join()
        {
            return StateChangeReturn::Failure;
        }

        let ret = {
            let _stream = self.stream_lock.lock();
            assembly.bin.set_state(transition.next())
        };
        if ret.is_failure() {
            return StateChangeReturn::Failure;
        }

        match transition {
            StateChange::ReadyToPaused | StateChange::PlayingToPaused => StateChangeReturn::NoPreroll,
            StateChange::PausedToPlaying => {
                let _stream = self.stream_lock.lock();
                if self.task.start() {
                    info!(element = %element.name(), "rendering");
                    StateChangeReturn::Success
                } else {
                    element.post_error(CoreError::StateChange, "Could not start the render task", None);
                    StateChangeReturn::Failure
                }
            }
            _ => StateChangeReturn::Success,
        }
    }

    fn query(&self, _element: &Element, query: &mut Query) -> bool {
        match query {
            Query::Latency { .. } => self
                .shared
                .input
                .get()
                .is_some_and(|input| input.send_query(query)),
            Query::Caps { .. } => false,
        }
    }

    fn set_property(&self, element: &Element, name: &str, _value: PropertyValue) -> Result<()> {
        match name {
            "rate" | "frames" | "handler" => Err(Error::InvalidProperty {
                property: name.to_owned(),
                reason: "only settable at construction".into(),
            }),
            _ => Err(Error::UnknownProperty {
                element: element.name().to_owned(),
                property: name.to_owned(),
            }),
        }
    }

    fn property(&self, name: &str) -> Option<PropertyValue> {
        match name {
            "rate" => Some(PropertyValue::Float(self.sample_rate)),
            "frames" => Some(PropertyValue::UInt(self.shared.frames as u64)),
            _ => None,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for WebAudioSrc {
    fn drop(&mut self) {
        self.task.join();
        if let Some(assembly) = self.assembly.get() {
            assembly.bin.set_state(State::Null);
        }
    }
}

/// Register the source factory. Sources made through the registry render
/// silence until they are given a handler, so devices build theirs with
/// [`WebAudioSrc::new_element`].
pub fn register(registry: &Registry) {
    registry.register(WEB_AUDIO_SRC_FACTORY, |name| {
        WebAudioSrc::new_element(name, WebAudioSrcSettings::default())
    });
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;
    use crate::elements::fakesink::FakeSink;
    use crate::graph::MessageKind;

    struct FixedInput {
        buffers: Vec<Buffer>,
    }

    impl FixedInput {
        fn channels(positions: &[(ChannelPosition, f32)], frames: usize) -> Self {
            let buffers = positions
                .iter()
                .map(|&(position, value)| {
                    Buffer::from_samples(vec![value; frames])
                        .with_caps(Arc::new(Caps::Raw(AudioCaps::mono(44100.0, position))))
                })
                .collect();
            Self { buffers }
        }
    }

    impl ChannelInput for FixedInput {
        fn is_ready(&self) -> bool {
            true
        }

        fn pull_channel_buffers(&self) -> Vec<Buffer> {
            self.buffers.clone()
        }

        fn send_query(&self, _query: &mut Query) -> bool {
            false
        }
    }

    fn counting_handler(count: &Arc<AtomicUsize>) -> RenderHandle {
        let count = count.clone();
        Arc::new(move |_inputs: &[&[f32]], _outputs: &mut [&mut [f32]], _frames: usize| {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn with_sink(src: &Element) -> (Pipeline, Element) {
        let pipeline = Pipeline::new("websrc-test");
        let sink = Element::new("fakesink", "sink", FakeSink::default());
        pipeline.add_many(&[src, &sink]).unwrap();
        src.link_pads(Some("src"), &sink, Some("sink"), LinkCheck::Nothing).unwrap();
        (pipeline, sink)
    }

    #[test]
    fn inputs_reach_the_callback_in_channel_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = seen.clone();
        let handler: RenderHandle = Arc::new(move |inputs: &[&[f32]], outputs: &mut [&mut [f32]], frames: usize| {
            record.lock().extend(inputs.iter().map(|channel| channel[0]));
            for (input, output) in inputs.iter().zip(outputs.iter_mut()) {
                output[..frames].copy_from_slice(&input[..frames]);
            }
        });
        let input = FixedInput::channels(
            &[(ChannelPosition::FrontRight, -1.0), (ChannelPosition::FrontLeft, 1.0)],
            64,
        );
        let settings = WebAudioSrcSettings::new(44100.0, Some(handler))
            .with_frames(64)
            .with_input(SourceInput::Custom(Box::new(input)));
        let src = WebAudioSrc::new_element("websrc", settings);
        let (pipeline, sink) = with_sink(&src);
        assert_eq!(pipeline.set_state(State::Paused), StateChangeReturn::NoPreroll);

        let imp = src.imp_as::<WebAudioSrc>().unwrap();
        assert_eq!(imp.render_quantum(), RenderOutcome::Rendered);
        assert_eq!(*seen.lock(), [1.0, -1.0]);

        let fake = sink.imp_as::<FakeSink>().unwrap();
        assert!(fake.wait_for(1, Duration::from_secs(2)));
        let encoded = fake.received()[0].clone();
        let bytes = encoded.bytes().unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        // first two samples are left then right
        let data = crate::elements::wav::find_data_offset(bytes).unwrap().unwrap();
        let left = f32::from_le_bytes(bytes[data..data + 4].try_into().unwrap());
        let right = f32::from_le_bytes(bytes[data + 4..data + 8].try_into().unwrap());
        assert_eq!((left, right), (1.0, -1.0));
        pipeline.set_state(State::Null);
    }

    #[test]
    fn non_stereo_input_aborts_the_iteration() {
        let count = Arc::new(AtomicUsize::new(0));
        let input = FixedInput::channels(
            &[
                (ChannelPosition::FrontLeft, 0.0),
                (ChannelPosition::FrontRight, 0.0),
                (ChannelPosition::FrontLeft, 0.0),
            ],
            128,
        );
        let settings = WebAudioSrcSettings::new(44100.0, Some(counting_handler(&count)))
            .with_input(SourceInput::Custom(Box::new(input)));
        let src = WebAudioSrc::new_element("websrc", settings);
        let (pipeline, sink) = with_sink(&src);
        pipeline.set_state(State::Paused);

        let imp = src.imp_as::<WebAudioSrc>().unwrap();
        assert_eq!(imp.render_quantum(), RenderOutcome::UnsupportedChannelCount(3));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(imp.render_count(), 0);
        assert!(!sink.imp_as::<FakeSink>().unwrap().wait_for(1, Duration::from_millis(100)));
        pipeline.set_state(State::Null);
    }

    #[test]
    fn missing_handler_is_skipped() {
        let src = WebAudioSrc::new_element("websrc", WebAudioSrcSettings::default());
        let imp = src.imp_as::<WebAudioSrc>().unwrap();
        assert_eq!(imp.render_quantum(), RenderOutcome::NoHandler);
        assert_eq!(imp.frames(), 128);
    }

    #[test]
    fn renders_only_while_playing() {
        let count = Arc::new(AtomicUsize::new(0));
        let settings = WebAudioSrcSettings::new(44100.0, Some(counting_handler(&count)));
        let src = WebAudioSrc::new_element("websrc", settings);
        let (pipeline, _sink) = with_sink(&src);
        let imp = src.imp_as::<WebAudioSrc>().unwrap();

        pipeline.set_state(State::Paused);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        assert_eq!(pipeline.set_state(State::Playing), StateChangeReturn::Success);
        assert_eq!(imp.task_state(), TaskState::Started);
        while count.load(Ordering::SeqCst) < 3 {
            std::thread::sleep(Duration::from_millis(1));
        }

        pipeline.set_state(State::Paused);
        assert_eq!(imp.task_state(), TaskState::Stopped);
        let stopped_at = count.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::SeqCst), stopped_at);
        assert_eq!(imp.render_count(), stopped_at as u64);
        pipeline.set_state(State::Null);
    }

    #[test]
    fn missing_multiplexer_fails_ready() {
        let registry = Registry::with_builtins();
        registry.unregister("interleave");
        let settings = WebAudioSrcSettings::default().with_registry(registry);
        let src = WebAudioSrc::new_element("websrc", settings);
        let pipeline = Pipeline::new("websrc-missing");
        pipeline.add(&src).unwrap();

        assert_eq!(pipeline.set_state(State::Ready), StateChangeReturn::Failure);
        assert_eq!(src.current_state(), State::Null);
        let imp = src.imp_as::<WebAudioSrc>().unwrap();
        assert_eq!(imp.missing_elements(), ["interleave".to_owned()]);

        let missing = pipeline.bus().timed_pop_filtered(Duration::from_secs(1), |m| {
            matches!(&m.kind, MessageKind::MissingElement { factory } if factory == "interleave")
        });
        assert!(missing.is_some());
    }

    #[test]
    fn latency_is_answered_by_the_input() {
        let src = WebAudioSrc::new_element("websrc", WebAudioSrcSettings::new(48000.0, None).with_frames(480));
        let mut query = Query::latency();
        assert!(src.query(&mut query));
        assert!(matches!(query, Query::Latency { live: true, min, .. } if min == Duration::from_millis(10)));
    }

    #[test]
    fn short_inputs_are_padded() {
        assert_eq!(fit_to_quantum(&[1.0, 2.0], 4).as_ref(), [1.0, 2.0, 0.0, 0.0]);
        assert_eq!(fit_to_quantum(&[1.0, 2.0, 3.0], 2).as_ref(), [1.0, 2.0]);
        assert!(matches!(fit_to_quantum(&[1.0], 1), Cow::Borrowed(_)));
    }
}
