//! Audio output device fed by a render callback.
//!
//! ```text
//! webkitwebaudiosrc -> wavparse ~> audioconvert -> autoaudiosink
//! ```
//!
//! The parser only exposes its source pad once it has read the stream
//! header, so the converter and sink (`~>`) are added from its `pad-added`
//! handler. Until then, and for good if the sink cannot be created, the
//! device has no usable sink and [`OutputDevice::stop`] does nothing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::bus_handler::BusMessageHandler;
use crate::config::{BridgeConfig, SinkTuning};
use crate::graph::{
    Element, LinkCheck, Pipeline, PropertyValue, Registry, SignalHandlerId, State,
    StateChangeReturn, WeakPipeline,
};
use crate::render::RenderHandle;
use crate::source::{SourceInput, WebAudioSrc, WebAudioSrcSettings};

/// Input device id selecting the default capture device. Any other id
/// renders without live input.
pub const DEFAULT_CAPTURE_DEVICE: &str = "autoaudiosrc;default";

/// What the host's audio engine drives.
pub trait AudioDevice: Send {
    fn start(&self);
    fn stop(&self);
    fn sample_rate(&self) -> f64;
}

struct DeviceShared {
    pipeline: WeakPipeline,
    registry: Registry,
    tuning: SinkTuning,
    sink_available: AtomicBool,
    sink: Mutex<Option<Element>>,
}

impl DeviceShared {
    /// Add converter and sink behind the decoder's new `pad`.
    fn finish_building_pipeline_after_decoder_pad_ready(&self, decoder: &Element, pad: &str) {
        let Some(pipeline) = self.pipeline.upgrade() else {
            return;
        };
        let Some(sink) = self.registry.make(&self.tuning.factory, None) else {
            warn!(factory = %self.tuning.factory, "no audio sink, output disabled");
            self.sink_available.store(false, Ordering::Release);
            return;
        };
        self.sink_available.store(true, Ordering::Release);

        if !self.configure_sink_device(&sink) {
            warn!(sink = %sink.name(), "couldn't configure sink device");
        }

        // the sink detects its device on Null -> Ready
        if sink.set_state(State::Ready).is_failure() {
            warn!(sink = %sink.name(), "audio sink failed to open its device");
            sink.set_state(State::Null);
            self.sink_available.store(false, Ordering::Release);
            return;
        }

        let Some(convert) = self.registry.make("audioconvert", None) else {
            error!("audioconvert unavailable, output disabled");
            sink.set_state(State::Null);
            self.sink_available.store(false, Ordering::Release);
            return;
        };

        let linked = pipeline
            .add_many(&[&convert, &sink])
            .and_then(|_| decoder.link_pads(Some(pad), &convert, Some("sink"), LinkCheck::Nothing))
            .and_then(|_| convert.link_pads(Some("src"), &sink, Some("sink"), LinkCheck::Nothing));
        if let Err(e) = linked {
            error!("failed to link audio sink: {e}");
            pipeline.remove(&convert);
            pipeline.remove(&sink);
            self.sink_available.store(false, Ordering::Release);
            return;
        }

        convert.sync_state_with_parent();
        sink.sync_state_with_parent();
        debug!(sink = %sink.name(), pad, "output linked");
        *self.sink.lock() = Some(sink);
    }

    /// Apply the ring buffer tuning to the device wrapped by `sink`.
    fn configure_sink_device(&self, sink: &Element) -> bool {
        let Some(proxy) = sink.child_proxy() else {
            return false;
        };
        if sink.set_state(State::Ready) != StateChangeReturn::Success {
            return false;
        }
        if proxy.children_count() == 0 {
            return false;
        }

        for (name, value) in [
            ("buffer-time", self.tuning.buffer_time_us),
            ("latency-time", self.tuning.latency_time_us),
            ("drift-tolerance", self.tuning.drift_tolerance_us),
        ] {
            if let Err(e) = proxy.set_child_property(0, name, PropertyValue::Int(value)) {
                warn!(sink = %sink.name(), "cannot set {name}: {e}");
                return false;
            }
        }
        debug!(sink = %sink.name(), "sink device configured");
        true
    }
}

/// Plays whatever the render callback produces.
///
/// Construction never fails. A missing decoder leaves the device inert and
/// a missing or broken sink leaves it silent; check
/// [`is_decoder_available`](Self::is_decoder_available) and
/// [`is_audio_sink_available`](Self::is_audio_sink_available).
pub struct OutputDevice {
    input_device_id: String,
    buffer_size: usize,
    sample_rate: f64,
    live_input: bool,
    pipeline: Pipeline,
    source: Option<Element>,
    decoder: Option<Element>,
    pad_added: Option<SignalHandlerId>,
    shared: Arc<DeviceShared>,
}

impl OutputDevice {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        input_device_id: &str,
        buffer_size: usize,
        input_channels: u32,
        output_channels: u32,
        sample_rate: f64,
        handler: RenderHandle,
        config: &BridgeConfig,
        registry: &Registry,
    ) -> Self {
        let live_input = input_device_id == DEFAULT_CAPTURE_DEVICE;
        info!(
            device = input_device_id,
            buffer_size, input_channels, output_channels, sample_rate, live_input,
            "creating output device"
        );
        if input_channels != 2 || output_channels != 2 {
            debug!("requested channel counts are ignored, rendering stereo");
        }

        let pipeline = Pipeline::new("play");
        BusMessageHandler::attach("device", &pipeline);
        let shared = Arc::new(DeviceShared {
            pipeline: pipeline.downgrade(),
            registry: registry.clone(),
            tuning: config.sink.clone(),
            sink_available: AtomicBool::new(false),
            sink: Mutex::new(None),
        });

        let mut device = Self {
            input_device_id: input_device_id.to_owned(),
            buffer_size,
            sample_rate,
            live_input,
            pipeline,
            source: None,
            decoder: None,
            pad_added: None,
            shared,
        };
        device.build(handler, config, registry);
        device
    }

    fn build(&mut self, handler: RenderHandle, config: &BridgeConfig, registry: &Registry) {
        let input = if self.live_input {
            SourceInput::Live
        } else {
            SourceInput::Silent
        };
        let settings = WebAudioSrcSettings::new(self.sample_rate, Some(handler))
            .with_config(config.clone())
            .with_frames(self.buffer_size)
            .with_input(input)
            .with_registry(registry.clone());
        let source = WebAudioSrc::new_element("webaudiosrc", settings);

        let Some(decoder) = registry.make("wavparse", None) else {
            error!("failed to create wavparse element");
            return;
        };

        let shared = self.shared.clone();
        self.pad_added = Some(decoder.connect_pad_added(move |decoder, pad| {
            shared.finish_building_pipeline_after_decoder_pad_ready(decoder, pad);
        }));

        let linked = self
            .pipeline
            .add_many(&[&source, &decoder])
            .and_then(|_| source.link_pads(Some("src"), &decoder, Some("sink"), LinkCheck::Nothing));
        if let Err(e) = linked {
            error!("failed to link source to decoder: {e}");
            return;
        }
        source.sync_state_with_parent();
        decoder.sync_state_with_parent();

        if decoder.has_pad("src") {
            self.shared.finish_building_pipeline_after_decoder_pad_ready(&decoder, "src");
        }
        self.source = Some(source);
        self.decoder = Some(decoder);
    }

    /// Set the pipeline playing. Does nothing without a decoder.
    pub fn start(&self) {
        if self.decoder.is_none() {
            return;
        }
        info!(device = %self.input_device_id, "starting output");
        if self.pipeline.set_state(State::Playing).is_failure() {
            warn!(device = %self.input_device_id, "output failed to start");
        }
    }

    /// Pause the pipeline. Does nothing unless decoder and sink both exist.
    pub fn stop(&self) {
        if self.decoder.is_none() || !self.is_audio_sink_available() {
            return;
        }
        info!(device = %self.input_device_id, "stopping output");
        self.pipeline.set_state(State::Paused);
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn input_device_id(&self) -> &str {
        &self.input_device_id
    }

    /// Whether input channels come from the default capture device.
    pub fn provides_live_input(&self) -> bool {
        self.live_input
    }

    pub fn is_decoder_available(&self) -> bool {
        self.decoder.is_some()
    }

    pub fn is_audio_sink_available(&self) -> bool {
        self.shared.sink_available.load(Ordering::Acquire)
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// The Web Audio source, once linked into the pipeline.
    pub fn source(&self) -> Option<&Element> {
        self.source.as_ref()
    }

    /// The audio sink, once the decoder pad has appeared.
    pub fn sink(&self) -> Option<Element> {
        self.shared.sink.lock().clone()
    }
}

impl AudioDevice for OutputDevice {
    fn start(&self) {
        OutputDevice::start(self)
    }

    fn stop(&self) {
        OutputDevice::stop(self)
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }
}

impl Drop for OutputDevice {
    fn drop(&mut self) {
        if let (Some(decoder), Some(id)) = (&self.decoder, self.pad_added.take()) {
            decoder.disconnect(id);
        }
        self.pipeline.set_state(State::Null);
        self.pipeline.bus().remove_watch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn silence() -> RenderHandle {
        Arc::new(|_: &[&[f32]], _: &mut [&mut [f32]], _: usize| {})
    }

    #[test]
    fn sentinel_id_selects_live_input() {
        let registry = Registry::with_builtins();
        let mut config = BridgeConfig::default();
        config.capture.factory = "audiotestsrc".into();
        let live = OutputDevice::new(DEFAULT_CAPTURE_DEVICE, 1024, 2, 2, 44100.0, silence(), &config, &registry);
        assert!(live.provides_live_input());
        assert!(live.is_decoder_available());

        let plain = OutputDevice::new("file;test.wav", 1024, 2, 2, 44100.0, silence(), &config, &registry);
        assert!(!plain.provides_live_input());
        assert_eq!(plain.sample_rate(), 44100.0);
    }

    #[test]
    fn missing_decoder_leaves_the_device_inert() {
        let registry = Registry::with_builtins();
        registry.unregister("wavparse");
        let device = OutputDevice::new("null", 128, 2, 2, 48000.0, silence(), &BridgeConfig::default(), &registry);
        assert!(!device.is_decoder_available());
        assert!(device.source().is_none());

        device.start();
        assert_eq!(device.pipeline().current_state(), State::Null);
        device.stop();
        assert_eq!(device.pipeline().current_state(), State::Null);
    }

    #[test]
    fn stop_without_sink_does_nothing() {
        let registry = Registry::with_builtins();
        registry.unregister("autoaudiosink");
        let device = OutputDevice::new("null", 128, 2, 2, 48000.0, silence(), &BridgeConfig::default(), &registry);
        assert!(!device.is_audio_sink_available());
        device.stop();
        assert_eq!(device.pipeline().current_state(), State::Null);
    }
}
