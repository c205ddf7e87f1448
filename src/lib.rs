//! webaudio-bridge - Real-time bridge between a Web Audio render callback and
//! an audio pipeline graph
//!
//! The host's audio engine hands over a render callback; the bridge calls it
//! once per render quantum from a dedicated streaming thread and plays the
//! result through the platform's output device:
//!
//! ```text
//! capture -> LiveInputPipeline --(one buffer per channel)--> render callback
//!                                                                  |
//!                   OutputDevice: WebAudioSrc -> wavparse -> audioconvert -> sink
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use webaudio_bridge::{BridgeConfig, PlatformClient, RenderHandle, DEFAULT_CAPTURE_DEVICE};
//!
//! let client = PlatformClient::new(BridgeConfig::default());
//! let passthrough: RenderHandle = Arc::new(|inputs: &[&[f32]], outputs: &mut [&mut [f32]], _frames: usize| {
//!     for (input, output) in inputs.iter().zip(outputs.iter_mut()) {
//!         output.copy_from_slice(input);
//!     }
//! });
//!
//! let device = client.create_audio_device(DEFAULT_CAPTURE_DEVICE, 128, 2, 2, 44100.0, passthrough);
//! device.start();
//! ```
//!
//! Modules:
//! - [`graph`]: elements, pads, pipelines, bus and element registry
//! - [`elements`]: the built-in processing stages
//! - [`input`]: live capture split into per-channel buffers
//! - [`source`]: the Web Audio source element and its streaming task
//! - [`device`]: the output device assembled around the source

pub mod buffer;
pub mod bus_handler;
pub mod caps;
pub mod config;
pub mod device;
pub mod elements;
pub mod error;
pub mod graph;
pub mod input;
pub mod logging;
pub mod platform;
pub mod render;
pub mod source;

pub use buffer::Buffer;
pub use bus_handler::BusMessageHandler;
pub use caps::{AudioCaps, Caps, ChannelPosition};
pub use config::BridgeConfig;
pub use device::{AudioDevice, OutputDevice, DEFAULT_CAPTURE_DEVICE};
pub use error::{Error, Result};
pub use input::{ChannelInput, LiveInputPipeline, SilentInput};
pub use platform::{initialize_audio_backend, AudioBus, PlatformClient};
pub use render::{RenderCallback, RenderHandle};
pub use source::{RenderOutcome, SourceInput, WebAudioSrc, WebAudioSrcSettings, WEB_AUDIO_SRC_FACTORY};
