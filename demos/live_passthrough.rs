//! Plays the default capture device straight back through the default
//! output device for a few seconds.
//!
//! `cargo run --example live_passthrough --features cpal_device`

use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use webaudio_bridge::{BridgeConfig, PlatformClient, RenderHandle, DEFAULT_CAPTURE_DEVICE};

fn main() {
    webaudio_bridge::logging::init();

    let config = match std::env::args().nth(1) {
        Some(path) => BridgeConfig::load(&path).unwrap_or_else(|e| {
            eprintln!("cannot load {path}: {e}, using defaults");
            BridgeConfig::default()
        }),
        None => BridgeConfig::default(),
    };
    let client = PlatformClient::new(config);

    let passthrough: RenderHandle = Arc::new(|inputs: &[&[f32]], outputs: &mut [&mut [f32]], _frames: usize| {
        for (input, output) in inputs.iter().zip(outputs.iter_mut()) {
            output.copy_from_slice(input);
        }
    });

    let device = client.create_audio_device(DEFAULT_CAPTURE_DEVICE, 128, 2, 2, 44100.0, passthrough);
    device.start();
    sleep(Duration::from_secs(5));
    device.stop();
}
