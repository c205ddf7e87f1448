//! The host's audio rendering hook.

use std::sync::Arc;

/// Fills one render quantum of output.
///
/// `inputs` holds one slice per input channel, front-left first. Devices
/// without live input pass silence on both channels. `outputs` holds one
/// zeroed slice per output channel. Every slice holds `frames` samples.
///
/// Called from the real-time streaming thread: implementations should not
/// block or allocate.
pub trait RenderCallback: Send + Sync {
    fn render(&self, inputs: &[&[f32]], outputs: &mut [&mut [f32]], frames: usize);
}

impl<F> RenderCallback for F
where
    F: Fn(&[&[f32]], &mut [&mut [f32]], usize) + Send + Sync,
{
    fn render(&self, inputs: &[&[f32]], outputs: &mut [&mut [f32]], frames: usize) {
        self(inputs, outputs, frames)
    }
}

/// Shared handle to a render callback. The source element keeps the
/// callback alive for as long as it may be invoked.
pub type RenderHandle = Arc<dyn RenderCallback>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_render() {
        let gain: RenderHandle = Arc::new(|inputs: &[&[f32]], outputs: &mut [&mut [f32]], frames: usize| {
            for (input, output) in inputs.iter().zip(outputs.iter_mut()) {
                for i in 0..frames {
                    output[i] = input[i] * 0.5;
                }
            }
        });

        let left = [1.0f32; 4];
        let mut out = [0.0f32; 4];
        gain.render(&[&left], &mut [&mut out], 4);
        assert_eq!(out, [0.5; 4]);
    }
}
