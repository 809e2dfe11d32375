//! Pluggable per-cycle signal transform
//!
//! This is where actual processing goes. The shipped `Passthrough` only
//! copies its input to its output.

/// A mono block transform run once per audio cycle.
///
/// `process` runs on the real-time audio thread: it must not block, and it
/// should not allocate.
pub trait Transform: Send + 'static {
    /// Called once with the negotiated sample rate, before the audio thread
    /// starts calling `process`.
    fn init(&mut self, _sample_rate: u32) {}

    /// Produce `output.len()` frames from `input`.
    ///
    /// `input` and `output` have the same length, the frame count of this
    /// cycle. Returns `false` if the cycle failed.
    fn process(&mut self, sample_rate: u32, input: &[f32], output: &mut [f32]) -> bool;
}

/// Copies input to output unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl Transform for Passthrough {
    fn init(&mut self, sample_rate: u32) {
        log::debug!("Passthrough initialised at {} Hz", sample_rate);
    }

    #[inline]
    fn process(&mut self, _sample_rate: u32, input: &[f32], output: &mut [f32]) -> bool {
        let n = input.len().min(output.len());
        output[..n].copy_from_slice(&input[..n]);
        output[n..].fill(0.0);
        true
    }
}
