//! Shared sample storage for file playback
//!
//! The feeder thread writes decoded samples into one half of the buffer while
//! the audio callback reads windows out of the other half. Samples are stored
//! as `f32` bits in `AtomicU32` cells, so both sides can touch the buffer at
//! the same time without locks and without undefined behaviour. Which half is
//! safe to write is decided by the window index (see `window.rs`), not by
//! this type.

use std::sync::atomic::{AtomicU32, Ordering};

/// Default capacity of the playback buffer in samples
pub const DEFAULT_CAPACITY: usize = 1 << 16;

/// Fixed-capacity, heap-allocated sample buffer shared by the feeder and the
/// audio callback.
pub struct AudioBuffer {
    samples: Box<[AtomicU32]>,
}

impl AudioBuffer {
    /// Create a zero-filled buffer holding `capacity` samples
    pub fn new(capacity: usize) -> Self {
        let samples = (0..capacity)
            .map(|_| AtomicU32::new(0.0_f32.to_bits()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { samples }
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    /// Copy `samples` into the buffer starting at `offset`.
    ///
    /// Samples that would land past the end are discarded. Returns the number
    /// of samples written.
    pub fn write(&self, offset: usize, samples: &[f32]) -> usize {
        let Some(dest) = self.samples.get(offset..) else {
            return 0;
        };
        let count = dest.len().min(samples.len());
        for (cell, &sample) in dest.iter().zip(&samples[..count]) {
            cell.store(sample.to_bits(), Ordering::Relaxed);
        }
        count
    }

    /// Copy samples starting at `offset` into `out`.
    ///
    /// This is allocation-free and safe to call from audio callbacks. Any part
    /// of `out` that falls past the end of the buffer is set to silence.
    /// Returns the number of samples actually copied from the buffer.
    #[inline]
    pub fn read_into(&self, offset: usize, out: &mut [f32]) -> usize {
        let src = self.samples.get(offset..).unwrap_or(&[]);
        let count = src.len().min(out.len());
        for (slot, cell) in out.iter_mut().zip(&src[..count]) {
            *slot = f32::from_bits(cell.load(Ordering::Relaxed));
        }
        out[count..].fill(0.0);
        count
    }
}
