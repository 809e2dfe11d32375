//! The per-cycle process callback
//!
//! Each playback callback:
//! 1. picks this cycle's mono input, either live capture or the next window
//!    of the playback buffer
//! 2. hands input and output scratch to the transform
//! 3. writes the mono result to the wired device channels
//!
//! Nothing here locks or logs. Scratch buffers only grow when the device
//! hands over a larger cycle than seen before.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use cpal::{FromSample, Sample};

use super::bridge::CaptureConsumer;
use super::buffer::AudioBuffer;
use super::transform::Transform;
use super::window::{WindowOrder, WindowState};

/// Frames to preallocate for the scratch buffers
const SCRATCH_FRAMES: usize = 8192;

/// Where a cycle's input comes from
pub enum CycleInput {
    /// Live samples bridged from the capture stream
    Capture(CaptureConsumer),
    /// Windows of the double-buffered playback buffer
    File {
        buffer: Arc<AudioBuffer>,
        window: Arc<WindowState>,
        order: WindowOrder,
    },
}

/// Counters published by the audio thread
#[derive(Default)]
pub struct CycleStats {
    cycles: AtomicU64,
    failures: AtomicU64,
}

impl CycleStats {
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Cycles in which the transform reported failure
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

pub struct ProcessCycle {
    source: CycleInput,
    transform: Box<dyn Transform>,
    sample_rate: u32,
    input: Vec<f32>,
    output: Vec<f32>,
    wired: Arc<AtomicUsize>,
    stats: Arc<CycleStats>,
}

impl ProcessCycle {
    pub fn new(source: CycleInput, transform: Box<dyn Transform>, sample_rate: u32) -> Self {
        Self {
            source,
            transform,
            sample_rate,
            input: vec![0.0; SCRATCH_FRAMES],
            output: vec![0.0; SCRATCH_FRAMES],
            wired: Arc::new(AtomicUsize::new(0)),
            stats: Arc::new(CycleStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<CycleStats> {
        Arc::clone(&self.stats)
    }

    /// Number of device channels the mono output is connected to.
    ///
    /// Starts at 0 (unconnected, silent output) until the session wires it.
    pub fn wiring(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.wired)
    }

    /// Run the transform for one cycle of `nframes` frames.
    ///
    /// The result is left in `output()`.
    pub fn run(&mut self, nframes: usize) -> bool {
        if self.input.len() < nframes {
            self.input.resize(nframes, 0.0);
            self.output.resize(nframes, 0.0);
        }
        let input = &mut self.input[..nframes];

        match &mut self.source {
            CycleInput::Capture(consumer) => {
                consumer.pop_into(input);
            }
            CycleInput::File {
                buffer,
                window,
                order,
            } => {
                let advance = window.advance(nframes);
                buffer.read_into(order.offset(advance), input);
            }
        }

        let ok = self.transform.process(
            self.sample_rate,
            &self.input[..nframes],
            &mut self.output[..nframes],
        );

        self.stats.cycles.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.stats.failures.fetch_add(1, Ordering::Relaxed);
        }
        ok
    }

    /// Output of the most recent `run`
    pub fn output(&self, nframes: usize) -> &[f32] {
        &self.output[..nframes.min(self.output.len())]
    }

    /// Run one cycle for an interleaved device buffer and write the result
    /// to every wired channel.
    pub fn render<T>(&mut self, data: &mut [T], channels: usize) -> bool
    where
        T: Sample + FromSample<f32>,
    {
        let channels = channels.max(1);
        let nframes = data.len() / channels;
        let ok = self.run(nframes);
        let wired = self.wired.load(Ordering::Relaxed);
        write_interleaved(self.output(nframes), data, channels, wired);
        ok
    }
}

/// Spread a mono block over the first `wired` channels of an interleaved
/// buffer, silencing the rest.
pub fn write_interleaved<T>(mono: &[f32], data: &mut [T], channels: usize, wired: usize)
where
    T: Sample + FromSample<f32>,
{
    for (frame, &sample) in data.chunks_mut(channels).zip(mono) {
        for (ch, slot) in frame.iter_mut().enumerate() {
            *slot = if ch < wired {
                T::from_sample(sample)
            } else {
                T::EQUILIBRIUM
            };
        }
    }
}

/// Sum the first `wired` channels of each interleaved frame into one sample.
///
/// Several capture ports connected to one input port are mixed by summing.
pub fn mix_down<T>(data: &[T], channels: usize, wired: usize, mut emit: impl FnMut(f32))
where
    T: Sample,
    f32: FromSample<T>,
{
    for frame in data.chunks(channels.max(1)) {
        let sum = frame
            .iter()
            .take(wired)
            .fold(0.0_f32, |acc, &s| acc + f32::from_sample(s));
        emit(sum);
    }
}
