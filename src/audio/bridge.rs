//! Lock-free bridge from the capture stream to the process callback
//!
//! cpal delivers capture and playback in two separate callbacks. The capture
//! callback is the single producer, the playback callback (which runs the
//! transform) is the single consumer. Both halves use the `ringbuf` SPSC ring
//! so neither callback ever blocks on the other.

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// Cycles of captured audio the consumer lets queue up before it skips ahead
const BACKLOG_CYCLES: usize = 2;

/// Counters shared by both halves of the bridge
#[derive(Default)]
pub struct BridgeStats {
    dropped: AtomicU64,
    missing: AtomicU64,
    skipped: AtomicU64,
}

impl BridgeStats {
    /// Samples the capture side could not push because the ring was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Samples the playback side had to replace with silence
    pub fn missing(&self) -> u64 {
        self.missing.load(Ordering::Relaxed)
    }

    /// Stale samples the playback side discarded to keep latency bounded
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }
}

/// Producer half (owned by the capture callback)
pub struct CaptureProducer {
    producer: HeapProd<f32>,
    stats: Arc<BridgeStats>,
}

impl CaptureProducer {
    /// Push one captured sample. Dropped if the ring is full.
    #[inline]
    pub fn push(&mut self, sample: f32) {
        if self.producer.try_push(sample).is_err() {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Consumer half (owned by the process callback)
pub struct CaptureConsumer {
    consumer: HeapCons<f32>,
    stats: Arc<BridgeStats>,
}

impl CaptureConsumer {
    /// Fill `out` with captured samples, zero-filling on underrun.
    ///
    /// A backlog of more than two cycles is dropped oldest-first before
    /// reading, so clock drift cannot leave the ring full for the rest of
    /// the run. Returns the number of real samples taken from the ring.
    #[inline]
    pub fn pop_into(&mut self, out: &mut [f32]) -> usize {
        let backlog = self.consumer.occupied_len();
        let limit = out.len().saturating_mul(BACKLOG_CYCLES);
        if backlog > limit {
            let skipped = self.consumer.skip(backlog - limit);
            self.stats
                .skipped
                .fetch_add(skipped as u64, Ordering::Relaxed);
        }

        let count = self.consumer.pop_slice(out);
        if count < out.len() {
            out[count..].fill(0.0);
            self.stats
                .missing
                .fetch_add((out.len() - count) as u64, Ordering::Relaxed);
        }
        count
    }
}

/// Create a capture bridge holding up to `capacity` mono samples
pub fn capture_bridge(capacity: usize) -> (CaptureProducer, CaptureConsumer, Arc<BridgeStats>) {
    let rb = HeapRb::<f32>::new(capacity.max(1));
    let (prod, cons) = rb.split();
    let stats = Arc::new(BridgeStats::default());

    let producer = CaptureProducer {
        producer: prod,
        stats: Arc::clone(&stats),
    };
    let consumer = CaptureConsumer {
        consumer: cons,
        stats: Arc::clone(&stats),
    };

    (producer, consumer, stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_producer_consumer() {
        let (mut producer, mut consumer, stats) = capture_bridge(8);

        for sample in [0.1, 0.2, 0.3] {
            producer.push(sample);
        }

        let mut out = [0.0; 3];
        assert_eq!(consumer.pop_into(&mut out), 3);
        assert_eq!(out, [0.1, 0.2, 0.3]);
        assert_eq!(stats.missing(), 0);
    }

    #[test]
    fn test_underrun_is_silent() {
        let (mut producer, mut consumer, stats) = capture_bridge(8);
        producer.push(0.5);
        producer.push(0.5);

        let mut out = [9.0; 5];
        assert_eq!(consumer.pop_into(&mut out), 2);
        assert_eq!(out, [0.5, 0.5, 0.0, 0.0, 0.0]);
        assert_eq!(stats.missing(), 3);
    }

    #[test]
    fn test_overflow_drops_newest() {
        let (mut producer, mut consumer, stats) = capture_bridge(2);
        for sample in [1.0, 2.0, 3.0, 4.0] {
            producer.push(sample);
        }
        assert_eq!(stats.dropped(), 2);

        let mut out = [0.0; 2];
        consumer.pop_into(&mut out);
        assert_eq!(out, [1.0, 2.0]);
        assert_eq!(stats.skipped(), 0);
    }

    #[test]
    fn test_backlog_is_trimmed_to_two_cycles() {
        let (mut producer, mut consumer, stats) = capture_bridge(16);
        for i in 0..16 {
            producer.push(i as f32);
        }
        assert_eq!(stats.dropped(), 0);

        // 16 queued, 2 cycles of 3 kept: the oldest 10 go
        let mut out = [0.0; 3];
        assert_eq!(consumer.pop_into(&mut out), 3);
        assert_eq!(out, [10.0, 11.0, 12.0]);
        assert_eq!(stats.skipped(), 10);

        consumer.pop_into(&mut out);
        assert_eq!(out, [13.0, 14.0, 15.0]);
        assert_eq!(stats.skipped(), 10);
        assert_eq!(stats.missing(), 0);
    }

    #[test]
    fn test_drifting_producer_keeps_latency_bounded() {
        let (mut producer, mut consumer, stats) = capture_bridge(64);
        let mut out = [0.0; 4];
        let mut next = 0.0;

        // Capture runs one sample per cycle faster than playback
        for _ in 0..40 {
            for _ in 0..5 {
                producer.push(next);
                next += 1.0;
            }
            consumer.pop_into(&mut out);
        }

        assert_eq!(stats.dropped(), 0);
        assert!(stats.skipped() > 0);
        // The last sample read is at most a cycle behind the newest pushed
        assert!(next - 1.0 - out[3] <= 4.0);
    }
}
