//! Double-buffer refill loop
//!
//! Runs on the main thread, outside the audio callback. It watches the
//! window index and refills the half of the playback buffer the callback is
//! not reading:
//! - first index change: fill everything after the window being played
//! - index wrapped to 0: refill the second half
//! - index reached the midpoint: refill the first half
//!
//! Once the feeder reports end of stream, the next half boundary stops the
//! loop.

use std::io::Read;
use std::sync::Arc;

use super::buffer::AudioBuffer;
use super::feeder::{FeedStatus, PcmFeeder};
use super::window::{window_count, WindowState};

/// Part of the buffer a fill targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Initial,
    FirstHalf,
    SecondHalf,
}

/// What the loop should do after observing the window index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefillAction {
    Idle,
    Fill {
        region: Region,
        offset: usize,
        len: usize,
    },
    Stop,
}

/// Pure refill decision state
#[derive(Debug)]
pub struct RefillPlanner {
    last_index: usize,
    first_time: bool,
    exhausted: bool,
}

impl Default for RefillPlanner {
    fn default() -> Self {
        Self::new()
    }
}

impl RefillPlanner {
    pub fn new() -> Self {
        Self {
            last_index: 0,
            first_time: true,
            exhausted: false,
        }
    }

    /// Decide what to do for the currently published window index.
    ///
    /// Only a change of index since the last call can trigger a fill.
    pub fn observe(&mut self, index: usize, window_size: usize, capacity: usize) -> RefillAction {
        if index == self.last_index {
            return RefillAction::Idle;
        }
        self.last_index = index;
        log::debug!("window {}", index);

        let windows = window_count(window_size, capacity);
        if windows == 0 {
            return RefillAction::Idle;
        }
        let midpoint = windows / 2;
        let half = midpoint * window_size;
        let end = windows * window_size;

        if self.first_time {
            self.first_time = false;
            let offset = (index + 1) * window_size;
            let len = end.saturating_sub(offset);
            if len == 0 {
                return RefillAction::Idle;
            }
            return RefillAction::Fill {
                region: Region::Initial,
                offset,
                len,
            };
        }

        if index == 0 {
            if self.exhausted {
                return RefillAction::Stop;
            }
            RefillAction::Fill {
                region: Region::SecondHalf,
                offset: half,
                len: end - half,
            }
        } else if index == midpoint {
            if self.exhausted {
                return RefillAction::Stop;
            }
            RefillAction::Fill {
                region: Region::FirstHalf,
                offset: 0,
                len: half,
            }
        } else {
            RefillAction::Idle
        }
    }

    /// Record the outcome of the last fill
    pub fn record(&mut self, status: FeedStatus) {
        if !status.is_more() {
            self.exhausted = true;
        }
    }
}

/// Drives a `RefillPlanner` against the shared buffer and a PCM feeder
pub struct RefillLoop<R> {
    planner: RefillPlanner,
    feeder: PcmFeeder<R>,
    buffer: Arc<AudioBuffer>,
    window: Arc<WindowState>,
}

impl<R: Read> RefillLoop<R> {
    pub fn new(feeder: PcmFeeder<R>, buffer: Arc<AudioBuffer>, window: Arc<WindowState>) -> Self {
        Self {
            planner: RefillPlanner::new(),
            feeder,
            buffer,
            window,
        }
    }

    /// Observe the window index once and carry out the resulting action.
    pub fn poll(&mut self) -> RefillAction {
        let index = self.window.index();
        let size = self.window.size();
        let action = self.planner.observe(index, size, self.window.capacity());

        match action {
            RefillAction::Fill {
                region,
                offset,
                len,
            } => {
                match region {
                    Region::Initial => log::info!("First time: read all"),
                    Region::SecondHalf => log::info!("Reading second half..."),
                    Region::FirstHalf => log::info!("Reading first half..."),
                }
                let status = self.feeder.fill_buffer(&self.buffer, offset, len);
                self.planner.record(status);
                log::debug!(
                    "Filled {} samples at {} ({} bytes read so far)",
                    len,
                    offset,
                    self.feeder.bytes_read()
                );
            }
            RefillAction::Stop => log::info!("Input exhausted, stopping refill"),
            RefillAction::Idle => {}
        }
        action
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_initial_fill_after_first_change() {
        let mut planner = RefillPlanner::new();
        assert_eq!(planner.observe(0, 0, 64), RefillAction::Idle);
        assert_eq!(
            planner.observe(1, 8, 64),
            RefillAction::Fill {
                region: Region::Initial,
                offset: 16,
                len: 48,
            }
        );
        assert_eq!(planner.observe(1, 8, 64), RefillAction::Idle);
    }

    #[test]
    fn test_half_boundaries() {
        let mut planner = RefillPlanner::new();
        planner.observe(1, 8, 64);

        let actions: Vec<RefillAction> = [2, 3, 4, 5, 6, 7, 0, 1]
            .iter()
            .map(|&i| planner.observe(i, 8, 64))
            .collect();

        assert_eq!(
            actions[2],
            RefillAction::Fill {
                region: Region::FirstHalf,
                offset: 0,
                len: 32,
            }
        );
        assert_eq!(
            actions[6],
            RefillAction::Fill {
                region: Region::SecondHalf,
                offset: 32,
                len: 32,
            }
        );
        let idle = actions
            .iter()
            .filter(|&&a| a == RefillAction::Idle)
            .count();
        assert_eq!(idle, 6);
    }

    #[test]
    fn test_uneven_window_covers_tail() {
        // 65 windows of 1000 samples: the last window ends at 65000
        let mut planner = RefillPlanner::new();
        planner.observe(5, 1000, 1 << 16);
        assert_eq!(
            planner.observe(0, 1000, 1 << 16),
            RefillAction::Fill {
                region: Region::SecondHalf,
                offset: 32000,
                len: 33000,
            }
        );
    }

    #[test]
    fn test_stops_at_next_boundary_after_exhaustion() {
        let mut planner = RefillPlanner::new();
        planner.observe(1, 8, 64);
        planner.record(FeedStatus::EndOfStream);

        assert_eq!(planner.observe(2, 8, 64), RefillAction::Idle);
        assert_eq!(planner.observe(4, 8, 64), RefillAction::Stop);
    }

    #[test]
    fn test_single_window_stream_end_to_end() {
        // Capacity 16, window 4: windows 0..=3, midpoint 2
        let buffer = Arc::new(AudioBuffer::new(16));
        let window = Arc::new(WindowState::new(16));
        let feeder = PcmFeeder::new(Cursor::new(vec![0u8; 4 * 2]));
        let mut refill = RefillLoop::new(feeder, Arc::clone(&buffer), Arc::clone(&window));

        assert_eq!(refill.poll(), RefillAction::Idle);

        window.advance(4);
        assert!(matches!(
            refill.poll(),
            RefillAction::Fill {
                region: Region::Initial,
                ..
            }
        ));
        assert!(!refill.planner.exhausted);

        let mut out = [1.0; 4];
        buffer.read_into(8, &mut out);
        assert_eq!(out, [0.0; 4]);

        window.advance(4);
        assert!(matches!(
            refill.poll(),
            RefillAction::Fill {
                region: Region::FirstHalf,
                ..
            }
        ));
        assert!(refill.planner.exhausted);

        window.advance(4);
        assert_eq!(refill.poll(), RefillAction::Idle);

        window.advance(4);
        assert_eq!(window.index(), 0);
        assert_eq!(refill.poll(), RefillAction::Stop);
    }

    #[test]
    fn test_refill_places_stream_in_order() {
        let buffer = Arc::new(AudioBuffer::new(16));
        let window = Arc::new(WindowState::new(16));
        let bytes: Vec<u8> = (1..=12i16).flat_map(|s| (s * 1024).to_le_bytes()).collect();
        let mut refill = RefillLoop::new(
            PcmFeeder::new(Cursor::new(bytes)),
            Arc::clone(&buffer),
            Arc::clone(&window),
        );

        window.advance(4);
        refill.poll();

        // Initial fill lands after window 1
        let mut out = [0.0; 8];
        buffer.read_into(8, &mut out);
        let expected: Vec<f32> = (1..=8).map(|s| (s * 1024) as f32 / 32768.0).collect();
        assert_eq!(out.to_vec(), expected);

        window.advance(4);
        refill.poll();

        let mut first_half = [0.0; 8];
        buffer.read_into(0, &mut first_half);
        assert_eq!(first_half[0], 9.0 * 1024.0 / 32768.0);
        assert_eq!(first_half[3], 12.0 * 1024.0 / 32768.0);
        assert!(first_half[4..].iter().all(|&s| s == 0.0));
    }
}
