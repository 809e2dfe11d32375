//! Window index handshake between the audio callback and the refill loop
//!
//! The playback buffer is consumed one window (one callback's worth of
//! frames) at a time. The audio callback is the only writer of the window
//! index and size; the refill loop only reads them. Size is published before
//! the index with release ordering, so a reader that acquires a new index
//! also sees the window size that produced it.

use std::sync::atomic::{AtomicUsize, Ordering};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Which window the callback reads after advancing the index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum WindowOrder {
    /// Advance first, then read the window being superseded (historic behaviour)
    #[default]
    Superseded,
    /// Advance first, then read the window just advanced to
    Current,
}

impl WindowOrder {
    /// Buffer offset of the window to read for this advance
    pub fn offset(self, advance: Advance) -> usize {
        let index = match self {
            Self::Superseded => advance.previous,
            Self::Current => advance.current,
        };
        index * advance.window_size
    }
}

/// Result of advancing the window index for one callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advance {
    pub previous: usize,
    pub current: usize,
    pub window_size: usize,
}

/// Index that follows `index`, wrapping to 0 when the window after it would
/// no longer fit into `capacity`.
pub fn next_index(index: usize, window_size: usize, capacity: usize) -> usize {
    let next = index + 1;
    if (next + 1) * window_size > capacity {
        0
    } else {
        next
    }
}

/// Number of whole windows that fit into the buffer
pub fn window_count(window_size: usize, capacity: usize) -> usize {
    if window_size == 0 {
        0
    } else {
        capacity / window_size
    }
}

/// Shared window state
pub struct WindowState {
    index: AtomicUsize,
    size: AtomicUsize,
    capacity: usize,
}

impl WindowState {
    pub fn new(capacity: usize) -> Self {
        Self {
            index: AtomicUsize::new(0),
            size: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Current window index
    pub fn index(&self) -> usize {
        self.index.load(Ordering::Acquire)
    }

    /// Window size in samples of the most recent callback (0 before the first)
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record a callback of `nframes` frames and move to the next window.
    ///
    /// Only the audio callback may call this. A zero-frame callback leaves the
    /// index where it is. If the buffer size grew so that the stored index no
    /// longer fits, counting restarts at window 0.
    #[inline]
    pub fn advance(&self, nframes: usize) -> Advance {
        let mut previous = self.index.load(Ordering::Relaxed);
        if nframes == 0 {
            return Advance {
                previous,
                current: previous,
                window_size: 0,
            };
        }
        if (previous + 1) * nframes > self.capacity {
            previous = 0;
        }
        let current = next_index(previous, nframes, self.capacity);

        self.size.store(nframes, Ordering::Release);
        self.index.store(current, Ordering::Release);

        Advance {
            previous,
            current,
            window_size: nframes,
        }
    }
}
