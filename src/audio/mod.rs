//! Audio module - session, process callback and file playback buffering
//!
//! This module provides:
//! - Session shim over the cpal audio host
//! - Per-cycle process callback with a pluggable transform
//! - Double-buffered playback of raw PCM from standard input
//! - Lock-free capture bridge for live input

mod bridge;
mod buffer;
mod cycle;
mod feeder;
mod refill;
mod session;
mod transform;
mod window;

pub use bridge::{capture_bridge, BridgeStats};
pub use buffer::{AudioBuffer, DEFAULT_CAPACITY};
pub use cycle::{CycleInput, CycleStats, ProcessCycle};
pub use feeder::PcmFeeder;
pub use refill::{RefillAction, RefillLoop};
pub use session::{HostPreference, Mode, Session, SessionConfig, SessionError};
pub use transform::{Passthrough, Transform};
pub use window::{WindowOrder, WindowState};
