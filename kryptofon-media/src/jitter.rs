//! Pure de-jitter logic (§4.8): the concealment trigger, sample-wise
//! concealment, and clock-skew correction decision, split out from
//! `AudioDevice` so each can be exercised directly against its formulas
//! in isolation.

use crate::device::{FRAME_INTERVAL_MS, LLBS};

/// Should a missing playback slot be concealed right now, rather than
/// waited on? Per the testable property: "concealed iff
/// device-available > LLBS-2 or ring-fill >= ring_cap-2, and iff a
/// previous frame exists".
pub fn needs_concealment(device_available: usize, ring_fill: usize, ring_cap: usize, has_previous: bool) -> bool {
    has_previous && (device_available as i64 > LLBS as i64 - 2 || ring_fill + 2 >= ring_cap)
}

/// Sample-wise concealment of a missing frame from its neighbors
/// (§4.8). Each byte is treated as an 8-bit sample per the
/// specification's documented limitation — imprecise for 16-bit audio,
/// not corrected here.
pub fn conceal(prev: &[u8], next: &[u8]) -> Vec<u8> {
    prev.iter()
        .zip(next.iter())
        .map(|(&p, &n)| (p >> 1).wrapping_add(n >> 1))
        .collect()
}

/// The action the playback loop's clock-skew compensation pass should
/// take this frame (§4.8 step 2).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SkewAction {
    None,
    DropOneFrame,
    DropTwoFrames,
    DuplicateOneFrame,
}

/// Tracks `delta0` (the skew baseline recorded on the first frame) and
/// decides what to do about subsequent drift.
pub struct SkewTracker {
    delta0: Option<i64>,
    cumulative_skew_ms: i64,
}

impl SkewTracker {
    pub fn new() -> SkewTracker {
        SkewTracker {
            delta0: None,
            cumulative_skew_ms: 0,
        }
    }

    pub fn cumulative_skew_ms(&self) -> i64 {
        self.cumulative_skew_ms
    }

    /// Offer this frame's `delta = slot_ts - last_mic_ts`. On the first
    /// call this only records `delta0` and returns `SkewAction::None`;
    /// subsequent calls compare against it.
    pub fn observe(&mut self, delta: i64) -> SkewAction {
        let delta0 = match self.delta0 {
            None => {
                self.delta0 = Some(delta);
                return SkewAction::None;
            }
            Some(d0) => d0,
        };

        let diff = delta - delta0;
        self.cumulative_skew_ms += diff;

        let max = (LLBS as i64 / 2) * FRAME_INTERVAL_MS as i64;
        if diff > LLBS as i64 * FRAME_INTERVAL_MS as i64 {
            SkewAction::DropTwoFrames
        } else if diff > max {
            SkewAction::DropOneFrame
        } else if diff < -(FRAME_INTERVAL_MS as i64) {
            SkewAction::DuplicateOneFrame
        } else {
            SkewAction::None
        }
    }
}

impl Default for SkewTracker {
    fn default() -> Self {
        Self::new()
    }
}
