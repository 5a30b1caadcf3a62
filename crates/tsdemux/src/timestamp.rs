//! 33-bit PTS/DTS rollover correction.

use crate::pes::PTS_WRAP;

/// A raw jump larger than this (10s at 90kHz) is taken as a rollover.
pub const ROLLOVER_THRESHOLD: u64 = 900_000;

/// Extends a wrapping 33-bit timestamp into a monotonic 64-bit one.
///
/// A backwards jump of more than [`ROLLOVER_THRESHOLD`] counts as a forward
/// wrap, a forward jump of the same size undoes one. The counter never goes
/// below zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RolloverTracker {
    last_raw: Option<u64>,
    rollovers: u64,
}

impl RolloverTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a raw timestamp and get it back with rollovers applied.
    pub fn update(&mut self, raw: u64) -> u64 {
        let raw = raw & (PTS_WRAP - 1);
        if let Some(last) = self.last_raw
            && raw.abs_diff(last) > ROLLOVER_THRESHOLD
        {
            if raw < last {
                self.rollovers += 1;
            } else if self.rollovers > 0 {
                self.rollovers -= 1;
            }
        }
        self.last_raw = Some(raw);
        self.fixed()
    }

    /// Last raw value with rollovers applied.
    pub fn fixed(&self) -> u64 {
        self.last_raw.unwrap_or(0) + self.rollovers * PTS_WRAP
    }

    pub fn last_raw(&self) -> Option<u64> {
        self.last_raw
    }

    pub fn rollovers(&self) -> u64 {
        self.rollovers
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_steps_are_untouched() {
        let mut tracker = RolloverTracker::new();
        assert_eq!(tracker.update(1000), 1000);
        assert_eq!(tracker.update(4600), 4600);
        // B-frame reordering jumps back a little
        assert_eq!(tracker.update(1000), 1000);
        assert_eq!(tracker.rollovers(), 0);
    }

    #[test]
    fn forward_wrap_keeps_time_increasing() {
        let mut tracker = RolloverTracker::new();
        let mut out = Vec::new();
        let mut raw = PTS_WRAP - 3 * 3600;
        for _ in 0..6 {
            out.push(tracker.update(raw));
            raw = (raw + 3600) % PTS_WRAP;
        }
        assert!(out.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(tracker.rollovers(), 1);
        assert_eq!(out[5], PTS_WRAP + 2 * 3600);
    }

    #[test]
    fn reordered_sample_across_the_wrap() {
        let mut tracker = RolloverTracker::new();
        tracker.update(PTS_WRAP - 1800);
        assert_eq!(tracker.update(1800), PTS_WRAP + 1800);
        // a frame from before the wrap arrives late
        assert_eq!(tracker.update(PTS_WRAP - 900), PTS_WRAP - 900);
        assert_eq!(tracker.update(5400), PTS_WRAP + 5400);
        assert_eq!(tracker.rollovers(), 1);
    }

    #[test]
    fn genuine_reverse_jump_decrements_once() {
        let mut tracker = RolloverTracker::new();
        tracker.update(PTS_WRAP - 90_000);
        tracker.update(90_000);
        assert_eq!(tracker.rollovers(), 1);
        let before = tracker.fixed();
        // jump back by far more than ten seconds
        let after = tracker.update(PTS_WRAP - 10 * 90_000 * 60);
        assert_eq!(tracker.rollovers(), 0);
        assert!(after < before);
    }

    #[test]
    fn never_goes_negative() {
        let mut tracker = RolloverTracker::new();
        tracker.update(1000);
        assert_eq!(tracker.update(5_000_000), 5_000_000);
        assert_eq!(tracker.rollovers(), 0);
        tracker.reset();
        assert_eq!(tracker.last_raw(), None);
    }
}
