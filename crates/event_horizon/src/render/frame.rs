//! Frame-in-flight indexing
//!
//! Per-frame resources are replicated N times; the slot used by the frame
//! being recorded is `frame_count mod N`.

/// Counts frames and maps them onto frame-in-flight slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCounter {
    frames_in_flight: usize,
    frame_count: u64,
}

impl FrameCounter {
    /// Create a counter for `frames_in_flight` slots (at least one)
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            frames_in_flight: frames_in_flight.max(1),
            frame_count: 0,
        }
    }

    /// Number of slots
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Frames completed so far
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Slot of the frame being recorded
    pub fn current(&self) -> usize {
        (self.frame_count % self.frames_in_flight as u64) as usize
    }

    /// Finish the current frame and return the next slot
    pub fn advance(&mut self) -> usize {
        self.frame_count += 1;
        self.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_wrap() {
        let mut frames = FrameCounter::new(2);
        assert_eq!(frames.current(), 0);
        assert_eq!(frames.advance(), 1);
        assert_eq!(frames.advance(), 0);
        assert_eq!(frames.frame_count(), 2);
    }

    #[test]
    fn test_zero_slots_clamped() {
        let mut frames = FrameCounter::new(0);
        assert_eq!(frames.frames_in_flight(), 1);
        assert_eq!(frames.advance(), 0);
    }
}
