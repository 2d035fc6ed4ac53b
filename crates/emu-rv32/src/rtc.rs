//! Real-time clock device.
//!
//! Two 32-bit words holding a monotonic tick count. A read of the low word
//! latches *both* words, so the guest's low-then-high read sequence sees a
//! consistent 64-bit value even across a carry.
//!
//! The tick count is scaled from host microseconds by 53/40 so that the
//! guest-side calibration (`ticks * 40 / 53`) recovers real microseconds.

use std::time::Instant;

pub struct Rtc {
    origin: Instant,
}

impl Rtc {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Device callback: before a read of the low word, latch the current
    /// tick count into the backing words. Writes and high-word reads leave
    /// the latch alone.
    pub fn handle(&mut self, data: &mut [u8], offset: usize, _len: usize, is_write: bool) {
        if is_write || offset != 0 {
            return;
        }
        let us = self.origin.elapsed().as_micros() as u64;
        let ticks = us * 53 / 40;
        data[0..8].copy_from_slice(&ticks.to_le_bytes());
    }
}

impl Default for Rtc {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_word_read_latches_both_words() {
        let mut rtc = Rtc::new();
        let mut data = [0u8; 8];

        rtc.handle(&mut data, 0, 4, false);
        let first = u64::from_le_bytes(data);

        // A high-word read must not re-latch.
        let saved = data;
        rtc.handle(&mut data, 4, 4, false);
        assert_eq!(data, saved);

        // A later low-word read observes time moving forward.
        std::thread::sleep(std::time::Duration::from_millis(2));
        rtc.handle(&mut data, 0, 4, false);
        let second = u64::from_le_bytes(data);
        assert!(second > first);
    }

    #[test]
    fn writes_do_not_latch() {
        let mut rtc = Rtc::new();
        let mut data = [0xffu8; 8];
        rtc.handle(&mut data, 0, 4, true);
        assert_eq!(data, [0xff; 8]);
    }
}
