/*! BER/FER measurement harness.

Drives a known pseudorandom payload through an encoder-decoder pair. On
every `trigger` message the harness synthesizes a frame (a little-endian
u64 sequence counter, random filler, CRC32C), scrambles it with an
additive LFSR distinct from anything an encoder under test would use, and
hands it out for transmission. Frames coming back through the `received`
path are unscrambled, validated and matched against the counter to count
drops.

The FER ignores the still-in-flight tail of the sequence, which keeps
buffering inside the chain under test from looking like loss.
*/

use log::info;
use rand::Rng;

use crate::crc::Crc;
use crate::whitening::Whitening;
use crate::{Error, Result};

/// Final numbers from a measurement run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BerReport {
    /// Frames handed to the transmitter.
    pub sent: u64,
    /// Frames received intact and in sequence.
    pub received: u64,
    /// Frames counted as lost.
    pub dropped: u64,
    /// Frames that failed length, CRC or sequence validation.
    pub invalid: u64,
    /// Frame error rate.
    pub fer: f64,
    /// Bit error rate estimated from the FER.
    pub ber: f64,
}

impl std::fmt::Display for BerReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Frames sent     : {}", self.sent)?;
        writeln!(f, "Frames received : {}", self.received)?;
        writeln!(f, "Frames lost     : {}", self.dropped)?;
        writeln!(f, "Frames invalid  : {}", self.invalid)?;
        writeln!(f, "FER             : {}", self.fer)?;
        write!(f, "BER estimation  : {}", self.ber)
    }
}

fn harness_scrambler() -> Whitening {
    // CCSDS-style mask with a different seed, so an encoder under test
    // never cancels it out with its own whitening.
    Whitening::new(0xA9, 0xAA, 7, true, false)
}

/// BER calculator.
pub struct BerCalculator {
    frame_size: usize,
    nframes: u64,
    skip: u64,
    sent: u64,
    invalid: u64,
    last_ack: u64,
    dropped: u64,
    received: u64,
}

impl BerCalculator {
    /// Create a harness for `frame_size`-byte frames. `nframes` bounds
    /// the run (0 = unbounded); the first `skip` frames only advance the
    /// sequence tracking, swallowing start-up buffering artifacts.
    pub fn new(frame_size: usize, nframes: u64, skip: u64) -> Result<Self> {
        if frame_size < 8 + Crc::Crc32c.size() {
            return Err(Error::config(
                "minimum supported frame size is 12 bytes (counter plus CRC)",
            ));
        }
        Ok(Self {
            frame_size,
            nframes,
            skip,
            sent: 0,
            invalid: 0,
            last_ack: 0,
            dropped: 0,
            received: 0,
        })
    }

    /// Handle a `trigger` message: synthesize the next test frame, or
    /// `None` once `nframes` have gone out.
    pub fn trigger(&mut self) -> Option<Vec<u8>> {
        if self.finished() {
            return None;
        }
        let mut rng = rand::rng();
        let mut frame: Vec<u8> = (0..self.frame_size).map(|_| rng.random()).collect();
        frame[..8].copy_from_slice(&self.sent.to_le_bytes());
        self.sent += 1;
        let crc_size = Crc::Crc32c.size();
        frame.truncate(self.frame_size - crc_size);
        Crc::Crc32c.append(&mut frame, true);
        harness_scrambler().scramble(&mut frame);
        Some(frame)
    }

    /// True once the configured number of frames has been produced.
    pub fn finished(&self) -> bool {
        self.nframes != 0 && self.sent >= self.nframes
    }

    /// Handle a `received` message with the frame that made it through
    /// the chain under test.
    pub fn received(&mut self, pdu: &[u8]) {
        if pdu.len() != self.frame_size {
            self.invalid += 1;
            return;
        }
        let mut frame = pdu.to_vec();
        harness_scrambler().descramble(&mut frame);
        if !Crc::Crc32c.check(&frame, true) {
            self.invalid += 1;
            return;
        }
        let cnt = u64::from_le_bytes(frame[..8].try_into().expect("8 bytes"));
        if cnt < self.last_ack || cnt >= self.sent {
            self.invalid += 1;
            return;
        }
        if cnt < self.skip {
            self.last_ack = cnt + 1;
            return;
        }
        self.dropped += cnt - self.last_ack;
        self.last_ack = cnt + 1;
        self.received += 1;
    }

    /// Frame error rate so far. Unacknowledged frames at the tail of the
    /// run are not counted.
    pub fn fer(&self) -> f64 {
        if self.last_ack == 0 {
            return 1.0;
        }
        self.dropped as f64 / self.last_ack as f64
    }

    /// BER estimated from the FER via `FER = 1 − (1 − BER)^N` with `N`
    /// the number of bits per frame.
    pub fn ber(&self) -> f64 {
        1.0 - 10f64.powf((1.0 - self.fer()).log10() / (self.frame_size as f64 * 8.0))
    }

    /// Snapshot of the counters.
    pub fn report(&self) -> BerReport {
        BerReport {
            sent: self.sent,
            received: self.received,
            dropped: self.dropped,
            invalid: self.invalid,
            fer: self.fer(),
            ber: self.ber(),
        }
    }
}

impl Drop for BerCalculator {
    fn drop(&mut self) {
        info!("BER harness finished:\n{}", self.report());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_is_error_free() {
        let mut ber = BerCalculator::new(64, 100, 0).unwrap();
        while let Some(frame) = ber.trigger() {
            ber.received(&frame);
        }
        let report = ber.report();
        assert_eq!(report.sent, 100);
        assert_eq!(report.received, 100);
        assert_eq!(report.dropped, 0);
        assert_eq!(report.invalid, 0);
        assert_eq!(report.fer, 0.0);
        assert_eq!(report.ber, 0.0);
        assert!(ber.finished());
    }

    #[test]
    fn lost_frames_are_counted() {
        let mut ber = BerCalculator::new(32, 10, 0).unwrap();
        let mut n = 0;
        while let Some(frame) = ber.trigger() {
            // Lose every third frame.
            if n % 3 != 2 {
                ber.received(&frame);
            }
            n += 1;
        }
        let report = ber.report();
        assert_eq!(report.sent, 10);
        assert_eq!(report.received, 7);
        assert_eq!(report.dropped, 3);
        assert!(report.fer > 0.0);
        assert!(report.ber > 0.0 && report.ber < report.fer);
    }

    #[test]
    fn corrupt_frames_are_invalid() {
        let mut ber = BerCalculator::new(32, 2, 0).unwrap();
        let mut frame = ber.trigger().unwrap();
        frame[16] ^= 0xFF;
        ber.received(&frame);
        assert_eq!(ber.report().invalid, 1);
        let short = vec![0u8; 5];
        ber.received(&short);
        assert_eq!(ber.report().invalid, 2);
    }

    #[test]
    fn skip_window_only_tracks() {
        let mut ber = BerCalculator::new(16, 5, 2).unwrap();
        while let Some(frame) = ber.trigger() {
            ber.received(&frame);
        }
        let report = ber.report();
        assert_eq!(report.sent, 5);
        assert_eq!(report.received, 3);
        assert_eq!(report.dropped, 0);
    }

    #[test]
    fn frames_differ_between_triggers() {
        let mut ber = BerCalculator::new(48, 0, 0).unwrap();
        let a = ber.trigger().unwrap();
        let b = ber.trigger().unwrap();
        assert_ne!(a, b);
        assert!(!ber.finished());
    }

    #[test]
    fn config_validation() {
        assert!(BerCalculator::new(8, 0, 0).is_err());
        assert!(BerCalculator::new(12, 0, 0).is_ok());
    }
}
