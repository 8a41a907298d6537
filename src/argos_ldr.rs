/*! ARGOS LDR (low data rate) decoder.

ARGOS PTT-A3 uplinks reuse the HDLC frame shape of AX.25, but transmit
every byte MS bit first and protect the frame with a plain (non-reversed)
CRC16-CCITT, big endian. There is no NRZI and no scrambler. Frame hunting
waits for three consecutive flags since a lone `0x7E` next to a weak CRC
makes for too many false positives, and all-zero frames are rejected
outright because CRC16-CCITT cannot tell them from silence.
*/

use log::{debug, info};

use crate::ax25::SYNC_FLAG;
use crate::crc::crc16_ccitt;
use crate::decoder::{Decoder, DecoderStatus, next_unique_id};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    NoSync,
    InSync,
    Decoding,
}

/// ARGOS LDR decoder.
pub struct ArgosLdrDecoder {
    crc_check: bool,
    max_frame_len: usize,
    state: State,
    shift_reg: u32,
    dec_b: u8,
    decoded_bits: u8,
    bitstream: Vec<u8>,
    frame: Vec<u8>,
    start_idx: usize,
    frame_start: u64,
    sample_cnt: u64,
    nitems_read: u64,
    decoded: usize,
    id: usize,
}

impl ArgosLdrDecoder {
    /// Create a decoder. With `crc_check` unset, frames failing the CRC
    /// are emitted anyway and flagged.
    pub fn new(crc_check: bool, max_frame_len: usize) -> Result<Self> {
        if max_frame_len < 3 {
            return Err(Error::config("ARGOS frames are at least 3 bytes"));
        }
        Ok(Self {
            crc_check,
            max_frame_len,
            state: State::NoSync,
            shift_reg: 0,
            dec_b: 0,
            decoded_bits: 0,
            bitstream: Vec::new(),
            frame: Vec::new(),
            start_idx: 0,
            frame_start: 0,
            sample_cnt: 0,
            nitems_read: 0,
            decoded: 0,
            id: next_unique_id(),
        })
    }

    fn reset_state(&mut self) {
        self.state = State::NoSync;
        self.dec_b = 0;
        self.shift_reg = 0;
        self.decoded_bits = 0;
        self.frame.clear();
    }

    fn enter_sync_state(&mut self) {
        self.state = State::InSync;
        self.dec_b = 0;
        self.shift_reg = 0;
        self.decoded_bits = 0;
        self.frame.clear();
    }

    fn enter_decoding_state(&mut self) {
        self.state = State::Decoding;
        // The first byte may end in a stuffed bit.
        if (self.shift_reg & 0x3F) as u8 == 0x3E {
            self.dec_b >>= 1;
            self.decoded_bits = 7;
        } else {
            self.frame.push(self.dec_b);
            self.decoded_bits = 0;
        }
    }

    fn decode_1b(&mut self, bit: u8) {
        // MS bit first, 24 bits of history for the triple flag.
        self.shift_reg = ((self.shift_reg << 1) | bit as u32) & 0xFF_FFFF;
        self.dec_b = (self.dec_b << 1) | bit;
    }

    fn frame_check(&self) -> bool {
        let n = self.frame.len();
        // CRC16-CCITT fails miserably on all-zero buffers.
        if self.frame.iter().all(|b| *b == 0) {
            return false;
        }
        let fcs = crc16_ccitt(&self.frame[..n - 2]);
        let recv = ((self.frame[n - 2] as u16) << 8) | self.frame[n - 1] as u16;
        fcs == recv
    }

    fn enter_frame_end(&mut self, status: &mut DecoderStatus) -> bool {
        if self.frame.len() < 1 + 2 {
            self.reset_state();
            return false;
        }

        let valid = self.frame_check();
        if valid || !self.crc_check {
            self.decoded += 1;
            let m = &mut status.metadata;
            m.set_decoder("argos_ldr", "1.0");
            m.set_pdu(&self.frame[..self.frame.len() - 2]);
            m.set_time_now();
            m.set_crc_valid(valid);
            m.set_sample_start(self.frame_start);
            m.set_sample_cnt(self.sample_cnt);
            status.decode_success = true;
        } else {
            debug!("wrong CRC");
        }
        self.reset_state();
        valid
    }

    fn process(&mut self, status: &mut DecoderStatus) {
        loop {
            let mut cont = false;
            match self.state {
                State::NoSync => {
                    const TRIPLE_FLAG: u32 = (SYNC_FLAG as u32)
                        | ((SYNC_FLAG as u32) << 8)
                        | ((SYNC_FLAG as u32) << 16);
                    for i in 0..self.bitstream.len() {
                        let bit = self.bitstream[i];
                        self.decode_1b(bit);
                        if self.shift_reg == TRIPLE_FLAG {
                            self.bitstream.drain(..i + 1);
                            self.nitems_read += (i + 1) as u64;
                            self.enter_sync_state();
                            self.frame_start = self.nitems_read;
                            self.start_idx = 0;
                            cont = true;
                            break;
                        }
                    }
                    if cont {
                        continue;
                    }
                    self.nitems_read += self.bitstream.len() as u64;
                    self.bitstream.clear();
                    return;
                }
                State::InSync => {
                    // The flag is usually repeated a few more times.
                    for i in self.start_idx..self.bitstream.len() {
                        let bit = self.bitstream[i];
                        self.decode_1b(bit);
                        self.decoded_bits += 1;
                        if self.decoded_bits == 8 {
                            if (self.shift_reg & 0xFF) as u8 != SYNC_FLAG {
                                self.start_idx = i + 1;
                                self.enter_decoding_state();
                                cont = true;
                                break;
                            }
                            self.decoded_bits = 0;
                        }
                    }
                    if cont {
                        continue;
                    }
                    self.start_idx = self.bitstream.len();
                    return;
                }
                State::Decoding => {
                    for i in self.start_idx..self.bitstream.len() {
                        let bit = self.bitstream[i];
                        self.decode_1b(bit);
                        if (self.shift_reg & 0xFF) as u8 == SYNC_FLAG {
                            self.sample_cnt = self.nitems_read + i as u64 - self.frame_start;
                            debug!("found frame end");
                            let emitted = self.enter_frame_end(status);
                            self.bitstream.drain(..i + 1);
                            self.nitems_read += (i + 1) as u64;
                            if emitted || status.decode_success {
                                self.start_idx = self.bitstream.len();
                                return;
                            }
                            cont = true;
                            break;
                        } else if (self.shift_reg & 0x3F) as u8 == 0x3E {
                            // Stuffed bit.
                            self.dec_b >>= 1;
                        } else if (self.shift_reg & 0x7F) as u8 == 0x7F {
                            debug!("illegal bit sequence");
                            self.bitstream.drain(..i + 1);
                            self.nitems_read += (i + 1) as u64;
                            self.reset_state();
                            cont = true;
                            break;
                        } else {
                            self.decoded_bits += 1;
                            if self.decoded_bits == 8 {
                                self.frame.push(self.dec_b);
                                self.decoded_bits = 0;
                                if self.frame.len() >= self.max_frame_len {
                                    debug!("frame over size limit");
                                    self.reset_state();
                                    cont = true;
                                    break;
                                }
                            }
                        }
                    }
                    if cont {
                        continue;
                    }
                    self.start_idx = self.bitstream.len();
                    return;
                }
            }
        }
    }
}

impl Drop for ArgosLdrDecoder {
    fn drop(&mut self) {
        info!("ARGOS LDR decoder: {} frames decoded", self.decoded);
    }
}

impl Decoder for ArgosLdrDecoder {
    fn decode(&mut self, input: &[u8]) -> DecoderStatus {
        let mut status = DecoderStatus::new();
        self.bitstream.extend(input.iter().map(|b| b & 0x1));
        self.process(&mut status);
        status.consumed = input.len();
        status
    }

    fn reset(&mut self) {
        self.reset_state();
    }

    fn name(&self) -> &'static str {
        "argos_ldr"
    }

    fn version(&self) -> &'static str {
        "1.0"
    }

    fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    fn unique_id(&self) -> usize {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flag_bits(out: &mut Vec<u8>) {
        out.extend_from_slice(&[0, 1, 1, 1, 1, 1, 1, 0]);
    }

    // MSB-first HDLC transmitter for building test streams.
    fn build_stream(payload: &[u8], corrupt_crc: bool) -> Vec<u8> {
        let mut data = payload.to_vec();
        let mut fcs = crc16_ccitt(&data);
        if corrupt_crc {
            fcs ^= 0x0400;
        }
        data.push((fcs >> 8) as u8);
        data.push(fcs as u8);

        let mut bits = Vec::new();
        for _ in 0..4 {
            flag_bits(&mut bits);
        }
        let mut ones = 0;
        for byte in &data {
            for shift in (0..8).rev() {
                let b = (byte >> shift) & 0x1;
                bits.push(b);
                if b == 1 {
                    ones += 1;
                    if ones == 5 {
                        bits.push(0);
                        ones = 0;
                    }
                } else {
                    ones = 0;
                }
            }
        }
        for _ in 0..2 {
            flag_bits(&mut bits);
        }
        bits
    }

    fn run(dec: &mut ArgosLdrDecoder, stream: &[u8]) -> Vec<DecoderStatus> {
        let mut out = vec![dec.decode(stream)];
        loop {
            let status = dec.decode(&[]);
            let done = !status.decode_success;
            out.push(status);
            if done {
                break;
            }
        }
        out
    }

    #[test]
    fn decodes_simple_frame() {
        let payload = [0x28, 0x61, 0x92, 0xA5, 0x17];
        let stream = build_stream(&payload, false);
        let mut dec = ArgosLdrDecoder::new(true, 256).unwrap();
        let hits: Vec<_> = run(&mut dec, &stream)
            .into_iter()
            .filter(|s| s.decode_success)
            .collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.pdu().unwrap(), &payload);
    }

    #[test]
    fn stuffing_roundtrip() {
        // Long runs of ones force the transmitter to stuff.
        let payload = [0xFF, 0xFF, 0x7E, 0xFB, 0xFF];
        let stream = build_stream(&payload, false);
        let mut dec = ArgosLdrDecoder::new(true, 256).unwrap();
        let hits: Vec<_> = run(&mut dec, &stream)
            .into_iter()
            .filter(|s| s.decode_success)
            .collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.pdu().unwrap(), &payload);
    }

    #[test]
    fn bad_crc_dropped_or_flagged() {
        let payload = [0x12, 0x34, 0x56];
        let stream = build_stream(&payload, true);

        let mut strict = ArgosLdrDecoder::new(true, 256).unwrap();
        assert!(run(&mut strict, &stream).iter().all(|s| !s.decode_success));

        let mut lax = ArgosLdrDecoder::new(false, 256).unwrap();
        let hits: Vec<_> = run(&mut lax, &stream)
            .into_iter()
            .filter(|s| s.decode_success)
            .collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(
            hits[0].metadata.get(crate::metadata::MetaKey::DecoderCrcValid),
            Some(&crate::metadata::MetaValue::Bool(false))
        );
    }

    #[test]
    fn all_zero_payload_rejected() {
        // An all-zero frame with an all-zero "CRC" is self-consistent for
        // CRC16-CCITT, which is exactly why it must be refused.
        let mut bits = Vec::new();
        for _ in 0..4 {
            flag_bits(&mut bits);
        }
        bits.extend(std::iter::repeat_n(0u8, 5 * 8));
        for _ in 0..2 {
            flag_bits(&mut bits);
        }
        let mut dec = ArgosLdrDecoder::new(true, 256).unwrap();
        assert!(run(&mut dec, &bits).iter().all(|s| !s.decode_success));
    }

    #[test]
    fn needs_three_flags() {
        // A single flag is not enough to open a frame.
        let payload = [0x99, 0x88];
        let mut data = payload.to_vec();
        let fcs = crc16_ccitt(&data);
        data.push((fcs >> 8) as u8);
        data.push(fcs as u8);
        let mut bits = Vec::new();
        flag_bits(&mut bits);
        for byte in &data {
            for shift in (0..8).rev() {
                bits.push((byte >> shift) & 0x1);
            }
        }
        flag_bits(&mut bits);
        let mut dec = ArgosLdrDecoder::new(true, 256).unwrap();
        assert!(run(&mut dec, &bits).iter().all(|s| !s.decode_success));
    }
}
