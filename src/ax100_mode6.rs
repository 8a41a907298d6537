/*! AX.100 mode 6 codec (RS frames inside AX.25 UI carriers).

Mode 6 puts an RS(255,223) coded, optionally CCSDS whitened and CRC32C
protected block into the information field of a plain AX.25 UI frame. The
AX.25 header travels unprotected and is passed through verbatim, and the
weak AX.25 FCS is deliberately ignored; the RS code and the CRC32C decide
frame validity.

Because the poor FCS produced many false positives in the wild, the
decoder waits for three consecutive HDLC flags before it accepts a frame
start.
*/

use log::{debug, info};

use crate::ax25::{Ax25Encoder, MIN_ADDR_LEN, SYNC_FLAG};
use crate::crc::{Crc, crc32_c};
use crate::decoder::{Decoder, DecoderStatus, next_unique_id};
use crate::encoder::Encoder;
use crate::whitening::{Lfsr, Whitening};
use crate::{Error, Result, rs};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    NoSync,
    InSync,
    Decoding,
}

/// AX.25 header (two addresses, control, PID) plus FCS.
const AX25_OVERHEAD: usize = MIN_ADDR_LEN + 2 + 2;

/// AX.100 mode 6 decoder.
pub struct Ax100Mode6Decoder {
    crc: Crc,
    descrambler: Option<Whitening>,
    ax25_descramble: bool,
    max_frame_len: usize,
    state: State,
    shift_reg: u32,
    dec_b: u8,
    prev_bit_nrzi: u8,
    decoded_bits: u8,
    lfsr: Lfsr,
    bitstream: Vec<u8>,
    frame: Vec<u8>,
    start_idx: usize,
    frame_start: u64,
    sample_cnt: u64,
    nitems_read: u64,
    decoded: usize,
    id: usize,
}

impl Ax100Mode6Decoder {
    /// Create a decoder. `descrambler` whitens the RS block (typically
    /// CCSDS); `ax25_descramble` additionally runs G3RUH over the raw
    /// bits, for 9600 baud carriers. The CRC must be [`Crc::None`] or
    /// [`Crc::Crc32c`].
    pub fn new(
        crc: Crc,
        descrambler: Option<Whitening>,
        ax25_descramble: bool,
    ) -> Result<Self> {
        if !matches!(crc, Crc::None | Crc::Crc32c) {
            return Err(Error::config("AX.100 supports CRC32C or no CRC"));
        }
        Ok(Self {
            crc,
            descrambler,
            ax25_descramble,
            max_frame_len: 255,
            state: State::NoSync,
            shift_reg: 0,
            dec_b: 0,
            prev_bit_nrzi: 0,
            decoded_bits: 0,
            lfsr: Lfsr::new(0x21, 0x0, 16),
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
        if let Some(d) = self.descrambler.as_mut() {
            d.reset();
        }
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
        // The first byte after the flags may already contain a stuffed
        // bit.
        if ((self.shift_reg >> 16) & 0xfc) as u8 == 0x7c {
            self.dec_b <<= 1;
            self.decoded_bits = 7;
        } else {
            self.frame.push(self.dec_b);
            self.decoded_bits = 0;
        }
    }

    fn decode_1b(&mut self, bit: u8) {
        // LS bit first, 24 bits of history for the triple flag.
        self.shift_reg = ((self.shift_reg >> 1) | ((bit as u32) << 23)) & 0xFF_FFFF;
        self.dec_b = (self.dec_b >> 1) | (bit << 7);
    }

    fn enter_frame_end(&mut self, status: &mut DecoderStatus) -> bool {
        // Minimum is the AX.25 overhead plus one RS parity block; maximum
        // a full RS frame inside the same overhead.
        if self.frame.len() < AX25_OVERHEAD + rs::PARITY_LEN
            || self.frame.len() > 255 + AX25_OVERHEAD
        {
            self.reset_state();
            return false;
        }

        let header_len = MIN_ADDR_LEN + 2;
        let payload_len = self.frame.len() - AX25_OVERHEAD;
        // The AX.25 FCS at the tail is ignored, not even looked at.
        let payload = &mut self.frame[header_len..header_len + payload_len];
        debug!("payload of {payload_len} bytes");
        if let Some(d) = self.descrambler.as_mut() {
            d.descramble(payload);
        }
        let corrected = match rs::decode(payload, &[]) {
            Some(n) => n,
            None => {
                debug!("RS decoding failed");
                self.reset_state();
                return false;
            }
        };
        let payload_len = payload_len - rs::PARITY_LEN;

        let (pdu_len, crc_valid) = match self.crc {
            Crc::None => (header_len + payload_len, false),
            Crc::Crc32c => {
                if payload_len < 4 {
                    self.reset_state();
                    return false;
                }
                let body = &self.frame[header_len..header_len + payload_len];
                let computed = crc32_c(&body[..payload_len - 4]);
                let received = u32::from_be_bytes(
                    body[payload_len - 4..payload_len].try_into().expect("4 bytes"),
                );
                debug!("CRC32C received {received:#010x}, computed {computed:#010x}");
                if computed != received {
                    self.reset_state();
                    return false;
                }
                (header_len + payload_len - 4, true)
            }
            _ => unreachable!("validated at construction"),
        };

        self.decoded += 1;
        let m = &mut status.metadata;
        m.set_decoder("ax100_mode6", "1.0");
        // The unprotected AX.25 header goes out with the frame; losing
        // telemetry over a bit error in it would be a waste.
        m.set_pdu(&self.frame[..pdu_len]);
        m.set_time_now();
        m.set_crc_valid(crc_valid);
        m.set_sample_start(self.frame_start);
        m.set_sample_cnt(self.sample_cnt);
        m.set_corrected_bits(corrected);
        status.decode_success = true;
        self.reset_state();
        true
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
                    for i in self.start_idx..self.bitstream.len() {
                        let bit = self.bitstream[i];
                        self.decode_1b(bit);
                        self.decoded_bits += 1;
                        if self.decoded_bits == 8 {
                            if (self.shift_reg >> 16) as u8 != SYNC_FLAG {
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
                        if (self.shift_reg >> 16) as u8 == SYNC_FLAG {
                            self.sample_cnt = self.nitems_read + i as u64 - self.frame_start;
                            debug!("found frame end");
                            if self.enter_frame_end(status) {
                                self.bitstream.drain(..i + 1);
                                self.nitems_read += (i + 1) as u64;
                                self.start_idx = self.bitstream.len();
                                return;
                            }
                            // The frame did not pan out; rescan the
                            // buffered bits for another start.
                            self.bitstream.drain(..i + 1);
                            self.nitems_read += (i + 1) as u64;
                            cont = true;
                            break;
                        } else if ((self.shift_reg >> 16) & 0xfc) as u8 == 0x7c {
                            // Stuffed bit.
                            self.dec_b <<= 1;
                        } else {
                            self.decoded_bits += 1;
                            if self.decoded_bits == 8 {
                                self.frame.push(self.dec_b);
                                self.decoded_bits = 0;
                                if self.frame.len() >= self.max_frame_len + AX25_OVERHEAD {
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

impl Drop for Ax100Mode6Decoder {
    fn drop(&mut self) {
        info!("AX.100 mode 6 decoder: {} frames decoded", self.decoded);
    }
}

impl Decoder for Ax100Mode6Decoder {
    fn decode(&mut self, input: &[u8]) -> DecoderStatus {
        let mut status = DecoderStatus::new();
        for item in input {
            let b = !(item.wrapping_sub(self.prev_bit_nrzi)) & 0x1;
            self.prev_bit_nrzi = *item;
            let b = if self.ax25_descramble {
                self.lfsr.next_bit_descramble(b)
            } else {
                b
            };
            self.bitstream.push(b);
        }
        self.process(&mut status);
        status.consumed = input.len();
        status
    }

    fn reset(&mut self) {
        self.reset_state();
    }

    fn name(&self) -> &'static str {
        "ax100_mode6"
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

/// AX.100 mode 6 encoder: RS block construction plus the AX.25 wrap.
pub struct Ax100Mode6Encoder {
    ax25: Ax25Encoder,
    scrambler: Option<Whitening>,
    crc: Crc,
}

impl Ax100Mode6Encoder {
    /// Create an encoder. The AX.25 carrier uses fixed `GND` callsigns.
    pub fn new(
        preamble_len: usize,
        postamble_len: usize,
        scrambler: Option<Whitening>,
        ax25_scramble: bool,
        nrzi: bool,
        crc: Crc,
    ) -> Result<Self> {
        if !matches!(crc, Crc::None | Crc::Crc32c) {
            return Err(Error::config("AX.100 supports CRC32C or no CRC"));
        }
        Ok(Self {
            ax25: Ax25Encoder::new(
                "GND",
                0,
                "GND",
                1,
                preamble_len,
                postamble_len,
                ax25_scramble,
                nrzi,
            )?,
            scrambler,
            crc,
        })
    }
}

impl Encoder for Ax100Mode6Encoder {
    fn encode(&self, pdu: &[u8]) -> Result<Vec<u8>> {
        let cap = self.max_frame_len();
        if pdu.len() > cap {
            return Err(Error::Pdu(format!(
                "AX.100 mode 6 payload of {} bytes exceeds {cap}",
                pdu.len()
            )));
        }

        let mut block = pdu.to_vec();
        self.crc.append(&mut block, true);
        let parity = rs::encode(&block);
        block.extend_from_slice(&parity);
        if let Some(scrambler) = &self.scrambler {
            let mut scrambler = scrambler.clone();
            scrambler.reset();
            scrambler.scramble(&mut block);
        }
        self.ax25.encode(&block)
    }

    fn max_frame_len(&self) -> usize {
        rs::MAX_DATA_LEN - self.crc.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits;
    use crate::metadata::{MetaKey, MetaValue};

    fn run(dec: &mut Ax100Mode6Decoder, stream: &[u8]) -> Vec<DecoderStatus> {
        let mut out = Vec::new();
        let status = dec.decode(stream);
        out.push(status);
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

    fn roundtrip(crc: Crc, whiten: bool, g3ruh: bool, payload: &[u8]) -> DecoderStatus {
        let scrambler = whiten.then(|| Whitening::ccsds(true));
        let enc = Ax100Mode6Encoder::new(16, 16, scrambler.clone(), g3ruh, true, crc).unwrap();
        let frame = enc.encode(payload).unwrap();
        let stream = bits::packed_to_unpacked(&frame);
        let mut dec = Ax100Mode6Decoder::new(crc, scrambler, g3ruh).unwrap();
        let mut hits: Vec<_> = run(&mut dec, &stream)
            .into_iter()
            .filter(|s| s.decode_success)
            .collect();
        assert_eq!(hits.len(), 1);
        hits.pop().unwrap()
    }

    #[test]
    fn roundtrip_crc32c() {
        let payload: Vec<u8> = (0..60u8).collect();
        let status = roundtrip(Crc::Crc32c, true, false, &payload);
        let pdu = status.metadata.pdu().unwrap();
        // The AX.25 header rides along in front of the payload.
        assert_eq!(&pdu[16..], &payload[..]);
        assert_eq!(pdu.len(), 16 + payload.len());
        assert_eq!(
            status.metadata.get(MetaKey::DecoderCrcValid),
            Some(&MetaValue::Bool(true))
        );
        assert_eq!(
            status.metadata.get(MetaKey::DecoderCorrectedBits),
            Some(&MetaValue::U64(0))
        );
    }

    #[test]
    fn roundtrip_g3ruh_carrier() {
        let payload = [0xA5; 100];
        let status = roundtrip(Crc::Crc32c, true, true, &payload);
        assert_eq!(&status.metadata.pdu().unwrap()[16..], &payload[..]);
    }

    #[test]
    fn rs_repairs_payload() {
        let payload: Vec<u8> = (0..50u8).collect();
        let enc = Ax100Mode6Encoder::new(16, 16, None, false, true, Crc::Crc32c).unwrap();
        // Corrupt the coded block before the AX.25 wrap, so the damage
        // lands inside the RS-protected region and not in the stuffing.
        let mut block = payload.clone();
        Crc::Crc32c.append(&mut block, true);
        let parity = rs::encode(&block);
        block.extend_from_slice(&parity);
        for i in [3usize, 17, 29, 41, 55, 70] {
            block[i] ^= 0x42;
        }
        let frame = enc.ax25.encode(&block).unwrap();
        let stream = bits::packed_to_unpacked(&frame);
        let mut dec = Ax100Mode6Decoder::new(Crc::Crc32c, None, false).unwrap();
        let hits: Vec<_> = run(&mut dec, &stream)
            .into_iter()
            .filter(|s| s.decode_success)
            .collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(&hits[0].metadata.pdu().unwrap()[16..], &payload[..]);
        assert_eq!(
            hits[0].metadata.get(MetaKey::DecoderCorrectedBits),
            Some(&MetaValue::U64(6))
        );
    }

    #[test]
    fn undersized_frames_rejected() {
        // A plain AX.25 frame without an RS block inside is too short for
        // mode 6 and must be ignored.
        let enc = Ax25Encoder::new("GND", 0, "GND", 1, 16, 16, false, true).unwrap();
        let frame = enc.encode(&[0x11; 8]).unwrap();
        let stream = bits::packed_to_unpacked(&frame);
        let mut dec = Ax100Mode6Decoder::new(Crc::None, None, false).unwrap();
        assert!(run(&mut dec, &stream).iter().all(|s| !s.decode_success));
    }

    #[test]
    fn crc_none_marks_frames_unchecked() {
        let payload = [0x3C; 40];
        let status = roundtrip(Crc::None, false, false, &payload);
        assert_eq!(
            status.metadata.get(MetaKey::DecoderCrcValid),
            Some(&MetaValue::Bool(false))
        );
        assert_eq!(&status.metadata.pdu().unwrap()[16..], &payload[..]);
    }
}
