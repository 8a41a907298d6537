/*! IEEE 802.15.4-ish codec.

Not the standards-compliant PHY: a family of CubeSat radios (TI CC11xx
descendants mostly) borrow the 802.15.4 frame shape of repeated preamble
byte, sync word, optional one-byte length field, payload and CRC, and
bolt optional whitening and RS(255,223) on top. Bits arrive MSB first and the
decoder consumes whole bytes, so `input_multiple` is 8.

On the receive side the order is RS decode, then descramble, then CRC
check; the transmitter correspondingly scrambles before the RS parity is
attached.
*/

use log::{debug, trace};

use crate::crc::Crc;
use crate::decoder::{Decoder, DecoderStatus, next_unique_id};
use crate::encoder::Encoder;
use crate::shift_reg::ShiftReg;
use crate::whitening::Whitening;
use crate::{Error, Result, bits, rs};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Searching,
    SearchingSync,
    DecodingFrameLen,
    DecodingPayload,
}

/// IEEE 802.15.4-variant decoder.
pub struct Ieee802154Decoder {
    preamble: ShiftReg,
    preamble_reg: ShiftReg,
    preamble_len: usize,
    preamble_thresh: u32,
    sync: ShiftReg,
    sync_reg: ShiftReg,
    sync_len: usize,
    sync_thresh: u32,
    crc: Crc,
    descrambler: Option<Whitening>,
    var_len: bool,
    drop_invalid: bool,
    rs: bool,
    max_len: usize,
    /// Expected payload-plus-CRC length of the frame being decoded.
    len: usize,
    length_field_len: usize,
    cnt: usize,
    state: State,
    frame_start: u64,
    nitems_read: u64,
    pdu: Vec<u8>,
    id: usize,
}

impl Ieee802154Decoder {
    /// Create a decoder. With `var_len` the frame carries a one-byte
    /// length field; otherwise every frame is `max_len` bytes. With
    /// `drop_invalid` CRC failures are dropped silently instead of being
    /// emitted unvalidated.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        preamble: &[u8],
        preamble_threshold: u32,
        sync: &[u8],
        sync_threshold: u32,
        crc: Crc,
        descrambler: Option<Whitening>,
        var_len: bool,
        max_len: usize,
        drop_invalid: bool,
        enable_rs: bool,
    ) -> Result<Self> {
        if max_len == 0 {
            return Err(Error::config("maximum frame size should be at least 1 byte"));
        }
        if sync.len() * 8 < 8 {
            return Err(Error::config("SYNC word should be at least 8 bits"));
        }
        if !preamble.is_empty() && preamble.len() * 8 < 2 * preamble_threshold as usize {
            return Err(Error::config(
                "too many error bits allowed for the preamble, lower the threshold",
            ));
        }
        if sync.len() * 8 < 2 * sync_threshold as usize {
            return Err(Error::config(
                "too many error bits allowed for the sync word, lower the threshold",
            ));
        }
        let length_field_len = usize::from(var_len);
        let len = max_len + crc.size();
        let mut dec = Self {
            preamble: ShiftReg::from_bytes(preamble),
            preamble_reg: ShiftReg::new(preamble.len() * 8),
            preamble_len: preamble.len() * 8,
            preamble_thresh: preamble_threshold,
            sync: ShiftReg::from_bytes(sync),
            sync_reg: ShiftReg::new(sync.len() * 8),
            sync_len: sync.len() * 8,
            sync_thresh: sync_threshold,
            crc,
            descrambler,
            var_len,
            drop_invalid,
            rs: enable_rs,
            max_len,
            len,
            length_field_len,
            state: State::Searching,
            cnt: 0,
            frame_start: 0,
            nitems_read: 0,
            pdu: Vec::with_capacity(len + length_field_len),
            id: next_unique_id(),
        };
        dec.reset_state();
        Ok(dec)
    }

    fn reset_state(&mut self) {
        if let Some(d) = self.descrambler.as_mut() {
            d.reset();
        }
        self.pdu.clear();
        self.cnt = 0;
        // Some setups run without any preamble at all.
        self.state = if self.preamble_len > 0 {
            State::Searching
        } else {
            State::SearchingSync
        };
        self.preamble_reg.reset();
        self.sync_reg.reset();
    }

    fn search_preamble(&mut self, input: &[u8]) -> usize {
        for (i, bit) in input.iter().enumerate() {
            self.preamble_reg.push(*bit);
            if self.preamble_reg.distance(&self.preamble) <= self.preamble_thresh {
                self.state = State::SearchingSync;
                self.frame_start = self.nitems_read + i as u64 + 1;
                self.cnt = 0;
                return i + 1;
            }
        }
        input.len()
    }

    fn search_sync(&mut self, input: &[u8]) -> usize {
        for (i, bit) in input.iter().enumerate() {
            self.sync_reg.push(*bit);
            self.cnt += 1;
            if self.sync_reg.distance(&self.sync) <= self.sync_thresh {
                if self.preamble_len == 0 {
                    self.frame_start = self.nitems_read + i as u64 + 1;
                }
                self.cnt = 0;
                if self.var_len {
                    self.state = State::DecodingFrameLen;
                } else {
                    self.len = self.max_len + self.crc.size();
                    self.state = State::DecodingPayload;
                }
                return i + 1;
            }
            // The sync word should be available by now.
            if self.cnt > self.preamble_len * 2 + self.sync_len + self.sync_thresh as usize {
                self.reset_state();
                return i + 1;
            }
        }
        input.len()
    }

    fn decode_frame_len(&mut self, input: &[u8]) -> usize {
        let Some(chunk) = input.chunks_exact(8).next() else {
            return 0;
        };
        let mut b = bits::bits_to_byte_msb(chunk);
        if let Some(d) = self.descrambler.as_mut() {
            // The length field is whitened in isolation; the register
            // keeps running into the payload.
            let mut field = [b];
            d.descramble(&mut field);
            b = field[0];
        }
        if b as usize > self.max_len {
            debug!("length field {b} out of range");
            self.reset_state();
            return 8;
        }
        self.len = b as usize + self.crc.size();
        self.pdu.push(b);
        trace!("frame length {}", self.len);
        self.state = State::DecodingPayload;
        8
    }

    fn decode_payload(&mut self, status: &mut DecoderStatus, input: &[u8]) {
        for (i, chunk) in input.chunks_exact(8).enumerate() {
            self.pdu.push(bits::bits_to_byte_msb(chunk));
            status.consumed = (i + 1) * 8;
            if self.pdu.len() == self.len + self.length_field_len {
                let mut flen = self.len;
                if self.rs {
                    let block = &mut self.pdu[self.length_field_len..];
                    match rs::decode(block, &[]) {
                        Some(corrected) => {
                            status.metadata.set_symbol_erasures(corrected);
                            flen -= rs::PARITY_LEN;
                        }
                        None => {
                            debug!("RS decoding failed");
                            self.reset_state();
                            return;
                        }
                    }
                }
                if let Some(d) = self.descrambler.as_mut() {
                    let start = self.length_field_len;
                    d.descramble(&mut self.pdu[start..start + flen]);
                }

                let m = &mut status.metadata;
                m.set_decoder("IEEE-802.15.4", "1.0");
                m.set_time_now();
                m.set_sample_start(self.frame_start);
                m.set_sample_cnt(self.nitems_read + ((i + 1) * 8) as u64 - self.frame_start);

                let span = self.length_field_len + flen;
                if self.crc.check(&self.pdu[..span], true) {
                    status.decode_success = true;
                    m.set_pdu(&self.pdu[self.length_field_len..span - self.crc.size()]);
                    m.set_crc_valid(true);
                } else if !self.drop_invalid {
                    status.decode_success = true;
                    m.set_pdu(&self.pdu[self.length_field_len..]);
                    m.set_crc_valid(false);
                } else {
                    debug!("CRC failure, dropping frame");
                }
                self.reset_state();
                return;
            }
        }
        status.consumed = (input.len() / 8) * 8;
    }
}

impl Decoder for Ieee802154Decoder {
    fn decode(&mut self, input: &[u8]) -> DecoderStatus {
        let mut status = DecoderStatus::new();
        match self.state {
            State::Searching => status.consumed = self.search_preamble(input),
            State::SearchingSync => status.consumed = self.search_sync(input),
            State::DecodingFrameLen => status.consumed = self.decode_frame_len(input),
            State::DecodingPayload => self.decode_payload(&mut status, input),
        }
        self.nitems_read += status.consumed as u64;
        status
    }

    fn reset(&mut self) {
        self.reset_state();
    }

    /// Whole bytes only, which keeps the length and payload stages
    /// trivial.
    fn input_multiple(&self) -> usize {
        8
    }

    fn name(&self) -> &'static str {
        "IEEE-802.15.4"
    }

    fn version(&self) -> &'static str {
        "1.0"
    }

    fn max_frame_len(&self) -> usize {
        self.max_len
    }

    fn unique_id(&self) -> usize {
        self.id
    }
}

/// IEEE 802.15.4-variant encoder.
pub struct Ieee802154Encoder {
    preamble: u8,
    preamble_len: usize,
    sync: Vec<u8>,
    crc: Crc,
    scrambler: Option<Whitening>,
    var_len: bool,
    max_frame_len: usize,
}

impl Ieee802154Encoder {
    /// Create an encoder: `preamble_len` copies of the `preamble` byte,
    /// the sync word, then (with `var_len`) the length byte, payload and
    /// CRC. Length, payload and CRC are whitened together when a
    /// scrambler is given.
    pub fn new(
        preamble: u8,
        preamble_len: usize,
        sync: &[u8],
        crc: Crc,
        scrambler: Option<Whitening>,
        var_len: bool,
    ) -> Result<Self> {
        if sync.is_empty() {
            return Err(Error::config("SYNC word should be at least one byte"));
        }
        Ok(Self {
            preamble,
            preamble_len,
            sync: sync.to_vec(),
            crc,
            scrambler,
            var_len,
            max_frame_len: 255,
        })
    }
}

impl Encoder for Ieee802154Encoder {
    fn encode(&self, pdu: &[u8]) -> Result<Vec<u8>> {
        if pdu.len() > self.max_frame_len {
            return Err(Error::Pdu(format!(
                "802.15.4 payload of {} bytes exceeds {}",
                pdu.len(),
                self.max_frame_len
            )));
        }
        let mut out = vec![self.preamble; self.preamble_len];
        out.extend_from_slice(&self.sync);
        let body_start = out.len();
        if self.var_len {
            out.push(pdu.len() as u8);
        }
        out.extend_from_slice(pdu);
        // The CRC covers the length byte.
        let mut body = out.split_off(body_start);
        self.crc.append(&mut body, true);
        if let Some(scrambler) = &self.scrambler {
            let mut scrambler = scrambler.clone();
            scrambler.reset();
            scrambler.scramble(&mut body);
        }
        out.extend_from_slice(&body);
        Ok(out)
    }

    fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{MetaKey, MetaValue};

    const SYNC: &[u8] = &[0xD3, 0x91];

    fn run(dec: &mut Ieee802154Decoder, stream: &[u8]) -> Vec<DecoderStatus> {
        let mut out = Vec::new();
        let mut consumed = 0;
        while consumed < stream.len() {
            let n = (stream.len() - consumed) / 8 * 8;
            if n == 0 {
                break;
            }
            let status = dec.decode(&stream[consumed..consumed + n]);
            if status.consumed == 0 {
                break;
            }
            consumed += status.consumed;
            out.push(status);
        }
        out
    }

    fn roundtrip(crc: Crc, whiten: bool, payload: &[u8]) -> DecoderStatus {
        let scrambler = whiten.then(|| Whitening::ccsds(true));
        let enc = Ieee802154Encoder::new(0x55, 8, SYNC, crc, scrambler.clone(), true).unwrap();
        let frame = enc.encode(payload).unwrap();
        let stream = crate::bits::packed_to_unpacked(&frame);
        let mut dec = Ieee802154Decoder::new(
            &[0x55; 8],
            2,
            SYNC,
            2,
            crc,
            scrambler,
            true,
            255,
            true,
            false,
        )
        .unwrap();
        let mut hits: Vec<_> = run(&mut dec, &stream)
            .into_iter()
            .filter(|s| s.decode_success)
            .collect();
        assert_eq!(hits.len(), 1);
        hits.pop().unwrap()
    }

    #[test]
    fn roundtrip_var_len() {
        let payload: Vec<u8> = (0..57u8).collect();
        let status = roundtrip(Crc::Crc32c, false, &payload);
        assert_eq!(status.metadata.pdu().unwrap(), &payload[..]);
        assert_eq!(
            status.metadata.get(MetaKey::DecoderCrcValid),
            Some(&MetaValue::Bool(true))
        );
    }

    #[test]
    fn roundtrip_whitened() {
        let payload = [0x00; 32];
        let status = roundtrip(Crc::Ccitt, true, &payload);
        assert_eq!(status.metadata.pdu().unwrap(), &payload[..]);
    }

    #[test]
    fn const_len_with_rs() {
        // Fixed-size frames with RS parity: the transmitter scrambles
        // payload and CRC, then attaches parity over the scrambled block.
        let payload = [0xC3; 64];
        let mut block = payload.to_vec();
        Crc::Crc32c.append(&mut block, true);
        let mut w = Whitening::ccsds(true);
        w.scramble(&mut block);
        let parity = rs::encode(&block);
        block.extend_from_slice(&parity);

        let mut frame = vec![0x55; 8];
        frame.extend_from_slice(SYNC);
        frame.extend_from_slice(&block);
        // Damage a few bytes for RS to chew on.
        let base = 8 + SYNC.len();
        frame[base + 5] ^= 0xFF;
        frame[base + 40] ^= 0x81;

        let stream = crate::bits::packed_to_unpacked(&frame);
        let mut dec = Ieee802154Decoder::new(
            &[0x55; 8],
            2,
            SYNC,
            2,
            Crc::Crc32c,
            Some(Whitening::ccsds(true)),
            false,
            payload.len() + rs::PARITY_LEN,
            true,
            true,
        )
        .unwrap();
        let hits: Vec<_> = run(&mut dec, &stream)
            .into_iter()
            .filter(|s| s.decode_success)
            .collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.pdu().unwrap(), &payload[..]);
        assert_eq!(
            hits[0].metadata.get(MetaKey::DecoderSymbolErasures),
            Some(&MetaValue::U64(2))
        );
    }

    #[test]
    fn crc_failure_emitted_when_allowed() {
        let enc = Ieee802154Encoder::new(0x55, 8, SYNC, Crc::Ccitt, None, true).unwrap();
        let mut frame = enc.encode(&[0x77; 16]).unwrap();
        let n = frame.len();
        frame[n - 1] ^= 0x04;

        let stream = crate::bits::packed_to_unpacked(&frame);
        let mut strict =
            Ieee802154Decoder::new(&[0x55; 8], 2, SYNC, 2, Crc::Ccitt, None, true, 255, true, false)
                .unwrap();
        assert!(run(&mut strict, &stream).iter().all(|s| !s.decode_success));

        let mut lax = Ieee802154Decoder::new(
            &[0x55; 8],
            2,
            SYNC,
            2,
            Crc::Ccitt,
            None,
            true,
            255,
            false,
            false,
        )
        .unwrap();
        let hits: Vec<_> = run(&mut lax, &stream)
            .into_iter()
            .filter(|s| s.decode_success)
            .collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(
            hits[0].metadata.get(MetaKey::DecoderCrcValid),
            Some(&MetaValue::Bool(false))
        );
    }

    #[test]
    fn length_field_out_of_range_resets() {
        let enc = Ieee802154Encoder::new(0x55, 8, SYNC, Crc::Ccitt, None, true).unwrap();
        let frame = enc.encode(&[0x12; 100]).unwrap();
        let stream = crate::bits::packed_to_unpacked(&frame);
        let mut dec =
            Ieee802154Decoder::new(&[0x55; 8], 2, SYNC, 2, Crc::Ccitt, None, true, 64, true, false)
                .unwrap();
        assert!(run(&mut dec, &stream).iter().all(|s| !s.decode_success));
    }

    #[test]
    fn config_validation() {
        assert!(
            Ieee802154Decoder::new(&[0x55], 2, SYNC, 2, Crc::None, None, true, 0, true, false)
                .is_err()
        );
        assert!(
            Ieee802154Decoder::new(&[0x55], 8, SYNC, 2, Crc::None, None, true, 255, true, false)
                .is_err()
        );
        assert!(Ieee802154Encoder::new(0x55, 8, &[], Crc::None, None, true).is_err());
    }
}
