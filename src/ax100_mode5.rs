/*! AX.100 mode 5 codec (ASM + Golay).

The GOMspace AX100 transceiver in its "mode 5" framing: repeated preamble,
sync word, a Golay(24,12) coded length field, then the payload with
optional CCSDS whitening, optional RS(255,223) and a configurable CRC.
Bits arrive MSB first.

The CRC, when enabled together with RS, sits inside the RS block: the
transmitted order is `payload | CRC | parity` and the length field counts
all of it.
*/

use log::{debug, trace};

use crate::crc::Crc;
use crate::decoder::{Decoder, DecoderStatus, next_unique_id};
use crate::encoder::Encoder;
use crate::shift_reg::ShiftReg;
use crate::whitening::Whitening;
use crate::{Error, Result, bits, golay, rs};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Searching,
    SearchingSync,
    DecodingFrameLen,
    DecodingPayload,
}

/// Golay coded length field size in bytes.
const LENGTH_FIELD_LEN: usize = 3;

fn check_thresholds(
    preamble_bits: usize,
    preamble_threshold: u32,
    sync_bits: usize,
    sync_threshold: u32,
) -> Result<()> {
    if sync_bits < 8 {
        return Err(Error::config("SYNC word should be at least 8 bits"));
    }
    if preamble_bits < 2 * preamble_threshold as usize {
        return Err(Error::config(
            "too many error bits allowed for the preamble, lower the threshold",
        ));
    }
    if sync_bits < 2 * sync_threshold as usize {
        return Err(Error::config(
            "too many error bits allowed for the sync word, lower the threshold",
        ));
    }
    Ok(())
}

/// AX.100 mode 5 decoder.
pub struct Ax100Mode5Decoder {
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
    rs: bool,
    max_frame_len: usize,
    state: State,
    cnt: usize,
    len: usize,
    frame_start: u64,
    nitems_read: u64,
    pdu: Vec<u8>,
    id: usize,
}

impl Ax100Mode5Decoder {
    /// Create a decoder. `preamble` and `sync` are packed bytes compared
    /// MSB first; the thresholds are the allowed Hamming distances. The
    /// CRC must be [`Crc::None`] or [`Crc::Crc32c`].
    pub fn new(
        preamble: &[u8],
        preamble_threshold: u32,
        sync: &[u8],
        sync_threshold: u32,
        crc: Crc,
        descrambler: Option<Whitening>,
        enable_rs: bool,
    ) -> Result<Self> {
        check_thresholds(
            preamble.len() * 8,
            preamble_threshold,
            sync.len() * 8,
            sync_threshold,
        )?;
        if !matches!(crc, Crc::None | Crc::Crc32c) {
            return Err(Error::config("AX.100 supports CRC32C or no CRC"));
        }
        let max_frame_len = if enable_rs { 255 } else { 1024 };
        Ok(Self {
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
            rs: enable_rs,
            max_frame_len,
            state: State::Searching,
            cnt: 0,
            len: 0,
            frame_start: 0,
            nitems_read: 0,
            pdu: Vec::with_capacity(max_frame_len + Crc::Crc32c.size()),
            id: next_unique_id(),
        })
    }

    fn reset_state(&mut self) {
        if let Some(d) = self.descrambler.as_mut() {
            d.reset();
        }
        self.cnt = 0;
        self.state = State::Searching;
        self.preamble_reg.reset();
        self.sync_reg.reset();
        self.pdu.clear();
        trace!("reset");
    }

    fn search_preamble(&mut self, input: &[u8]) -> usize {
        // Pure CCSDS style transmissions may carry no repeated preamble.
        if self.preamble_len == 0 {
            self.state = State::SearchingSync;
            self.frame_start = self.nitems_read;
            return self.search_sync(input);
        }
        for (i, bit) in input.iter().enumerate() {
            self.preamble_reg.push(*bit);
            if self.preamble_reg.distance(&self.preamble) <= self.preamble_thresh {
                self.state = State::SearchingSync;
                self.cnt = 0;
                self.frame_start = self.nitems_read + i as u64 + 1;
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
                debug!("sync found, decoding frame length");
                self.state = State::DecodingFrameLen;
                self.cnt = 0;
                return i + 1;
            }
            // The sync word should have shown up by now.
            if self.cnt > self.preamble_len * 2 + self.sync_len {
                self.reset_state();
                return i + 1;
            }
        }
        input.len()
    }

    fn decode_frame_len(&mut self, input: &[u8]) -> usize {
        for (i, chunk) in input.chunks_exact(8).enumerate() {
            self.pdu.push(bits::bits_to_byte_msb(chunk));
            if self.pdu.len() == LENGTH_FIELD_LEN {
                let coded = ((self.pdu[0] as u32) << 16)
                    | ((self.pdu[1] as u32) << 8)
                    | self.pdu[2] as u32;
                let Some(word) = golay::decode24(coded) else {
                    self.reset_state();
                    return (i + 1) * 8;
                };
                let len = (word & 0xFF) as usize;
                debug!("frame length {len}");
                if len == 0 || len > self.max_frame_len {
                    self.reset_state();
                    return (i + 1) * 8;
                }
                self.len = len;
                self.cnt = 0;
                self.state = State::DecodingPayload;
                self.pdu.clear();
                return (i + 1) * 8;
            }
        }
        (input.len() / 8) * 8
    }

    fn decode_payload(&mut self, status: &mut DecoderStatus, input: &[u8]) {
        for (i, chunk) in input.chunks_exact(8).enumerate() {
            self.pdu.push(bits::bits_to_byte_msb(chunk));
            if self.pdu.len() == self.len {
                status.consumed = (i + 1) * 8;
                if let Some(d) = self.descrambler.as_mut() {
                    d.descramble(&mut self.pdu);
                }
                let mut plen = self.len;
                if self.rs {
                    match rs::decode(&mut self.pdu, &[]) {
                        Some(corrected) => {
                            plen -= rs::PARITY_LEN;
                            status.metadata.set_corrected_bits(corrected);
                        }
                        None => {
                            debug!("RS decoding failed");
                            self.reset_state();
                            return;
                        }
                    }
                }
                if plen < self.crc.size() {
                    self.reset_state();
                    return;
                }
                let m = &mut status.metadata;
                m.set_decoder("ax100_mode5", "1.0");
                m.set_time_now();
                m.set_sample_start(self.frame_start);
                m.set_sample_cnt(self.nitems_read + ((i + 1) * 8) as u64 - self.frame_start);
                m.set_pdu(&self.pdu[..plen - self.crc.size()]);
                m.set_crc_valid(self.crc.check(&self.pdu[..plen], true));
                status.decode_success = true;
                self.reset_state();
                return;
            }
        }
        status.consumed = (input.len() / 8) * 8;
    }
}

impl Decoder for Ax100Mode5Decoder {
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

    fn input_multiple(&self) -> usize {
        8
    }

    fn name(&self) -> &'static str {
        "ax100_mode5"
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

/// AX.100 mode 5 encoder.
pub struct Ax100Mode5Encoder {
    preamble: Vec<u8>,
    sync: Vec<u8>,
    crc: Crc,
    rs: bool,
}

impl Ax100Mode5Encoder {
    /// Create an encoder. The CRC must be [`Crc::None`] or
    /// [`Crc::Crc32c`].
    pub fn new(preamble: &[u8], sync: &[u8], crc: Crc, enable_rs: bool) -> Result<Self> {
        if sync.len() * 8 < 8 {
            return Err(Error::config("SYNC word should be at least 8 bits"));
        }
        if !matches!(crc, Crc::None | Crc::Crc32c) {
            return Err(Error::config("AX.100 supports CRC32C or no CRC"));
        }
        Ok(Self {
            preamble: preamble.to_vec(),
            sync: sync.to_vec(),
            crc,
            rs: enable_rs,
        })
    }
}

impl Encoder for Ax100Mode5Encoder {
    fn encode(&self, pdu: &[u8]) -> Result<Vec<u8>> {
        let cap = self.max_frame_len();
        if pdu.len() > cap {
            return Err(Error::Pdu(format!(
                "AX.100 mode 5 payload of {} bytes exceeds {cap}",
                pdu.len()
            )));
        }

        // Payload, CRC inside the FEC block, then parity.
        let mut block = pdu.to_vec();
        self.crc.append(&mut block, true);
        if self.rs {
            let parity = rs::encode(&block);
            block.extend_from_slice(&parity);
        }

        let mut out = Vec::with_capacity(self.preamble.len() + self.sync.len() + 3 + block.len());
        out.extend_from_slice(&self.preamble);
        out.extend_from_slice(&self.sync);
        let coded_len = golay::encode12(block.len() as u16, false);
        out.push((coded_len >> 16) as u8);
        out.push((coded_len >> 8) as u8);
        out.push(coded_len as u8);
        out.extend_from_slice(&block);
        Ok(out)
    }

    fn max_frame_len(&self) -> usize {
        if self.rs {
            rs::MAX_DATA_LEN - self.crc.size()
        } else {
            255 - self.crc.size()
        }
    }
}
