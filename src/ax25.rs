/*! AX.25 legacy codec.

[AX.25][ax25] over HDLC framing, as spoken by the classic 1200 baud Bell
202 and 9600 baud G3RUH hardware radios. The decoder consumes demodulated
bits (one per input item, LSB significant), performs NRZI decoding and
optional G3RUH descrambling internally, hunts for the `0x7E` flag, removes
stuffed bits and validates the FCS.

[ax25]: https://en.wikipedia.org/wiki/AX.25
 */
use log::{debug, info, trace};

use crate::decoder::{Decoder, DecoderStatus, next_unique_id};
use crate::encoder::Encoder;
use crate::whitening::{Lfsr, Whitening};
use crate::{Error, Result, crc};

/// HDLC flag delimiting AX.25 frames.
pub const SYNC_FLAG: u8 = 0x7e;
/// Size of the two mandatory address fields.
pub const MIN_ADDR_LEN: usize = 14;
/// Address field size with the maximum eight digipeaters.
pub const MAX_ADDR_LEN: usize = 2 * 7 + 8 * 7;
/// Header bytes in the worst case (addresses, control, PID).
pub const MAX_HEADER_LEN: usize = MAX_ADDR_LEN + 2 + 1;
/// Maximum callsign length.
pub const CALLSIGN_MAX_LEN: usize = 6;

/// Locate the start of the information field: walk the 7-byte address
/// blocks until the one with the extension bit set, then skip control and
/// PID.
fn payload_offset(frame: &[u8]) -> Option<usize> {
    let mut idx = 0;
    loop {
        if idx + 7 > frame.len() || idx >= MAX_ADDR_LEN {
            return None;
        }
        idx += 7;
        if frame[idx - 1] & 0x1 == 1 {
            break;
        }
    }
    if idx + 2 > frame.len() { None } else { Some(idx + 2) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    NoSync,
    InSync,
    Decoding,
}

/// AX.25 decoder options, assembled with [`Ax25Decoder::builder`].
#[derive(Debug, Clone)]
pub struct Ax25DecoderBuilder {
    addr: String,
    ssid: u8,
    promisc: bool,
    descramble: bool,
    crc_check: bool,
    max_frame_len: usize,
    error_correction: bool,
}

impl Default for Ax25DecoderBuilder {
    fn default() -> Self {
        Self {
            addr: String::new(),
            ssid: 0,
            promisc: true,
            descramble: false,
            crc_check: true,
            max_frame_len: 512,
            error_correction: false,
        }
    }
}

impl Ax25DecoderBuilder {
    /// Destination callsign to accept when not promiscuous.
    pub fn addr(mut self, addr: &str) -> Self {
        self.addr = addr.to_string();
        self
    }
    /// Destination SSID to accept when not promiscuous.
    pub fn ssid(mut self, ssid: u8) -> Self {
        self.ssid = ssid;
        self
    }
    /// Accept every frame regardless of destination.
    pub fn promisc(mut self, promisc: bool) -> Self {
        self.promisc = promisc;
        self
    }
    /// Run the G3RUH descrambler after NRZI decoding.
    pub fn descramble(mut self, descramble: bool) -> Self {
        self.descramble = descramble;
        self
    }
    /// Drop frames with a bad FCS. When disabled such frames are emitted
    /// with `decoder_crc_valid` unset.
    pub fn crc_check(mut self, crc_check: bool) -> Self {
        self.crc_check = crc_check;
        self
    }
    /// Maximum frame size in bytes.
    pub fn max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }
    /// Brute-force single bit flips when the FCS fails.
    pub fn error_correction(mut self, on: bool) -> Self {
        self.error_correction = on;
        self
    }

    /// Build the decoder.
    pub fn build(self) -> Result<Ax25Decoder> {
        if !self.promisc && (self.addr.is_empty() || self.addr.len() > CALLSIGN_MAX_LEN) {
            return Err(Error::config("filter callsign length out of range"));
        }
        if self.max_frame_len < MIN_ADDR_LEN + 2 {
            return Err(Error::config("AX.25 frames are at least 16 bytes"));
        }
        Ok(Ax25Decoder {
            opts: self,
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
            crc_failed: 0,
            id: next_unique_id(),
        })
    }
}

/// AX.25 decoder.
pub struct Ax25Decoder {
    opts: Ax25DecoderBuilder,
    state: State,
    shift_reg: u8,
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
    crc_failed: usize,
    id: usize,
}

impl Drop for Ax25Decoder {
    fn drop(&mut self) {
        info!(
            "AX.25 decoder: {} frames decoded, {} CRC failures",
            self.decoded, self.crc_failed
        );
    }
}

impl Ax25Decoder {
    /// Start building a decoder.
    pub fn builder() -> Ax25DecoderBuilder {
        Ax25DecoderBuilder::default()
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
        self.frame.clear();
        // The first payload byte may already contain a stuffed bit.
        if (self.shift_reg & 0xfc) == 0x7c {
            self.dec_b <<= 1;
            self.decoded_bits = 7;
        } else {
            self.frame.push(self.dec_b);
            self.decoded_bits = 0;
        }
    }

    fn decode_1b(&mut self, bit: u8) {
        // The LS bit is transmitted first.
        self.shift_reg = (self.shift_reg >> 1) | (bit << 7);
        self.dec_b = (self.dec_b >> 1) | (bit << 7);
    }

    fn is_frame_valid(&self) -> bool {
        let n = self.frame.len();
        let fcs = crc::crc16_ax25(&self.frame[..n - 2]);
        let recv = ((self.frame[n - 1] as u16) << 8) | self.frame[n - 2] as u16;
        trace!("FCS received {recv:#06x}, computed {fcs:#06x}");
        fcs == recv
    }

    fn error_correction(&mut self) -> bool {
        if !self.opts.error_correction {
            return false;
        }
        for byte in 0..self.frame.len() {
            for bit in 0..8 {
                self.frame[byte] ^= 1 << bit;
                if self.is_frame_valid() {
                    debug!("single bit flip fixed the FCS");
                    return true;
                }
                self.frame[byte] ^= 1 << bit;
            }
        }
        false
    }

    fn address_accepted(&self) -> bool {
        if self.opts.promisc {
            return true;
        }
        let mut want = [b' '; CALLSIGN_MAX_LEN];
        want[..self.opts.addr.len()].copy_from_slice(self.opts.addr.as_bytes());
        let dest_ok = self
            .frame
            .iter()
            .zip(want.iter())
            .all(|(got, want)| got >> 1 == *want);
        let ssid_ok = (self.frame[CALLSIGN_MAX_LEN] >> 1) & 0x0F == self.opts.ssid & 0x0F;
        dest_ok && ssid_ok
    }

    fn enter_frame_end(&mut self, status: &mut DecoderStatus) -> bool {
        if self.frame.len() < MIN_ADDR_LEN + 2 {
            self.reset_state();
            return false;
        }

        let valid = self.is_frame_valid() || self.error_correction();
        if !valid {
            self.crc_failed += 1;
            debug!("wrong FCS");
        }
        if valid || !self.opts.crc_check {
            let accepted = self.address_accepted();
            let offset = payload_offset(&self.frame);
            if let Some(offset) = offset
                && accepted
            {
                self.decoded += 1;
                let m = &mut status.metadata;
                m.set_decoder("ax25", "1.2");
                m.set_pdu(&self.frame[offset..self.frame.len() - 2]);
                m.set_time_now();
                m.set_crc_valid(valid);
                m.set_sample_start(self.frame_start);
                m.set_sample_cnt(self.sample_cnt);
                status.decode_success = true;
            }
        }
        self.reset_state();
        valid && status.decode_success
    }

    /// One pass over the buffered bitstream; at most one frame completes.
    fn process(&mut self, status: &mut DecoderStatus) {
        while !self.bitstream.is_empty() {
            let mut cont = false;
            match self.state {
                State::NoSync => {
                    for i in 0..self.bitstream.len() {
                        let bit = self.bitstream[i];
                        self.decode_1b(bit);
                        if self.shift_reg == SYNC_FLAG {
                            trace!("have sync");
                            // A false positive may hide the real flag in
                            // the bits just processed, so only the bits
                            // before the candidate flag are dropped.
                            self.bitstream.drain(..i);
                            self.nitems_read += i as u64;
                            self.enter_sync_state();
                            self.frame_start = self.nitems_read;
                            self.start_idx = 1;
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
                    // Transmitters repeat the flag; with G3RUH that also
                    // settles the descrambler.
                    for i in self.start_idx..self.bitstream.len() {
                        let bit = self.bitstream[i];
                        self.decode_1b(bit);
                        self.decoded_bits += 1;
                        if self.decoded_bits == 8 {
                            if self.shift_reg != SYNC_FLAG {
                                // Keep the last 7 bits around in case this
                                // was a false frame start.
                                self.bitstream.drain(..i + 1 - 7);
                                self.nitems_read += (i + 1 - 7) as u64;
                                self.start_idx = 7;
                                self.enter_decoding_state();
                                trace!("entering decode");
                                cont = true;
                                break;
                            }
                            trace!("skipping AX.25 flag");
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
                        if self.shift_reg == SYNC_FLAG {
                            // The closing flag must land on a byte
                            // boundary, otherwise this is likely the
                            // opening flag of another frame.
                            if self.decoded_bits != 7 {
                                self.bitstream.drain(..i + 1 - 8);
                                self.nitems_read += (i + 1 - 8) as u64;
                                self.reset_state();
                                cont = true;
                                break;
                            }
                            self.sample_cnt = self.nitems_read + i as u64 - self.frame_start;
                            // The closing flag may open the next frame,
                            // so it stays in the buffer.
                            self.bitstream.drain(..i + 1 - 8);
                            self.nitems_read += (i + 1 - 8) as u64;
                            self.enter_frame_end(status);
                            return;
                        } else if (self.shift_reg & 0xfc) == 0x7c {
                            // Stuffed bit.
                            self.dec_b <<= 1;
                        } else if (self.shift_reg & 0xfe) == 0xfe {
                            debug!("illegal bit sequence {:#04x}", self.shift_reg);
                            self.bitstream.drain(..i + 1 - 8);
                            self.nitems_read += (i + 1 - 8) as u64;
                            self.reset_state();
                            cont = true;
                            break;
                        } else {
                            self.decoded_bits += 1;
                            if self.decoded_bits == 8 {
                                self.frame.push(self.dec_b);
                                self.decoded_bits = 0;
                                if self.frame.len() >= self.opts.max_frame_len {
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

impl Decoder for Ax25Decoder {
    fn decode(&mut self, input: &[u8]) -> DecoderStatus {
        let mut status = DecoderStatus::new();
        for item in input {
            // NRZI: a toggle is zero, constant is one.
            let b = !(item.wrapping_sub(self.prev_bit_nrzi)) & 0x1;
            self.prev_bit_nrzi = *item;
            let b = if self.opts.descramble {
                self.lfsr.next_bit_descramble(b)
            } else {
                b
            };
            self.bitstream.push(b);
        }
        // Everything is buffered internally, so the whole chunk is
        // consumed no matter how far the state machine gets.
        self.process(&mut status);
        status.consumed = input.len();
        status
    }

    fn reset(&mut self) {
        self.reset_state();
    }

    fn name(&self) -> &'static str {
        "ax25"
    }

    fn version(&self) -> &'static str {
        "1.2"
    }

    fn max_frame_len(&self) -> usize {
        self.opts.max_frame_len
    }

    fn unique_id(&self) -> usize {
        self.id
    }
}

/// AX.25 encoder for the legacy hardware radios.
///
/// Builds the address block, appends the FCS, performs HDLC bit stuffing
/// and wraps the frame in pre/postamble flags. Output is packed bytes in
/// transmission order (MSB first); G3RUH scrambling and NRZI encoding are
/// applied on request.
pub struct Ax25Encoder {
    dest_addr: String,
    dest_ssid: u8,
    src_addr: String,
    src_ssid: u8,
    preamble_len: usize,
    postamble_len: usize,
    scramble: bool,
    nrzi: bool,
    max_frame_len: usize,
}

impl Ax25Encoder {
    /// Create an encoder. Callsigns must be 1..=6 characters.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dest_addr: &str,
        dest_ssid: u8,
        src_addr: &str,
        src_ssid: u8,
        preamble_len: usize,
        postamble_len: usize,
        scramble: bool,
        nrzi: bool,
    ) -> Result<Self> {
        if dest_addr.is_empty() || dest_addr.len() > CALLSIGN_MAX_LEN {
            return Err(Error::config("invalid destination callsign"));
        }
        if src_addr.is_empty() || src_addr.len() > CALLSIGN_MAX_LEN {
            return Err(Error::config("invalid source callsign"));
        }
        Ok(Self {
            dest_addr: dest_addr.to_string(),
            dest_ssid,
            src_addr: src_addr.to_string(),
            src_ssid,
            preamble_len,
            postamble_len,
            scramble,
            nrzi,
            max_frame_len: 512,
        })
    }

    fn insert_address(&self, out: &mut Vec<u8>) {
        for c in self.dest_addr.bytes() {
            out.push(c << 1);
        }
        for _ in self.dest_addr.len()..CALLSIGN_MAX_LEN {
            out.push(b' ' << 1);
        }
        // SSID with the reserved bits set; command/response stays 0.
        out.push(((self.dest_ssid & 0x0F) << 1) | 0b0110_0000);

        for c in self.src_addr.bytes() {
            out.push(c << 1);
        }
        for _ in self.src_addr.len()..CALLSIGN_MAX_LEN {
            out.push(b' ' << 1);
        }
        // Last address field, so the extension bit is set too.
        out.push(((self.src_ssid & 0x0F) << 1) | 0b0110_0001);
    }
}

impl Encoder for Ax25Encoder {
    fn encode(&self, pdu: &[u8]) -> Result<Vec<u8>> {
        if pdu.len() > self.max_frame_len {
            return Err(Error::Pdu(format!(
                "AX.25 payload of {} bytes exceeds {}",
                pdu.len(),
                self.max_frame_len
            )));
        }

        let mut tmp = Vec::with_capacity(MAX_HEADER_LEN + pdu.len() + 2);
        self.insert_address(&mut tmp);
        tmp.push(0x00); // Control: UI.
        tmp.push(0xF0); // PID: no layer 3.
        tmp.extend_from_slice(pdu);
        // The FCS is transmitted little endian.
        crc::Crc::Ax25.append(&mut tmp, false);

        // Bit stuffing, LS bit first.
        let mut out = vec![SYNC_FLAG; self.preamble_len];
        let mut sr = 0u8;
        let mut enc_bits = 0u8;
        for i in 0..tmp.len() * 8 {
            let bit = (tmp[i / 8] >> (i % 8)) & 0x1;
            sr = (sr << 1) | bit;
            enc_bits += 1;
            if enc_bits == 8 {
                enc_bits = 0;
                out.push(sr);
            }
            if (sr & 0x1F) == 0x1F {
                sr <<= 1;
                enc_bits += 1;
            }
            if enc_bits == 8 {
                enc_bits = 0;
                out.push(sr);
            }
        }

        // Stuffing may have pushed the frame off the byte boundary, so
        // the postamble goes through the same shift register.
        for i in 0..self.postamble_len * 8 {
            let bit = (SYNC_FLAG >> (i % 8)) & 0x1;
            sr = (sr << 1) | bit;
            enc_bits += 1;
            if enc_bits == 8 {
                enc_bits = 0;
                out.push(sr);
            }
        }
        if enc_bits > 0 {
            out.push(sr << (8 - enc_bits));
        }

        if self.scramble {
            // The frame is handed to the modulator MS bit first, so the
            // scrambler walks the bits in the same order.
            let mut g3ruh = Whitening::g3ruh(true);
            g3ruh.scramble(&mut out);
        }

        if self.nrzi {
            let mut prev = 0u8;
            for byte in out.iter_mut() {
                let inv = !*byte;
                let mut b = 0u8;
                for shift in (0..8).rev() {
                    prev = ((inv >> shift) & 0x1) ^ prev;
                    b |= (prev & 0x1) << shift;
                }
                *byte = b;
            }
        }
        Ok(out)
    }

    fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }
}
