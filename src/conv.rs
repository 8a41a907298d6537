/*! Convolutional codec, K=7, polynomials 0o171/0o133.

Base rate 1/2, punctured to 2/3, 3/4, 5/6 and 7/8. The decoder is a
soft-decision Viterbi run in truncated blocks: the truncation depth follows
the 3·K/(1−R) rule of thumb, rounded up to a whole puncturing period, and
the survivor state is carried from block to block so a frame can be decoded
incrementally. Depuncturing inserts neutral soft symbols in the dropped
positions.

At rate 1/2 the second output symbol is inverted on the wire; punctured
rates transmit both symbols straight. Matching peers require this
convention.
*/

use itertools::Itertools;

const POLY_A: u8 = 0o171;
const POLY_B: u8 = 0o133;
const K: usize = 7;
const NSTATES: usize = 64;

/// Supported coding rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs, non_camel_case_types)]
pub enum CodingRate {
    Rate1_2,
    Rate2_3,
    Rate3_4,
    Rate5_6,
    Rate7_8,
}

impl CodingRate {
    /// Transmitted symbols per puncturing period.
    fn period(&self) -> usize {
        match self {
            CodingRate::Rate1_2 => 2,
            CodingRate::Rate2_3 => 3,
            CodingRate::Rate3_4 => 4,
            CodingRate::Rate5_6 => 6,
            CodingRate::Rate7_8 => 8,
        }
    }

    /// True if the unpunctured symbol at offset `i` of the 2-symbol-per-bit
    /// stream is dropped on the wire.
    fn punctured(&self, i: usize) -> bool {
        match self {
            CodingRate::Rate1_2 => false,
            CodingRate::Rate2_3 => i % 4 == 2,
            CodingRate::Rate3_4 => matches!(i % 6, 2 | 5),
            CodingRate::Rate5_6 => matches!(i % 10, 2 | 5 | 6 | 9),
            CodingRate::Rate7_8 => matches!(i % 14, 2 | 4 | 6 | 9 | 10 | 13),
        }
    }

    /// Viterbi truncation depth in received symbols: 3·K/(1−R), rounded up
    /// to a whole puncturing period.
    pub fn trunc_depth(&self) -> usize {
        let base = match self {
            CodingRate::Rate1_2 => 3 * 14,
            CodingRate::Rate2_3 => 3 * 21,
            CodingRate::Rate3_4 => 3 * 28,
            CodingRate::Rate5_6 => 3 * 42,
            CodingRate::Rate7_8 => 3 * 56,
        };
        let mut depth = base;
        while depth % self.period() != 0 {
            depth += 1;
        }
        depth
    }

    fn min_block(&self) -> usize {
        self.period()
    }
}

fn parity(x: u8) -> u8 {
    (x.count_ones() & 0x1) as u8
}

/// Convolutional encoder.
///
/// Input and output are one bit per byte. [`ConvEncoder::encode`] codes a
/// whole message and flushes the 6-bit tail; the
/// [`ConvEncoder::encode_trunc`] / [`ConvEncoder::finalize`] pair mirrors
/// the decoder's block model for streaming use.
#[derive(Debug, Clone)]
pub struct ConvEncoder {
    rate: CodingRate,
    state: u8,
}

impl ConvEncoder {
    /// Create an encoder in the all-zero state.
    pub fn new(rate: CodingRate) -> Self {
        Self { rate, state: 0 }
    }

    /// The configured rate.
    pub fn rate(&self) -> CodingRate {
        self.rate
    }

    /// Return to the all-zero state.
    pub fn reset(&mut self) {
        self.state = 0;
    }

    fn encode_raw(&mut self, bits: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(bits.len() * 2);
        let invert = self.rate == CodingRate::Rate1_2;
        for bit in bits {
            let reg = (self.state << 1) | (bit & 0x1);
            out.push(parity(reg & POLY_A));
            out.push(parity(reg & POLY_B) ^ u8::from(invert));
            self.state = reg & 0x3F;
        }
        out
    }

    fn puncture(&self, unpunctured: Vec<u8>) -> Vec<u8> {
        if self.rate == CodingRate::Rate1_2 {
            return unpunctured;
        }
        unpunctured
            .into_iter()
            .enumerate()
            .filter(|(i, _)| !self.rate.punctured(*i))
            .map(|(_, b)| b)
            .collect()
    }

    /// Encode a complete message: code all bits, append the 6 zero tail
    /// bits and reset the state.
    pub fn encode(&mut self, bits: &[u8]) -> Vec<u8> {
        let mut raw = self.encode_raw(bits);
        raw.extend(self.encode_raw(&[0u8; K - 1]));
        self.reset();
        self.puncture(raw)
    }

    /// Encode a message fragment, carrying the state across calls.
    ///
    /// The puncturing phase restarts per call, so fragment lengths must be
    /// a multiple of the puncturing period for rates other than 1/2.
    pub fn encode_trunc(&mut self, bits: &[u8]) -> Vec<u8> {
        let raw = self.encode_raw(bits);
        self.puncture(raw)
    }

    /// Flush the trellis with 6 zero bits and reset the state.
    pub fn finalize(&mut self) -> Vec<u8> {
        let raw = self.encode_raw(&[0u8; K - 1]);
        self.reset();
        self.puncture(raw)
    }
}

/// Soft-decision Viterbi decoder with truncated block processing.
///
/// Input symbols are signed bytes: positive means one, negative means
/// zero, 0 is a full erasure. Output is one bit per byte.
pub struct ConvDecoder {
    rate: CodingRate,
    trunc_depth: usize,
    long_trunc_depth: usize,
    last_state: u8,
    /// Decoded bits ride a 6-deep delay line, so the encoder tail never
    /// comes out and the first 6 (undefined) decisions are swallowed.
    delay: [u8; K - 1],
    delay_len: usize,
    /// Expected (symbol0, symbol1) per 7-bit register value.
    expected: [[u8; 2]; 128],
}

impl ConvDecoder {
    /// Create a decoder for `rate`.
    pub fn new(rate: CodingRate) -> Self {
        let trunc_depth = rate.trunc_depth();
        // When the leftover of a message is short it is cheaper and better
        // for the error rate to let the trellis run a bit longer than to
        // truncate and restart, hence the 25% slack.
        let mut long_trunc_depth = trunc_depth + trunc_depth / 4;
        while long_trunc_depth % 2 != 0 {
            long_trunc_depth += 1;
        }
        let invert = rate == CodingRate::Rate1_2;
        let mut expected = [[0u8; 2]; 128];
        for (reg, e) in expected.iter_mut().enumerate() {
            e[0] = parity(reg as u8 & POLY_A) * 255;
            e[1] = (parity(reg as u8 & POLY_B) ^ u8::from(invert)) * 255;
        }
        Self {
            rate,
            trunc_depth,
            long_trunc_depth,
            last_state: 0,
            delay: [0; K - 1],
            delay_len: 0,
            expected,
        }
    }

    /// Reset the survivor state and the output delay line.
    pub fn reset(&mut self) {
        self.last_state = 0;
        self.delay = [0; K - 1];
        self.delay_len = 0;
    }

    /// Decode a whole message worth of received symbols. Returns the
    /// decoded bits, one per byte; the encoder's flush tail is absorbed.
    pub fn decode(&mut self, syms: &[i8]) -> Vec<u8> {
        self.reset();
        let mut out = Vec::with_capacity(syms.len());
        let mut rem = syms;
        while !rem.is_empty() {
            if rem.len() < self.long_trunc_depth {
                self.decode_block(&mut out, rem);
                break;
            }
            let (head, tail) = rem.split_at(self.trunc_depth);
            self.decode_block(&mut out, head);
            rem = tail;
        }
        out
    }

    /// Decode one truncation block, carrying the survivor state.
    pub fn decode_trunc(&mut self, out: &mut Vec<u8>, syms: &[i8]) {
        self.decode_block(out, syms);
    }

    fn decode_block(&mut self, out: &mut Vec<u8>, syms: &[i8]) {
        if syms.len() < self.rate.min_block() {
            return;
        }

        // Depuncture: received symbols to offset-binary, neutral fill in
        // the dropped positions.
        let mut unpunctured = Vec::with_capacity(syms.len() * 2);
        for s in syms {
            unpunctured.push((*s as u8).wrapping_add(128));
            while self.rate.punctured(unpunctured.len()) {
                unpunctured.push(127);
            }
        }
        let steps = unpunctured.len() / 2;
        if steps == 0 {
            return;
        }

        let (bits, end_state) = self.viterbi(&unpunctured, steps);
        self.last_state = end_state;

        for bit in bits {
            if self.delay_len == self.delay.len() {
                out.push(self.delay[0]);
                self.delay.copy_within(1.., 0);
                self.delay[K - 2] = bit;
            } else {
                self.delay[self.delay_len] = bit;
                self.delay_len += 1;
            }
        }
    }

    fn viterbi(&self, syms: &[u8], steps: usize) -> (Vec<u8>, u8) {
        const BIG: u32 = u32::MAX / 2;
        let mut metric = [BIG; NSTATES];
        metric[self.last_state as usize] = 0;
        let mut decisions = vec![0u64; steps];

        for (t, (s0, s1)) in syms.iter().take(steps * 2).tuples().enumerate() {
            let s0 = *s0 as i32;
            let s1 = *s1 as i32;
            let mut next = [BIG; NSTATES];
            let mut dec = 0u64;
            for ns in 0..NSTATES {
                // State keeps the 6 most recent input bits, newest in the
                // LSB. The two predecessors differ in the bit about to
                // fall out of the register.
                let reg_lo = ns;
                let reg_hi = ns | 0x40;
                let m0 = metric[ns >> 1].saturating_add(self.branch(reg_lo, s0, s1));
                let m1 = metric[(ns >> 1) | 0x20].saturating_add(self.branch(reg_hi, s0, s1));
                if m1 < m0 {
                    next[ns] = m1;
                    dec |= 1 << ns;
                } else {
                    next[ns] = m0;
                }
            }
            decisions[t] = dec;
            metric = next;
        }

        let best = (0..NSTATES)
            .min_by_key(|s| metric[*s])
            .unwrap_or_default();
        let mut bits = vec![0u8; steps];
        let mut st = best;
        for (t, b) in bits.iter_mut().enumerate().rev() {
            *b = (st & 0x1) as u8;
            let from_high = (decisions[t] >> st) & 0x1;
            st = (st >> 1) | ((from_high as usize) << 5);
        }
        (bits, best as u8)
    }

    fn branch(&self, reg: usize, s0: i32, s1: i32) -> u32 {
        let e = &self.expected[reg & 0x7F];
        ((s0 - e[0] as i32).unsigned_abs() + (s1 - e[1] as i32).unsigned_abs()) as u32
    }
}
