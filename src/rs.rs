/*! CCSDS Reed-Solomon (255, 223) over GF(2⁸).

Conventional-basis representation with field polynomial 0x187, first
consecutive root 112 and primitive element α¹¹, the parameter set the CCSDS
telemetry standard and every AX.100/Fox downlink in the wild use.

Shortened codes are handled with virtual fill: a block of `n < 255` bytes
is decoded as if `255 − n` zero bytes preceded it, so callers never
materialize the padding. [`decode`] accepts erasure positions (relative to
the shortened block) and corrects `2·errors + erasures ≤ 32`.
*/

use crate::encoder::Encoder;
use crate::{Error, Result};

/// Maximum number of data bytes per block.
pub const MAX_DATA_LEN: usize = 223;
/// Number of parity bytes appended per block.
pub const PARITY_LEN: usize = 32;

const NN: usize = 255;
const FCR: usize = 112;
const PRIM: usize = 11;

const ALPHA_TO: [u8; 256] = build_alpha();
const INDEX_OF: [u8; 256] = build_index();
const GENPOLY: [u8; 33] = build_genpoly();

const fn build_alpha() -> [u8; 256] {
    let mut t = [0u8; 256];
    let mut sr: u16 = 1;
    let mut i = 0;
    while i < 255 {
        t[i] = sr as u8;
        sr <<= 1;
        if sr & 0x100 != 0 {
            sr ^= 0x187;
        }
        i += 1;
    }
    t
}

const fn build_index() -> [u8; 256] {
    let alpha = build_alpha();
    let mut t = [0u8; 256];
    let mut i = 0;
    while i < 255 {
        t[alpha[i] as usize] = i as u8;
        i += 1;
    }
    t
}

const fn mul_const(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        return 0;
    }
    ALPHA_TO[(INDEX_OF[a as usize] as usize + INDEX_OF[b as usize] as usize) % 255]
}

const fn build_genpoly() -> [u8; 33] {
    let mut g = [0u8; 33];
    g[0] = 1;
    let mut j = 0;
    while j < PARITY_LEN {
        let root = ALPHA_TO[(PRIM * (FCR + j)) % 255];
        let mut i = j + 1;
        while i > 0 {
            g[i] = g[i - 1] ^ mul_const(g[i], root);
            i -= 1;
        }
        g[0] = mul_const(g[0], root);
        j += 1;
    }
    g
}

fn mul(a: u8, b: u8) -> u8 {
    mul_const(a, b)
}

fn inv(a: u8) -> u8 {
    debug_assert!(a != 0);
    ALPHA_TO[(255 - INDEX_OF[a as usize] as usize) % 255]
}

/// α raised to `e`, `e` taken modulo 255.
fn alpha_pow(e: i64) -> u8 {
    ALPHA_TO[e.rem_euclid(255) as usize]
}

fn poly_eval(poly: &[u8], x: u8) -> u8 {
    poly.iter().rev().fold(0u8, |acc, c| mul(acc, x) ^ c)
}

/// Compute the 32 parity bytes for `data` (at most 223 bytes). The
/// shortened block is virtually padded with leading zeros.
pub fn encode(data: &[u8]) -> [u8; PARITY_LEN] {
    assert!(data.len() <= MAX_DATA_LEN);
    let mut parity = [0u8; PARITY_LEN];
    for d in data {
        let feedback = d ^ parity[0];
        for i in 0..PARITY_LEN - 1 {
            parity[i] = parity[i + 1] ^ mul(feedback, GENPOLY[PARITY_LEN - 1 - i]);
        }
        parity[PARITY_LEN - 1] = mul(feedback, GENPOLY[0]);
    }
    parity
}

/// Decode a shortened block of `data.len()` bytes (payload plus the 32
/// trailing parity bytes) in place.
///
/// `erasures` lists byte positions, relative to the start of `data`, known
/// to be unreliable. Returns the number of corrected symbols, or `None` if
/// the block is uncorrectable or its length falls outside `33..=255`.
pub fn decode(data: &mut [u8], erasures: &[usize]) -> Option<u32> {
    let len = data.len();
    if !(PARITY_LEN + 1..=NN).contains(&len) {
        return None;
    }
    let pad = NN - len;

    // Syndromes S_j = r(α^{prim·(fcr+j)}). Virtual fill contributes
    // nothing, so Horner over the shortened block is exact.
    let mut synd = [0u8; PARITY_LEN];
    let mut all_zero = true;
    for (j, s) in synd.iter_mut().enumerate() {
        let root = alpha_pow((PRIM * (FCR + j)) as i64);
        *s = data.iter().fold(0u8, |acc, b| mul(acc, root) ^ b);
        all_zero &= *s == 0;
    }
    if all_zero {
        return Some(0);
    }

    if erasures.len() > PARITY_LEN || erasures.iter().any(|p| *p >= len) {
        return None;
    }

    // Erasure locator Γ(x) = Π (1 + X·x) over the known-bad positions.
    // Locator of byte i is X = α^{prim·(254 − pad − i)}.
    let locator_of = |i: usize| alpha_pow((PRIM * (NN - 1 - pad - i)) as i64);
    let mut lambda = vec![0u8; PARITY_LEN + 1];
    lambda[0] = 1;
    for p in erasures {
        let x = locator_of(*p);
        for i in (1..=erasures.len()).rev() {
            lambda[i] ^= mul(x, lambda[i - 1]);
        }
    }

    // Berlekamp-Massey over the remaining syndromes, seeded with the
    // erasure locator.
    let e0 = erasures.len();
    let mut b = lambda.clone();
    let mut l = e0;
    let mut m = 1usize;
    let mut bb = 1u8;
    for n in e0..PARITY_LEN {
        let mut delta = 0u8;
        for i in 0..=n.min(PARITY_LEN) {
            delta ^= mul(lambda[i], synd[n - i]);
        }
        if delta == 0 {
            m += 1;
        } else if 2 * l <= n + e0 {
            let t = lambda.clone();
            let coef = mul(delta, inv(bb));
            for i in m..=PARITY_LEN {
                lambda[i] ^= mul(coef, b[i - m]);
            }
            l = n + e0 + 1 - l;
            b = t;
            bb = delta;
            m = 1;
        } else {
            let coef = mul(delta, inv(bb));
            for i in m..=PARITY_LEN {
                lambda[i] ^= mul(coef, b[i - m]);
            }
            m += 1;
        }
    }

    let deg = lambda.iter().rposition(|c| *c != 0)?;

    // Root search over every position of the full frame. gcd(prim, 255)
    // is 1 so each position has a distinct locator.
    let mut positions = Vec::with_capacity(deg);
    for e in 0..NN {
        let x_inv = alpha_pow(-((PRIM * e) as i64));
        if poly_eval(&lambda[..=deg], x_inv) == 0 {
            positions.push(e);
        }
    }
    if positions.len() != deg {
        return None;
    }

    // Forney: Ω(x) = S(x)·Λ(x) mod x³².
    let mut omega = [0u8; PARITY_LEN];
    for (i, o) in omega.iter_mut().enumerate() {
        for j in 0..=i.min(deg) {
            *o ^= mul(lambda[j], synd[i - j]);
        }
    }

    for e in positions {
        let xe = (PRIM * e) as i64;
        let x_inv = alpha_pow(-xe);
        let num = poly_eval(&omega, x_inv);
        let mut den = 0u8;
        for i in (1..=deg).step_by(2) {
            den ^= mul(lambda[i], alpha_pow(-xe * (i as i64 - 1)));
        }
        if den == 0 {
            return None;
        }
        let magnitude = mul(mul(alpha_pow(xe * (1 - FCR as i64)), num), inv(den));
        // Map the frame position back into the shortened block. A root
        // inside the virtual fill means the decoder went off the rails.
        let idx = NN - 1 - e;
        if idx < pad {
            return None;
        }
        data[idx - pad] ^= magnitude;
    }

    Some(deg as u32)
}

/// Stand-alone RS encoder message stage: appends the 32 parity bytes of
/// the shortened block to each PDU.
pub struct RsEncoder {}

impl RsEncoder {
    /// Create a new RS encoder stage.
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for RsEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder for RsEncoder {
    fn encode(&self, pdu: &[u8]) -> Result<Vec<u8>> {
        if pdu.len() > MAX_DATA_LEN {
            return Err(Error::Pdu(format!(
                "RS block payload of {} bytes exceeds {MAX_DATA_LEN}",
                pdu.len()
            )));
        }
        let mut out = pdu.to_vec();
        out.extend_from_slice(&encode(pdu));
        Ok(out)
    }

    fn max_frame_len(&self) -> usize {
        MAX_DATA_LEN
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use rand::seq::SliceRandom;

    fn random_block(rng: &mut impl Rng, len: usize) -> Vec<u8> {
        let data: Vec<u8> = (0..len).map(|_| rng.random()).collect();
        let mut block = data;
        let parity = encode(&block);
        block.extend_from_slice(&parity);
        block
    }

    #[test]
    fn genpoly_is_monic_degree_32() {
        assert_eq!(GENPOLY[32], 1);
        assert!(GENPOLY[..32].iter().any(|c| *c != 0));
    }

    #[test]
    fn codeword_has_zero_syndromes() {
        let mut rng = rand::rng();
        let block = random_block(&mut rng, 223);
        for j in 0..PARITY_LEN {
            let root = alpha_pow((PRIM * (FCR + j)) as i64);
            let s = block.iter().fold(0u8, |acc, b| mul(acc, root) ^ b);
            assert_eq!(s, 0, "syndrome {j}");
        }
    }

    #[test]
    fn clean_block_decodes_unchanged() {
        let mut rng = rand::rng();
        for len in [223usize, 64, 1] {
            let block = random_block(&mut rng, len);
            let mut work = block.clone();
            assert_eq!(decode(&mut work, &[]), Some(0));
            assert_eq!(work, block);
        }
    }

    #[test]
    fn corrects_sixteen_byte_errors() {
        let mut rng = rand::rng();
        for len in [223usize, 100, 32] {
            let block = random_block(&mut rng, len);
            let mut work = block.clone();
            let mut positions: Vec<usize> = (0..work.len()).collect();
            positions.shuffle(&mut rng);
            for p in &positions[..16] {
                work[*p] ^= rng.random_range(1..=255u8);
            }
            let corrected = decode(&mut work, &[]).expect("16 errors must decode");
            assert_eq!(corrected, 16);
            assert_eq!(work, block);
        }
    }

    #[test]
    fn seventeen_errors_fail() {
        let mut rng = rand::rng();
        let block = random_block(&mut rng, 223);
        let mut work = block.clone();
        let mut positions: Vec<usize> = (0..work.len()).collect();
        positions.shuffle(&mut rng);
        for p in &positions[..17] {
            work[*p] ^= rng.random_range(1..=255u8);
        }
        // Either detected as uncorrectable, or miscorrected into some
        // other valid codeword. It must never "succeed" back to the
        // original with a wrong count.
        if decode(&mut work, &[]).is_some() {
            assert_ne!(work, block);
        }
    }

    #[test]
    fn corrects_thirty_two_erasures() {
        let mut rng = rand::rng();
        let block = random_block(&mut rng, 200);
        let mut work = block.clone();
        let mut positions: Vec<usize> = (0..work.len()).collect();
        positions.shuffle(&mut rng);
        let erasures: Vec<usize> = positions[..32].to_vec();
        for p in &erasures {
            work[*p] ^= rng.random_range(1..=255u8);
        }
        let corrected = decode(&mut work, &erasures).expect("32 erasures must decode");
        assert_eq!(corrected, 32);
        assert_eq!(work, block);
    }

    #[test]
    fn mixed_errors_and_erasures() {
        // 10 erasures + 11 errors: 2·11 + 10 = 32, right at capacity.
        let mut rng = rand::rng();
        let block = random_block(&mut rng, 150);
        let mut work = block.clone();
        let mut positions: Vec<usize> = (0..work.len()).collect();
        positions.shuffle(&mut rng);
        let erasures: Vec<usize> = positions[..10].to_vec();
        for p in &positions[..21] {
            work[*p] ^= rng.random_range(1..=255u8);
        }
        decode(&mut work, &erasures).expect("at-capacity block must decode");
        assert_eq!(work, block);
    }

    #[test]
    fn encoder_stage_appends_parity() {
        let enc = RsEncoder::new();
        let out = enc.encode(&[0xAA; 64]).unwrap();
        assert_eq!(out.len(), 64 + PARITY_LEN);
        let mut work = out.clone();
        assert_eq!(decode(&mut work, &[]), Some(0));
        assert!(enc.encode(&[0u8; 224]).is_err());
    }
}
