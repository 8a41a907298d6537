/*! Reed-Muller RM(1, 6) code.

First order Reed-Muller code mapping 7 information bits onto 64-bit
codewords, used for the USP physical layer signalling word. Minimum
distance is 32, so majority-logic decoding corrects up to 15 bit errors.
*/

/// Generator rows. Row 0 is the all-ones row selected by the MSB of the
/// 7-bit message; rows 1..=6 are the first-order monomials.
const G: [u64; 7] = [
    0xFFFF_FFFF_FFFF_FFFF,
    0x5555_5555_5555_5555,
    0x3333_3333_3333_3333,
    0x0F0F_0F0F_0F0F_0F0F,
    0x00FF_00FF_00FF_00FF,
    0x0000_FFFF_0000_FFFF,
    0x0000_0000_FFFF_FFFF,
];

/// Encode a 7-bit message into a 64-bit codeword.
pub fn encode(data: u8) -> u64 {
    let mut cw = 0u64;
    for i in 0..7 {
        if (data >> i) & 0x1 == 1 {
            cw ^= G[6 - i];
        }
    }
    cw
}

/// Majority-logic decode of a 64-bit codeword back to 7 bits.
///
/// Each first-order coefficient is voted on by the 32 position pairs that
/// differ only in that coordinate; the leading coefficient by the weight of
/// the residual.
pub fn decode(word: u64) -> u8 {
    let mut out = 0u8;
    for ind in (0..6usize).rev() {
        let step = 1usize << (5 - ind);
        let mut ones = 0u32;
        for i in 0..64usize {
            if i & step == 0 {
                ones += (((word >> i) ^ (word >> (i + step))) & 0x1) as u32;
            }
        }
        if ones >= 16 {
            out |= 1 << ind;
        }
    }

    let mut residual = word;
    for ind in 0..6 {
        if (out >> ind) & 0x1 == 1 {
            residual ^= G[6 - ind];
        }
    }
    if residual.count_ones() >= 32 {
        out |= 1 << 6;
    }
    out
}
