/*! Golay (24, 12, 8) block code.

Perfect triple-error-correcting code used for the AX.100 coded length
field. The parity sub-matrix is the one from Lin & Costello, "Error Control
Coding", 2nd ed, ch. 4; the decoder is the standard four-case syndrome
algorithm from the same chapter.
*/

/// Rows of the 12×12 parity matrix P.
const G_P: [u32; 12] = [
    0x8ED, 0x1DB, 0x3B5, 0x769, 0xED1, 0xDA3, 0xB47, 0x68F, 0xD1D, 0xA3B, 0x477, 0xFFE,
];

/// Rows of the 12×12 identity, for single-column corrections.
const G_I: [u32; 12] = [
    0x800, 0x400, 0x200, 0x100, 0x080, 0x040, 0x020, 0x010, 0x008, 0x004, 0x002, 0x001,
];

fn weight(x: u32) -> u32 {
    (x & 0xFFF).count_ones()
}

fn syndrome(x: u32, y: u32) -> u32 {
    let mut s = 0u32;
    for row in G_P {
        s = (s << 1) | (weight(y & row) & 0x1);
    }
    s ^ x
}

/// Encode a 12-bit message into a 24-bit codeword.
///
/// With `lsb_parity` the data lands in the 12 MSB and the parity in the 12
/// LSB of the returned word; otherwise the layout is swapped (parity in the
/// MSB, the layout [`decode24`] consumes).
pub fn encode12(data: u16, lsb_parity: bool) -> u32 {
    let d = (data & 0xFFF) as u32;
    let mut parity = 0u32;
    for row in G_P {
        parity = (parity << 1) | (weight(d & row) & 0x1);
    }
    if lsb_parity {
        (d << 12) | parity
    } else {
        (parity << 12) | d
    }
}

/// Decode a 24-bit codeword with the parity in the 12 MSB.
///
/// Returns the corrected codeword, same layout, with the message in the 12
/// LSB. `None` if more than 3 bits are in error.
pub fn decode24(word: u32) -> Option<u32> {
    let r0 = (word >> 12) & 0xFFF;
    let r1 = word & 0xFFF;

    let s = syndrome(r0, r1);
    if weight(s) <= 3 {
        return Some(((r0 ^ s) << 12) | r1);
    }

    for (row, col) in G_P.iter().zip(G_I.iter()) {
        let tmp = s ^ row;
        if weight(tmp) <= 2 {
            return Some(((r0 ^ tmp) << 12) | (r1 ^ col));
        }
    }

    let mut sp = 0u32;
    for row in G_P {
        sp = (sp << 1) | (weight(s & row) & 0x1);
    }
    if weight(sp) == 2 || weight(sp) == 3 {
        return Some((r0 << 12) | (r1 ^ sp));
    }

    for (row, col) in G_P.iter().zip(G_I.iter()) {
        let tmp = sp ^ row;
        if weight(tmp) == 2 {
            return Some(((r0 ^ col) << 12) | (r1 ^ tmp));
        }
    }
    None
}
