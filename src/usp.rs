/*! USP (Unified SPUTNIX Protocol) encoder.

The SPUTNIX ground segment expects frames shaped like a miniature DVB-S2
PL header: preamble, sync word, then a fixed physical layer signalling
(PLS) word, Reed-Muller(1,6) coded, scrambled with a fixed 64-bit
constant and packed big endian. The payload is RS(255,223) coded, optionally
whitened, convolutionally coded at rate 1/2 and padded with 4 zero bits to
land on a byte boundary.
*/

use crate::conv::{CodingRate, ConvEncoder};
use crate::encoder::Encoder;
use crate::whitening::Whitening;
use crate::{Error, Result, bits, reed_muller, rs};

/// The fixed PLS scrambler constant.
const PLS_SCRAMBLE: u64 =
    0b0111_0001_1001_1101_1000_0011_1100_1001_0101_0011_0100_0010_0010_1101_1111_1010;

/// USP encoder.
pub struct UspEncoder {
    /// Preamble, sync word and the scrambled PLS code, precomputed.
    header: Vec<u8>,
    scrambler: Option<Whitening>,
    max_frame_len: usize,
}

impl UspEncoder {
    /// Create an encoder. The PLS code carries 7 information bits in an
    /// 8-bit field whose LSB must be zero.
    pub fn new(
        preamble: &[u8],
        sync: &[u8],
        pls_code: u8,
        scrambler: Option<Whitening>,
    ) -> Result<Self> {
        if pls_code > 127 {
            return Err(Error::config("PLS code must be less than 127 (7-bit)"));
        }
        if pls_code % 2 != 0 {
            return Err(Error::config("the last bit of the PLS code must be 0"));
        }
        let mut header = Vec::with_capacity(preamble.len() + sync.len() + 8);
        header.extend_from_slice(preamble);
        header.extend_from_slice(sync);
        let coded_pls = reed_muller::encode(pls_code) ^ PLS_SCRAMBLE;
        header.extend_from_slice(&coded_pls.to_be_bytes());
        Ok(Self {
            header,
            scrambler,
            max_frame_len: rs::MAX_DATA_LEN,
        })
    }

    /// Length in bits of the coded payload for a `len`-byte PDU: RS block
    /// at rate 1/2 with the 6-bit flush, plus 4 pad bits.
    fn final_pdu_bits(len: usize) -> usize {
        (len + rs::PARITY_LEN) * 16 + 6 * 2 + 4
    }
}

impl Encoder for UspEncoder {
    fn encode(&self, pdu: &[u8]) -> Result<Vec<u8>> {
        if pdu.len() > self.max_frame_len {
            return Err(Error::Pdu(format!(
                "USP payload of {} bytes exceeds {}",
                pdu.len(),
                self.max_frame_len
            )));
        }

        let mut block = pdu.to_vec();
        let parity = rs::encode(&block);
        block.extend_from_slice(&parity);

        if let Some(scrambler) = &self.scrambler {
            let mut scrambler = scrambler.clone();
            scrambler.reset();
            scrambler.scramble(&mut block);
        }

        let mut conv = ConvEncoder::new(CodingRate::Rate1_2);
        let mut coded = conv.encode(&bits::packed_to_unpacked(&block));
        coded.resize(Self::final_pdu_bits(pdu.len()), 0);

        let mut out = self.header.clone();
        out.extend_from_slice(&bits::unpacked_to_packed(&coded));
        Ok(out)
    }

    fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conv::ConvDecoder;

    const PREAMBLE: &[u8] = &[0xAA; 8];
    const SYNC: &[u8] = &[0x1A, 0xCF, 0xFC, 0x1D];

    #[test]
    fn header_layout() {
        let enc = UspEncoder::new(PREAMBLE, SYNC, 0x32, None).unwrap();
        let out = enc.encode(&[0u8; 16]).unwrap();
        assert_eq!(&out[..8], PREAMBLE);
        assert_eq!(&out[8..12], SYNC);
        // PLS word: unscramble and RM-decode back to the code.
        let pls = u64::from_be_bytes(out[12..20].try_into().unwrap()) ^ PLS_SCRAMBLE;
        assert_eq!(reed_muller::decode(pls), 0x32);
    }

    #[test]
    fn frame_length() {
        let enc = UspEncoder::new(PREAMBLE, SYNC, 0x00, None).unwrap();
        for len in [1usize, 64, 223] {
            let out = enc.encode(&vec![0xA5; len]).unwrap();
            let payload_bits = (len + rs::PARITY_LEN) * 16 + 16;
            assert_eq!(out.len(), 8 + 4 + 8 + payload_bits / 8);
        }
    }

    #[test]
    fn payload_survives_the_coding_chain() {
        let payload: Vec<u8> = (0..100u8).collect();
        let scrambler = Some(Whitening::ccsds(true));
        let enc = UspEncoder::new(PREAMBLE, SYNC, 0x40, scrambler).unwrap();
        let out = enc.encode(&payload).unwrap();

        // Walk the receive chain by hand: Viterbi, de-whiten, RS check.
        let coded = bits::packed_to_unpacked(&out[20..]);
        let soft: Vec<i8> = coded.iter().map(|b| bits::hard_to_soft(*b)).collect();
        let mut dec = ConvDecoder::new(CodingRate::Rate1_2);
        let decoded = dec.decode(&soft);
        let block_len = payload.len() + rs::PARITY_LEN;
        let mut block = bits::unpacked_to_packed(&decoded[..block_len * 8]);
        let mut w = Whitening::ccsds(true);
        w.descramble(&mut block);
        assert_eq!(rs::decode(&mut block, &[]), Some(0));
        assert_eq!(&block[..payload.len()], &payload[..]);
    }

    #[test]
    fn config_validation() {
        assert!(UspEncoder::new(PREAMBLE, SYNC, 0x80, None).is_err());
        assert!(UspEncoder::new(PREAMBLE, SYNC, 0x33, None).is_err());
        let enc = UspEncoder::new(PREAMBLE, SYNC, 0x02, None).unwrap();
        assert!(enc.encode(&[0u8; 224]).is_err());
    }
}
