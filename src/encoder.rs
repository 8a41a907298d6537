/*! The encoder contract.

Encoders are pull based: a PDU arrives on a message channel and the
encoder synchronously returns the framed transmission as a byte blob.
Depending on the protocol the blob is packed bytes or a one-bit-per-byte
stream ready for the modulator; each encoder documents which.

Encoders are stateless with respect to messages: encoding the same PDU
twice yields bit-identical output. Self-synchronizing scramblers restart at
the head of every frame to keep that property.
*/

use crate::Result;

/// The encoder contract.
pub trait Encoder: Send {
    /// Frame one PDU. Oversized or malformed PDUs are rejected with
    /// [`crate::Error::Pdu`] and the message is discarded.
    fn encode(&self, pdu: &[u8]) -> Result<Vec<u8>>;

    /// Largest accepted PDU, in bytes.
    fn max_frame_len(&self) -> usize;
}
