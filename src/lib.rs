#![warn(missing_docs)]
/*! Frame codecs for small-satellite ground stations.

This crate provides the synchronous encoders and decoders used between a
demodulator and the network side of a ground station: framing, FEC, CRC,
scrambling, bit stuffing, and differential encoding for the radio links
commonly flown on amateur satellites and CubeSats.

Decoders consume a continuous bit stream of unknown alignment (one bit per
input byte, LSB significant) and emit framed PDUs together with rich
[`metadata`]. Encoders turn a PDU into the byte/bit blob to transmit.

# Architecture overview

Everything is built from a small set of leaf components:

```text
 [ bits / shift_reg / crc / whitening ]
 [ golay / reed_muller / rs / conv    ]
                  ↓
 [ protocol decoders and encoders:    ]
 [ ax25, ax100, 802.15.4, argos, duv, ]
 [ usp, cw                            ]
                  ↓
 [ frame_decoder pipeline, crc_async, ]
 [ metadata projections, ber harness  ]
```

A [`frame_decoder::FrameDecoder`] owns one [`decoder::Decoder`] and drives
it with demodulated bits; completed frames appear on an outbound channel as
[`metadata::Metadata`] dictionaries. Encoders are pull based: hand them a
PDU, get back the framed transmission.

# Example

Round trip a PDU through the AX.25 encoder and decoder:

```
use satcodec::ax25::{Ax25Decoder, Ax25Encoder};
use satcodec::bits;
use satcodec::decoder::Decoder;
use satcodec::encoder::Encoder;

let enc = Ax25Encoder::new("N0CALL", 0, "N0CALL", 0, 16, 16, true, true)?;
let frame = enc.encode(&[0xde, 0xad, 0xbe, 0xef])?;
// The encoder produces packed bytes; decoders eat one bit per item.
let stream = bits::packed_to_unpacked(&frame);

let mut dec = Ax25Decoder::builder().descramble(true).build()?;
let status = dec.decode(&stream);
assert!(status.decode_success);
assert_eq!(status.metadata.pdu(), Some(&[0xde, 0xad, 0xbe, 0xef][..]));
# Ok::<(), satcodec::Error>(())
```
*/

// Leaf components.
pub mod bits;
pub mod crc;
pub mod golay;
pub mod moving_sum;
pub mod reed_muller;
pub mod rs;
pub mod shift_reg;
pub mod whitening;

pub mod conv;
pub mod doppler;

// Contracts.
pub mod decoder;
pub mod encoder;

// Metadata model and projections.
pub mod metadata;
pub mod sigmf;

// Protocol codecs.
pub mod amsat_duv;
pub mod argos_ldr;
pub mod ax100_mode5;
pub mod ax100_mode6;
pub mod ax25;
pub mod cw;
pub mod ieee802_15_4;
pub mod usp;

// Pipeline stages.
pub mod ber;
pub mod crc_async;
pub mod frame_decoder;

/// Crate error type.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Invalid configuration given to a constructor. The component is not
    /// created.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A malformed or oversized PDU was handed to an encoder. The message
    /// is discarded.
    #[error("invalid PDU: {0}")]
    Pdu(String),

    /// The receiving end of an outbound message channel is gone.
    #[error("message channel disconnected")]
    ChannelClosed,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a new configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }
}

/// Crate result type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let e = Error::config("threshold too permissive");
        assert_eq!(
            e.to_string(),
            "invalid configuration: threshold too permissive"
        );
    }
}
