/*! The uniform decoder contract.

Every protocol decoder is a stream consumer with internal state: the
pipeline repeatedly hands it a chunk of input items and retires whatever
the decoder reports as consumed. A decoder may need an arbitrary number of
calls before a frame completes, and it may complete at most one frame per
call.
*/

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::metadata::Metadata;

/// What one [`Decoder::decode`] call did.
#[derive(Debug, Clone, Default)]
pub struct DecoderStatus {
    /// Number of input items the pipeline must retire.
    pub consumed: usize,
    /// True if a frame completed during this call.
    pub decode_success: bool,
    /// Frame metadata, populated when `decode_success` is set.
    pub metadata: Metadata,
}

impl DecoderStatus {
    /// An empty status: nothing consumed, nothing decoded.
    pub fn new() -> Self {
        Self::default()
    }
}

static DECODER_IDS: AtomicUsize = AtomicUsize::new(1);

/// Hand out a process-wide unique decoder id. Called once per decoder
/// construction.
pub fn next_unique_id() -> usize {
    DECODER_IDS.fetch_add(1, Ordering::Relaxed)
}

/// The decoder contract.
///
/// Implementations own all per-frame state; [`Decoder::reset`] returns
/// them to the pristine post-construction state. Input is one item per
/// byte; for the bit-hunting decoders that is one bit in the LSB.
pub trait Decoder: Send {
    /// Consume a chunk of input items, advancing the internal state
    /// machine. At most one frame completes per call.
    fn decode(&mut self, input: &[u8]) -> DecoderStatus;

    /// Return to the pristine state.
    fn reset(&mut self);

    /// Alignment the pipeline must respect when sizing chunks. Decoders
    /// that consume whole bytes worth of bits return 8.
    fn input_multiple(&self) -> usize {
        1
    }

    /// Decoder family name, copied into every emitted frame's metadata.
    fn name(&self) -> &'static str;

    /// Decoder version (semver), copied into every emitted frame's
    /// metadata.
    fn version(&self) -> &'static str;

    /// Upper bound on an emitted frame's payload size.
    fn max_frame_len(&self) -> usize;

    /// Process-wide unique instance id, assigned at construction.
    fn unique_id(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_increasing() {
        let a = next_unique_id();
        let b = next_unique_id();
        assert!(b > a);
    }
}
