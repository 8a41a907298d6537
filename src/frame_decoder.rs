/*! Frame decoder pipeline.

Owns one [`Decoder`] and drives it with demodulated bits, retiring
whatever the decoder reports as consumed. An optional parallel timing
error stream (one value per input item, as produced by a symbol
synchronizer) is accumulated and its running mean stamped onto every
emitted frame.

Completed frames are published as [`Metadata`] dictionaries on a bounded
channel; a full channel blocks the pipeline, which is the backpressure
the rest of the ground station relies on.
*/

use std::sync::mpsc::SyncSender;

use log::trace;

use crate::decoder::Decoder;
use crate::metadata::Metadata;
use crate::{Error, Result};

/// Frame decoder pipeline stage.
pub struct FrameDecoder {
    decoder: Box<dyn Decoder>,
    out: SyncSender<Metadata>,
    t_err_acc: f64,
    nitems_read: u64,
}

impl FrameDecoder {
    /// Create a pipeline around `decoder`, publishing frames on `out`.
    pub fn new(decoder: Box<dyn Decoder>, out: SyncSender<Metadata>) -> Self {
        Self {
            decoder,
            out,
            t_err_acc: 0.0,
            nitems_read: 0,
        }
    }

    /// Chunk alignment required by the decoder.
    pub fn input_multiple(&self) -> usize {
        self.decoder.input_multiple()
    }

    /// Feed a chunk of input items through the decoder, publishing any
    /// completed frames. `timing_err`, when attached, must carry one
    /// value per input item.
    ///
    /// Returns the number of items processed; a tail shorter than
    /// [`FrameDecoder::input_multiple`] is left to the caller to resubmit
    /// with the next chunk.
    pub fn process(&mut self, input: &[u8], timing_err: Option<&[f32]>) -> Result<usize> {
        if let Some(terr) = timing_err
            && terr.len() != input.len()
        {
            return Err(Error::config(
                "timing error stream out of step with the bit stream",
            ));
        }

        let multiple = self.decoder.input_multiple();
        let usable = input.len() / multiple * multiple;
        let mut offset = 0;
        while offset < usable {
            let status = self.decoder.decode(&input[offset..usable]);
            if let Some(terr) = timing_err {
                self.t_err_acc += terr[offset..offset + status.consumed]
                    .iter()
                    .map(|v| *v as f64)
                    .sum::<f64>();
            }
            self.nitems_read += status.consumed as u64;
            offset += status.consumed;

            if status.decode_success {
                let mut metadata = status.metadata;
                if timing_err.is_some() && self.nitems_read > 0 {
                    metadata
                        .set_symbol_timing_error(self.t_err_acc / self.nitems_read as f64);
                }
                trace!("publishing frame at item {}", self.nitems_read);
                self.out.send(metadata).map_err(|_| Error::ChannelClosed)?;
            } else if status.consumed == 0 {
                break;
            }
        }
        Ok(offset)
    }

    /// Handle a `reset` control message.
    pub fn reset(&mut self) {
        self.decoder.reset();
    }
}
