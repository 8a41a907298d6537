/*! CRC handling on a message channel.

A little stage that sits between PDU producers and consumers: in append
mode it adds the configured CRC to every message, in check mode it
validates and strips the trailing CRC, silently dropping frames that fail.
*/

use std::sync::mpsc::SyncSender;

use log::debug;

use crate::crc::Crc;
use crate::{Error, Result};

/// What the stage does with each message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcAsyncMode {
    /// Append the CRC to each PDU.
    Append,
    /// Validate and strip the trailing CRC; drop failures.
    Check,
}

/// CRC message stage.
pub struct CrcAsync {
    crc: Crc,
    mode: CrcAsyncMode,
    out: SyncSender<Vec<u8>>,
    dropped: usize,
}

impl CrcAsync {
    /// Create a stage forwarding its output on `out`.
    pub fn new(crc: Crc, mode: CrcAsyncMode, out: SyncSender<Vec<u8>>) -> Self {
        Self {
            crc,
            mode,
            out,
            dropped: 0,
        }
    }

    /// Number of messages dropped by check mode so far.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Handle one inbound PDU message.
    pub fn handle_pdu(&mut self, mut pdu: Vec<u8>) -> Result<()> {
        match self.mode {
            CrcAsyncMode::Append => {
                self.crc.append(&mut pdu, true);
                self.out.send(pdu).map_err(|_| Error::ChannelClosed)
            }
            CrcAsyncMode::Check => {
                if !self.crc.check(&pdu, true) {
                    debug!("CRC mismatch, dropping {} byte PDU", pdu.len());
                    self.dropped += 1;
                    return Ok(());
                }
                pdu.truncate(pdu.len() - self.crc.size());
                self.out.send(pdu).map_err(|_| Error::ChannelClosed)
            }
        }
    }
}
