//! Reassembly of a file read in several chunks
//!
//! A file larger than the reader's response buffer is read with a sequence
//! of READ BINARY commands at increasing offsets. [`CardRecord`] decides how
//! much to request next and when the file is complete; it performs no I/O.

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::{
    error::{Error, Result},
    response::ApduResponse,
    status::StatusClass,
};

/// Accumulator for the bytes of one logical file
#[derive(Debug, Clone)]
pub struct CardRecord {
    data: BytesMut,

    /// Largest chunk one read may request
    chunk_size: usize,

    /// Total length, when the file announces it
    expected_len: Option<usize>,

    reads: usize,
    complete: bool,
}

/// What to do after a chunk has been added
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkProgress {
    /// Issue another read at [`CardRecord::offset`]
    Continue,

    /// The record is complete
    Complete,
}

impl CardRecord {
    /// Create an accumulator for a file of unknown length
    pub fn new(chunk_size: usize) -> Self {
        Self {
            data: BytesMut::new(),
            chunk_size: chunk_size.max(1),
            expected_len: None,
            reads: 0,
            complete: false,
        }
    }

    /// Create an accumulator for a file of known length
    pub fn with_expected_len(chunk_size: usize, expected_len: usize) -> Self {
        let mut record = Self::new(chunk_size);
        record.expected_len = Some(expected_len);
        record.complete = expected_len == 0;
        record
    }

    /// Offset of the next read, relative to the start of the record
    pub fn offset(&self) -> usize {
        self.data.len()
    }

    /// Number of chunks read so far
    pub fn reads(&self) -> usize {
        self.reads
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Bytes to request with the next read, `None` once complete
    pub fn next_request(&self) -> Option<usize> {
        if self.complete {
            return None;
        }

        match self.expected_len {
            Some(expected) => {
                let remaining = expected.saturating_sub(self.data.len());
                (remaining > 0).then(|| remaining.min(self.chunk_size))
            }
            None => Some(self.chunk_size),
        }
    }

    /// Add the response to a read of `requested` bytes
    ///
    /// # Errors
    ///
    /// Returns [`Error::CardStatus`] if the card rejected the read (an offset
    /// past the end after at least one chunk counts as end of file), and
    /// [`Error::ProtocolViolation`] if the card returned more than requested.
    pub fn push(
        &mut self,
        command: &'static str,
        requested: usize,
        response: &ApduResponse,
    ) -> Result<ChunkProgress> {
        if self.complete {
            return Err(Error::ProtocolViolation(
                "Chunk added to a complete record".to_string(),
            ));
        }

        let class = response.status.classify();
        match class {
            StatusClass::Success | StatusClass::MoreData(_) | StatusClass::EndOfData => {}
            _ if response.status.is_wrong_offset() && self.reads > 0 => {
                trace!("Offset {} beyond end of file, record complete", self.offset());
                self.complete = true;
                return Ok(ChunkProgress::Complete);
            }
            _ => {
                return Err(Error::CardStatus {
                    command,
                    status: response.status,
                });
            }
        }

        let received = response.data.len();
        if received > requested {
            return Err(Error::ProtocolViolation(format!(
                "Requested {} bytes, card returned {} bytes",
                requested, received
            )));
        }

        self.data.extend_from_slice(&response.data);
        self.reads += 1;
        trace!(
            "Chunk {}: {} of {} bytes, record now {} bytes ({})",
            self.reads,
            received,
            requested,
            self.data.len(),
            response.status
        );

        let reached_expected = self
            .expected_len
            .is_some_and(|expected| self.data.len() >= expected);

        self.complete = match class {
            _ if reached_expected => true,
            StatusClass::EndOfData => true,
            StatusClass::MoreData(_) if received == 0 => {
                return Err(Error::ProtocolViolation(
                    "More data announced but chunk is empty".to_string(),
                ));
            }
            StatusClass::MoreData(_) => false,
            _ => received < requested,
        };

        Ok(if self.complete {
            ChunkProgress::Complete
        } else {
            ChunkProgress::Continue
        })
    }

    /// Get the reassembled bytes
    pub fn into_bytes(self) -> Bytes {
        self.data.freeze()
    }
}
