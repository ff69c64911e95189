//! Reading files from the card over a channel
//!
//! [`RecordReader`] sends command APDUs through a [`CardChannel`] and
//! reassembles files that do not fit into one response with
//! [`CardRecord`].

use bytes::Bytes;
use tracing::{debug, info, trace, warn, Level};

use egkrust_core::constants::MAX_SHORT_CHUNK;
use egkrust_core::{ApduCommand, ApduResponse, CardRecord, StatusClass};
use egkrust_transport::CardChannel;

use crate::error::Result;

/// Issues the reads for one session on a borrowed channel
pub struct RecordReader<'a, C: CardChannel + ?Sized> {
    channel: &'a mut C,
    chunk_size: usize,
}

impl<'a, C: CardChannel + ?Sized> RecordReader<'a, C> {
    pub fn new(channel: &'a mut C, chunk_size: usize) -> Self {
        Self {
            channel,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Largest chunk a single READ BINARY requests
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn set_chunk_size(&mut self, chunk_size: usize) {
        self.chunk_size = chunk_size.max(1);
    }

    /// Get the underlying channel
    pub fn channel_mut(&mut self) -> &mut C {
        &mut *self.channel
    }

    /// Send a command and decode the response, whatever its status
    pub async fn transmit(&mut self, command: &ApduCommand) -> Result<ApduResponse> {
        let frame = command.encode()?;
        trace!("{} >> {}", command.name(), hex::encode_upper(&frame));

        let raw = self.channel.exchange(&frame).await?;
        trace!("{} << {}", command.name(), hex::encode_upper(&raw));

        let response = ApduResponse::decode(&raw)?;
        let level = response.status.tracing_level();
        if level == Level::WARN {
            warn!(
                "{} answered {} ({})",
                command.name(),
                response.status,
                response.status.description()
            );
        } else if level == Level::INFO {
            info!(
                "{} answered {} ({})",
                command.name(),
                response.status,
                response.status.description()
            );
        } else {
            debug!("{} answered {}", command.name(), response.status);
        }
        Ok(response)
    }

    /// Send a command that must succeed
    pub async fn execute(&mut self, command: &ApduCommand) -> Result<ApduResponse> {
        let response = self.transmit(command).await?;
        Ok(response.check(command)?)
    }

    /// Read up to `le` bytes from the start of a file in one command
    ///
    /// The file becomes the current file, so follow-up reads by offset
    /// address it.
    pub async fn read_sfi(&mut self, sfi: u8, le: usize) -> Result<Bytes> {
        self.read_single(&ApduCommand::read_binary_sfi(sfi, le)).await
    }

    /// Read a whole transparent file of unknown length
    pub async fn read_file(&mut self, sfi: u8) -> Result<Bytes> {
        self.read_chunks(CardRecord::new(self.chunk_size), Some(sfi), 0)
            .await
    }

    /// Read `len` bytes of the current file starting at `offset`
    pub async fn read_binary(&mut self, offset: usize, len: usize) -> Result<Bytes> {
        let record = CardRecord::with_expected_len(self.chunk_size, len);
        let bytes = self.read_chunks(record, None, offset).await?;

        if bytes.len() < len {
            warn!(
                "File ended after {} of {} bytes at offset {}",
                bytes.len(),
                len,
                offset
            );
        }
        Ok(bytes)
    }

    /// Read one record of a record-oriented file
    pub async fn read_record(&mut self, record: u8, sfi: u8) -> Result<Bytes> {
        self.read_single(&ApduCommand::read_record(record, sfi, MAX_SHORT_CHUNK))
            .await
    }

    /// Data of a read that may end early with 6282
    async fn read_single(&mut self, command: &ApduCommand) -> Result<Bytes> {
        let response = self.transmit(command).await?;

        match response.classify_for(command) {
            StatusClass::Success | StatusClass::EndOfData => Ok(response.data),
            _ => Err(egkrust_core::Error::CardStatus {
                command: command.name(),
                status: response.status,
            }
            .into()),
        }
    }

    async fn read_chunks(
        &mut self,
        mut record: CardRecord,
        sfi: Option<u8>,
        base: usize,
    ) -> Result<Bytes> {
        while let Some(requested) = record.next_request() {
            let command = match sfi {
                Some(sfi) if record.offset() == 0 => ApduCommand::read_binary_sfi(sfi, requested),
                _ => ApduCommand::read_binary(base + record.offset(), requested)?,
            };

            let response = self.transmit(&command).await?;
            record.push(command.name(), requested, &response)?;
        }

        debug!(
            "Read {} bytes in {} chunk(s) of at most {} bytes",
            record.offset(),
            record.reads(),
            self.chunk_size
        );
        Ok(record.into_bytes())
    }
}
