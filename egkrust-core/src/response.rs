//! Response APDUs

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

use crate::{
    command::{ApduCommand, Instruction},
    error::{Error, Result},
    status::{StatusClass, StatusWord},
};

/// Response APDU: payload followed by SW1-SW2
#[derive(Clone, PartialEq, Eq)]
pub struct ApduResponse {
    pub data: Bytes,
    pub status: StatusWord,
}

impl ApduResponse {
    pub fn new(data: impl Into<Bytes>, status: StatusWord) -> Self {
        Self {
            data: data.into(),
            status,
        }
    }

    /// Response without payload
    pub fn status_only(status: StatusWord) -> Self {
        Self::new(Bytes::new(), status)
    }

    /// Decode a response frame
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedResponse`] if the frame has no status word.
    pub fn decode(frame: &[u8]) -> Result<Self> {
        let Some(split) = frame.len().checked_sub(2) else {
            return Err(Error::MalformedResponse {
                actual: frame.len(),
            });
        };

        Ok(Self {
            data: Bytes::copy_from_slice(&frame[..split]),
            status: StatusWord::new(frame[split], frame[split + 1]),
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.data.len() + 2);
        buf.put_slice(&self.data);
        buf.put_u8(self.status.sw1);
        buf.put_u8(self.status.sw2);
        buf.freeze()
    }

    /// Classify the status word in the context of the command it answers
    pub fn classify_for(&self, command: &ApduCommand) -> StatusClass {
        if command.is_terminal() {
            let request_icc = command.instruction() == Some(Instruction::RequestIcc);
            self.status.classify_terminal(request_icc)
        } else {
            self.status.classify()
        }
    }

    /// Require a success status for `command`
    ///
    /// # Errors
    ///
    /// Returns [`Error::CardStatus`] for any status not classified as success.
    pub fn check(self, command: &ApduCommand) -> Result<Self> {
        match self.classify_for(command) {
            StatusClass::Success => Ok(self),
            _ => Err(Error::CardStatus {
                command: command.name(),
                status: self.status,
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

impl fmt::Debug for ApduResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApduResponse")
            .field("data", &hex::encode_upper(&self.data))
            .field("status", &format!("{}", self.status))
            .finish()
    }
}

impl fmt::Display for ApduResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Response[{}](len={}, {})",
            self.status,
            self.data.len(),
            self.status.description()
        )
    }
}
