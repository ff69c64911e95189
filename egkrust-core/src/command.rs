//! Command APDUs
//!
//! Frames follow ISO 7816-4 in the four command cases, short or extended:
//!
//! ```text
//! ┌─────┬─────┬────┬────┬──────────┬────────┬──────────┐
//! │ CLA │ INS │ P1 │ P2 │ Lc (0-3) │ Data   │ Le (0-3) │
//! └─────┴─────┴────┴────┴──────────┴────────┴──────────┘
//! ```
//!
//! The extended form is used only when the data exceeds 255 bytes or Le
//! exceeds 256, so every command has exactly one encoding.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

use crate::{
    constants::{self, CLA_CTBCS, CLA_ISO},
    error::{Error, Result},
};

/// Instruction codes used by the read sequence
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Instruction {
    // CT-BCS (card terminal)
    ResetCt = 0x11,
    RequestIcc = 0x12,
    GetStatus = 0x13,
    EjectIcc = 0x15,

    // ISO 7816-4 (card)
    Select = 0xA4,
    ReadBinary = 0xB0,
    ReadRecord = 0xB2,
    GetResponse = 0xC0,
}

impl Instruction {
    /// Check if the instruction is handled by the card terminal
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::ResetCt | Self::RequestIcc | Self::GetStatus | Self::EjectIcc
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::ResetCt => "RESET CT",
            Self::RequestIcc => "REQUEST ICC",
            Self::GetStatus => "GET STATUS",
            Self::EjectIcc => "EJECT ICC",
            Self::Select => "SELECT",
            Self::ReadBinary => "READ BINARY",
            Self::ReadRecord => "READ RECORD",
            Self::GetResponse => "GET RESPONSE",
        }
    }
}

impl From<Instruction> for u8 {
    fn from(ins: Instruction) -> u8 {
        ins as u8
    }
}

impl TryFrom<u8> for Instruction {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x11 => Ok(Self::ResetCt),
            0x12 => Ok(Self::RequestIcc),
            0x13 => Ok(Self::GetStatus),
            0x15 => Ok(Self::EjectIcc),
            0xA4 => Ok(Self::Select),
            0xB0 => Ok(Self::ReadBinary),
            0xB2 => Ok(Self::ReadRecord),
            0xC0 => Ok(Self::GetResponse),
            _ => Err(Error::MalformedCommand(format!(
                "Unknown instruction code: 0x{:02X}",
                value
            ))),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:02X})", self.name(), *self as u8)
    }
}

/// Command APDU
///
/// # Examples
///
/// ```
/// use egkrust_core::ApduCommand;
///
/// let cmd = ApduCommand::read_binary_sfi(0x1D, 256);
/// assert_eq!(cmd.to_hex().unwrap(), "00B09D0000");
///
/// let decoded = ApduCommand::decode(&cmd.encode().unwrap()).unwrap();
/// assert_eq!(decoded, cmd);
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct ApduCommand {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,

    /// Command data (empty for cases 1 and 2)
    pub data: Bytes,

    /// Expected response length, 1..=65536 (`None` for cases 1 and 3)
    pub le: Option<usize>,
}

impl ApduCommand {
    /// Header size in bytes
    pub const HEADER_SIZE: usize = 4;

    /// Largest Le of a short frame
    pub const MAX_SHORT_LE: usize = 256;

    /// Largest Le of an extended frame
    pub const MAX_EXTENDED_LE: usize = 65536;

    /// Largest data field
    pub const MAX_DATA: usize = 65535;

    /// Create a case 1 command (header only)
    pub fn new(cla: u8, ins: impl Into<u8>, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins: ins.into(),
            p1,
            p2,
            data: Bytes::new(),
            le: None,
        }
    }

    /// Attach command data
    pub fn with_data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = data.into();
        self
    }

    /// Set the expected response length
    pub fn with_le(mut self, le: usize) -> Self {
        self.le = Some(le);
        self
    }

    /// CT-BCS RESET CT for the whole terminal
    pub fn reset_ct() -> Self {
        Self::new(CLA_CTBCS, Instruction::ResetCt, constants::ctbcs::UNIT_CT, 0x00)
            .with_le(Self::MAX_SHORT_LE)
    }

    /// CT-BCS REQUEST ICC on slot 1, returning the full ATR
    pub fn request_icc(wait_seconds: u8) -> Self {
        Self::new(
            CLA_CTBCS,
            Instruction::RequestIcc,
            constants::ctbcs::UNIT_ICC1,
            constants::ctbcs::RETURN_FULL_ATR,
        )
        .with_data(vec![wait_seconds])
        .with_le(Self::MAX_SHORT_LE)
    }

    /// CT-BCS EJECT ICC on slot 1
    pub fn eject_icc(wait_seconds: u8) -> Self {
        Self::new(CLA_CTBCS, Instruction::EjectIcc, constants::ctbcs::UNIT_ICC1, 0x00)
            .with_data(vec![wait_seconds])
    }

    /// SELECT by application identifier, no response data requested
    pub fn select_aid(aid: &[u8]) -> Self {
        Self::new(CLA_ISO, Instruction::Select, 0x04, 0x0C).with_data(Bytes::copy_from_slice(aid))
    }

    /// READ BINARY from offset 0 of the file with the given short identifier
    pub fn read_binary_sfi(sfi: u8, le: usize) -> Self {
        Self::new(CLA_ISO, Instruction::ReadBinary, 0x80 | (sfi & 0x1F), 0x00).with_le(le)
    }

    /// READ BINARY from the currently selected file
    ///
    /// # Errors
    ///
    /// Returns an error if `offset` does not fit in 15 bits.
    pub fn read_binary(offset: usize, le: usize) -> Result<Self> {
        if offset > constants::MAX_BINARY_OFFSET {
            return Err(Error::MalformedCommand(format!(
                "READ BINARY offset {} exceeds 0x{:04X}",
                offset,
                constants::MAX_BINARY_OFFSET
            )));
        }

        Ok(
            Self::new(CLA_ISO, Instruction::ReadBinary, (offset >> 8) as u8, offset as u8)
                .with_le(le),
        )
    }

    /// READ RECORD by number from the file with the given short identifier
    pub fn read_record(record: u8, sfi: u8, le: usize) -> Self {
        Self::new(CLA_ISO, Instruction::ReadRecord, record, ((sfi & 0x1F) << 3) | 0x04)
            .with_le(le)
    }

    /// Get the instruction, if it is one the read sequence knows
    pub fn instruction(&self) -> Option<Instruction> {
        Instruction::try_from(self.ins).ok()
    }

    /// Check if the command is addressed to the card terminal
    pub fn is_terminal(&self) -> bool {
        self.cla == CLA_CTBCS
    }

    /// Display name for logs and errors
    pub fn name(&self) -> &'static str {
        self.instruction().map_or("UNKNOWN", Instruction::name)
    }

    /// ISO 7816-4 command case (1 to 4)
    pub fn case(&self) -> u8 {
        match (self.data.is_empty(), self.le.is_some()) {
            (true, false) => 1,
            (true, true) => 2,
            (false, false) => 3,
            (false, true) => 4,
        }
    }

    /// Check if the command needs the extended length form
    pub fn is_extended(&self) -> bool {
        self.data.len() > 255 || self.le.is_some_and(|le| le > Self::MAX_SHORT_LE)
    }

    /// Encode command to bytes
    ///
    /// # Errors
    ///
    /// Returns an error if the data field or Le is out of range.
    pub fn encode(&self) -> Result<Bytes> {
        if self.data.len() > Self::MAX_DATA {
            return Err(Error::MalformedCommand(format!(
                "Data field too large: {} bytes (max: {} bytes)",
                self.data.len(),
                Self::MAX_DATA
            )));
        }
        if let Some(le) = self.le {
            if le == 0 || le > Self::MAX_EXTENDED_LE {
                return Err(Error::MalformedCommand(format!("Le out of range: {}", le)));
            }
        }

        let extended = self.is_extended();
        let mut buf = BytesMut::with_capacity(Self::HEADER_SIZE + 3 + self.data.len() + 3);

        buf.put_u8(self.cla);
        buf.put_u8(self.ins);
        buf.put_u8(self.p1);
        buf.put_u8(self.p2);

        if !self.data.is_empty() {
            if extended {
                buf.put_u8(0x00);
                buf.put_u16(self.data.len() as u16);
            } else {
                buf.put_u8(self.data.len() as u8);
            }
            buf.put_slice(&self.data);
        }

        if let Some(le) = self.le {
            match (extended, self.data.is_empty()) {
                // 256 and 65536 wrap to zero
                (false, _) => buf.put_u8(le as u8),
                (true, true) => {
                    buf.put_u8(0x00);
                    buf.put_u16(le as u16);
                }
                (true, false) => buf.put_u16(le as u16),
            }
        }

        Ok(buf.freeze())
    }

    /// Decode command from bytes, inferring case and length form
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is shorter than a header or its length
    /// fields are inconsistent with its size.
    pub fn decode(frame: &[u8]) -> Result<Self> {
        if frame.len() < Self::HEADER_SIZE {
            return Err(Error::MalformedCommand(format!(
                "Frame too short: expected at least {} bytes, got {} bytes",
                Self::HEADER_SIZE,
                frame.len()
            )));
        }

        let mut cmd = Self::new(frame[0], frame[1], frame[2], frame[3]);
        let body = &frame[Self::HEADER_SIZE..];
        let short_le = |b: u8| if b == 0 { 256 } else { b as usize };
        let extended_le = |hi: u8, lo: u8| match u16::from_be_bytes([hi, lo]) {
            0 => 65536,
            n => n as usize,
        };
        let inconsistent = || {
            Error::MalformedCommand(format!("Inconsistent length fields in {} byte frame", frame.len()))
        };

        match body {
            [] => {}
            [le] => cmd.le = Some(short_le(*le)),
            [0x00, hi, lo] => cmd.le = Some(extended_le(*hi, *lo)),
            [0x00, hi, lo, rest @ ..] => {
                let lc = u16::from_be_bytes([*hi, *lo]) as usize;
                if lc == 0 || rest.len() < lc {
                    return Err(inconsistent());
                }
                cmd.data = Bytes::copy_from_slice(&rest[..lc]);
                match &rest[lc..] {
                    [] => {}
                    [le_hi, le_lo] => cmd.le = Some(extended_le(*le_hi, *le_lo)),
                    _ => return Err(inconsistent()),
                }
            }
            [lc, rest @ ..] if *lc != 0 => {
                let lc = *lc as usize;
                if rest.len() < lc {
                    return Err(inconsistent());
                }
                cmd.data = Bytes::copy_from_slice(&rest[..lc]);
                match &rest[lc..] {
                    [] => {}
                    [le] => cmd.le = Some(short_le(*le)),
                    _ => return Err(inconsistent()),
                }
            }
            _ => return Err(inconsistent()),
        }

        Ok(cmd)
    }

    /// Encode as upper-case hex
    pub fn to_hex(&self) -> Result<String> {
        Ok(hex::encode_upper(self.encode()?))
    }

    /// Decode from hex, ignoring whitespace
    pub fn from_hex(text: &str) -> Result<Self> {
        let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        let frame = hex::decode(&compact)
            .map_err(|e| Error::MalformedCommand(format!("Invalid hex frame: {}", e)))?;
        Self::decode(&frame)
    }
}

impl fmt::Debug for ApduCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApduCommand")
            .field("cla", &format!("0x{:02X}", self.cla))
            .field("ins", &format!("0x{:02X}", self.ins))
            .field("p1", &format!("0x{:02X}", self.p1))
            .field("p2", &format!("0x{:02X}", self.p2))
            .field("data", &hex::encode_upper(&self.data))
            .field("le", &self.le)
            .finish()
    }
}

impl fmt::Display for ApduCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{:02X} {:02X} {:02X} {:02X}](lc={}, le={})",
            self.name(),
            self.cla,
            self.ins,
            self.p1,
            self.p2,
            self.data.len(),
            self.le.map_or_else(|| "-".to_string(), |le| le.to_string())
        )
    }
}
