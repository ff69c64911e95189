//! Status words (SW1-SW2) and their classification

use std::fmt;

use tracing::Level;

/// Status word trailing every response frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusWord {
    pub sw1: u8,
    pub sw2: u8,
}

/// Outcome class of a status word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// Command completed (`90 00`, and `90 01` for terminal commands)
    Success,

    /// More data available (`61 xx`, `xx` bytes remaining)
    MoreData(u8),

    /// End of file reached before Le bytes were read (`62 82`); data is valid
    EndOfData,

    /// File, record or referenced data not found
    NotFound,

    /// REQUEST ICC completed without a card in the slot (`62 00`)
    NoCard,

    /// Any other condition
    Error,
}

impl StatusWord {
    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self { sw1, sw2 }
    }

    pub const fn from_u16(status: u16) -> Self {
        Self {
            sw1: (status >> 8) as u8,
            sw2: status as u8,
        }
    }

    pub const fn to_u16(&self) -> u16 {
        ((self.sw1 as u16) << 8) | (self.sw2 as u16)
    }

    /// Check for plain success (`90 00`)
    pub const fn is_success(&self) -> bool {
        self.sw1 == 0x90 && self.sw2 == 0x00
    }

    /// Check for success as reported by the card terminal (`90 00` or `90 01`)
    pub const fn is_terminal_success(&self) -> bool {
        self.sw1 == 0x90 && (self.sw2 == 0x00 || self.sw2 == 0x01)
    }

    pub const fn is_more_data_available(&self) -> bool {
        self.sw1 == 0x61
    }

    pub const fn is_end_of_file(&self) -> bool {
        self.sw1 == 0x62 && self.sw2 == 0x82
    }

    /// Check for the not-found class (`6A 82`, `6A 83`, `6A 86`, `6A 88`)
    pub const fn is_not_found(&self) -> bool {
        self.sw1 == 0x6A && matches!(self.sw2, 0x82 | 0x83 | 0x86 | 0x88)
    }

    /// Check for wrong parameters P1-P2 (`6B 00`), the answer to an offset past the end of a file
    pub const fn is_wrong_offset(&self) -> bool {
        self.sw1 == 0x6B && self.sw2 == 0x00
    }

    /// Classify for an ISO command
    pub const fn classify(&self) -> StatusClass {
        match (self.sw1, self.sw2) {
            (0x90, 0x00) => StatusClass::Success,
            (0x61, remaining) => StatusClass::MoreData(remaining),
            (0x62, 0x82) => StatusClass::EndOfData,
            _ if self.is_not_found() => StatusClass::NotFound,
            _ => StatusClass::Error,
        }
    }

    /// Classify for a CT-BCS command addressed to the card terminal
    pub const fn classify_terminal(&self, request_icc: bool) -> StatusClass {
        match (self.sw1, self.sw2) {
            (0x90, 0x00) | (0x90, 0x01) => StatusClass::Success,
            (0x62, 0x00) if request_icc => StatusClass::NoCard,
            _ => self.classify(),
        }
    }

    /// Suggested log level
    pub const fn tracing_level(&self) -> Level {
        if self.is_terminal_success() || self.is_more_data_available() {
            Level::DEBUG
        } else if self.sw1 == 0x62 || self.sw1 == 0x63 {
            Level::INFO
        } else {
            Level::WARN
        }
    }

    /// Human-readable description
    pub const fn description(&self) -> &'static str {
        match (self.sw1, self.sw2) {
            (0x90, 0x00) => "Success",
            (0x90, 0x01) => "Success, asynchronous card",
            (0x61, _) => "More data available",
            (0x62, 0x00) => "No information given (no card presented)",
            (0x62, 0x81) => "Part of returned data may be corrupted",
            (0x62, 0x82) => "End of file/record reached before reading Le bytes",
            (0x62, 0x83) => "Selected file invalidated",
            (0x63, 0x00) => "No information given",
            (0x64, 0x00) => "Execution error",
            (0x64, 0x01) => "Command aborted by terminal",
            (0x65, 0x81) => "Memory failure",
            (0x67, 0x00) => "Wrong length",
            (0x69, 0x81) => "Command incompatible with file structure",
            (0x69, 0x82) => "Security status not satisfied",
            (0x69, 0x85) => "Conditions of use not satisfied",
            (0x69, 0x86) => "Command not allowed",
            (0x6A, 0x81) => "Function not supported",
            (0x6A, 0x82) => "File not found",
            (0x6A, 0x83) => "Record not found",
            (0x6A, 0x86) => "Incorrect parameters P1-P2",
            (0x6A, 0x88) => "Referenced data not found",
            (0x6B, 0x00) => "Wrong parameters P1-P2 (offset outside file)",
            (0x6C, _) => "Wrong Le field",
            (0x6D, 0x00) => "Instruction code not supported or invalid",
            (0x6E, 0x00) => "Class not supported",
            (0x6F, 0x00) => "No precise diagnosis",
            _ => "Unknown status word",
        }
    }
}

impl From<(u8, u8)> for StatusWord {
    fn from(tuple: (u8, u8)) -> Self {
        Self::new(tuple.0, tuple.1)
    }
}

impl From<u16> for StatusWord {
    fn from(status: u16) -> Self {
        Self::from_u16(status)
    }
}

impl From<StatusWord> for u16 {
    fn from(status: StatusWord) -> Self {
        status.to_u16()
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}{:02X}", self.sw1, self.sw2)
    }
}

/// Status words used by the read sequence
pub mod common {
    use super::StatusWord;

    pub const SUCCESS: StatusWord = StatusWord::new(0x90, 0x00);
    pub const SUCCESS_ASYNC: StatusWord = StatusWord::new(0x90, 0x01);
    pub const NO_CARD: StatusWord = StatusWord::new(0x62, 0x00);
    pub const END_OF_FILE: StatusWord = StatusWord::new(0x62, 0x82);
    pub const SECURITY_STATUS_NOT_SATISFIED: StatusWord = StatusWord::new(0x69, 0x82);
    pub const FILE_NOT_FOUND: StatusWord = StatusWord::new(0x6A, 0x82);
    pub const RECORD_NOT_FOUND: StatusWord = StatusWord::new(0x6A, 0x83);
    pub const WRONG_OFFSET: StatusWord = StatusWord::new(0x6B, 0x00);
    pub const INS_NOT_SUPPORTED: StatusWord = StatusWord::new(0x6D, 0x00);
}
