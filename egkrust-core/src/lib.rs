//! # egkrust-core
//!
//! Core protocol implementation for the German electronic health card (eGK).
//!
//! This crate provides the I/O-free protocol primitives:
//! - Command and response APDU encoding/decoding
//! - Status word classification
//! - Chunked record reassembly
//! - Decoding of the card's descriptor files
//! - Decompression and field extraction of patient and insurance data
//! - The session state table

pub mod command;
pub mod constants;
pub mod error;
pub mod extract;
pub mod metadata;
pub mod record;
pub mod response;
pub mod session;
pub mod status;

pub use command::{ApduCommand, Instruction};
pub use error::{Error, Result};
pub use extract::{Document, Extracted};
pub use record::{CardRecord, ChunkProgress};
pub use response::ApduResponse;
pub use session::{SessionHandle, SessionState, Step, StepOutcome, StepPolicy, PROTOCOL};
pub use status::{StatusClass, StatusWord};
