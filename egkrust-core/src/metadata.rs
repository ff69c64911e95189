//! Decoding of the small descriptor files read before the data files
//!
//! - EF.ATR: buffer sizes as BER-TLV integers inside an `E0` template
//! - EF.Version: BCD-packed version numbers (`XXXYYYZZZZ`)
//! - EF.StatusVD: update status, timestamp and schema version
//! - EF.PD / EF.VD: length header and container offsets

use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt};
use egkrust_types::CardVersion;

use crate::{
    constants::{MAX_SHORT_CHUNK, PD_HEADER_LEN, VD_HEADER_LEN},
    error::{Error, Result},
};

/// Largest Le an extended READ BINARY can carry
const MAX_EXTENDED_CHUNK: usize = 65536;

/// Read one BER-TLV object, returning tag, value and the rest of the input
fn next_tlv(input: &[u8]) -> Option<(u8, &[u8], &[u8])> {
    let (&tag, rest) = input.split_first()?;
    let (&first, rest) = rest.split_first()?;

    let (len, rest) = match first {
        0x00..=0x7F => (first as usize, rest),
        0x81 => {
            let (&len, rest) = rest.split_first()?;
            (len as usize, rest)
        }
        0x82 => {
            let len = u16::from_be_bytes([*rest.first()?, *rest.get(1)?]);
            (len as usize, &rest[2..])
        }
        _ => return None,
    };

    if rest.len() < len {
        return None;
    }
    Some((tag, &rest[..len], &rest[len..]))
}

/// Get the maximum response length announced in EF.ATR
///
/// It is the second integer (`02`) inside the `E0` template.
pub fn max_response_len(ef_atr: &[u8]) -> Option<usize> {
    let mut input = ef_atr;
    let template = loop {
        let (tag, value, rest) = next_tlv(input)?;
        if tag == 0xE0 {
            break value;
        }
        input = rest;
    };

    let mut integers = Vec::new();
    let mut input = template;
    while let Some((tag, value, rest)) = next_tlv(input) {
        if tag == 0x02 {
            integers.push(value);
        }
        input = rest;
    }

    let value = integers.get(1)?;
    if value.is_empty() || value.len() > 4 {
        return None;
    }
    Some(value.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize))
}

/// Get the usable READ BINARY chunk size from EF.ATR
///
/// The announced response length includes the two status bytes. Without
/// extended length the chunk is capped at 256 bytes.
pub fn chunk_size(ef_atr: &[u8], extended_length: bool) -> Option<usize> {
    let usable = max_response_len(ef_atr)?.checked_sub(2)?;
    if usable == 0 {
        return None;
    }

    let cap = if extended_length {
        MAX_EXTENDED_CHUNK
    } else {
        MAX_SHORT_CHUNK
    };
    Some(usable.min(cap))
}

/// Decode a five byte BCD version `XXXYYYZZZZ` into `X.Y.Z`
pub fn bcd_version(bytes: &[u8]) -> Option<CardVersion> {
    let bytes: &[u8; 5] = bytes.get(..5)?.try_into().ok()?;

    let mut digits = [0u16; 10];
    for (i, byte) in bytes.iter().enumerate() {
        let (hi, lo) = (byte >> 4, byte & 0x0F);
        if hi > 9 || lo > 9 {
            return None;
        }
        digits[i * 2] = hi as u16;
        digits[i * 2 + 1] = lo as u16;
    }

    let number = |range: std::ops::Range<usize>| {
        digits[range].iter().fold(0u16, |acc, d| acc * 10 + d)
    };
    Some(CardVersion::new(number(0..3), number(3..6), number(6..10)))
}

/// Contents of EF.StatusVD
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusVd {
    /// An update of the insurance data was interrupted
    pub update_pending: bool,

    /// Time of the last update (`YYYYMMDDhhmmss`)
    pub timestamp: String,

    /// Schema version of PD, VD and GVD
    pub schema_version: Option<CardVersion>,
}

impl StatusVd {
    /// Minimum length holding status, timestamp and version
    pub const MIN_LEN: usize = 20;

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_LEN {
            return Err(Error::ProtocolViolation(format!(
                "EF.StatusVD too short: expected at least {} bytes, got {} bytes",
                Self::MIN_LEN,
                data.len()
            )));
        }

        let timestamp = String::from_utf8_lossy(&data[1..15])
            .trim_matches(char::from(0))
            .trim()
            .to_string();

        Ok(Self {
            update_pending: data[0] == b'1',
            timestamp,
            schema_version: bcd_version(&data[15..20]),
        })
    }
}

/// Length of the compressed payload following the EF.PD header
pub fn pd_length(header: &[u8]) -> Result<usize> {
    if header.len() < PD_HEADER_LEN {
        return Err(Error::ProtocolViolation(format!(
            "EF.PD header too short: {} bytes",
            header.len()
        )));
    }

    let mut cursor = Cursor::new(header);
    let len = cursor
        .read_u16::<BigEndian>()
        .map_err(|e| Error::ProtocolViolation(format!("EF.PD header: {}", e)))?;
    Ok(len as usize)
}

/// Container offsets at the start of EF.VD (end offsets inclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VdPointers {
    pub vd_start: usize,
    pub vd_end: usize,
    pub gvd_start: usize,
    pub gvd_end: usize,
}

impl VdPointers {
    pub fn parse(header: &[u8]) -> Result<Self> {
        if header.len() < VD_HEADER_LEN {
            return Err(Error::ProtocolViolation(format!(
                "EF.VD header too short: {} bytes",
                header.len()
            )));
        }

        let mut cursor = Cursor::new(header);
        let mut next = || {
            cursor
                .read_u16::<BigEndian>()
                .map(usize::from)
                .map_err(|e| Error::ProtocolViolation(format!("EF.VD header: {}", e)))
        };

        let pointers = Self {
            vd_start: next()?,
            vd_end: next()?,
            gvd_start: next()?,
            gvd_end: next()?,
        };

        if pointers.vd_start < VD_HEADER_LEN || pointers.vd_end < pointers.vd_start {
            return Err(Error::ProtocolViolation(format!(
                "Invalid VD container bounds {}..={}",
                pointers.vd_start, pointers.vd_end
            )));
        }

        Ok(pointers)
    }

    /// Length of the unprotected VD container
    pub fn vd_len(&self) -> usize {
        self.vd_end - self.vd_start + 1
    }

    /// Length of the protected GVD container, if present
    pub fn gvd_len(&self) -> Option<usize> {
        (self.gvd_end >= self.gvd_start && self.gvd_start > 0)
            .then(|| self.gvd_end - self.gvd_start + 1)
    }
}
