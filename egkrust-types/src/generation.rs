//! Card generation and version numbers

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Version number as stored BCD-packed on the card (`XXX.YYY.ZZZZ`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CardVersion {
    pub major: u16,
    pub minor: u16,
    pub revision: u16,
}

impl CardVersion {
    pub fn new(major: u16, minor: u16, revision: u16) -> Self {
        Self {
            major,
            minor,
            revision,
        }
    }
}

impl fmt::Display for CardVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.revision)
    }
}

impl FromStr for CardVersion {
    type Err = Error;

    /// Parse a dotted `X.Y.Z` version
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split('.').map(|part| {
            part.parse::<u16>()
                .map_err(|_| Error::Parse(format!("Invalid version: {}", s)))
        });

        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(major), Some(minor), Some(revision), None) => {
                Ok(Self::new(major?, minor?, revision?))
            }
            _ => Err(Error::Parse(format!("Invalid version: {}", s))),
        }
    }
}

/// eGK card generation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CardGeneration {
    G1,
    G1Plus,
    G2,
    G2_1,
    /// Version that maps to no known generation
    Unknown(CardVersion),
}

impl CardGeneration {
    /// Derive the generation from the version in EF.Version record 2
    ///
    /// ```
    /// use egkrust_types::{CardGeneration, CardVersion};
    ///
    /// assert_eq!(CardGeneration::from_version(CardVersion::new(4, 0, 0)), CardGeneration::G2);
    /// assert_eq!(CardGeneration::from_version(CardVersion::new(3, 0, 3)), CardGeneration::G1Plus);
    /// ```
    pub fn from_version(version: CardVersion) -> Self {
        match (version.major, version.minor, version.revision) {
            (major, _, _) if major >= 5 => Self::G2_1,
            (4, minor, _) if minor >= 4 => Self::G2_1,
            (4, _, _) => Self::G2,
            (3, 0, 1) | (3, 0, 3) => Self::G1Plus,
            (3, _, _) => Self::G1,
            _ => Self::Unknown(version),
        }
    }
}

impl fmt::Display for CardGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::G1 => f.write_str("G1"),
            Self::G1Plus => f.write_str("G1plus"),
            Self::G2 => f.write_str("G2"),
            Self::G2_1 => f.write_str("G2.1"),
            Self::Unknown(version) => write!(f, "{}", version),
        }
    }
}
