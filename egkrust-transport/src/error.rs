//! Transport errors

use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Not connected")]
    NotConnected,

    #[error("No card in reader {0}")]
    NoCard(String),

    #[error("Reader not found: {0}")]
    ReaderNotFound(String),

    #[error("Read timeout after {millis}ms")]
    ReadTimeout { millis: u64 },

    #[error("Card removed during exchange")]
    CardRemoved,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[cfg(feature = "pcsc")]
    #[error("PC/SC error: {0}")]
    Pcsc(#[from] pcsc::Error),
}

impl Error {
    /// Check if the exchange timed out
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::ReadTimeout { .. } => true,
            Self::Io(e) => e.kind() == io::ErrorKind::TimedOut,
            #[cfg(feature = "pcsc")]
            Self::Pcsc(e) => *e == pcsc::Error::Timeout,
            _ => false,
        }
    }

    /// Check if the error means the card is gone
    pub fn is_card_missing(&self) -> bool {
        match self {
            Self::NoCard(_) | Self::CardRemoved => true,
            #[cfg(feature = "pcsc")]
            Self::Pcsc(e) => matches!(e, pcsc::Error::NoSmartcard | pcsc::Error::RemovedCard),
            _ => false,
        }
    }
}
