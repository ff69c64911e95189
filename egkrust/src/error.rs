//! High-level error types

use egkrust_core::SessionState;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Core protocol error: {0}")]
    Core(#[from] egkrust_core::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] egkrust_transport::Error),

    #[error("Type error: {0}")]
    Types(#[from] egkrust_types::Error),

    #[error("No card in reader {0}")]
    NoCard(String),

    #[error("A card read is already in progress on this reader")]
    SessionBusy,

    /// A structural step failed and the read was abandoned
    #[error("Card read aborted in {step}: {source}")]
    Aborted {
        step: SessionState,
        source: Box<Error>,
    },

    #[error("Card read cancelled after {after}")]
    Cancelled { after: SessionState },
}

impl Error {
    /// Check if the read failed because no card was presented
    pub fn is_no_card(&self) -> bool {
        match self {
            Self::NoCard(_) => true,
            Self::Transport(e) => e.is_card_missing(),
            Self::Aborted { source, .. } => source.is_no_card(),
            _ => false,
        }
    }

    /// Check if the error is a transport timeout
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout(),
            Self::Aborted { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// Get the step an aborted read stopped in
    pub fn failed_step(&self) -> Option<SessionState> {
        match self {
            Self::Aborted { step, .. } => Some(*step),
            Self::Cancelled { after } => Some(*after),
            _ => None,
        }
    }
}
