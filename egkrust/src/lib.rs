//! # egkrust
//!
//! Reader for the German electronic health insurance card (eGK).
//!
//! ## Features
//!
//! - The complete read sequence, from RESET CT to EJECT ICC
//! - Chunked reads sized from the card's EF.ATR
//! - Decompression and field extraction of patient (PD) and insurance (VD) data
//! - Progress notifications and cancellation between steps
//! - Async/await API using Tokio, PC/SC readers behind the `pcsc` feature
//!
//! ## Quick Start
//!
//! ```no_run
//! # #[cfg(feature = "pcsc")]
//! # async fn run() -> egkrust::Result<()> {
//! use egkrust::{CardReader, PcscChannel, PcscConfig};
//!
//! let channel = PcscChannel::open(PcscConfig::default())?;
//! let reader = CardReader::new(channel);
//!
//! let data = reader.read_egk_card().await?;
//! println!("{} {}", data.first_name.unwrap_or_default(), data.surname.unwrap_or_default());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod notify;
pub mod reader;
pub mod record;

// Re-exports
pub use config::ReaderConfig;
pub use error::{Error, Result};
pub use notify::{ChannelSink, NotificationSink, SessionEvent, TracingSink};
pub use reader::CardReader;
pub use record::RecordReader;

pub use egkrust_core::{SessionHandle, SessionState};
pub use egkrust_transport::CardChannel;
#[cfg(feature = "pcsc")]
pub use egkrust_transport::{PcscChannel, PcscConfig};
pub use egkrust_types::{CardGeneration, EgkCardData, Field};
