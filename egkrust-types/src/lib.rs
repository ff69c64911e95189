//! Type definitions for egkrust
//!
//! The output model of a card read: a flat record of optional string fields
//! plus the card generation derived from EF.Version.

pub mod card_data;
pub mod error;
pub mod field;
pub mod generation;

pub use card_data::EgkCardData;
pub use error::{Error, Result};
pub use field::Field;
pub use generation::{CardGeneration, CardVersion};
