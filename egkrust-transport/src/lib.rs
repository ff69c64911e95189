//! Transport layer for egkrust
//!
//! A [`CardChannel`] carries raw command frames to a card reader and returns
//! the raw response frames. Timeouts and retries at the byte level belong to
//! the channel; protocol decisions belong to the caller.

pub mod error;
#[cfg(feature = "pcsc")]
pub mod pcsc_channel;

pub use error::{Error, Result};
#[cfg(feature = "pcsc")]
pub use pcsc_channel::{PcscChannel, PcscConfig};

use async_trait::async_trait;
use bytes::Bytes;

/// Byte-exchange channel to a card reader
#[async_trait]
pub trait CardChannel: Send {
    /// Send a command frame and return the response frame (data and SW1-SW2)
    async fn exchange(&mut self, command: &[u8]) -> Result<Bytes>;

    /// Reset the card and return its ATR
    async fn reset(&mut self) -> Result<Bytes>;

    /// Power the card off
    async fn power_off(&mut self) -> Result<()>;

    /// Check if a card connection is established
    fn is_connected(&self) -> bool;

    /// Get the reader name
    fn reader_name(&self) -> String;
}

#[async_trait]
impl<C: CardChannel + ?Sized> CardChannel for &mut C {
    async fn exchange(&mut self, command: &[u8]) -> Result<Bytes> {
        (**self).exchange(command).await
    }

    async fn reset(&mut self) -> Result<Bytes> {
        (**self).reset().await
    }

    async fn power_off(&mut self) -> Result<()> {
        (**self).power_off().await
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn reader_name(&self) -> String {
        (**self).reader_name()
    }
}

#[async_trait]
impl<C: CardChannel + ?Sized> CardChannel for Box<C> {
    async fn exchange(&mut self, command: &[u8]) -> Result<Bytes> {
        (**self).exchange(command).await
    }

    async fn reset(&mut self) -> Result<Bytes> {
        (**self).reset().await
    }

    async fn power_off(&mut self) -> Result<()> {
        (**self).power_off().await
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn reader_name(&self) -> String {
        (**self).reader_name()
    }
}
