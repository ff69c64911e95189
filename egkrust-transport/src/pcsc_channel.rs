//! PC/SC card channel
//!
//! PC/SC readers do not understand CT-BCS terminal commands, so this channel
//! answers them itself: RESET CT is acknowledged, REQUEST ICC connects to the
//! card and returns its ATR, EJECT ICC powers the card down. Everything else
//! is transmitted to the card. Blocking PC/SC calls run on the blocking pool
//! under the configured timeout.

use std::ffi::CString;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use pcsc::{Attribute, Card, Context, Disposition, Protocols, Scope, ShareMode};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use egkrust_core::constants::CLA_CTBCS;
use egkrust_core::status::common;
use egkrust_core::{ApduCommand, ApduResponse, Instruction, StatusWord};

use crate::{error::*, CardChannel};

/// PC/SC channel configuration
#[derive(Debug, Clone)]
pub struct PcscConfig {
    /// Reader name (substring match); first reader when `None`
    pub reader: Option<String>,
    pub share_mode: ShareMode,
    pub protocols: Protocols,

    /// Upper bound for one exchange
    pub timeout: Duration,
}

impl Default for PcscConfig {
    fn default() -> Self {
        Self {
            reader: None,
            share_mode: ShareMode::Shared,
            protocols: Protocols::ANY,
            timeout: Duration::from_secs(5),
        }
    }
}

impl PcscConfig {
    pub fn with_reader(mut self, reader: impl Into<String>) -> Self {
        self.reader = Some(reader.into());
        self
    }

    pub fn with_share_mode(mut self, share_mode: ShareMode) -> Self {
        self.share_mode = share_mode;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

struct Connection {
    context: Context,
    reader: CString,
    card: Option<Card>,
    share_mode: ShareMode,
    protocols: Protocols,
}

impl Connection {
    fn connect(&mut self) -> Result<()> {
        if self.card.is_some() {
            return Ok(());
        }

        match self.context.connect(&self.reader, self.share_mode, self.protocols) {
            Ok(card) => {
                self.card = Some(card);
                Ok(())
            }
            Err(pcsc::Error::NoSmartcard) | Err(pcsc::Error::RemovedCard) => {
                Err(Error::NoCard(self.reader.to_string_lossy().into_owned()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn atr(&self) -> Result<Bytes> {
        let card = self.card.as_ref().ok_or(Error::NotConnected)?;
        let atr = card.get_attribute_owned(Attribute::AtrString)?;
        Ok(Bytes::from(atr))
    }

    fn transmit(&mut self, command: &[u8]) -> Result<Bytes> {
        let card = self.card.as_mut().ok_or(Error::NotConnected)?;
        let mut buffer = vec![0u8; pcsc::MAX_BUFFER_SIZE_EXTENDED];

        match card.transmit(command, &mut buffer) {
            Ok(response) => Ok(Bytes::copy_from_slice(response)),
            Err(e @ (pcsc::Error::RemovedCard | pcsc::Error::ResetCard)) => {
                self.card = None;
                if e == pcsc::Error::RemovedCard {
                    Err(Error::CardRemoved)
                } else {
                    Err(e.into())
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    fn reset(&mut self) -> Result<Bytes> {
        match self.card.as_mut() {
            Some(card) => card.reconnect(self.share_mode, self.protocols, Disposition::ResetCard)?,
            None => self.connect()?,
        }
        self.atr()
    }

    fn power_off(&mut self) -> Result<()> {
        if let Some(card) = self.card.take() {
            card.disconnect(Disposition::UnpowerCard)
                .map_err(|(_, e)| Error::from(e))?;
        }
        Ok(())
    }
}

/// Card channel over a PC/SC reader
pub struct PcscChannel {
    connection: Arc<Mutex<Connection>>,

    /// Card state after the last completed operation
    connected: Arc<AtomicBool>,
    reader_name: String,
    timeout: Duration,
}

impl PcscChannel {
    /// Open the configured reader
    ///
    /// The card itself is connected on REQUEST ICC or [`CardChannel::reset`].
    pub fn open(config: PcscConfig) -> Result<Self> {
        let context = Context::establish(Scope::User)?;
        let readers = context.list_readers_owned()?;
        debug!("Found {} PC/SC reader(s)", readers.len());

        let reader = match &config.reader {
            Some(wanted) => readers
                .into_iter()
                .find(|name| name.to_string_lossy().contains(wanted.as_str())),
            None => readers.into_iter().next(),
        }
        .ok_or_else(|| {
            Error::ReaderNotFound(config.reader.clone().unwrap_or_else(|| "any".to_string()))
        })?;

        let reader_name = reader.to_string_lossy().into_owned();
        debug!("Using reader {}", reader_name);

        Ok(Self {
            connection: Arc::new(Mutex::new(Connection {
                context,
                reader,
                card: None,
                share_mode: config.share_mode,
                protocols: config.protocols,
            })),
            connected: Arc::new(AtomicBool::new(false)),
            reader_name,
            timeout: config.timeout,
        })
    }

    /// List the names of all connected readers
    pub fn list_readers() -> Result<Vec<String>> {
        let context = Context::establish(Scope::User)?;
        Ok(context
            .list_readers_owned()?
            .iter()
            .map(|name| name.to_string_lossy().into_owned())
            .collect())
    }

    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let connection = Arc::clone(&self.connection);
        let connected = Arc::clone(&self.connected);
        let task = tokio::task::spawn_blocking(move || {
            let mut connection = connection.lock();
            let result = op(&mut connection);
            connected.store(connection.card.is_some(), Ordering::Release);
            result
        });

        match timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(Error::Io(std::io::Error::other(join_error.to_string()))),
            Err(_) => Err(Error::ReadTimeout {
                millis: self.timeout.as_millis() as u64,
            }),
        }
    }

    /// Answer a CT-BCS command locally
    async fn terminal_command(&self, frame: &[u8]) -> Result<Bytes> {
        let command = ApduCommand::decode(frame).map_err(|e| {
            Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))
        })?;

        let response = match command.instruction() {
            Some(Instruction::ResetCt) => ApduResponse::status_only(common::SUCCESS),
            Some(Instruction::RequestIcc) => match self.run(|c| c.reset()).await {
                Ok(atr) => ApduResponse::new(atr, common::SUCCESS),
                Err(e) if e.is_card_missing() => ApduResponse::status_only(common::NO_CARD),
                Err(e) => return Err(e),
            },
            Some(Instruction::EjectIcc) => {
                self.run(|c| c.power_off()).await?;
                ApduResponse::status_only(common::SUCCESS)
            }
            _ => ApduResponse::status_only(common::INS_NOT_SUPPORTED),
        };

        trace!("Terminal {} answered {}", command.name(), response.status);
        Ok(response.encode())
    }
}

impl fmt::Debug for PcscChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcscChannel")
            .field("reader_name", &self.reader_name)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[async_trait]
impl CardChannel for PcscChannel {
    async fn exchange(&mut self, command: &[u8]) -> Result<Bytes> {
        trace!("Sending {} bytes: {}", command.len(), hex::encode_upper(command));

        let response = if command.first() == Some(&CLA_CTBCS) {
            self.terminal_command(command).await?
        } else {
            let frame = command.to_vec();
            self.run(move |c| c.transmit(&frame)).await?
        };

        trace!("Received {} bytes: {}", response.len(), hex::encode_upper(&response));
        if response.len() >= 2 {
            let sw = StatusWord::new(response[response.len() - 2], response[response.len() - 1]);
            if !sw.is_terminal_success() {
                trace!("Status {}: {}", sw, sw.description());
            }
        }
        Ok(response)
    }

    async fn reset(&mut self) -> Result<Bytes> {
        debug!("Resetting card in {}", self.reader_name);
        self.run(|c| c.reset()).await
    }

    async fn power_off(&mut self) -> Result<()> {
        debug!("Powering off card in {}", self.reader_name);
        self.run(|c| c.power_off()).await
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn reader_name(&self) -> String {
        self.reader_name.clone()
    }
}

impl Drop for PcscChannel {
    fn drop(&mut self) {
        if let Some(mut connection) = self.connection.try_lock() {
            if let Some(card) = connection.card.take() {
                if let Err((_, e)) = card.disconnect(Disposition::LeaveCard) {
                    warn!("Disconnect from {} failed: {}", self.reader_name, e);
                }
            }
        }
    }
}
