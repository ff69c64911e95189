//! High-level card reader interface

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use egkrust_core::constants::{
    aid, sfi, MAX_SHORT_CHUNK, PD_HEADER_LEN, STATUS_VD_LEN, VD_HEADER_LEN, VERSION_RECORD,
};
use egkrust_core::extract::{self, Document, Extracted};
use egkrust_core::metadata::{self, StatusVd, VdPointers};
use egkrust_core::session::transition;
use egkrust_core::{ApduCommand, SessionHandle, SessionState, StatusClass, Step, StepOutcome};
use egkrust_transport::CardChannel;
use egkrust_types::{CardGeneration, EgkCardData, Field};

use crate::{
    config::ReaderConfig,
    error::{Error, Result},
    notify::{NotificationSink, TracingSink},
    record::RecordReader,
};

/// eGK reader
///
/// Runs the ten-step read sequence over a [`CardChannel`]. The channel may
/// be owned or borrowed (`&mut C` implements [`CardChannel`] too); only one
/// read runs at a time. A read whose future is dropped is marked aborted,
/// and the card it left powered is ejected at the start of the next read.
///
/// # Examples
///
/// ```no_run
/// # #[cfg(feature = "pcsc")]
/// # async fn run() -> egkrust::Result<()> {
/// use egkrust::{CardReader, PcscChannel, PcscConfig};
///
/// let channel = PcscChannel::open(PcscConfig::default())?;
/// let reader = CardReader::new(channel);
///
/// let data = reader.read_egk_card().await?;
/// println!("{}", data);
/// # Ok(())
/// # }
/// ```
pub struct CardReader<C> {
    channel: tokio::sync::Mutex<C>,
    session: SessionHandle,
    config: ReaderConfig,
    sink: Arc<dyn NotificationSink>,

    /// Set when a read stopped before releasing the card
    release_pending: AtomicBool,
}

impl<C: CardChannel> CardReader<C> {
    /// Create a reader with default settings that reports to `tracing`
    pub fn new(channel: C) -> Self {
        Self {
            channel: tokio::sync::Mutex::new(channel),
            session: SessionHandle::new(),
            config: ReaderConfig::default(),
            sink: Arc::new(TracingSink),
            release_pending: AtomicBool::new(false),
        }
    }

    pub fn with_config(mut self, config: ReaderConfig) -> Self {
        self.config = config;
        self
    }

    /// Send notifications to `sink`
    pub fn with_sink(mut self, sink: impl NotificationSink + 'static) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    /// Use a session handle created elsewhere, e.g. by a UI that cancels
    pub fn with_session(mut self, session: SessionHandle) -> Self {
        self.session = session;
        self
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Get a handle to observe or cancel the read
    pub fn session(&self) -> SessionHandle {
        self.session.clone()
    }

    /// Give back the channel
    pub fn into_channel(self) -> C {
        self.channel.into_inner()
    }

    /// Read patient and insurance data from the card
    ///
    /// Optional steps that fail leave their fields absent; the record is
    /// returned, and `card_data_read` notified, whenever the sequence
    /// reaches its end.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionBusy`] if a read is already running on this reader
    /// - [`Error::Aborted`] if a structural step or the transport failed
    /// - [`Error::Cancelled`] if [`SessionHandle::cancel`] was called
    pub async fn read_egk_card(&self) -> Result<EgkCardData> {
        let mut channel = self.channel.try_lock().map_err(|_| Error::SessionBusy)?;
        self.session.begin().map_err(|_| Error::SessionBusy)?;
        let mut guard = ReadGuard {
            session: &self.session,
            release_pending: &self.release_pending,
            finished: false,
        };

        let reader_name = channel.reader_name();
        info!("Reading eGK in {}", reader_name);

        let mut session = CardSession {
            reader: RecordReader::new(&mut *channel, self.config.chunk_size),
            config: &self.config,
            sink: self.sink.as_ref(),
            reader_name,
            data: EgkCardData::new(),
        };

        if self.release_pending.swap(false, Ordering::AcqRel) {
            info!("Releasing card left powered by an interrupted read");
            session.release().await;
        }

        let mut state = transition(SessionState::Idle, StepOutcome::Success)?;
        self.session.advance(state)?;

        loop {
            let step = state.step().ok_or_else(|| {
                egkrust_core::Error::InvalidSessionState(format!("No step for state {}", state))
            })?;

            self.sink.log(&format!(
                "Step {}/10: {} ({})",
                step.number, step.description, state
            ));

            let result = session.run(state).await;
            let (outcome, failure) = match result {
                Ok(()) => {
                    self.sink.log(&format!("{} completed", state));
                    (StepOutcome::Success, None)
                }
                Err(e) => {
                    self.sink.log(&format!("{} failed", state));
                    (severity(step, &e), Some(e))
                }
            };

            let mut next = transition(state, outcome)?;
            if next == SessionState::Aborted {
                let source = failure.unwrap_or_else(|| {
                    Error::Core(egkrust_core::Error::InvalidSessionState(format!(
                        "{} aborted without an error",
                        state
                    )))
                });
                let error = self.abort(&mut session, state, source).await;
                guard.finished = true;
                return Err(error);
            }

            if let Some(e) = failure {
                warn!("{} failed, continuing: {}", state, e);
                self.sink.error(&format!("{} failed: {} (continuing)", state, e));
            }

            if !next.is_terminal() && self.session.is_cancel_requested() {
                next = transition(state, StepOutcome::Cancelled)?;
                self.session.advance(next)?;
                info!("Read cancelled after {}", state);
                self.sink.log(&format!("Read cancelled after {}", state));
                session.release().await;
                guard.finished = true;
                return Err(Error::Cancelled { after: state });
            }

            self.session.advance(next)?;
            if next == SessionState::Done {
                break;
            }
            state = next;
        }

        guard.finished = true;
        let data = session.data;
        info!("Card read complete: {}", data);
        self.sink.card_data_read(&data);
        Ok(data)
    }

    async fn abort(
        &self,
        session: &mut CardSession<'_, C>,
        step: SessionState,
        source: Error,
    ) -> Error {
        error!("{} failed, aborting: {}", step, source);
        self.sink.error(&format!("{} failed: {} (aborted)", step, source));

        if let Err(e) = self.session.advance(SessionState::Aborted) {
            warn!("Session state not updated: {}", e);
        }
        session.release().await;

        Error::Aborted {
            step,
            source: Box::new(source),
        }
    }
}

/// Marks the read as aborted, and the card as still to be released, unless
/// the read finished
struct ReadGuard<'a> {
    session: &'a SessionHandle,
    release_pending: &'a AtomicBool,
    finished: bool,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        let state = self.session.state();
        if self.session.abandon() {
            warn!("Card read interrupted in {}", state);
        }
        self.release_pending.store(true, Ordering::Release);
    }
}

/// Severity of a failed step
///
/// Transport failures end the read, except timeouts in optional steps. The
/// final eject never does.
fn severity(step: &Step, error: &Error) -> StepOutcome {
    match error {
        Error::Transport(e)
            if !(e.is_timeout() && !step.is_structural())
                && step.state != SessionState::EjectIcc =>
        {
            StepOutcome::Fatal
        }
        _ => StepOutcome::Failed,
    }
}

/// State of one read: the channel, the chunk size learned so far and the
/// fields collected
struct CardSession<'a, C: CardChannel + ?Sized> {
    reader: RecordReader<'a, C>,
    config: &'a ReaderConfig,
    sink: &'a dyn NotificationSink,
    reader_name: String,
    data: EgkCardData,
}

impl<C: CardChannel + ?Sized> CardSession<'_, C> {
    async fn run(&mut self, state: SessionState) -> Result<()> {
        match state {
            SessionState::ResetCt => self.reset_ct().await,
            SessionState::RequestIcc => self.request_icc().await,
            SessionState::SelectRoot => self.select(aid::ROOT).await,
            SessionState::ReadEfAtr => self.read_ef_atr().await,
            SessionState::ReadEfVersion => self.read_ef_version().await,
            SessionState::ReadEfStatusVd => self.read_ef_status_vd().await,
            SessionState::SelectHca => self.select(aid::HCA).await,
            SessionState::ReadPd => self.read_pd().await,
            SessionState::ReadVd => self.read_vd().await,
            SessionState::EjectIcc => self.eject_icc().await,
            SessionState::Idle | SessionState::Done | SessionState::Aborted => {
                Err(egkrust_core::Error::InvalidSessionState(format!(
                    "{} has no step to run",
                    state
                ))
                .into())
            }
        }
    }

    async fn reset_ct(&mut self) -> Result<()> {
        self.reader.execute(&ApduCommand::reset_ct()).await?;
        Ok(())
    }

    async fn request_icc(&mut self) -> Result<()> {
        let command = ApduCommand::request_icc(self.config.request_wait);
        let response = self.reader.transmit(&command).await?;

        let atr = match response.classify_for(&command) {
            StatusClass::Success => response.data,
            StatusClass::NoCard => return Err(Error::NoCard(self.reader_name.clone())),
            _ => {
                return Err(egkrust_core::Error::CardStatus {
                    command: command.name(),
                    status: response.status,
                }
                .into());
            }
        };

        // Terminals that do not return the ATR with REQUEST ICC
        let atr = if atr.is_empty() {
            debug!("No ATR in REQUEST ICC response, resetting card");
            self.reader.channel_mut().reset().await?
        } else {
            atr
        };

        debug!("ATR: {}", hex::encode_upper(&atr));
        self.data.set(Field::Atr, hex::encode_upper(&atr));
        Ok(())
    }

    async fn select(&mut self, aid: &[u8]) -> Result<()> {
        self.reader.execute(&ApduCommand::select_aid(aid)).await?;
        Ok(())
    }

    async fn read_ef_atr(&mut self) -> Result<()> {
        let ef_atr = self.reader.read_sfi(sfi::EF_ATR, MAX_SHORT_CHUNK).await?;

        match metadata::chunk_size(&ef_atr, self.config.extended_length) {
            Some(chunk_size) => {
                debug!("Card accepts chunks of {} bytes", chunk_size);
                self.reader.set_chunk_size(chunk_size);
            }
            None => debug!(
                "EF.ATR announces no buffer sizes, keeping {} byte chunks",
                self.reader.chunk_size()
            ),
        }
        Ok(())
    }

    async fn read_ef_version(&mut self) -> Result<()> {
        let record = self.reader.read_record(VERSION_RECORD, sfi::EF_VERSION).await?;
        let version = metadata::bcd_version(&record).ok_or_else(|| {
            egkrust_core::Error::ProtocolViolation(format!(
                "EF.Version record {} is not a BCD version: {}",
                VERSION_RECORD,
                hex::encode_upper(&record)
            ))
        })?;

        let generation = CardGeneration::from_version(version);
        debug!("Card version {}, generation {}", version, generation);
        self.data.set(Field::CardGeneration, generation.to_string());
        Ok(())
    }

    async fn read_ef_status_vd(&mut self) -> Result<()> {
        let bytes = self.reader.read_sfi(sfi::EF_STATUS_VD, STATUS_VD_LEN).await?;
        let status = StatusVd::parse(&bytes)?;

        if status.update_pending {
            warn!("Insurance data update pending since {}", status.timestamp);
            self.sink.log(&format!(
                "Insurance data update pending since {}, data may be outdated",
                status.timestamp
            ));
        }

        match status.schema_version {
            Some(version) => self.data.set(Field::SchemaVersion, version.to_string()),
            None => debug!("EF.StatusVD carries no schema version"),
        }
        Ok(())
    }

    async fn read_pd(&mut self) -> Result<()> {
        let header = self.reader.read_sfi(sfi::EF_PD, PD_HEADER_LEN).await?;
        let len = metadata::pd_length(&header)?;
        debug!("PD payload: {} bytes", len);

        let compressed = self.reader.read_binary(PD_HEADER_LEN, len).await?;
        self.extract(Document::Patient, &compressed)
    }

    async fn read_vd(&mut self) -> Result<()> {
        let header = self.reader.read_sfi(sfi::EF_VD, VD_HEADER_LEN).await?;
        let pointers = VdPointers::parse(&header)?;
        debug!(
            "VD container {}..={}, protected container {}..={}",
            pointers.vd_start, pointers.vd_end, pointers.gvd_start, pointers.gvd_end
        );
        if let Some(len) = pointers.gvd_len() {
            debug!("Skipping {} byte protected container", len);
        }

        let compressed = self
            .reader
            .read_binary(pointers.vd_start, pointers.vd_len())
            .await?;
        self.extract(Document::Insurance, &compressed)
    }

    fn extract(&mut self, document: Document, compressed: &[u8]) -> Result<()> {
        if compressed.is_empty() {
            debug!("{} record is empty", document.name());
            return Ok(());
        }

        let Extracted { xml, fields } = extract::extract(document, compressed)?;
        self.data.merge(fields);
        if self.config.keep_raw_xml {
            self.data.set(document.raw_field(), xml);
        }
        Ok(())
    }

    async fn eject_icc(&mut self) -> Result<()> {
        let command = ApduCommand::eject_icc(self.config.eject_wait);
        let ejected = self.reader.execute(&command).await;
        self.power_off().await;
        ejected.map(|_| ())
    }

    /// Best-effort eject after an abort or cancellation
    async fn release(&mut self) {
        let command = ApduCommand::eject_icc(self.config.eject_wait);
        if let Err(e) = self.reader.execute(&command).await {
            debug!("Eject after abort failed: {}", e);
        }
        self.power_off().await;
    }

    async fn power_off(&mut self) {
        if let Err(e) = self.reader.channel_mut().power_off().await {
            warn!("Power off failed: {}", e);
            self.sink.log(&format!("Power off failed: {}", e));
        }
    }
}
