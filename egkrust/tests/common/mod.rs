//! Virtual eGK for session tests
//!
//! Interprets the command frames of the read sequence against in-memory
//! files. Faults can be injected per command prefix and every frame sent is
//! logged.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;

use egkrust::{CardChannel, EgkCardData, NotificationSink};
use egkrust_core::constants::{aid, sfi};
use egkrust_core::status::{common, StatusWord};
use egkrust_core::{ApduCommand, ApduResponse, Instruction};

pub const ATR: [u8; 11] = [0x3B, 0xD3, 0x96, 0xFF, 0x81, 0xB1, 0xFE, 0x45, 0x1F, 0x07, 0x80];

/// EF.ATR announcing 0x0234 byte responses
pub const EF_ATR: [u8; 18] = [
    0xE0, 0x10, 0x02, 0x02, 0x01, 0x23, 0x02, 0x02, 0x02, 0x34, 0x02, 0x02, 0x04, 0x56, 0x02,
    0x02, 0x07, 0x89,
];

/// EF.ATR announcing 0x00F2 byte responses, i.e. 240 byte chunks
pub const EF_ATR_SMALL: [u8; 10] = [0xE0, 0x08, 0x02, 0x02, 0x01, 0x00, 0x02, 0x02, 0x00, 0xF2];

pub const PD_XML: &str = r#"<?xml version="1.0" encoding="ISO-8859-15" standalone="yes"?>
<vsdp:UC_PersoenlicheVersichertendatenXML xmlns:vsdp="http://ws.gematik.de/fa/vsdm/vsd/v5.2" CDM_VERSION="5.2.0">
  <vsdp:Versicherter>
    <vsdp:Versicherten_ID>X110411675</vsdp:Versicherten_ID>
    <vsdp:Person>
      <vsdp:Geburtsdatum>19640812</vsdp:Geburtsdatum>
      <vsdp:Vorname>Erika</vsdp:Vorname>
      <vsdp:Nachname>Mustermann</vsdp:Nachname>
      <vsdp:Geschlecht>W</vsdp:Geschlecht>
      <vsdp:Titel>Dr.</vsdp:Titel>
      <vsdp:StrassenAdresse>
        <vsdp:Postleitzahl>10117</vsdp:Postleitzahl>
        <vsdp:Ort>Berlin</vsdp:Ort>
        <vsdp:Land>
          <vsdp:Wohnsitzlaendercode>D</vsdp:Wohnsitzlaendercode>
        </vsdp:Land>
        <vsdp:Strasse>Friedrichstrasse</vsdp:Strasse>
        <vsdp:Hausnummer>136</vsdp:Hausnummer>
      </vsdp:StrassenAdresse>
    </vsdp:Person>
  </vsdp:Versicherter>
</vsdp:UC_PersoenlicheVersichertendatenXML>"#;

pub const VD_XML: &str = r#"<?xml version="1.0" encoding="ISO-8859-15" standalone="yes"?>
<vsda:UC_AllgemeineVersicherungsdatenXML xmlns:vsda="http://ws.gematik.de/fa/vsdm/vsd/v5.2" CDM_VERSION="5.2.0">
  <vsda:Versicherter>
    <vsda:Versichertennummer>A123456780</vsda:Versichertennummer>
    <vsda:Versicherungsschutz>
      <vsda:Beginn>20200101</vsda:Beginn>
      <vsda:Ende>20291231</vsda:Ende>
      <vsda:Kostentraeger>
        <vsda:Kostentraegerkennung>109500969</vsda:Kostentraegerkennung>
        <vsda:Kostentraegerlaendercode>D</vsda:Kostentraegerlaendercode>
        <vsda:Name>Test GKV-SV</vsda:Name>
      </vsda:Kostentraeger>
    </vsda:Versicherungsschutz>
    <vsda:Zusatzinfos>
      <vsda:ZusatzinfosGKV>
        <vsda:Versichertenart>1</vsda:Versichertenart>
        <vsda:Statusergaenzung>0</vsda:Statusergaenzung>
      </vsda:ZusatzinfosGKV>
    </vsda:Zusatzinfos>
  </vsda:Versicherter>
</vsda:UC_AllgemeineVersicherungsdatenXML>"#;

pub fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}

/// Incompressible filler so that payloads span several chunks
pub fn noise(len: usize) -> String {
    let mut state: u32 = 0x2545_F491;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            char::from(b'a' + (state % 26) as u8)
        })
        .collect()
}

/// EF.PD: length header followed by the compressed document
pub fn ef_pd(compressed: &[u8]) -> Vec<u8> {
    let mut file = (compressed.len() as u16).to_be_bytes().to_vec();
    file.extend_from_slice(compressed);
    file
}

/// EF.VD: container offsets, the VD container and a dummy protected container
pub fn ef_vd(compressed: &[u8]) -> Vec<u8> {
    let vd_start = 8u16;
    let vd_end = vd_start + compressed.len() as u16 - 1;
    let gvd_start = vd_end + 1;
    let gvd_end = gvd_start + 15;

    let mut file = Vec::new();
    for pointer in [vd_start, vd_end, gvd_start, gvd_end] {
        file.extend_from_slice(&pointer.to_be_bytes());
    }
    file.extend_from_slice(compressed);
    file.extend_from_slice(&[0xEE; 16]);
    file
}

/// EF.StatusVD with the given update flag and schema version 5.2.1
pub fn ef_status_vd(update_pending: bool) -> Vec<u8> {
    let mut file = vec![if update_pending { b'1' } else { b'0' }];
    file.extend_from_slice(b"20240131120000");
    file.extend_from_slice(&[0x00, 0x52, 0x00, 0x00, 0x01]);
    file.extend_from_slice(&[0x00; 5]);
    file
}

/// Answer injected for commands starting with a prefix
#[derive(Debug, Clone)]
pub enum Fault {
    /// Respond with this status word and no data
    Status(u16),

    /// Respond with these raw bytes
    Frame(Vec<u8>),

    /// Fail with a transport timeout
    Timeout,

    /// Fail with a transport I/O error
    Io,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Application {
    Root,
    Hca,
}

type Hook = Box<dyn Fn() + Send>;

/// In-memory eGK behind a card terminal
pub struct VirtualCard {
    card_present: bool,
    powered: bool,
    selected: Option<Application>,
    current_ef: Option<u8>,
    binaries: HashMap<(Application, u8), Vec<u8>>,
    records: HashMap<(Application, u8, u8), Vec<u8>>,
    faults: Vec<(Vec<u8>, Fault)>,
    hooks: Vec<(Vec<u8>, Hook)>,
    latency: Option<Duration>,
    atr_in_request_icc: bool,
    log: Arc<Mutex<Vec<String>>>,
    power_offs: Arc<Mutex<usize>>,
}

impl VirtualCard {
    /// A generation 2 card with PD and VD documents
    pub fn new() -> Self {
        Self::empty()
            .with_binary(Application::Root, sfi::EF_ATR, EF_ATR.to_vec())
            .with_record(Application::Root, sfi::EF_VERSION, 2, vec![0x00, 0x40, 0x00, 0x00, 0x00])
            .with_binary(Application::Root, sfi::EF_STATUS_VD, ef_status_vd(false))
            .with_binary(Application::Hca, sfi::EF_PD, ef_pd(&gzip(PD_XML.as_bytes())))
            .with_binary(Application::Hca, sfi::EF_VD, ef_vd(&gzip(VD_XML.as_bytes())))
    }

    /// A card without any files
    pub fn empty() -> Self {
        Self {
            card_present: true,
            powered: false,
            selected: None,
            current_ef: None,
            binaries: HashMap::new(),
            records: HashMap::new(),
            faults: Vec::new(),
            hooks: Vec::new(),
            latency: None,
            atr_in_request_icc: true,
            log: Arc::new(Mutex::new(Vec::new())),
            power_offs: Arc::new(Mutex::new(0)),
        }
    }

    fn with_binary(mut self, application: Application, sfi: u8, data: Vec<u8>) -> Self {
        self.binaries.insert((application, sfi), data);
        self
    }

    fn with_record(mut self, application: Application, sfi: u8, record: u8, data: Vec<u8>) -> Self {
        self.records.insert((application, sfi, record), data);
        self
    }

    pub fn without_card(mut self) -> Self {
        self.card_present = false;
        self
    }

    /// Terminal that answers REQUEST ICC without the ATR
    pub fn without_atr_in_request_icc(mut self) -> Self {
        self.atr_in_request_icc = false;
        self
    }

    pub fn with_ef_atr(self, ef_atr: &[u8]) -> Self {
        self.with_binary(Application::Root, sfi::EF_ATR, ef_atr.to_vec())
    }

    pub fn with_status_vd(self, file: Vec<u8>) -> Self {
        self.with_binary(Application::Root, sfi::EF_STATUS_VD, file)
    }

    pub fn with_pd_file(self, file: Vec<u8>) -> Self {
        self.with_binary(Application::Hca, sfi::EF_PD, file)
    }

    pub fn with_vd_file(self, file: Vec<u8>) -> Self {
        self.with_binary(Application::Hca, sfi::EF_VD, file)
    }

    /// Transparent file in the root application
    pub fn with_root_file(self, sfi: u8, data: Vec<u8>) -> Self {
        self.with_binary(Application::Root, sfi, data)
    }

    pub fn without_root_file(mut self, sfi: u8) -> Self {
        self.binaries.remove(&(Application::Root, sfi));
        self.records.retain(|(application, file, _), _| {
            !(*application == Application::Root && *file == sfi)
        });
        self
    }

    /// Inject a fault for frames starting with `prefix` (hex)
    pub fn fail_on(mut self, prefix: &str, fault: Fault) -> Self {
        self.faults.push((hex::decode(prefix).unwrap(), fault));
        self
    }

    /// Run `hook` when a frame starting with `prefix` (hex) arrives
    pub fn on_command(mut self, prefix: &str, hook: impl Fn() + Send + 'static) -> Self {
        self.hooks.push((hex::decode(prefix).unwrap(), Box::new(hook)));
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Frames received so far, upper-case hex
    pub fn command_log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.log)
    }

    pub fn power_off_count(&self) -> Arc<Mutex<usize>> {
        Arc::clone(&self.power_offs)
    }

    fn respond(&mut self, frame: &[u8]) -> ApduResponse {
        let Ok(command) = ApduCommand::decode(frame) else {
            return ApduResponse::status_only(StatusWord::new(0x67, 0x00));
        };

        if command.is_terminal() {
            return self.terminal(&command);
        }
        if !self.powered {
            return ApduResponse::status_only(StatusWord::new(0x6F, 0x00));
        }

        match command.instruction() {
            Some(Instruction::Select) => self.select(&command),
            Some(Instruction::ReadBinary) => self.read_binary(&command),
            Some(Instruction::ReadRecord) => self.read_record(&command),
            _ => ApduResponse::status_only(common::INS_NOT_SUPPORTED),
        }
    }

    fn terminal(&mut self, command: &ApduCommand) -> ApduResponse {
        match command.instruction() {
            Some(Instruction::ResetCt) => {
                self.powered = false;
                self.selected = None;
                ApduResponse::status_only(common::SUCCESS)
            }
            Some(Instruction::RequestIcc) if !self.card_present => {
                ApduResponse::status_only(common::NO_CARD)
            }
            Some(Instruction::RequestIcc) => {
                self.powered = true;
                let atr = if self.atr_in_request_icc { ATR.to_vec() } else { Vec::new() };
                ApduResponse::new(atr, common::SUCCESS)
            }
            Some(Instruction::EjectIcc) => {
                self.powered = false;
                self.selected = None;
                ApduResponse::status_only(common::SUCCESS)
            }
            _ => ApduResponse::status_only(common::INS_NOT_SUPPORTED),
        }
    }

    fn select(&mut self, command: &ApduCommand) -> ApduResponse {
        let application = if command.data.as_ref() == aid::ROOT {
            Application::Root
        } else if command.data.as_ref() == aid::HCA {
            Application::Hca
        } else {
            return ApduResponse::status_only(common::FILE_NOT_FOUND);
        };

        self.selected = Some(application);
        self.current_ef = None;
        ApduResponse::status_only(common::SUCCESS)
    }

    fn read_binary(&mut self, command: &ApduCommand) -> ApduResponse {
        let Some(application) = self.selected else {
            return ApduResponse::status_only(StatusWord::new(0x69, 0x86));
        };

        let (file, offset) = if command.p1 & 0x80 != 0 {
            (command.p1 & 0x1F, command.p2 as usize)
        } else {
            match self.current_ef {
                Some(file) => (file, ((command.p1 as usize) << 8) | command.p2 as usize),
                None => return ApduResponse::status_only(StatusWord::new(0x69, 0x86)),
            }
        };

        let Some(data) = self.binaries.get(&(application, file)) else {
            return ApduResponse::status_only(common::FILE_NOT_FOUND);
        };
        self.current_ef = Some(file);

        if offset > data.len() || (offset == data.len() && offset > 0) {
            return ApduResponse::status_only(common::WRONG_OFFSET);
        }

        let le = command.le.unwrap_or(0);
        let end = (offset + le).min(data.len());
        let status = if end - offset < le {
            common::END_OF_FILE
        } else {
            common::SUCCESS
        };
        ApduResponse::new(data[offset..end].to_vec(), status)
    }

    fn read_record(&mut self, command: &ApduCommand) -> ApduResponse {
        let Some(application) = self.selected else {
            return ApduResponse::status_only(StatusWord::new(0x69, 0x86));
        };

        let file = command.p2 >> 3;
        match self.records.get(&(application, file, command.p1)) {
            Some(data) => ApduResponse::new(data.clone(), common::SUCCESS),
            None => ApduResponse::status_only(common::RECORD_NOT_FOUND),
        }
    }
}

#[async_trait]
impl CardChannel for VirtualCard {
    async fn exchange(&mut self, command: &[u8]) -> egkrust_transport::Result<Bytes> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        self.log.lock().push(hex::encode_upper(command));
        for (prefix, hook) in &self.hooks {
            if command.starts_with(prefix) {
                hook();
            }
        }

        let fault = self
            .faults
            .iter()
            .find(|(prefix, _)| command.starts_with(prefix))
            .map(|(_, fault)| fault.clone());

        match fault {
            Some(Fault::Status(status)) => {
                Ok(ApduResponse::status_only(StatusWord::from_u16(status)).encode())
            }
            Some(Fault::Frame(frame)) => Ok(Bytes::from(frame)),
            Some(Fault::Timeout) => Err(egkrust_transport::Error::ReadTimeout { millis: 5000 }),
            Some(Fault::Io) => Err(egkrust_transport::Error::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "reader unplugged",
            ))),
            None => Ok(self.respond(command).encode()),
        }
    }

    async fn reset(&mut self) -> egkrust_transport::Result<Bytes> {
        if !self.card_present {
            return Err(egkrust_transport::Error::NoCard(self.reader_name()));
        }
        self.powered = true;
        Ok(Bytes::from_static(&ATR))
    }

    async fn power_off(&mut self) -> egkrust_transport::Result<()> {
        self.powered = false;
        *self.power_offs.lock() += 1;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.powered
    }

    fn reader_name(&self) -> String {
        "Virtual eGK Terminal 0".to_string()
    }
}

/// What a sink was told, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Log(String),
    Error(String),
    CardDataRead(EgkCardData),
}

/// Sink that records notifications for inspection
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    notifications: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.notifications()
            .into_iter()
            .filter_map(|n| match n {
                Notification::Error(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn logs(&self) -> Vec<String> {
        self.notifications()
            .into_iter()
            .filter_map(|n| match n {
                Notification::Log(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn card_data_reads(&self) -> Vec<EgkCardData> {
        self.notifications()
            .into_iter()
            .filter_map(|n| match n {
                Notification::CardDataRead(data) => Some(data),
                _ => None,
            })
            .collect()
    }
}

impl NotificationSink for RecordingSink {
    fn log(&self, message: &str) {
        self.notifications.lock().push(Notification::Log(message.to_string()));
    }

    fn error(&self, message: &str) {
        self.notifications.lock().push(Notification::Error(message.to_string()));
    }

    fn card_data_read(&self, data: &EgkCardData) {
        self.notifications.lock().push(Notification::CardDataRead(data.clone()));
    }
}
