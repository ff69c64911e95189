//! Decompression and field extraction for EF.PD and EF.VD
//!
//! Both files carry a gzip-compressed XML document. Extraction inflates the
//! document, decodes it to text and picks a fixed set of elements by their
//! path of local names. Missing elements leave the field absent.

use std::io::Read;

use encoding_rs::{Encoding, ISO_8859_15};
use flate2::read::{DeflateDecoder, GzDecoder};
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::{debug, trace};

use egkrust_types::{EgkCardData, Field};

use crate::error::{Error, Result};

/// gzip member header: magic and deflate method
const GZIP_MAGIC: [u8; 3] = [0x1F, 0x8B, 0x08];

/// Inflated size limit; real documents stay below a few kilobytes
const MAX_INFLATED_LEN: u64 = 1 << 20;

/// Which data file a document comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Document {
    /// Patient data (EF.PD)
    Patient,

    /// Insurance data (EF.VD)
    Insurance,
}

/// Candidate element paths per field, highest priority first
type FieldPaths = &'static [(Field, &'static [&'static [&'static str]])];

const PATIENT_PATHS: FieldPaths = &[
    (Field::InsuredId, &[&["Versicherten_ID"]]),
    (Field::Surname, &[&["Person", "Nachname"]]),
    (Field::FirstName, &[&["Person", "Vorname"]]),
    (Field::BirthDate, &[&["Person", "Geburtsdatum"]]),
    (Field::Gender, &[&["Person", "Geschlecht"]]),
    (Field::Title, &[&["Person", "Titel"]]),
    (Field::NamePrefix, &[&["Person", "Vorsatzwort"]]),
    (Field::NameSuffix, &[&["Person", "Namenszusatz"]]),
    (Field::Street, &[&["StrassenAdresse", "Strasse"]]),
    (Field::HouseNumber, &[&["StrassenAdresse", "Hausnummer"]]),
    (
        Field::PostalCode,
        &[&["StrassenAdresse", "Postleitzahl"], &["PostfachAdresse", "Postleitzahl"]],
    ),
    (
        Field::City,
        &[&["StrassenAdresse", "Ort"], &["PostfachAdresse", "Ort"]],
    ),
    (
        Field::CountryCode,
        &[&["StrassenAdresse", "Land", "Wohnsitzlaendercode"], &["Wohnsitzlaendercode"]],
    ),
    (Field::AddressSupplement, &[&["Anschriftenzusatz"]]),
];

const INSURANCE_PATHS: FieldPaths = &[
    (Field::InsuranceNumber, &[&["Versichertennummer"]]),
    (
        Field::PayerId,
        &[
            &["AbrechnenderKostentraeger", "Kostentraegerkennung"],
            &["Kostentraeger", "Kostentraegerkennung"],
        ],
    ),
    (
        Field::PayerName,
        &[
            &["AbrechnenderKostentraeger", "Name"],
            &["Kostentraeger", "Name"],
        ],
    ),
    (
        Field::PayerCountryCode,
        &[
            &["AbrechnenderKostentraeger", "Kostentraegerlaendercode"],
            &["Kostentraegerlaendercode"],
        ],
    ),
    (Field::InsuredType, &[&["Versichertenart"]]),
    (Field::StatusSupplement, &[&["Statusergaenzung"]]),
    (Field::ValidFrom, &[&["Versicherungsschutz", "Beginn"]]),
    (Field::ValidTo, &[&["Versicherungsschutz", "Ende"]]),
];

impl Document {
    fn paths(self) -> FieldPaths {
        match self {
            Self::Patient => PATIENT_PATHS,
            Self::Insurance => INSURANCE_PATHS,
        }
    }

    /// Field receiving the decompressed document
    pub fn raw_field(self) -> Field {
        match self {
            Self::Patient => Field::RawPatientXml,
            Self::Insurance => Field::RawInsuranceXml,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Patient => "PD",
            Self::Insurance => "VD",
        }
    }
}

/// Result of extracting one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    /// Decompressed document text
    pub xml: String,

    /// Fields found in the document
    pub fields: EgkCardData,
}

/// Inflate a compressed record
///
/// Leading bytes before the gzip magic are skipped. Without a gzip header
/// the bytes are treated as a raw deflate stream.
pub fn inflate(compressed: &[u8]) -> Result<Vec<u8>> {
    if compressed.is_empty() {
        return Err(Error::DecompressionError("Empty record".to_string()));
    }

    let mut inflated = Vec::new();
    let result = match find_gzip_member(compressed) {
        Some(start) => {
            if start > 0 {
                trace!("Skipping {} bytes before gzip header", start);
            }
            GzDecoder::new(&compressed[start..])
                .take(MAX_INFLATED_LEN)
                .read_to_end(&mut inflated)
        }
        None => {
            trace!("No gzip header, trying raw deflate");
            DeflateDecoder::new(compressed)
                .take(MAX_INFLATED_LEN)
                .read_to_end(&mut inflated)
        }
    };

    result.map_err(|e| Error::DecompressionError(e.to_string()))?;
    trace!("Inflated {} bytes to {} bytes", compressed.len(), inflated.len());
    Ok(inflated)
}

fn find_gzip_member(bytes: &[u8]) -> Option<usize> {
    bytes
        .windows(GZIP_MAGIC.len())
        .position(|window| window == GZIP_MAGIC)
}

/// Decode document bytes to text
///
/// The encoding comes from the XML declaration, ISO-8859-15 when absent or
/// unknown. Content after the first NUL byte is dropped.
pub fn decode_text(bytes: &[u8]) -> String {
    let bytes = match bytes.iter().position(|b| *b == 0) {
        Some(end) => &bytes[..end],
        None => bytes,
    };

    let encoding = declared_encoding(bytes).unwrap_or(ISO_8859_15);
    let (text, used, had_errors) = encoding.decode(bytes);
    if had_errors {
        debug!("Document contains bytes invalid in {}", used.name());
    }

    repair_final_tag(text.trim())
}

fn declared_encoding(bytes: &[u8]) -> Option<&'static Encoding> {
    let head = &bytes[..bytes.len().min(200)];
    let head = String::from_utf8_lossy(head);
    let declaration = &head[..head.find("?>")?];

    let start = declaration.find("encoding")? + "encoding".len();
    let rest = declaration[start..].trim_start().strip_prefix('=')?.trim_start();
    let quote = rest.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let rest = &rest[1..];
    let label = &rest[..rest.find(quote)?];

    Encoding::for_label(label.trim().as_bytes())
}

/// Older cards store the document without the final `>`
fn repair_final_tag(text: &str) -> String {
    let mut text = text.to_string();
    if !text.ends_with('>') {
        if let Some(open) = text.rfind('<') {
            if text[open..].starts_with("</") && !text[open..].contains('>') {
                trace!("Appending missing '>' to final closing tag");
                text.push('>');
            }
        }
    }
    text
}

/// Extract the fields of `document` from XML text
///
/// # Errors
///
/// Returns [`Error::MalformedPayload`] if the text is not well-formed.
pub fn extract_fields(document: Document, xml: &str) -> Result<EgkCardData> {
    let paths = document.paths();

    // First match per (field, candidate), in document order
    let mut matches: Vec<Vec<Option<String>>> = paths
        .iter()
        .map(|(_, candidates)| vec![None; candidates.len()])
        .collect();

    let mut record = |stack: &[(String, String)], value: &str| {
        for ((_, candidates), found) in paths.iter().zip(matches.iter_mut()) {
            for (candidate, slot) in candidates.iter().zip(found.iter_mut()) {
                if slot.is_none() && path_ends_with(stack, candidate) {
                    *slot = Some(value.to_string());
                }
            }
        }
    };

    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let malformed = |e: quick_xml::Error, position: usize| {
        Error::MalformedPayload(format!("{} document at byte {}: {}", document.name(), position, e))
    };

    // Open elements: local name and direct text
    let mut stack: Vec<(String, String)> = Vec::new();
    let mut seen_root = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| malformed(e, reader.buffer_position()))?;

        match event {
            Event::Start(e) => {
                if stack.is_empty() && seen_root {
                    return Err(Error::MalformedPayload(format!(
                        "{} document has more than one root element",
                        document.name()
                    )));
                }
                seen_root = true;
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                stack.push((name, String::new()));
            }
            Event::Empty(e) => {
                if stack.is_empty() && seen_root {
                    return Err(Error::MalformedPayload(format!(
                        "{} document has more than one root element",
                        document.name()
                    )));
                }
                seen_root = true;
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                stack.push((name, String::new()));
                record(&stack, "");
                stack.pop();
            }
            Event::Text(e) => {
                let text = e
                    .unescape()
                    .map_err(|e| malformed(e, reader.buffer_position()))?;
                match stack.last_mut() {
                    Some((_, buffer)) => buffer.push_str(&text),
                    None => {
                        return Err(Error::MalformedPayload(format!(
                            "{} document has text outside the root element",
                            document.name()
                        )));
                    }
                }
            }
            Event::CData(e) => {
                if let Some((_, buffer)) = stack.last_mut() {
                    buffer.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Event::End(_) => {
                if let Some((_, text)) = stack.last() {
                    let value = text.trim().to_string();
                    record(&stack, &value);
                }
                stack.pop();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some((name, _)) = stack.last() {
        return Err(Error::MalformedPayload(format!(
            "{} document ends inside element <{}>",
            document.name(),
            name
        )));
    }
    if !seen_root {
        return Err(Error::MalformedPayload(format!(
            "{} document has no root element",
            document.name()
        )));
    }

    let mut fields = EgkCardData::new();
    for ((field, _), found) in paths.iter().zip(matches) {
        if let Some(value) = found.into_iter().flatten().next() {
            fields.set(*field, value);
        }
    }
    Ok(fields)
}

fn path_ends_with(stack: &[(String, String)], suffix: &[&str]) -> bool {
    stack.len() >= suffix.len()
        && stack[stack.len() - suffix.len()..]
            .iter()
            .zip(suffix)
            .all(|((name, _), expected)| name == expected)
}

/// Inflate, decode and extract one compressed document
///
/// # Errors
///
/// Returns [`Error::DecompressionError`] if the record cannot be inflated
/// and [`Error::MalformedPayload`] if the document is not well-formed.
pub fn extract(document: Document, compressed: &[u8]) -> Result<Extracted> {
    let inflated = inflate(compressed)?;
    let xml = decode_text(&inflated);
    let fields = extract_fields(document, &xml)?;

    debug!(
        "Extracted {} fields from {} document ({} chars)",
        fields.to_map().len(),
        document.name(),
        xml.len()
    );
    Ok(Extracted { xml, fields })
}
