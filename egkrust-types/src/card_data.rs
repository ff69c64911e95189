//! Card data structures

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;

use crate::field::Field;

/// Data read from an eGK
///
/// Every field is optional: a missing file or element leaves it `None`,
/// while an element that is present but empty yields `Some("")`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EgkCardData {
    /// Answer to reset, upper-case hex
    pub atr: Option<String>,

    /// Card generation (`G1`, `G1plus`, `G2`, `G2.1` or the raw version)
    pub card_generation: Option<String>,

    /// Schema version of the insurance data (`X.Y.Z`)
    pub schema_version: Option<String>,

    pub surname: Option<String>,
    pub first_name: Option<String>,

    /// Birth date as stored on the card (`YYYYMMDD`)
    pub birth_date: Option<String>,

    pub gender: Option<String>,
    pub title: Option<String>,
    pub name_prefix: Option<String>,
    pub name_suffix: Option<String>,

    pub street: Option<String>,
    pub house_number: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub country_code: Option<String>,
    pub address_supplement: Option<String>,

    /// Unchangeable part of the insured person's ID (Versicherten_ID)
    pub insured_id: Option<String>,
    pub insurance_number: Option<String>,

    /// Institution code (IK) of the paying insurer
    pub payer_id: Option<String>,
    pub payer_name: Option<String>,
    pub payer_country_code: Option<String>,
    pub insured_type: Option<String>,
    pub status_supplement: Option<String>,

    /// Start of coverage (`YYYYMMDD`)
    pub valid_from: Option<String>,

    /// End of coverage (`YYYYMMDD`)
    pub valid_to: Option<String>,

    /// Decompressed patient data document
    pub raw_patient_xml: Option<String>,

    /// Decompressed insurance data document
    pub raw_insurance_xml: Option<String>,
}

impl EgkCardData {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, field: Field) -> &Option<String> {
        match field {
            Field::Atr => &self.atr,
            Field::CardGeneration => &self.card_generation,
            Field::SchemaVersion => &self.schema_version,
            Field::Surname => &self.surname,
            Field::FirstName => &self.first_name,
            Field::BirthDate => &self.birth_date,
            Field::Gender => &self.gender,
            Field::Title => &self.title,
            Field::NamePrefix => &self.name_prefix,
            Field::NameSuffix => &self.name_suffix,
            Field::Street => &self.street,
            Field::HouseNumber => &self.house_number,
            Field::PostalCode => &self.postal_code,
            Field::City => &self.city,
            Field::CountryCode => &self.country_code,
            Field::AddressSupplement => &self.address_supplement,
            Field::InsuredId => &self.insured_id,
            Field::InsuranceNumber => &self.insurance_number,
            Field::PayerId => &self.payer_id,
            Field::PayerName => &self.payer_name,
            Field::PayerCountryCode => &self.payer_country_code,
            Field::InsuredType => &self.insured_type,
            Field::StatusSupplement => &self.status_supplement,
            Field::ValidFrom => &self.valid_from,
            Field::ValidTo => &self.valid_to,
            Field::RawPatientXml => &self.raw_patient_xml,
            Field::RawInsuranceXml => &self.raw_insurance_xml,
        }
    }

    fn slot_mut(&mut self, field: Field) -> &mut Option<String> {
        match field {
            Field::Atr => &mut self.atr,
            Field::CardGeneration => &mut self.card_generation,
            Field::SchemaVersion => &mut self.schema_version,
            Field::Surname => &mut self.surname,
            Field::FirstName => &mut self.first_name,
            Field::BirthDate => &mut self.birth_date,
            Field::Gender => &mut self.gender,
            Field::Title => &mut self.title,
            Field::NamePrefix => &mut self.name_prefix,
            Field::NameSuffix => &mut self.name_suffix,
            Field::Street => &mut self.street,
            Field::HouseNumber => &mut self.house_number,
            Field::PostalCode => &mut self.postal_code,
            Field::City => &mut self.city,
            Field::CountryCode => &mut self.country_code,
            Field::AddressSupplement => &mut self.address_supplement,
            Field::InsuredId => &mut self.insured_id,
            Field::InsuranceNumber => &mut self.insurance_number,
            Field::PayerId => &mut self.payer_id,
            Field::PayerName => &mut self.payer_name,
            Field::PayerCountryCode => &mut self.payer_country_code,
            Field::InsuredType => &mut self.insured_type,
            Field::StatusSupplement => &mut self.status_supplement,
            Field::ValidFrom => &mut self.valid_from,
            Field::ValidTo => &mut self.valid_to,
            Field::RawPatientXml => &mut self.raw_patient_xml,
            Field::RawInsuranceXml => &mut self.raw_insurance_xml,
        }
    }

    /// Get a field value
    pub fn get(&self, field: Field) -> Option<&str> {
        self.slot(field).as_deref()
    }

    /// Set a field value
    pub fn set(&mut self, field: Field, value: impl Into<String>) {
        *self.slot_mut(field) = Some(value.into());
    }

    /// Clear a field value
    pub fn clear(&mut self, field: Field) {
        *self.slot_mut(field) = None;
    }

    /// Copy every present field of `other` into this record
    pub fn merge(&mut self, other: EgkCardData) {
        let mut other = other;
        for field in Field::ALL {
            if let Some(value) = other.slot_mut(field).take() {
                *self.slot_mut(field) = Some(value);
            }
        }
    }

    /// Check if no field is present
    pub fn is_empty(&self) -> bool {
        Field::ALL.iter().all(|field| self.slot(*field).is_none())
    }

    /// Field name to value, absent fields omitted
    pub fn to_map(&self) -> BTreeMap<&'static str, String> {
        Field::ALL
            .iter()
            .filter_map(|field| self.get(*field).map(|v| (field.name(), v.to_string())))
            .collect()
    }

    /// Birth date as a calendar date
    pub fn birth_date(&self) -> Option<NaiveDate> {
        parse_card_date(self.birth_date.as_deref()?)
    }

    /// Start of coverage as a calendar date
    pub fn valid_from(&self) -> Option<NaiveDate> {
        parse_card_date(self.valid_from.as_deref()?)
    }

    /// End of coverage as a calendar date
    pub fn valid_to(&self) -> Option<NaiveDate> {
        parse_card_date(self.valid_to.as_deref()?)
    }

    /// Check if insurance coverage includes `date`
    ///
    /// An open end date counts as unlimited coverage. Returns `None` when
    /// the start date is unknown.
    pub fn is_covered_on(&self, date: NaiveDate) -> Option<bool> {
        let from = self.valid_from()?;
        let covered = date >= from && self.valid_to().is_none_or(|to| date <= to);
        Some(covered)
    }
}

/// Parse a card date in `YYYYMMDD` form
pub fn parse_card_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y%m%d").ok()
}

impl fmt::Display for EgkCardData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unknown = "?";
        write!(
            f,
            "eGK[{} {}, born {}, insurance no. {}, payer {}, generation {}]",
            self.first_name.as_deref().unwrap_or(unknown),
            self.surname.as_deref().unwrap_or(unknown),
            self.birth_date.as_deref().unwrap_or(unknown),
            self.insurance_number.as_deref().unwrap_or(unknown),
            self.payer_id.as_deref().unwrap_or(unknown),
            self.card_generation.as_deref().unwrap_or(unknown),
        )
    }
}
