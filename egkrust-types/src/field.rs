//! Output field names
//!
//! Every value a card read can produce has a fixed, camelCase name. The names
//! are part of the public output contract (see [`crate::EgkCardData::to_map`]).

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// A named field of [`crate::EgkCardData`]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    // Card metadata
    Atr,
    CardGeneration,
    SchemaVersion,

    // Patient data (PD), person
    Surname,
    FirstName,
    BirthDate,
    Gender,
    Title,
    NamePrefix,
    NameSuffix,

    // Patient data (PD), address
    Street,
    HouseNumber,
    PostalCode,
    City,
    CountryCode,
    AddressSupplement,

    // Insurance data (VD)
    InsuredId,
    InsuranceNumber,
    PayerId,
    PayerName,
    PayerCountryCode,
    InsuredType,
    StatusSupplement,
    ValidFrom,
    ValidTo,

    // Raw documents
    RawPatientXml,
    RawInsuranceXml,
}

impl Field {
    /// All fields in output order
    pub const ALL: [Field; 27] = [
        Self::Atr,
        Self::CardGeneration,
        Self::SchemaVersion,
        Self::Surname,
        Self::FirstName,
        Self::BirthDate,
        Self::Gender,
        Self::Title,
        Self::NamePrefix,
        Self::NameSuffix,
        Self::Street,
        Self::HouseNumber,
        Self::PostalCode,
        Self::City,
        Self::CountryCode,
        Self::AddressSupplement,
        Self::InsuredId,
        Self::InsuranceNumber,
        Self::PayerId,
        Self::PayerName,
        Self::PayerCountryCode,
        Self::InsuredType,
        Self::StatusSupplement,
        Self::ValidFrom,
        Self::ValidTo,
        Self::RawPatientXml,
        Self::RawInsuranceXml,
    ];

    /// Get the output name of this field
    pub fn name(self) -> &'static str {
        match self {
            Self::Atr => "ATR",
            Self::CardGeneration => "cardGeneration",
            Self::SchemaVersion => "schemaVersion",
            Self::Surname => "surname",
            Self::FirstName => "firstName",
            Self::BirthDate => "birthDate",
            Self::Gender => "gender",
            Self::Title => "title",
            Self::NamePrefix => "namePrefix",
            Self::NameSuffix => "nameSuffix",
            Self::Street => "street",
            Self::HouseNumber => "houseNumber",
            Self::PostalCode => "postalCode",
            Self::City => "city",
            Self::CountryCode => "countryCode",
            Self::AddressSupplement => "addressSupplement",
            Self::InsuredId => "insuredId",
            Self::InsuranceNumber => "insuranceNumber",
            Self::PayerId => "payerId",
            Self::PayerName => "payerName",
            Self::PayerCountryCode => "payerCountryCode",
            Self::InsuredType => "insuredType",
            Self::StatusSupplement => "statusSupplement",
            Self::ValidFrom => "validFrom",
            Self::ValidTo => "validTo",
            Self::RawPatientXml => "rawPatientXml",
            Self::RawInsuranceXml => "rawInsuranceXml",
        }
    }

    /// Check if the field is filled from the patient data file (EF.PD)
    pub fn is_patient_field(self) -> bool {
        matches!(
            self,
            Self::Surname
                | Self::FirstName
                | Self::BirthDate
                | Self::Gender
                | Self::Title
                | Self::NamePrefix
                | Self::NameSuffix
                | Self::Street
                | Self::HouseNumber
                | Self::PostalCode
                | Self::City
                | Self::CountryCode
                | Self::AddressSupplement
                | Self::InsuredId
                | Self::RawPatientXml
        )
    }

    /// Check if the field is filled from the insurance data file (EF.VD)
    pub fn is_insurance_field(self) -> bool {
        matches!(
            self,
            Self::InsuranceNumber
                | Self::PayerId
                | Self::PayerName
                | Self::PayerCountryCode
                | Self::InsuredType
                | Self::StatusSupplement
                | Self::ValidFrom
                | Self::ValidTo
                | Self::RawInsuranceXml
        )
    }
}

impl FromStr for Field {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|field| field.name() == s)
            .ok_or_else(|| Error::UnknownField(s.to_string()))
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_name_roundtrip() {
        for field in Field::ALL {
            assert_eq!(field.name().parse::<Field>().unwrap(), field);
        }
    }

    #[test]
    fn test_unknown_field() {
        assert!(matches!(
            "nachname".parse::<Field>(),
            Err(Error::UnknownField(_))
        ));
    }

    #[test]
    fn test_field_origin() {
        assert!(Field::Surname.is_patient_field());
        assert!(!Field::Surname.is_insurance_field());
        assert!(Field::ValidTo.is_insurance_field());
        assert!(!Field::Atr.is_patient_field());
        assert!(!Field::Atr.is_insurance_field());
    }
}
