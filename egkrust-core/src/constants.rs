//! Protocol constants

/// Class byte of interindustry commands
pub const CLA_ISO: u8 = 0x00;

/// Class byte of CT-BCS commands addressed to the card terminal
pub const CLA_CTBCS: u8 = 0x20;

/// Default REQUEST ICC / EJECT ICC wait time (seconds)
pub const DEFAULT_WAIT_SECONDS: u8 = 5;

/// Largest chunk a short READ BINARY can request
pub const MAX_SHORT_CHUNK: usize = 256;

/// Largest offset encodable in P1-P2 of READ BINARY
pub const MAX_BINARY_OFFSET: usize = 0x7FFF;

/// Application identifiers
pub mod aid {
    /// eGK root application (MF)
    pub const ROOT: &[u8] = &[0xD2, 0x76, 0x00, 0x01, 0x44, 0x80, 0x00];

    /// Health care application (DF.HCA)
    pub const HCA: &[u8] = &[0xD2, 0x76, 0x00, 0x00, 0x01, 0x02];
}

/// Short file identifiers
pub mod sfi {
    /// EF.ATR below the root (buffer sizes)
    pub const EF_ATR: u8 = 0x1D;

    /// EF.Version below the root (record based)
    pub const EF_VERSION: u8 = 0x10;

    /// EF.StatusVD (update status, schema version)
    pub const EF_STATUS_VD: u8 = 0x0C;

    /// EF.PD in DF.HCA (patient data)
    pub const EF_PD: u8 = 0x01;

    /// EF.VD in DF.HCA (insurance data)
    pub const EF_VD: u8 = 0x02;
}

/// CT-BCS terminal command parameters
pub mod ctbcs {
    /// Functional unit: card terminal
    pub const UNIT_CT: u8 = 0x00;

    /// Functional unit: first card slot
    pub const UNIT_ICC1: u8 = 0x01;

    /// REQUEST ICC P2: return the complete ATR
    pub const RETURN_FULL_ATR: u8 = 0x01;
}

/// EF.Version record holding the card generation
pub const VERSION_RECORD: u8 = 2;

/// Bytes requested from EF.StatusVD
pub const STATUS_VD_LEN: usize = 25;

/// Size of the EF.PD length header
pub const PD_HEADER_LEN: usize = 2;

/// Size of the EF.VD offset block
pub const VD_HEADER_LEN: usize = 8;
