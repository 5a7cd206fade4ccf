//! CAN-ID decomposition
//!
//! J1939 packs priority, parameter group and addressing into the 29-bit
//! extended identifier:
//!
//! ```text
//!  28..26    25    24    23..16   15..8   7..0
//! priority   EDP   DP      PF       PS     SA
//! ```
//!
//! The split is a pure function of the numeric ID; there is no fallible path.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::ConstructionError;

pub const ARBITRATION_ID_MASK: u32 = 0x1FFF_FFFF;
/// Largest 11-bit standard identifier
pub const STANDARD_ID_MASK: u32 = 0x7FF;
/// Hex digits candump writes for a standard identifier
pub const STANDARD_ID_DIGITS: usize = 3;
pub const PRIORITY_MASK: u32 = 0x1C00_0000;
pub const PRIORITY_SHIFT: u32 = 26;
pub const EXTENDED_DATA_PAGE_BIT: u32 = 1 << 25;
pub const DATA_PAGE_BIT: u32 = 1 << 24;
pub const PDU_FORMAT_MASK: u32 = 0x00FF_0000;
pub const PDU_FORMAT_SHIFT: u32 = 16;
pub const PDU_SPECIFIC_MASK: u32 = 0x0000_FF00;
pub const PDU_SPECIFIC_SHIFT: u32 = 8;
pub const SOURCE_ADDRESS_MASK: u32 = 0x0000_00FF;

/// PDU format values at or above this are PDU2 (broadcast)
pub const PDU2_THRESHOLD: u8 = 240;

/// Spec type tag for J1939 spec sources
pub const SPEC_TYPE_J1939: &str = "j1939";

/// The individual fields of a J1939 arbitration ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct J1939Id {
    pub priority: u8,
    pub extended_data_page: bool,
    pub data_page: bool,
    pub pdu_format: u8,
    pub pdu_specific: u8,
    pub source_address: u8,
}

impl J1939Id {
    /// Split an arbitration ID into its J1939 fields (bits above 28 are ignored)
    pub fn from_raw(arbitration_id: u32) -> Self {
        let id = arbitration_id & ARBITRATION_ID_MASK;
        Self {
            priority: ((id & PRIORITY_MASK) >> PRIORITY_SHIFT) as u8,
            extended_data_page: id & EXTENDED_DATA_PAGE_BIT != 0,
            data_page: id & DATA_PAGE_BIT != 0,
            pdu_format: ((id & PDU_FORMAT_MASK) >> PDU_FORMAT_SHIFT) as u8,
            pdu_specific: ((id & PDU_SPECIFIC_MASK) >> PDU_SPECIFIC_SHIFT) as u8,
            source_address: (id & SOURCE_ADDRESS_MASK) as u8,
        }
    }

    /// PDU2 frames are broadcast and carry a group extension in PS
    pub fn is_pdu2(&self) -> bool {
        self.pdu_format >= PDU2_THRESHOLD
    }

    pub fn pgn(&self) -> u32 {
        let dp = u32::from(self.data_page);
        let pf = u32::from(self.pdu_format);
        if self.is_pdu2() {
            (dp << 16) | (pf << 8) | u32::from(self.pdu_specific)
        } else {
            (dp << 16) | (pf << 8)
        }
    }

    /// PS holds the destination address for PDU1 frames only
    pub fn destination_address(&self) -> Option<u8> {
        if self.is_pdu2() {
            None
        } else {
            Some(self.pdu_specific)
        }
    }
}

/// Addressing information shared by every protocol variant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameAddress {
    pub priority: u8,
    pub pgn: u32,
    pub source_address: u8,
    pub destination_address: Option<u8>,
}

impl From<J1939Id> for FrameAddress {
    fn from(id: J1939Id) -> Self {
        Self {
            priority: id.priority,
            pgn: id.pgn(),
            source_address: id.source_address,
            destination_address: id.destination_address(),
        }
    }
}

/// Supported addressing/decoding schemes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    J1939,
}

impl Protocol {
    /// Split an arbitration ID into the addressing fields of this protocol
    pub fn decompose(self, arbitration_id: u32) -> FrameAddress {
        match self {
            Protocol::J1939 => J1939Id::from_raw(arbitration_id).into(),
        }
    }
}

/// Tag identifying which protocol a spec source describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecType {
    J1939,
}

impl SpecType {
    pub fn protocol(self) -> Protocol {
        match self {
            SpecType::J1939 => Protocol::J1939,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            SpecType::J1939 => SPEC_TYPE_J1939,
        }
    }
}

impl fmt::Display for SpecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

impl FromStr for SpecType {
    type Err = ConstructionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            SPEC_TYPE_J1939 => Ok(SpecType::J1939),
            _ => Err(ConstructionError::UnknownSpecType(s.to_string())),
        }
    }
}
