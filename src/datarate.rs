//! Spreading factor to data-rate index mapping.
//!
//! The network names rates by spreading factor ("7".."12"); the modem takes
//! a data-rate index where a higher spreading factor means a lower index:
//!
//! | Spreading factor | Data-rate index |
//! |------------------|-----------------|
//! | 12 | 0 |
//! | 11 | 1 |
//! | 10 | 2 |
//! | 9  | 3 |
//! | 8  | 4 |
//! | 7  | 5 |

use crate::mac::DataRate;
use std::fmt;
use std::str::FromStr;

/// LoRa spreading factor at 125 kHz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpreadingFactor {
    Sf7,
    Sf8,
    Sf9,
    Sf10,
    Sf11,
    Sf12,
}

impl SpreadingFactor {
    /// All spreading factors, fastest first.
    pub const ALL: [SpreadingFactor; 6] = [
        Self::Sf7,
        Self::Sf8,
        Self::Sf9,
        Self::Sf10,
        Self::Sf11,
        Self::Sf12,
    ];

    /// Numeric spreading factor (7..=12).
    pub fn value(self) -> u8 {
        match self {
            Self::Sf7 => 7,
            Self::Sf8 => 8,
            Self::Sf9 => 9,
            Self::Sf10 => 10,
            Self::Sf11 => 11,
            Self::Sf12 => 12,
        }
    }

    /// Transceiver data-rate index for this spreading factor.
    pub fn data_rate(self) -> DataRate {
        match self {
            Self::Sf12 => DataRate::DR0,
            Self::Sf11 => DataRate::DR1,
            Self::Sf10 => DataRate::DR2,
            Self::Sf9 => DataRate::DR3,
            Self::Sf8 => DataRate::DR4,
            Self::Sf7 => DataRate::DR5,
        }
    }

    /// Spreading factor selected by a data-rate index.
    pub fn from_data_rate(data_rate: DataRate) -> Self {
        Self::ALL[usize::from(5 - data_rate.index())]
    }
}

impl fmt::Display for SpreadingFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SF{}", self.value())
    }
}

/// Label that is not one of "7".."12".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSpreadingFactor(pub String);

impl fmt::Display for UnknownSpreadingFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown spreading factor '{}'", self.0)
    }
}

impl std::error::Error for UnknownSpreadingFactor {}

impl FromStr for SpreadingFactor {
    type Err = UnknownSpreadingFactor;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "7" => Ok(Self::Sf7),
            "8" => Ok(Self::Sf8),
            "9" => Ok(Self::Sf9),
            "10" => Ok(Self::Sf10),
            "11" => Ok(Self::Sf11),
            "12" => Ok(Self::Sf12),
            _ => Err(UnknownSpreadingFactor(s.to_string())),
        }
    }
}

/// Resolve a spreading-factor label to a data-rate index.
///
/// `None` means "no change": unknown labels never select a rate.
pub fn resolve(label: &str) -> Option<DataRate> {
    label.parse::<SpreadingFactor>().ok().map(SpreadingFactor::data_rate)
}
