//! LoRaWAN MAC capability surface.
//!
//! This module contains:
//! - [`MacDevice`]: the blocking MAC operations the harness consumes
//! - [`RadioDevice`]: raw radio operations used by the gateway listener
//! - [`Rn2483`]: both capabilities implemented over the RN2483 ASCII protocol
//!
//! Transmit does not take a receive callback: the downlink that arrived in
//! the receive windows of an uplink, if any, is returned to the caller.

mod rn2483;
#[cfg(test)]
pub(crate) mod sim;

pub use rn2483::{find_serial_port, Rn2483, JOIN_RESPONSE_TIMEOUT, TX_RESPONSE_TIMEOUT};

use std::fmt;
use std::io;

/// Highest data-rate index the harness will request.
pub const MAX_DATA_RATE: u8 = 5;

/// Frequency band the MAC is reset to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    /// EU 433 MHz band
    Eu433,
    /// EU 863-870 MHz band
    Eu868,
}

impl Band {
    /// Band argument of `mac reset`.
    pub fn mhz(self) -> u16 {
        match self {
            Self::Eu433 => 433,
            Self::Eu868 => 868,
        }
    }
}

impl Default for Band {
    fn default() -> Self {
        #[cfg(feature = "band-eu433")]
        return Self::Eu433;
        #[cfg(not(feature = "band-eu433"))]
        Self::Eu868
    }
}

/// Transceiver data-rate index (0 = SF12/125 kHz .. 5 = SF7/125 kHz).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DataRate(u8);

impl DataRate {
    /// SF12 / 125 kHz
    pub const DR0: DataRate = DataRate(0);
    /// SF11 / 125 kHz
    pub const DR1: DataRate = DataRate(1);
    /// SF10 / 125 kHz
    pub const DR2: DataRate = DataRate(2);
    /// SF9 / 125 kHz
    pub const DR3: DataRate = DataRate(3);
    /// SF8 / 125 kHz
    pub const DR4: DataRate = DataRate(4);
    /// SF7 / 125 kHz
    pub const DR5: DataRate = DataRate(5);

    /// Create a data rate, rejecting indices above [`MAX_DATA_RATE`].
    pub fn new(index: u8) -> Option<Self> {
        (index <= MAX_DATA_RATE).then_some(Self(index))
    }

    /// The raw index.
    pub fn index(self) -> u8 {
        self.0
    }
}

impl fmt::Display for DataRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transmit power index as understood by `mac set pwridx`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerIndex(pub u8);

impl PowerIndex {
    /// 14 dBm on the 868 MHz band.
    pub const DBM14: PowerIndex = PowerIndex(1);
}

impl fmt::Display for PowerIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Network activation procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinMode {
    /// Over-the-air activation
    Otaa,
    /// Activation by personalisation
    Abp,
}

impl JoinMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Otaa => "otaa",
            Self::Abp => "abp",
        }
    }
}

/// A message received from the network in an uplink's receive windows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downlink {
    /// Application port the network addressed.
    pub port: u8,
    /// Raw application payload.
    pub payload: Vec<u8>,
}

impl Downlink {
    pub fn new(port: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            port,
            payload: payload.into(),
        }
    }
}

/// Blocking MAC operations of a LoRaWAN end device.
pub trait MacDevice {
    /// Acquire the link to the device.
    fn connect(&mut self) -> Result<(), MacError>;

    /// Release the link. Must be safe to call on an unconnected device.
    fn disconnect(&mut self);

    /// Firmware version string.
    fn version(&mut self) -> Result<String, MacError>;

    /// Reset MAC state to band defaults.
    fn mac_reset(&mut self, band: Band) -> Result<(), MacError>;

    fn set_device_eui(&mut self, eui: &str) -> Result<(), MacError>;

    fn set_application_eui(&mut self, eui: &str) -> Result<(), MacError>;

    fn set_application_key(&mut self, key: &str) -> Result<(), MacError>;

    fn set_data_rate(&mut self, data_rate: DataRate) -> Result<(), MacError>;

    fn data_rate(&mut self) -> Result<DataRate, MacError>;

    fn set_power_index(&mut self, power: PowerIndex) -> Result<(), MacError>;

    fn power_index(&mut self) -> Result<PowerIndex, MacError>;

    /// Enable or disable network-managed adaptive data rate.
    fn set_adr(&mut self, enabled: bool) -> Result<(), MacError>;

    fn adr(&mut self) -> Result<bool, MacError>;

    /// Limit `channel` to `percent` of airtime.
    fn set_channel_duty_cycle(&mut self, channel: u8, percent: f32) -> Result<(), MacError>;

    /// Attempt a network join. `Ok(false)` means the network denied it.
    fn join(&mut self, mode: JoinMode) -> Result<bool, MacError>;

    /// Send one uplink and block until the exchange completes.
    ///
    /// Returns the downlink received in the receive windows, if any.
    fn transmit(
        &mut self,
        confirmed: bool,
        port: u8,
        payload: &[u8],
    ) -> Result<Option<Downlink>, MacError>;
}

/// Raw radio operations (MAC paused).
pub trait RadioDevice {
    /// Pause the LoRaWAN stack. Returns how long it stays paused (ms).
    fn pause_mac(&mut self) -> Result<u32, MacError>;

    fn set_frequency(&mut self, hz: u32) -> Result<(), MacError>;

    fn set_spreading_factor(&mut self, sf: u8) -> Result<(), MacError>;

    fn set_bandwidth(&mut self, khz: u16) -> Result<(), MacError>;

    /// Coding rate denominator (5 = 4/5).
    fn set_coding_rate(&mut self, denominator: u8) -> Result<(), MacError>;

    fn set_crc(&mut self, enabled: bool) -> Result<(), MacError>;

    fn set_power(&mut self, dbm: i8) -> Result<(), MacError>;

    /// Bound each `receive` to `ms` milliseconds.
    fn set_watchdog(&mut self, ms: u32) -> Result<(), MacError>;

    /// Listen for one packet. `Ok(None)` when the receive window closed empty.
    fn receive(&mut self) -> Result<Option<Vec<u8>>, MacError>;
}

/// MAC layer errors.
#[derive(Debug)]
pub enum MacError {
    /// The link has not been acquired.
    NotConnected,
    /// Serial I/O failed.
    Io(io::Error),
    /// No reply arrived in time.
    Timeout { command: String },
    /// The device refused the command (`invalid_param`, `busy`, ...).
    Rejected { command: String, reply: String },
    /// The device answered something the protocol does not allow here.
    UnexpectedReply { command: String, reply: String },
    /// An argument cannot be expressed to the device.
    InvalidArgument(String),
}

impl fmt::Display for MacError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "device not connected"),
            Self::Io(e) => write!(f, "serial I/O error: {}", e),
            Self::Timeout { command } => write!(f, "no reply to '{}'", command),
            Self::Rejected { command, reply } => {
                write!(f, "device rejected '{}': {}", command, reply)
            }
            Self::UnexpectedReply { command, reply } => {
                write!(f, "unexpected reply to '{}': {}", command, reply)
            }
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
        }
    }
}

impl std::error::Error for MacError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for MacError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
