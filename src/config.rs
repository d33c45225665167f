//! Harness configuration.
//!
//! Read from a JSON file, `~/.loramote/config.json` by default. Every field
//! has a default, so a missing file or a partial one is fine until a mode
//! needs the device identities:
//!
//! ```json
//! {
//!   "mote": { "address": "auto", "baud": 57600, "timeout": 500 },
//!   "lora": {
//!     "deveui": "0004A30B001A2B3C",
//!     "appeui": "70B3D57ED0000000",
//!     "appkey": "2B7E151628AED2A6ABF7158809CF4F3C"
//!   },
//!   "gateway": {
//!     "frequency": 868100000, "sf": 7, "bandwidth": 125,
//!     "codingrate": 5, "crc": true, "power": 14
//!   }
//! }
//! ```

use crate::ddr::Location;
use crate::mac::{find_serial_port, Band, DataRate, PowerIndex, MAX_DATA_RATE};
use crate::session::BootstrapConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use zeroize::Zeroizing;

/// `mote.address` value asking for serial port auto-detection.
pub const AUTO_ADDRESS: &str = "auto";

/// RN2483 factory baud rate.
pub const DEFAULT_BAUD: u32 = 57_600;

/// Per-read serial timeout in milliseconds.
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 500;

/// Length of a device or application EUI in hex digits.
pub const EUI_HEX_LEN: usize = 16;

/// Length of the application key in hex digits.
pub const APP_KEY_HEX_LEN: usize = 32;

/// The eight default EU868 channels (Hz).
pub const EU868_FREQUENCIES: [u32; 8] = [
    868_100_000,
    868_300_000,
    868_500_000,
    867_100_000,
    867_300_000,
    867_500_000,
    867_700_000,
    867_900_000,
];

/// Radio bandwidths the modem supports (kHz).
pub const BANDWIDTHS: [u16; 3] = [125, 250, 500];

const REDACTED: &str = "********";

/// Serial link to the modem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MoteConfig {
    /// Serial device path, or `"auto"`.
    pub address: String,
    pub baud: u32,
    /// Per-read timeout in milliseconds.
    pub timeout: u64,
}

impl Default for MoteConfig {
    fn default() -> Self {
        Self {
            address: AUTO_ADDRESS.to_string(),
            baud: DEFAULT_BAUD,
            timeout: DEFAULT_READ_TIMEOUT_MS,
        }
    }
}

/// OTAA identities and key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoraConfig {
    pub deveui: String,
    pub appeui: String,
    pub appkey: Zeroizing<String>,
}

impl Default for LoraConfig {
    fn default() -> Self {
        Self {
            deveui: String::new(),
            appeui: String::new(),
            appkey: Zeroizing::new(String::new()),
        }
    }
}

impl fmt::Debug for LoraConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoraConfig")
            .field("deveui", &self.deveui)
            .field("appeui", &self.appeui)
            .field("appkey", &REDACTED)
            .finish()
    }
}

impl LoraConfig {
    /// Check EUIs and key are hex of the right length.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_hex("lora.deveui", &self.deveui, EUI_HEX_LEN)?;
        check_hex("lora.appeui", &self.appeui, EUI_HEX_LEN)?;
        check_hex("lora.appkey", &self.appkey, APP_KEY_HEX_LEN)
    }
}

/// Raw radio settings for the gateway listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Centre frequency in Hz.
    pub frequency: u32,
    /// Spreading factor (7..=12).
    pub sf: u8,
    /// Bandwidth in kHz.
    pub bandwidth: u16,
    /// Coding rate denominator (5 = 4/5).
    pub codingrate: u8,
    pub crc: bool,
    /// Transmit power in dBm.
    pub power: i8,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            frequency: EU868_FREQUENCIES[0],
            sf: 7,
            bandwidth: 125,
            codingrate: 5,
            crc: true,
            power: 14,
        }
    }
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !EU868_FREQUENCIES.contains(&self.frequency) {
            return Err(ConfigError::out_of_range(
                "gateway.frequency",
                self.frequency,
                "one of the eight EU868 channels",
            ));
        }
        if !(7..=12).contains(&self.sf) {
            return Err(ConfigError::out_of_range("gateway.sf", self.sf, "7..=12"));
        }
        if !BANDWIDTHS.contains(&self.bandwidth) {
            return Err(ConfigError::out_of_range(
                "gateway.bandwidth",
                self.bandwidth,
                "125, 250 or 500",
            ));
        }
        if !(5..=8).contains(&self.codingrate) {
            return Err(ConfigError::out_of_range(
                "gateway.codingrate",
                self.codingrate,
                "5..=8",
            ));
        }
        if !(2..=14).contains(&self.power) {
            return Err(ConfigError::out_of_range("gateway.power", self.power, "2..=14"));
        }
        Ok(())
    }
}

/// Complete configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mote: MoteConfig,
    pub lora: LoraConfig,
    pub gateway: GatewayConfig,
}

impl Config {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(text) => Self::from_json(&text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(ConfigError::Parse)
    }

    /// Pretty JSON with the application key masked.
    pub fn to_redacted_json(&self) -> Result<String, ConfigError> {
        let mut shown = self.clone();
        if !shown.lora.appkey.is_empty() {
            shown.lora.appkey = Zeroizing::new(REDACTED.to_string());
        }
        serde_json::to_string_pretty(&shown).map_err(ConfigError::Parse)
    }

    /// Serial device to open, detecting one when the address is `"auto"`.
    pub fn serial_port(&self) -> Result<String, ConfigError> {
        if self.mote.address != AUTO_ADDRESS {
            return Ok(self.mote.address.clone());
        }
        find_serial_port().ok_or(ConfigError::NoSerialPort)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.mote.timeout)
    }

    /// Bootstrap settings for a run starting at `data_rate`.
    ///
    /// The ADR flag is left off; the mode decides it.
    pub fn bootstrap(&self, data_rate: DataRate) -> Result<BootstrapConfig, ConfigError> {
        self.lora.validate()?;
        Ok(BootstrapConfig {
            band: Band::default(),
            device_eui: self.lora.deveui.to_ascii_uppercase(),
            application_eui: self.lora.appeui.to_ascii_uppercase(),
            application_key: Zeroizing::new(self.lora.appkey.to_ascii_uppercase()),
            data_rate,
            power: PowerIndex::DBM14,
            adr: false,
        })
    }
}

/// Default configuration path: `~/.loramote/config.json`.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let home = std::env::var("HOME").map_err(|_| ConfigError::HomeNotSet)?;
    Ok(PathBuf::from(home).join(".loramote").join("config.json"))
}

/// Validate a data-rate index given on the command line.
pub fn data_rate(index: u8) -> Result<DataRate, ConfigError> {
    DataRate::new(index).ok_or_else(|| {
        ConfigError::out_of_range("data rate", index, format!("0..={}", MAX_DATA_RATE))
    })
}

/// Validate a position given on the command line.
pub fn location(latitude: f64, longitude: f64) -> Result<Location, ConfigError> {
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(ConfigError::out_of_range("latitude", latitude, "-90..=90"));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(ConfigError::out_of_range("longitude", longitude, "-180..=180"));
    }
    Ok(Location::new(latitude, longitude))
}

fn check_hex(field: &'static str, value: &str, len: usize) -> Result<(), ConfigError> {
    if value.len() != len || hex::decode(value).is_err() {
        return Err(ConfigError::InvalidHex { field, len });
    }
    Ok(())
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// The configuration file exists but could not be read.
    Read { path: PathBuf, source: io::Error },
    /// The file is not valid configuration JSON.
    Parse(serde_json::Error),
    /// HOME is not set, so there is no default path.
    HomeNotSet,
    /// `"auto"` address and no serial device was found.
    NoSerialPort,
    /// A hex field is missing, has the wrong length or is not hex.
    InvalidHex { field: &'static str, len: usize },
    /// A value is outside what the device accepts.
    OutOfRange {
        field: &'static str,
        value: String,
        allowed: String,
    },
}

impl ConfigError {
    fn out_of_range(
        field: &'static str,
        value: impl fmt::Display,
        allowed: impl Into<String>,
    ) -> Self {
        Self::OutOfRange {
            field,
            value: value.to_string(),
            allowed: allowed.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read { path, source } => {
                write!(f, "cannot read {}: {}", path.display(), source)
            }
            Self::Parse(e) => write!(f, "invalid configuration: {}", e),
            Self::HomeNotSet => write!(f, "HOME not set"),
            Self::NoSerialPort => write!(f, "no serial device found, set mote.address"),
            Self::InvalidHex { field, len } => {
                write!(f, "{} must be {} hex digits", field, len)
            }
            Self::OutOfRange {
                field,
                value,
                allowed,
            } => write!(f, "{} {} out of range ({})", field, value, allowed),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Read { source, .. } => Some(source),
            Self::Parse(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::atomic::{AtomicU32, Ordering};

    static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

    fn unique_config_path() -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let pid = std::process::id();
        env::temp_dir().join(format!("loramote-test-{}-{}.json", pid, id))
    }

    const FULL: &str = r#"{
        "mote": { "address": "/dev/ttyUSB3", "baud": 115200, "timeout": 250 },
        "lora": {
            "deveui": "0004a30b001a2b3c",
            "appeui": "70B3D57ED0000000",
            "appkey": "2B7E151628AED2A6ABF7158809CF4F3C"
        },
        "gateway": { "frequency": 867500000, "sf": 9 }
    }"#;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.mote.address, "auto");
        assert_eq!(config.mote.baud, 57_600);
        assert_eq!(config.read_timeout(), Duration::from_millis(500));
        assert_eq!(config.gateway.frequency, 868_100_000);
        assert!(config.gateway.validate().is_ok());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let path = unique_config_path();
        assert_eq!(Config::load(&path).unwrap(), Config::default());
    }

    #[test]
    fn test_load_partial_file() {
        let path = unique_config_path();
        fs::write(&path, FULL).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.serial_port().unwrap(), "/dev/ttyUSB3");
        assert_eq!(config.mote.baud, 115_200);
        assert_eq!(config.gateway.sf, 9);
        assert_eq!(config.gateway.bandwidth, 125);
        assert!(config.lora.validate().is_ok());

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_invalid_json_is_rejected() {
        let err = Config::from_json("{ \"mote\": 3 }").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_bootstrap_requires_identities() {
        let err = Config::default().bootstrap(DataRate::DR0).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidHex {
                field: "lora.deveui",
                ..
            }
        ));

        let mut config = Config::from_json(FULL).unwrap();
        config.lora.appkey = Zeroizing::new("2B7E15".to_string());
        assert!(matches!(
            config.bootstrap(DataRate::DR0),
            Err(ConfigError::InvalidHex {
                field: "lora.appkey",
                len: 32
            })
        ));

        config.lora.appkey = Zeroizing::new("zz7E151628AED2A6ABF7158809CF4F3C".to_string());
        assert!(config.bootstrap(DataRate::DR0).is_err());
    }

    #[test]
    fn test_bootstrap_from_file() {
        let config = Config::from_json(FULL).unwrap();
        let bootstrap = config.bootstrap(DataRate::DR3).unwrap();
        assert_eq!(bootstrap.device_eui, "0004A30B001A2B3C");
        assert_eq!(bootstrap.data_rate, DataRate::DR3);
        assert_eq!(bootstrap.power, PowerIndex::DBM14);
        assert!(!bootstrap.adr);
    }

    #[test]
    fn test_redacted_output() {
        let config = Config::from_json(FULL).unwrap();
        let json = config.to_redacted_json().unwrap();
        assert!(!json.contains("2B7E1516"));
        assert!(json.contains(REDACTED));
        assert!(!format!("{:?}", config).contains("2B7E1516"));
    }

    #[test]
    fn test_gateway_validation() {
        let valid = GatewayConfig::default();
        let cases = [
            GatewayConfig {
                frequency: 869_000_000,
                ..valid.clone()
            },
            GatewayConfig {
                sf: 6,
                ..valid.clone()
            },
            GatewayConfig {
                bandwidth: 200,
                ..valid.clone()
            },
            GatewayConfig {
                codingrate: 9,
                ..valid.clone()
            },
            GatewayConfig {
                power: 15,
                ..valid.clone()
            },
        ];
        for case in cases {
            assert!(case.validate().is_err(), "{:?}", case);
        }
    }

    #[test]
    fn test_command_line_values() {
        assert_eq!(data_rate(5).unwrap(), DataRate::DR5);
        assert_eq!(
            data_rate(6).unwrap_err().to_string(),
            "data rate 6 out of range (0..=5)"
        );
        assert!(location(45.0, -73.0).is_ok());
        assert!(location(91.0, 0.0).is_err());
        assert!(location(0.0, -180.5).is_err());
    }
}
