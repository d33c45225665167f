//! LoRaMote field-trial harness library.
//!
//! Drives a LoRaWAN end device (a Microchip RN2483 on a serial port) through
//! data-rate test runs: network-managed ADR, or DDR where the application
//! server tells the device which spreading factor to use. Everything except
//! the serial driver can be tested on the host with a simulated device.

pub mod config;
pub mod datarate;
pub mod ddr;
pub mod gateway;
pub mod logger;
pub mod mac;
pub mod modes;
pub mod scheduler;
pub mod session;

// Re-export commonly used items
pub use config::{Config, ConfigError};
pub use datarate::SpreadingFactor;
pub use ddr::{DdrCommand, Location};
pub use logger::{LogFacade, Logger, SharedLogger};
pub use mac::{DataRate, Downlink, MacDevice, MacError, RadioDevice, Rn2483};
pub use modes::{run_test, Mode, TestRun};
pub use scheduler::{RunSummary, UplinkScheduler};
pub use session::{BootstrapConfig, Session, SessionError};
