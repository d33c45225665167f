//! Device data rate (DDR) negotiation.
//!
//! The device and the network application agree on a data rate over the
//! application payload instead of the LoRaWAN ADR mechanism. Messages are
//! pipe-separated text on the reserved port [`DDR_PORT`]:
//!
//! - uplink `DDR|<latitude>|<longitude>` announces where the device is
//! - downlink `DDR|<sf>` tells the device which spreading factor to use
//!
//! # Example
//!
//! ```
//! use loramote::datarate::SpreadingFactor;
//! use loramote::ddr::DdrCommand;
//! use loramote::mac::Downlink;
//!
//! let cmd = DdrCommand::parse(&Downlink::new(1, b"DDR|9".to_vec()));
//! assert_eq!(cmd, Some(DdrCommand::SetRate(SpreadingFactor::Sf9)));
//!
//! // Same bytes on another port are not a command.
//! assert_eq!(DdrCommand::parse(&Downlink::new(2, b"DDR|9".to_vec())), None);
//! ```

use crate::datarate::SpreadingFactor;
use crate::mac::{Downlink, MacDevice};
use crate::session::Session;

/// Application port reserved for negotiation messages.
pub const DDR_PORT: u8 = 1;

/// Tag opening every negotiation message.
pub const DDR_TAG: &str = "DDR";

const FIELD_SEPARATOR: char = '|';

/// Device position sent in the announcement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Announcement payload: `DDR|<lat>|<lon>` with six decimals.
pub fn announcement(location: Location) -> Vec<u8> {
    format!(
        "{tag}{sep}{:.6}{sep}{:.6}",
        location.latitude,
        location.longitude,
        tag = DDR_TAG,
        sep = FIELD_SEPARATOR
    )
    .into_bytes()
}

/// A decoded negotiation downlink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DdrCommand {
    /// Switch to the given spreading factor.
    SetRate(SpreadingFactor),
    /// Tagged command whose rate label is not a known spreading factor.
    UnknownRate(String),
}

impl DdrCommand {
    /// Decode `downlink`, or `None` if it is not a negotiation command
    /// (other port, missing `DDR|` tag, payload not UTF-8).
    ///
    /// The first field after the tag is the spreading-factor label; empty
    /// trailing fields (`DDR|9|`) are tolerated.
    pub fn parse(downlink: &Downlink) -> Option<Self> {
        if downlink.port != DDR_PORT {
            return None;
        }
        let text = std::str::from_utf8(&downlink.payload).ok()?;
        let mut fields = text.split(FIELD_SEPARATOR);
        if fields.next()? != DDR_TAG {
            return None;
        }
        // A bare "DDR" has no separator and is not a command.
        let label = fields.next()?;
        if fields.any(|extra| !extra.is_empty()) {
            return Some(Self::UnknownRate(text[DDR_TAG.len() + 1..].to_string()));
        }
        Some(match label.parse::<SpreadingFactor>() {
            Ok(sf) => Self::SetRate(sf),
            Err(_) => Self::UnknownRate(label.to_string()),
        })
    }
}

/// Downlink handler for DDR runs.
///
/// Applies a `SetRate` command to the session immediately. Unknown labels and
/// everything that is not a command leave the data rate unchanged.
pub fn handle_downlink<D: MacDevice>(session: &mut Session<D>, downlink: &Downlink) {
    let logger = session.logger().clone();
    match DdrCommand::parse(downlink) {
        Some(DdrCommand::SetRate(sf)) => {
            let data_rate = sf.data_rate();
            match session.apply_data_rate(data_rate) {
                Ok(()) => logger.info(format_args!(
                    "new data rate data_rate={} sf={}",
                    data_rate, sf
                )),
                Err(e) => logger.warn(format_args!(
                    "could not apply data rate data_rate={}: {}",
                    data_rate, e
                )),
            }
        }
        Some(DdrCommand::UnknownRate(label)) => {
            logger.warn(format_args!(
                "ignoring DDR command with unknown spreading factor label={:?}",
                label
            ));
        }
        None => {
            logger.debug(format_args!(
                "downlink is not a DDR command port={} len={}",
                downlink.port,
                downlink.payload.len()
            ));
        }
    }
}
