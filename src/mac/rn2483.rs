//! Microchip RN2483 driver.
//!
//! The modem speaks a line-oriented ASCII protocol over a serial link: every
//! command is terminated with `\r\n` and answered with one line. `mac join`,
//! `mac tx` and `radio rx` answer twice: `ok` once the command is accepted,
//! then the outcome once the radio exchange is over.
//!
//! | Command | First reply | Second reply |
//! |---------|-------------|--------------|
//! | `mac join otaa` | `ok` | `accepted` / `denied` |
//! | `mac tx cnf 2 61` | `ok` | `mac_tx_ok` / `mac_rx <port> <hex>` / `mac_err` |
//! | `radio rx 0` | `ok` | `radio_rx <hex>` / `radio_err` |
//!
//! # Usage
//!
//! ```ignore
//! use loramote::logger::LogFacade;
//! use loramote::mac::{MacDevice, Rn2483};
//! use std::time::Duration;
//!
//! let logger = LogFacade::shared("loramote::rn2483");
//! let mut mote = Rn2483::open("/dev/ttyUSB0", 57_600, Duration::from_millis(500), logger)?;
//! mote.connect()?;
//! println!("{}", mote.version()?);
//! ```

use super::{
    Band, DataRate, Downlink, JoinMode, MacDevice, MacError, PowerIndex, RadioDevice,
};
use crate::logger::SharedLogger;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};
use zeroize::Zeroizing;

/// Time allowed for a single-reply command.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Time allowed between `ok` and `accepted`/`denied` of a join.
pub const JOIN_RESPONSE_TIMEOUT: Duration = Duration::from_secs(20);

/// Time allowed between `ok` and the outcome of an uplink (covers both
/// receive windows and confirmed-uplink retransmissions).
pub const TX_RESPONSE_TIMEOUT: Duration = Duration::from_secs(60);

/// Time allowed between `ok` and the outcome of `radio rx 0`. The modem's
/// watchdog answers `radio_err` after 15 s by default; `radio set wdt`
/// shortens that.
const RX_RESPONSE_TIMEOUT: Duration = Duration::from_secs(20);

/// Bytes pulled from the link per read.
const MAX_READ_CHUNK: usize = 64;

/// RN2483 modem behind any byte stream (a serial port in production).
pub struct Rn2483<T> {
    link: Option<T>,
    pending: Vec<u8>,
    /// An outcome may still arrive for a command that timed out.
    resync: bool,
    /// Firmware version read by `connect`.
    firmware: Option<String>,
    logger: SharedLogger,
    command_timeout: Duration,
    join_timeout: Duration,
    tx_timeout: Duration,
    rx_timeout: Duration,
}

impl Rn2483<Box<dyn serialport::SerialPort>> {
    /// Open the serial port at `path`.
    ///
    /// `read_timeout` bounds each individual read; replies spanning several
    /// reads are reassembled by the driver.
    pub fn open(
        path: &str,
        baud: u32,
        read_timeout: Duration,
        logger: SharedLogger,
    ) -> Result<Self, MacError> {
        logger.debug(format_args!("opening {} at {} baud", path, baud));
        let port = serialport::new(path, baud)
            .timeout(read_timeout)
            .open()
            .map_err(|e| MacError::Io(io::Error::from(e)))?;
        Ok(Self::new(port, logger))
    }
}

impl<T: Read + Write> Rn2483<T> {
    /// Wrap an already opened byte stream.
    pub fn new(link: T, logger: SharedLogger) -> Self {
        Self {
            link: Some(link),
            pending: Vec::new(),
            resync: false,
            firmware: None,
            logger,
            command_timeout: COMMAND_TIMEOUT,
            join_timeout: JOIN_RESPONSE_TIMEOUT,
            tx_timeout: TX_RESPONSE_TIMEOUT,
            rx_timeout: RX_RESPONSE_TIMEOUT,
        }
    }

    /// Override the reply timeouts (command, join outcome, uplink outcome).
    pub fn with_timeouts(mut self, command: Duration, join: Duration, tx: Duration) -> Self {
        self.command_timeout = command;
        self.join_timeout = join;
        self.tx_timeout = tx;
        self.rx_timeout = join;
        self
    }

    /// Whether the link is still held.
    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Send `command` and return the first reply line.
    pub fn transact(&mut self, command: &str) -> Result<String, MacError> {
        self.send(command)?;
        self.await_reply(command, self.command_timeout)
    }

    fn send(&mut self, command: &str) -> Result<(), MacError> {
        self.logger.debug(format_args!("-> {}", command));
        self.write_line(command)
    }

    fn write_line(&mut self, command: &str) -> Result<(), MacError> {
        if self.resync {
            self.discard_stale_input()?;
        }
        let link = self.link.as_mut().ok_or(MacError::NotConnected)?;
        link.write_all(command.as_bytes())?;
        link.write_all(b"\r\n")?;
        link.flush()?;
        Ok(())
    }

    fn await_reply(&mut self, command: &str, wait: Duration) -> Result<String, MacError> {
        match self.read_line(wait)? {
            Some(reply) => {
                self.logger.debug(format_args!("<- {}", reply));
                Ok(reply)
            }
            None => Err(MacError::Timeout {
                command: command.to_string(),
            }),
        }
    }

    /// Read one non-empty line, reassembling it across read timeouts.
    fn read_line(&mut self, wait: Duration) -> Result<Option<String>, MacError> {
        let deadline = Instant::now() + wait;
        loop {
            while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                let raw: Vec<u8> = self.pending.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw).trim().to_string();
                if !line.is_empty() {
                    return Ok(Some(line));
                }
            }

            let link = self.link.as_mut().ok_or(MacError::NotConnected)?;
            let mut chunk = [0u8; MAX_READ_CHUNK];
            match link.read(&mut chunk) {
                Ok(0) => {}
                Ok(n) => {
                    self.pending.extend_from_slice(&chunk[..n]);
                    continue;
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut
                            | io::ErrorKind::WouldBlock
                            | io::ErrorKind::Interrupted
                    ) => {}
                Err(e) => return Err(e.into()),
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }
        }
    }

    /// Drop buffered and unread input so a late outcome of an earlier
    /// command is not taken as the reply to the next one.
    fn discard_stale_input(&mut self) -> Result<(), MacError> {
        let mut discarded = std::mem::take(&mut self.pending).len();
        let deadline = Instant::now() + self.command_timeout;
        let link = self.link.as_mut().ok_or(MacError::NotConnected)?;
        let mut chunk = [0u8; MAX_READ_CHUNK];
        while Instant::now() < deadline {
            match link.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => discarded += n,
                Err(e) => match e.kind() {
                    io::ErrorKind::Interrupted => {}
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => break,
                    _ => return Err(e.into()),
                },
            }
        }
        self.resync = false;
        if discarded > 0 {
            self.logger.debug(format_args!("discarded {} stale bytes", discarded));
        }
        Ok(())
    }

    /// Send `command` and require `ok`.
    fn expect_ok(&mut self, command: &str) -> Result<(), MacError> {
        let reply = self.transact(command)?;
        if reply == "ok" {
            Ok(())
        } else {
            Err(MacError::Rejected {
                command: command.to_string(),
                reply,
            })
        }
    }

    /// Send `command`, require `ok`, then wait up to `wait` for the outcome.
    fn two_stage(&mut self, command: &str, wait: Duration) -> Result<String, MacError> {
        self.expect_ok(command)?;
        let outcome = self.await_reply(command, wait);
        if matches!(outcome, Err(MacError::Timeout { .. })) {
            self.resync = true;
        }
        outcome
    }

    fn query_u8(&mut self, command: &str) -> Result<u8, MacError> {
        let reply = self.transact(command)?;
        reply.parse().map_err(|_| MacError::UnexpectedReply {
            command: command.to_string(),
            reply,
        })
    }
}

/// Encode a duty-cycle percentage as the RN2483 `dcycle` value, where the
/// channel may transmit `100 / (value + 1)` percent of the time.
fn duty_cycle_value(percent: f32) -> Result<u16, MacError> {
    if !(percent > 0.0 && percent <= 100.0) {
        return Err(MacError::InvalidArgument(format!(
            "duty cycle {}% outside (0, 100]",
            percent
        )));
    }
    let value = (100.0 / percent).round() - 1.0;
    if value > f32::from(u16::MAX) {
        return Err(MacError::InvalidArgument(format!(
            "duty cycle {}% too small",
            percent
        )));
    }
    Ok(value as u16)
}

/// Parse `mac_rx <port> <hex>`.
fn parse_mac_rx(command: &str, reply: &str) -> Result<Downlink, MacError> {
    let unexpected = || MacError::UnexpectedReply {
        command: command.to_string(),
        reply: reply.to_string(),
    };
    let mut fields = reply.split_whitespace().skip(1);
    let port = fields
        .next()
        .and_then(|p| p.parse::<u8>().ok())
        .ok_or_else(unexpected)?;
    let payload = match fields.next() {
        Some(data) => hex::decode(data).map_err(|_| unexpected())?,
        None => Vec::new(),
    };
    Ok(Downlink::new(port, payload))
}

impl<T: Read + Write> MacDevice for Rn2483<T> {
    fn connect(&mut self) -> Result<(), MacError> {
        if self.link.is_none() {
            return Err(MacError::NotConnected);
        }
        self.pending.clear();
        self.resync = false;
        let version = self.transact("sys get ver")?;
        self.logger.debug(format_args!("connected to {}", version));
        self.firmware = Some(version);
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.link.take().is_some() {
            self.pending.clear();
            self.firmware = None;
            self.logger.debug(format_args!("serial link released"));
        }
    }

    fn version(&mut self) -> Result<String, MacError> {
        if self.link.is_none() {
            return Err(MacError::NotConnected);
        }
        match &self.firmware {
            Some(version) => Ok(version.clone()),
            None => self.transact("sys get ver"),
        }
    }

    fn mac_reset(&mut self, band: Band) -> Result<(), MacError> {
        self.expect_ok(&format!("mac reset {}", band.mhz()))
    }

    fn set_device_eui(&mut self, eui: &str) -> Result<(), MacError> {
        self.expect_ok(&format!("mac set deveui {}", eui))
    }

    fn set_application_eui(&mut self, eui: &str) -> Result<(), MacError> {
        self.expect_ok(&format!("mac set appeui {}", eui))
    }

    fn set_application_key(&mut self, key: &str) -> Result<(), MacError> {
        self.logger.debug(format_args!("-> mac set appkey ********"));
        let line = Zeroizing::new(format!("mac set appkey {}", key));
        self.write_line(&line)?;
        let reply = self.await_reply("mac set appkey", self.command_timeout)?;
        if reply == "ok" {
            Ok(())
        } else {
            // The key itself never ends up in an error message.
            Err(MacError::Rejected {
                command: "mac set appkey".to_string(),
                reply,
            })
        }
    }

    fn set_data_rate(&mut self, data_rate: DataRate) -> Result<(), MacError> {
        self.expect_ok(&format!("mac set dr {}", data_rate))
    }

    fn data_rate(&mut self) -> Result<DataRate, MacError> {
        let index = self.query_u8("mac get dr")?;
        DataRate::new(index).ok_or_else(|| MacError::UnexpectedReply {
            command: "mac get dr".to_string(),
            reply: index.to_string(),
        })
    }

    fn set_power_index(&mut self, power: PowerIndex) -> Result<(), MacError> {
        self.expect_ok(&format!("mac set pwridx {}", power))
    }

    fn power_index(&mut self) -> Result<PowerIndex, MacError> {
        self.query_u8("mac get pwridx").map(PowerIndex)
    }

    fn set_adr(&mut self, enabled: bool) -> Result<(), MacError> {
        self.expect_ok(&format!("mac set adr {}", if enabled { "on" } else { "off" }))
    }

    fn adr(&mut self) -> Result<bool, MacError> {
        let reply = self.transact("mac get adr")?;
        match reply.as_str() {
            "on" => Ok(true),
            "off" => Ok(false),
            _ => Err(MacError::UnexpectedReply {
                command: "mac get adr".to_string(),
                reply,
            }),
        }
    }

    fn set_channel_duty_cycle(&mut self, channel: u8, percent: f32) -> Result<(), MacError> {
        let value = duty_cycle_value(percent)?;
        self.expect_ok(&format!("mac set ch dcycle {} {}", channel, value))
    }

    fn join(&mut self, mode: JoinMode) -> Result<bool, MacError> {
        let command = format!("mac join {}", mode.as_str());
        let outcome = self.two_stage(&command, self.join_timeout)?;
        match outcome.as_str() {
            "accepted" => Ok(true),
            "denied" => Ok(false),
            _ => Err(MacError::UnexpectedReply {
                command,
                reply: outcome,
            }),
        }
    }

    fn transmit(
        &mut self,
        confirmed: bool,
        port: u8,
        payload: &[u8],
    ) -> Result<Option<Downlink>, MacError> {
        let command = format!(
            "mac tx {} {} {}",
            if confirmed { "cnf" } else { "uncnf" },
            port,
            hex::encode_upper(payload)
        );
        let outcome = self.two_stage(&command, self.tx_timeout)?;
        if outcome == "mac_tx_ok" {
            Ok(None)
        } else if outcome.starts_with("mac_rx") {
            parse_mac_rx(&command, &outcome).map(Some)
        } else {
            Err(MacError::Rejected {
                command,
                reply: outcome,
            })
        }
    }
}

impl<T: Read + Write> RadioDevice for Rn2483<T> {
    fn pause_mac(&mut self) -> Result<u32, MacError> {
        let reply = self.transact("mac pause")?;
        reply.parse().map_err(|_| MacError::UnexpectedReply {
            command: "mac pause".to_string(),
            reply,
        })
    }

    fn set_frequency(&mut self, hz: u32) -> Result<(), MacError> {
        self.expect_ok(&format!("radio set freq {}", hz))
    }

    fn set_spreading_factor(&mut self, sf: u8) -> Result<(), MacError> {
        self.expect_ok(&format!("radio set sf sf{}", sf))
    }

    fn set_bandwidth(&mut self, khz: u16) -> Result<(), MacError> {
        self.expect_ok(&format!("radio set bw {}", khz))
    }

    fn set_coding_rate(&mut self, denominator: u8) -> Result<(), MacError> {
        self.expect_ok(&format!("radio set cr 4/{}", denominator))
    }

    fn set_crc(&mut self, enabled: bool) -> Result<(), MacError> {
        self.expect_ok(&format!("radio set crc {}", if enabled { "on" } else { "off" }))
    }

    fn set_power(&mut self, dbm: i8) -> Result<(), MacError> {
        self.expect_ok(&format!("radio set pwr {}", dbm))
    }

    fn set_watchdog(&mut self, ms: u32) -> Result<(), MacError> {
        self.expect_ok(&format!("radio set wdt {}", ms))
    }

    fn receive(&mut self) -> Result<Option<Vec<u8>>, MacError> {
        let command = "radio rx 0";
        let outcome = self.two_stage(command, self.rx_timeout)?;
        if outcome == "radio_err" {
            return Ok(None);
        }
        match outcome.strip_prefix("radio_rx") {
            Some(data) => hex::decode(data.trim())
                .map(Some)
                .map_err(|_| MacError::UnexpectedReply {
                    command: command.to_string(),
                    reply: outcome.clone(),
                }),
            None => Err(MacError::UnexpectedReply {
                command: command.to_string(),
                reply: outcome,
            }),
        }
    }
}

/// Find a serial port the modem is likely attached to.
///
/// Returns the first matching port, or None if no device is found.
pub fn find_serial_port() -> Option<String> {
    let patterns = [
        "/dev/ttyUSB*",
        "/dev/ttyACM*",
        "/dev/cu.usbmodem*",
        "/dev/cu.usbserial-*",
    ];

    for pattern in patterns {
        if let Ok(paths) = glob::glob(pattern) {
            if let Some(path) = paths.flatten().next() {
                return Some(path.to_string_lossy().to_string());
            }
        }
    }

    None
}
