//! Network session: bootstrap and scoped release.
//!
//! A [`Session`] owns the MAC device for the whole test run. Opening a
//! session acquires the link; dropping it releases the link exactly once,
//! whichever way the run ends (deadline, denied join, any error).
//!
//! Bootstrap runs these steps in order, stopping at the first failure:
//!
//! 1. reset the MAC to the frequency band
//! 2. device EUI, application EUI, application key
//! 3. initial data rate and transmit power
//! 4. network-managed ADR on or off
//! 5. the same duty-cycle share on channels `0..=CHANNEL_COUNT`
//! 6. a single OTAA join attempt

use crate::logger::SharedLogger;
use crate::mac::{Band, DataRate, Downlink, JoinMode, MacDevice, MacError, PowerIndex};
use std::collections::BTreeMap;
use std::fmt;
use zeroize::Zeroizing;

/// Channels enabled on the test network. Channel indices `0..=CHANNEL_COUNT`
/// are configured, so the extra slot gets the same share.
pub const CHANNEL_COUNT: u8 = 7;

/// Duty-cycle share given to every configured channel, in percent.
pub fn duty_cycle_share() -> f32 {
    100.0 / f32::from(CHANNEL_COUNT)
}

/// Everything bootstrap writes to the device.
#[derive(Clone)]
pub struct BootstrapConfig {
    pub band: Band,
    pub device_eui: String,
    pub application_eui: String,
    pub application_key: Zeroizing<String>,
    pub data_rate: DataRate,
    pub power: PowerIndex,
    /// Network-managed adaptive data rate.
    pub adr: bool,
}

impl fmt::Debug for BootstrapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootstrapConfig")
            .field("band", &self.band)
            .field("device_eui", &self.device_eui)
            .field("application_eui", &self.application_eui)
            .field("data_rate", &self.data_rate)
            .field("power", &self.power)
            .field("adr", &self.adr)
            .finish_non_exhaustive()
    }
}

/// Bootstrap step, for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapStep {
    Reset,
    Identity,
    RadioSettings,
    Adr,
    Verify,
    DutyCycle,
    Join,
}

impl fmt::Display for BootstrapStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Reset => "mac reset",
            Self::Identity => "identity",
            Self::RadioSettings => "data rate and power",
            Self::Adr => "adr",
            Self::Verify => "settings read-back",
            Self::DutyCycle => "duty cycle",
            Self::Join => "join",
        };
        write!(f, "{}", name)
    }
}

/// Session errors.
#[derive(Debug)]
pub enum SessionError {
    /// The link to the device could not be acquired.
    Connect(MacError),
    /// A bootstrap step failed at the device.
    Bootstrap {
        step: BootstrapStep,
        source: MacError,
    },
    /// The network denied the join request.
    JoinDenied,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(e) => write!(f, "could not connect to the device: {}", e),
            Self::Bootstrap {
                step: BootstrapStep::Join,
                source,
            } => write!(f, "could not join the network: {}", source),
            Self::Bootstrap { step, source } => write!(f, "{} failed: {}", step, source),
            Self::JoinDenied => write!(f, "could not join the network"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Connect(e) => Some(e),
            Self::Bootstrap { source, .. } => Some(source),
            Self::JoinDenied => None,
        }
    }
}

impl SessionError {
    /// Whether the run failed because no network session could be joined.
    pub fn is_join_failure(&self) -> bool {
        matches!(
            self,
            Self::JoinDenied
                | Self::Bootstrap {
                    step: BootstrapStep::Join,
                    ..
                }
        )
    }
}

/// What the harness knows about the network association.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub device_eui: Option<String>,
    pub application_eui: Option<String>,
    pub data_rate: Option<DataRate>,
    pub power: Option<PowerIndex>,
    pub adr: bool,
    /// Channel index -> duty-cycle percentage.
    pub duty_cycles: BTreeMap<u8, f32>,
    pub joined: bool,
    /// Uplinks the device accepted.
    pub uplinks: u32,
}

/// One active network association.
pub struct Session<D: MacDevice> {
    device: D,
    state: SessionState,
    logger: SharedLogger,
}

impl<D: MacDevice> Session<D> {
    /// Take ownership of `device` and acquire the link.
    ///
    /// If connecting fails the device is still released before returning.
    pub fn open(device: D, logger: SharedLogger) -> Result<Self, SessionError> {
        let mut session = Self {
            device,
            state: SessionState::default(),
            logger,
        };
        session.device.connect().map_err(SessionError::Connect)?;
        Ok(session)
    }

    /// Configure the device and join the network.
    pub fn bootstrap(&mut self, config: &BootstrapConfig) -> Result<(), SessionError> {
        let at = |step: BootstrapStep| {
            move |source: MacError| SessionError::Bootstrap { step, source }
        };

        self.device
            .mac_reset(config.band)
            .map_err(at(BootstrapStep::Reset))?;
        self.state = SessionState::default();

        self.device
            .set_device_eui(&config.device_eui)
            .map_err(at(BootstrapStep::Identity))?;
        self.device
            .set_application_eui(&config.application_eui)
            .map_err(at(BootstrapStep::Identity))?;
        self.device
            .set_application_key(&config.application_key)
            .map_err(at(BootstrapStep::Identity))?;
        self.state.device_eui = Some(config.device_eui.clone());
        self.state.application_eui = Some(config.application_eui.clone());

        self.device
            .set_data_rate(config.data_rate)
            .map_err(at(BootstrapStep::RadioSettings))?;
        self.device
            .set_power_index(config.power)
            .map_err(at(BootstrapStep::RadioSettings))?;

        self.device
            .set_adr(config.adr)
            .map_err(at(BootstrapStep::Adr))?;

        let data_rate = self.device.data_rate().map_err(at(BootstrapStep::Verify))?;
        let power = self.device.power_index().map_err(at(BootstrapStep::Verify))?;
        let adr = self.device.adr().map_err(at(BootstrapStep::Verify))?;
        self.state.data_rate = Some(data_rate);
        self.state.power = Some(power);
        self.state.adr = adr;
        self.logger.info(format_args!(
            "mac settings configured data_rate={} power={} adr={}",
            data_rate, power, adr
        ));

        let share = duty_cycle_share();
        for channel in 0..=CHANNEL_COUNT {
            self.device
                .set_channel_duty_cycle(channel, share)
                .map_err(at(BootstrapStep::DutyCycle))?;
            self.state.duty_cycles.insert(channel, share);
        }
        self.logger.info(format_args!(
            "new duty cycles configured duty_cycle={}",
            share
        ));

        let accepted = self
            .device
            .join(JoinMode::Otaa)
            .map_err(at(BootstrapStep::Join))?;
        if !accepted {
            return Err(SessionError::JoinDenied);
        }
        self.state.joined = true;
        self.logger.info(format_args!("connected to the network"));

        Ok(())
    }

    /// Switch the device to `data_rate` and record it.
    pub fn apply_data_rate(&mut self, data_rate: DataRate) -> Result<(), MacError> {
        self.device.set_data_rate(data_rate)?;
        self.state.data_rate = Some(data_rate);
        Ok(())
    }

    /// Send one uplink, blocking until the radio exchange is over.
    pub fn transmit(
        &mut self,
        confirmed: bool,
        port: u8,
        payload: &[u8],
    ) -> Result<Option<Downlink>, MacError> {
        let downlink = self.device.transmit(confirmed, port, payload)?;
        self.state.uplinks += 1;
        Ok(downlink)
    }

    /// Firmware version of the device.
    pub fn version(&mut self) -> Result<String, MacError> {
        self.device.version()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Data rate last written to the device, if any.
    pub fn data_rate(&self) -> Option<DataRate> {
        self.state.data_rate
    }

    pub fn logger(&self) -> &SharedLogger {
        &self.logger
    }
}

impl<D: MacDevice> Drop for Session<D> {
    fn drop(&mut self) {
        self.device.disconnect();
        self.logger.debug(format_args!("session released"));
    }
}
