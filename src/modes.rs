//! ADR and DDR test runs.
//!
//! Both modes share the same skeleton: open a session, bootstrap it, send
//! uplinks on a fixed tick until the deadline, release the session. They
//! differ in who picks the data rate:
//!
//! - ADR: the network, through LoRaWAN adaptive data rate; downlinks are
//!   not looked at
//! - DDR: the application, through `DDR|<sf>` commands answered to the
//!   location announcement or to any later uplink

use crate::ddr::{self, Location, DDR_PORT};
use crate::logger::SharedLogger;
use crate::mac::{DataRate, MacDevice};
use crate::scheduler::{self, DownlinkHandler, RunSummary, UplinkScheduler, TICK_INTERVAL};
use crate::session::{BootstrapConfig, Session, SessionError};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Which rate-selection algorithm is under test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Mode {
    /// Network-managed adaptive data rate.
    Adr { confirmed: bool },
    /// Application-negotiated data rate.
    Ddr { location: Location },
}

impl Mode {
    /// Whether LoRaWAN ADR is enabled on the device for this mode.
    pub fn network_adr(&self) -> bool {
        matches!(self, Self::Adr { .. })
    }

    /// Whether periodic uplinks request acknowledgement.
    pub fn confirmed(&self) -> bool {
        match self {
            Self::Adr { confirmed } => *confirmed,
            Self::Ddr { .. } => false,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Adr { .. } => write!(f, "adr"),
            Self::Ddr { .. } => write!(f, "ddr"),
        }
    }
}

/// One execution of a mode.
#[derive(Debug, Clone)]
pub struct TestRun {
    pub mode: Mode,
    /// Data rate written during bootstrap.
    pub data_rate: DataRate,
    pub timeout_minutes: u32,
    pub tick: Duration,
}

impl TestRun {
    pub fn new(mode: Mode, data_rate: DataRate, timeout_minutes: u32) -> Self {
        Self {
            mode,
            data_rate,
            timeout_minutes,
            tick: TICK_INTERVAL,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.timeout_minutes) * 60)
    }

    /// End of a run started at `start`. One extra tick lets the last
    /// scheduled frame go out before the run is cut.
    pub fn deadline_after(&self, start: Instant) -> Instant {
        start + self.timeout() + self.tick
    }
}

/// Execute `run` on `device`.
///
/// The device is released exactly once before this returns, whether the
/// run reached its deadline or bootstrap failed.
pub async fn run_test<D: MacDevice>(
    device: D,
    mut bootstrap: BootstrapConfig,
    run: &TestRun,
    logger: SharedLogger,
) -> Result<RunSummary, SessionError> {
    let mut session = Session::open(device, logger.clone())?;

    match session.version() {
        Ok(version) => logger.info(format_args!("device version={}", version)),
        Err(e) => logger.warn(format_args!("could not read device version: {}", e)),
    }

    bootstrap.data_rate = run.data_rate;
    bootstrap.adr = run.mode.network_adr();
    session.bootstrap(&bootstrap)?;

    logger.info(format_args!(
        "starting {} test timeout={}min tick={}s",
        run.mode,
        run.timeout_minutes,
        run.tick.as_secs()
    ));

    let start = Instant::now();
    let mut uplinks = UplinkScheduler::new(start, run.deadline_after(start), run.tick)
        .confirmed(run.mode.confirmed());

    if let Mode::Ddr { location } = run.mode {
        let handler: DownlinkHandler<D> = ddr::handle_downlink::<D>;
        let payload = ddr::announcement(location);
        match scheduler::exchange(&mut session, false, DDR_PORT, &payload, Some(handler)) {
            Ok(_) => logger.info(format_args!(
                "location announced port={} data={}",
                DDR_PORT,
                String::from_utf8_lossy(&payload)
            )),
            Err(e) => logger.warn(format_args!("location announcement failed: {}", e)),
        }
        uplinks = uplinks.with_handler(handler);
    }

    Ok(uplinks.run(&mut session).await)
}
