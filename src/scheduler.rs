//! Periodic uplink scheduler.
//!
//! Two timers drive a test run: a repeating tick that sends one uplink frame
//! and a one-shot deadline that ends the run. The loop is single-threaded;
//! each transmit blocks until the radio exchange is over, so frames never
//! overlap and consecutive ticks are at least one interval apart.
//!
//! When a tick and the deadline fall due at the same instant, the deadline
//! wins: a run of `timeout` minutes sends exactly `timeout * 60 / interval`
//! frames.

use crate::mac::{Downlink, MacDevice, MacError};
use crate::session::Session;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

/// Time between two uplink frames.
pub const TICK_INTERVAL: Duration = Duration::from_secs(30);

/// Application port of the periodic frames.
pub const UPLINK_PORT: u8 = 2;

/// Payload of the periodic frames.
pub const UPLINK_PAYLOAD: &[u8] = b"a";

/// Invoked synchronously with every downlink a transmit returns.
pub type DownlinkHandler<D> = fn(&mut Session<D>, &Downlink);

/// Counters of one finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Ticks that produced a transmit attempt.
    pub frames_sent: u32,
    /// Transmit attempts the device reported as failed.
    pub failed_uplinks: u32,
    /// Downlinks received in the receive windows.
    pub downlinks: u32,
}

/// Deadline-bounded periodic transmitter.
pub struct UplinkScheduler<D: MacDevice> {
    start: Instant,
    deadline: Instant,
    interval: Duration,
    confirmed: bool,
    port: u8,
    payload: Vec<u8>,
    handler: Option<DownlinkHandler<D>>,
}

impl<D: MacDevice> UplinkScheduler<D> {
    /// Scheduler whose first tick is one `interval` after `start` and which
    /// stops at `deadline`.
    pub fn new(start: Instant, deadline: Instant, interval: Duration) -> Self {
        Self {
            start,
            deadline,
            interval,
            confirmed: false,
            port: UPLINK_PORT,
            payload: UPLINK_PAYLOAD.to_vec(),
            handler: None,
        }
    }

    /// Request network acknowledgement for every frame.
    pub fn confirmed(mut self, confirmed: bool) -> Self {
        self.confirmed = confirmed;
        self
    }

    /// Hand downlinks to `handler` right after each transmit returns.
    pub fn with_handler(mut self, handler: DownlinkHandler<D>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Run until the deadline.
    ///
    /// Transmit failures are logged and counted; they never end the run.
    pub async fn run(&self, session: &mut Session<D>) -> RunSummary {
        let logger = session.logger().clone();
        let mut summary = RunSummary::default();

        let deadline = tokio::time::sleep_until(self.deadline);
        tokio::pin!(deadline);

        let mut ticks = tokio::time::interval_at(self.start + self.interval, self.interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut frame: u32 = 0;
        loop {
            tokio::select! {
                biased;

                _ = &mut deadline => {
                    logger.info(format_args!(
                        "timed out frames={} failed={} downlinks={}",
                        summary.frames_sent, summary.failed_uplinks, summary.downlinks
                    ));
                    break;
                }

                _ = ticks.tick() => {
                    // Blocks this (only) task until the radio exchange is over.
                    match exchange(session, self.confirmed, self.port, &self.payload, self.handler) {
                        Ok(received) => {
                            if received {
                                summary.downlinks += 1;
                            }
                        }
                        Err(e) => {
                            summary.failed_uplinks += 1;
                            logger.warn(format_args!("uplink failed frame={}: {}", frame, e));
                        }
                    }
                    logger.info(format_args!(
                        "uplink frame={} confirmed={} port={} data={}",
                        frame,
                        self.confirmed,
                        self.port,
                        String::from_utf8_lossy(&self.payload)
                    ));
                    summary.frames_sent += 1;
                    frame += 1;
                }
            }
        }

        summary
    }
}

/// Transmit one frame and pass any downlink to `handler`.
///
/// Returns whether a downlink arrived.
pub fn exchange<D: MacDevice>(
    session: &mut Session<D>,
    confirmed: bool,
    port: u8,
    payload: &[u8],
    handler: Option<DownlinkHandler<D>>,
) -> Result<bool, MacError> {
    let downlink = session.transmit(confirmed, port, payload)?;
    match downlink {
        Some(downlink) => {
            session.logger().debug(format_args!(
                "downlink port={} data={}",
                downlink.port,
                hex::encode_upper(&downlink.payload)
            ));
            if let Some(handle) = handler {
                handle(session, &downlink);
            }
            Ok(true)
        }
        None => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ddr::handle_downlink;
    use crate::logger::testing::RecordingLogger;
    use crate::mac::sim::SimMac;
    use crate::mac::DataRate;
    use log::Level;

    fn scheduler(timeout: Duration) -> UplinkScheduler<SimMac> {
        let start = Instant::now();
        UplinkScheduler::new(start, start + timeout + TICK_INTERVAL, TICK_INTERVAL)
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_minute_fires_two_ticks() {
        let (mac, sim) = SimMac::new();
        let logger = RecordingLogger::shared();
        let mut session = Session::open(mac, logger.clone()).unwrap();

        let started = Instant::now();
        let summary = scheduler(Duration::from_secs(60)).run(&mut session).await;

        assert_eq!(summary.frames_sent, 2);
        assert_eq!(Instant::now() - started, Duration::from_secs(90));
        assert_eq!(sim.lock().unwrap().frames.len(), 2);
        assert!(logger.contains(Level::Info, "timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ten_minutes_fires_twenty_ticks() {
        let (mac, sim) = SimMac::new();
        let mut session = Session::open(mac, RecordingLogger::shared()).unwrap();

        let summary = scheduler(Duration::from_secs(600)).run(&mut session).await;

        assert_eq!(summary.frames_sent, 20);
        assert_eq!(sim.lock().unwrap().frames.len(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_carry_fixed_payload_and_flags() {
        let (mac, sim) = SimMac::new();
        let logger = RecordingLogger::shared();
        let mut session = Session::open(mac, logger.clone()).unwrap();

        scheduler(Duration::from_secs(60))
            .confirmed(true)
            .run(&mut session)
            .await;

        let frames = sim.lock().unwrap().frames.clone();
        assert!(frames
            .iter()
            .all(|f| f.confirmed && f.port == UPLINK_PORT && f.payload == b"a"));
        assert!(logger.contains(Level::Info, "uplink frame=0 confirmed=true port=2 data=a"));
        assert!(logger.contains(Level::Info, "uplink frame=1 confirmed=true port=2 data=a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_uplinks_do_not_stop_the_run() {
        let (mac, _) = SimMac::new();
        let mac = mac.failing_transmits();
        let logger = RecordingLogger::shared();
        let mut session = Session::open(mac, logger.clone()).unwrap();

        let summary = scheduler(Duration::from_secs(120)).run(&mut session).await;

        assert_eq!(summary.frames_sent, 4);
        assert_eq!(summary.failed_uplinks, 4);
        assert_eq!(logger.count("uplink failed"), 4);
        assert!(logger.contains(Level::Info, "timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_sees_downlinks() {
        let (mac, sim) = SimMac::new();
        let mac = mac
            .queue_downlink(None)
            .queue_downlink(Some(Downlink::new(1, b"DDR|8".to_vec())));
        let mut session = Session::open(mac, RecordingLogger::shared()).unwrap();

        let summary = scheduler(Duration::from_secs(60))
            .with_handler(handle_downlink::<SimMac>)
            .run(&mut session)
            .await;

        assert_eq!(summary.downlinks, 1);
        assert_eq!(session.data_rate(), Some(DataRate::DR4));
        assert_eq!(sim.lock().unwrap().data_rate, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_without_handler_downlinks_are_ignored() {
        let (mac, sim) = SimMac::new();
        let mac = mac.queue_downlink(Some(Downlink::new(1, b"DDR|7".to_vec())));
        let mut session = Session::open(mac, RecordingLogger::shared()).unwrap();

        let summary = scheduler(Duration::from_secs(60)).run(&mut session).await;

        assert_eq!(summary.downlinks, 1);
        assert_eq!(session.data_rate(), None);
        assert!(sim.lock().unwrap().data_rate_writes.is_empty());
    }
}
