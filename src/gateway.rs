//! Single-channel packet listener.
//!
//! Pauses the LoRaWAN stack of the modem and uses the bare radio as a
//! receive-only gateway on one frequency and spreading factor. Every packet
//! heard is logged as hex until the listener is cancelled.
//!
//! # Blocking Bridge Pattern
//!
//! `radio rx` blocks the serial link until a packet arrives or the modem's
//! watchdog fires, so each receive runs in `tokio::task::spawn_blocking`
//! while the listener itself stays responsive to cancellation. The watchdog
//! is set to [`RECEIVE_WATCHDOG_MS`] so a receive still in flight when the
//! listener stops ends shortly after.

use crate::config::GatewayConfig;
use crate::logger::SharedLogger;
use crate::mac::{MacError, RadioDevice};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Length of one receive window.
pub const RECEIVE_WATCHDOG_MS: u32 = 2_000;

/// Delay after a receive error before listening again.
const ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Counters of one listening session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenSummary {
    pub packets: u32,
    pub errors: u32,
}

/// Put the radio in raw receive mode with the given settings.
pub fn configure<R: RadioDevice>(
    radio: &mut R,
    config: &GatewayConfig,
    logger: &SharedLogger,
) -> Result<(), MacError> {
    let paused_ms = radio.pause_mac()?;
    logger.debug(format_args!("mac paused for {}ms", paused_ms));

    radio.set_frequency(config.frequency)?;
    radio.set_spreading_factor(config.sf)?;
    radio.set_bandwidth(config.bandwidth)?;
    radio.set_coding_rate(config.codingrate)?;
    radio.set_crc(config.crc)?;
    radio.set_power(config.power)?;
    radio.set_watchdog(RECEIVE_WATCHDOG_MS)?;

    logger.info(format_args!(
        "gateway configured frequency={} sf={} bw={} cr=4/{} crc={} power={}",
        config.frequency,
        config.sf,
        config.bandwidth,
        config.codingrate,
        config.crc,
        config.power
    ));
    Ok(())
}

/// Configure `radio` and log received packets until `cancel` fires.
pub async fn listen<R>(
    radio: R,
    config: &GatewayConfig,
    logger: SharedLogger,
    cancel: CancellationToken,
) -> Result<ListenSummary, MacError>
where
    R: RadioDevice + Send + 'static,
{
    let radio = Arc::new(Mutex::new(radio));
    configure(&mut *lock(&radio, &logger), config, &logger)?;

    let mut summary = ListenSummary::default();
    loop {
        let rx = {
            let radio = radio.clone();
            let logger = logger.clone();
            tokio::task::spawn_blocking(move || {
                let mut radio = lock(&radio, &logger);
                radio.receive()
            })
        };

        let result = tokio::select! {
            biased;

            _ = cancel.cancelled() => break,
            result = rx => result,
        };

        match result {
            Ok(Ok(Some(packet))) => {
                summary.packets += 1;
                logger.info(format_args!(
                    "received packet len={} data={}",
                    packet.len(),
                    hex::encode_upper(&packet)
                ));
            }
            Ok(Ok(None)) => {
                // Watchdog expired with nothing heard.
            }
            Ok(Err(e)) => {
                summary.errors += 1;
                logger.warn(format_args!("radio receive failed: {}", e));
                tokio::time::sleep(ERROR_BACKOFF).await;
            }
            Err(e) => {
                summary.errors += 1;
                logger.error(format_args!("radio receive task panicked: {}", e));
                tokio::time::sleep(ERROR_BACKOFF).await;
            }
        }
    }

    logger.info(format_args!(
        "gateway stopped packets={} errors={}",
        summary.packets, summary.errors
    ));
    Ok(summary)
}

fn lock<'a, R>(radio: &'a Mutex<R>, logger: &SharedLogger) -> MutexGuard<'a, R> {
    match radio.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            logger.warn(format_args!("radio mutex was poisoned, recovering"));
            poisoned.into_inner()
        }
    }
}
