//! Simulated MAC device for host tests.

use super::{Band, DataRate, Downlink, JoinMode, MacDevice, MacError, PowerIndex};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

/// One uplink as the simulated network saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct SentFrame {
    pub confirmed: bool,
    pub port: u8,
    pub payload: Vec<u8>,
}

/// Observable state of a [`SimMac`], shared with the test after the device
/// has been moved into a session.
#[derive(Debug, Default)]
pub struct SimState {
    pub connects: usize,
    pub disconnects: usize,
    pub calls: Vec<String>,
    pub data_rate: u8,
    pub power: u8,
    pub adr: bool,
    pub duty_cycles: BTreeMap<u8, f32>,
    pub frames: Vec<SentFrame>,
    pub data_rate_writes: Vec<u8>,
}

/// Scripted stand-in for a modem.
pub struct SimMac {
    pub state: Arc<Mutex<SimState>>,
    join_accepted: bool,
    fail_connect: bool,
    fail_transmits: bool,
    downlinks: VecDeque<Option<Downlink>>,
}

impl SimMac {
    pub fn new() -> (Self, Arc<Mutex<SimState>>) {
        let state = Arc::new(Mutex::new(SimState::default()));
        (
            Self {
                state: state.clone(),
                join_accepted: true,
                fail_connect: false,
                fail_transmits: false,
                downlinks: VecDeque::new(),
            },
            state,
        )
    }

    pub fn deny_join(mut self) -> Self {
        self.join_accepted = false;
        self
    }

    /// The device never answers the version query on connect.
    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    pub fn failing_transmits(mut self) -> Self {
        self.fail_transmits = true;
        self
    }

    /// Queue the downlink returned by the next transmit (`None` = no downlink).
    pub fn queue_downlink(mut self, downlink: Option<Downlink>) -> Self {
        self.downlinks.push_back(downlink);
        self
    }

    fn record(&self, call: impl Into<String>) {
        let call = call.into();
        self.with_state(|s| s.calls.push(call));
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut SimState) -> R) -> R {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut state)
    }
}

impl MacDevice for SimMac {
    fn connect(&mut self) -> Result<(), MacError> {
        self.with_state(|s| s.connects += 1);
        self.record("connect");
        if self.fail_connect {
            return Err(MacError::Timeout {
                command: "sys get ver".to_string(),
            });
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        self.with_state(|s| s.disconnects += 1);
        self.record("disconnect");
    }

    fn version(&mut self) -> Result<String, MacError> {
        Ok("RN2483 1.0.3 (simulated)".to_string())
    }

    fn mac_reset(&mut self, band: Band) -> Result<(), MacError> {
        self.record(format!("mac_reset {}", band.mhz()));
        Ok(())
    }

    fn set_device_eui(&mut self, eui: &str) -> Result<(), MacError> {
        self.record(format!("deveui {}", eui));
        Ok(())
    }

    fn set_application_eui(&mut self, eui: &str) -> Result<(), MacError> {
        self.record(format!("appeui {}", eui));
        Ok(())
    }

    fn set_application_key(&mut self, _key: &str) -> Result<(), MacError> {
        self.record("appkey");
        Ok(())
    }

    fn set_data_rate(&mut self, data_rate: DataRate) -> Result<(), MacError> {
        self.with_state(|s| {
            s.data_rate = data_rate.index();
            s.data_rate_writes.push(data_rate.index());
        });
        self.record(format!("dr {}", data_rate));
        Ok(())
    }

    fn data_rate(&mut self) -> Result<DataRate, MacError> {
        let index = self.with_state(|s| s.data_rate);
        DataRate::new(index).ok_or_else(|| MacError::InvalidArgument(index.to_string()))
    }

    fn set_power_index(&mut self, power: PowerIndex) -> Result<(), MacError> {
        self.with_state(|s| s.power = power.0);
        self.record(format!("pwridx {}", power));
        Ok(())
    }

    fn power_index(&mut self) -> Result<PowerIndex, MacError> {
        Ok(PowerIndex(self.with_state(|s| s.power)))
    }

    fn set_adr(&mut self, enabled: bool) -> Result<(), MacError> {
        self.with_state(|s| s.adr = enabled);
        self.record(format!("adr {}", enabled));
        Ok(())
    }

    fn adr(&mut self) -> Result<bool, MacError> {
        Ok(self.with_state(|s| s.adr))
    }

    fn set_channel_duty_cycle(&mut self, channel: u8, percent: f32) -> Result<(), MacError> {
        self.with_state(|s| s.duty_cycles.insert(channel, percent));
        self.record(format!("dcycle {}", channel));
        Ok(())
    }

    fn join(&mut self, mode: JoinMode) -> Result<bool, MacError> {
        self.record(format!("join {}", mode.as_str()));
        Ok(self.join_accepted)
    }

    fn transmit(
        &mut self,
        confirmed: bool,
        port: u8,
        payload: &[u8],
    ) -> Result<Option<Downlink>, MacError> {
        self.record(format!("tx {}", port));
        if self.fail_transmits {
            return Err(MacError::Rejected {
                command: format!("mac tx {}", port),
                reply: "no_free_ch".to_string(),
            });
        }
        self.with_state(|s| {
            s.frames.push(SentFrame {
                confirmed,
                port,
                payload: payload.to_vec(),
            })
        });
        Ok(self.downlinks.pop_front().flatten())
    }
}
