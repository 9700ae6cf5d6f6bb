//! pwm.rs
//! PWM output side: addressing, the sink trait and the sinks shipped with the crate.
//!
//! Outputs are spread over driver pages of 16 channels each (one board per
//! page, I2C address `0x40 + page`). Logical channel ids map to a page and a
//! local index through [`OutputAddress::for_channel`]; nothing else in the
//! crate needs to know about the split.

use std::{collections::HashMap, fmt};

use log::{debug, info};

use crate::control::registry::ChannelId;

pub const OUTPUTS_PER_PAGE: u8 = 16;
pub const MAX_PAGES: u8 = 2;
pub const BASE_I2C_ADDRESS: u8 = 0x40;
/// Pulse value the driver interprets as "output fully off". Outside every calibration.
pub const DISABLED_PULSE: u16 = 4096;
/// Analog servos refresh at ~60 Hz.
pub const DEFAULT_FREQUENCY_HZ: u16 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputAddress {
    pub page: u8,
    pub local: u8,
}

impl OutputAddress {
    pub fn for_channel(id: ChannelId) -> Self {
        Self {
            page: id / OUTPUTS_PER_PAGE,
            local: id % OUTPUTS_PER_PAGE,
        }
    }

    pub fn i2c_address(&self) -> u8 {
        BASE_I2C_ADDRESS + self.page
    }
}

impl fmt::Display for OutputAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02x}/{}", self.i2c_address(), self.local)
    }
}

/// Anything able to generate servo pulses.
pub trait PwmSink {
    /// Sets the refresh frequency of one driver page.
    fn configure(&mut self, page: u8, frequency_hz: u16);

    /// Drives one output. [`DISABLED_PULSE`] switches it off.
    fn set_pulse(&mut self, address: OutputAddress, pulse: u16);
}

impl<P: PwmSink + ?Sized> PwmSink for &mut P {
    fn configure(&mut self, page: u8, frequency_hz: u16) {
        (**self).configure(page, frequency_hz)
    }

    fn set_pulse(&mut self, address: OutputAddress, pulse: u16) {
        (**self).set_pulse(address, pulse)
    }
}

/// Sink that only logs. Repeated identical pulses are not logged again.
#[derive(Default)]
pub struct DryRunPwm {
    last: HashMap<OutputAddress, u16>,
    writes: u64,
}

impl DryRunPwm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> u64 {
        self.writes
    }

    pub fn current(&self, address: OutputAddress) -> Option<u16> {
        self.last.get(&address).copied()
    }
}

impl PwmSink for DryRunPwm {
    fn configure(&mut self, page: u8, frequency_hz: u16) {
        info!(
            "[PWM] page {} (0x{:02x}) at {} Hz",
            page,
            BASE_I2C_ADDRESS + page,
            frequency_hz
        );
    }

    fn set_pulse(&mut self, address: OutputAddress, pulse: u16) {
        self.writes += 1;
        if self.last.insert(address, pulse) == Some(pulse) {
            return;
        }
        if pulse == DISABLED_PULSE {
            debug!("[PWM] {} off", address);
        } else {
            debug!("[PWM] {} -> {}", address, pulse);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PwmCall {
    Configure { page: u8, frequency_hz: u16 },
    SetPulse { address: OutputAddress, pulse: u16 },
}

/// Keeps every call in order. Used by tests and benchmarks.
#[derive(Debug, Default)]
pub struct RecordingPwm {
    pub calls: Vec<PwmCall>,
}

impl RecordingPwm {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(address, pulse)` of every `set_pulse` call so far.
    pub fn pulses(&self) -> Vec<(OutputAddress, u16)> {
        self.calls
            .iter()
            .filter_map(|c| match *c {
                PwmCall::SetPulse { address, pulse } => Some((address, pulse)),
                PwmCall::Configure { .. } => None,
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.calls.clear();
    }
}

impl PwmSink for RecordingPwm {
    fn configure(&mut self, page: u8, frequency_hz: u16) {
        self.calls.push(PwmCall::Configure { page, frequency_hz });
    }

    fn set_pulse(&mut self, address: OutputAddress, pulse: u16) {
        self.calls.push(PwmCall::SetPulse { address, pulse });
    }
}
