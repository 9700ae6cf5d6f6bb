//! registry.rs
//! Per-channel calibration and last commanded position.
//!
//! Channels are built once from the validated configuration and live for the
//! whole run. Only the dispatcher moves them (via [`ChannelRegistry::record`]);
//! the watchdog only reads.

use std::collections::HashMap;

use crate::control::mapper::{Angle, PulseRange};
use crate::hardware::pwm::OutputAddress;
use crate::protocol::parser::ChannelCode;
use crate::utils::config::ControllerConfig;

pub type ChannelId = u8;

#[derive(Debug, Clone)]
pub struct Channel {
    pub id: ChannelId,
    pub code: ChannelCode,
    pub range: PulseRange,
    pub inverted: bool,
    last_angle: Option<Angle>,
    last_update_ms: u64,
}

impl Channel {
    pub fn new(id: ChannelId, code: ChannelCode, range: PulseRange, inverted: bool) -> Self {
        Self {
            id,
            code,
            range,
            inverted,
            last_angle: None,
            last_update_ms: 0,
        }
    }

    /// `None` until the channel is commanded for the first time.
    #[inline]
    pub fn last_angle(&self) -> Option<Angle> {
        self.last_angle
    }

    /// Zero (process start) for channels never commanded.
    #[inline]
    pub fn last_update_ms(&self) -> u64 {
        self.last_update_ms
    }

    #[inline]
    pub fn address(&self) -> OutputAddress {
        OutputAddress::for_channel(self.id)
    }

    /// Idle once strictly more than `threshold_ms` has passed since the last update.
    #[inline]
    pub fn is_idle(&self, now_ms: u64, threshold_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_update_ms) > threshold_ms
    }
}

pub struct ChannelRegistry {
    channels: Vec<Channel>,
    by_code: HashMap<ChannelCode, usize>,
    by_id: HashMap<ChannelId, usize>,
}

impl ChannelRegistry {
    pub fn new(channels: Vec<Channel>) -> Self {
        let by_code = channels.iter().enumerate().map(|(i, c)| (c.code, i)).collect();
        let by_id = channels.iter().enumerate().map(|(i, c)| (c.id, i)).collect();
        Self { channels, by_code, by_id }
    }

    pub fn from_config(config: &ControllerConfig) -> Self {
        let channels = config
            .channels
            .iter()
            .map(|c| Channel::new(c.id, c.code, PulseRange::new(c.min_pulse, c.max_pulse), c.inverted))
            .collect();
        Self::new(channels)
    }

    pub fn resolve(&self, code: ChannelCode) -> Option<ChannelId> {
        self.by_code.get(&code).map(|&i| self.channels[i].id)
    }

    pub fn get(&self, id: ChannelId) -> Option<&Channel> {
        self.by_id.get(&id).map(|&i| &self.channels[i])
    }

    /// Stores a new position. The timestamp never moves backwards.
    pub fn record(&mut self, id: ChannelId, angle: Angle, now_ms: u64) -> Option<&Channel> {
        let index = *self.by_id.get(&id)?;
        let channel = &mut self.channels[index];
        channel.last_angle = Some(angle);
        channel.last_update_ms = channel.last_update_ms.max(now_ms);
        Some(channel)
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
