//! watchdog.rs
//! Idle shutoff: a channel not commanded within the idle threshold gets its
//! output switched off.
//!
//! The sweep is poll-based (once per control loop cycle) and re-sends the
//! disabled pulse to idle channels every time; only the transition into idle is
//! logged and traced.

use std::collections::HashSet;

use log::info;

use crate::control::registry::{ChannelId, ChannelRegistry};
use crate::hardware::pwm::{DISABLED_PULSE, PwmSink};
use crate::utils::events::{Event, EventRecorder};

pub struct IdleWatchdog {
    threshold_ms: u64,
    idle: HashSet<ChannelId>,
    recorder: Option<EventRecorder>,
}

impl IdleWatchdog {
    pub fn new(threshold_ms: u64) -> Self {
        Self {
            threshold_ms,
            idle: HashSet::new(),
            recorder: None,
        }
    }

    pub fn with_recorder(mut self, recorder: EventRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn threshold_ms(&self) -> u64 {
        self.threshold_ms
    }

    pub fn is_idle(&self, id: ChannelId) -> bool {
        self.idle.contains(&id)
    }

    /// Disables every channel idle at `now_ms`. Returns how many became idle in this sweep.
    pub fn sweep<P>(&mut self, registry: &ChannelRegistry, pwm: &mut P, now_ms: u64) -> usize
    where
        P: PwmSink + ?Sized,
    {
        let mut newly_idle = 0;

        for channel in registry.channels() {
            if !channel.is_idle(now_ms, self.threshold_ms) {
                self.idle.remove(&channel.id);
                continue;
            }

            pwm.set_pulse(channel.address(), DISABLED_PULSE);

            if self.idle.insert(channel.id) {
                newly_idle += 1;
                info!(
                    "[Watchdog] {} idle for {} ms, output {} off",
                    channel.code,
                    now_ms.saturating_sub(channel.last_update_ms()),
                    channel.address()
                );
                if let Some(recorder) = &self.recorder {
                    recorder.record(Event::Idle { ts_ms: now_ms, code: channel.code });
                }
            }
        }

        newly_idle
    }
}
