//! dispatcher.rs
//! Applies decoded commands to channels.
//!
//! - `DP` resets the configured default-positions channels to mid-range.
//! - Unknown codes answer `E100:<code>` and change nothing.
//! - Absolute values are percentages of the calibrated range; the inverted
//!   channel flips them (`100 - v`) first.
//! - Relative values move the stored angle by that many percent, starting from
//!   mid-range when the channel has never been commanded. A token without a
//!   number is relative 0, so it centres an unset channel.
//! - The pulse comes straight from the percentage; the stored angle only feeds
//!   later relative moves.
//!
//! Nothing here fails: out-of-range values clamp and processing always continues
//! with the next token.

use log::{debug, warn};

use crate::control::mapper::{self, Angle, MAX_PERCENT};
use crate::control::registry::{ChannelId, ChannelRegistry};
use crate::hardware::pwm::PwmSink;
use crate::protocol::parser::{ChannelCode, Command};
use crate::protocol::response::{Response, ResponseSink};
use crate::utils::config::{ControllerConfig, DEFAULT_POSITIONS_CODE};
use crate::utils::events::{Event, EventRecorder};
use crate::utils::metrics::Metrics;

/// Percentage every `DP` target is sent to.
const DEFAULT_POSITION_PERCENT: i32 = 50;

/// What a single command did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Moved { channel: ChannelId, angle: Angle, pulse: u16 },
    DefaultPositions { channels: usize },
    Unsupported,
}

pub struct Dispatcher {
    default_positions: Vec<ChannelId>,
    recorder: Option<EventRecorder>,
}

impl Dispatcher {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            default_positions: config.default_positions.clone(),
            recorder: None,
        }
    }

    pub fn with_recorder(mut self, recorder: EventRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn dispatch<P, R>(
        &self,
        command: &Command<'_>,
        registry: &mut ChannelRegistry,
        pwm: &mut P,
        responses: &mut R,
        metrics: &mut Metrics,
        now_ms: u64,
    ) -> Outcome
    where
        P: PwmSink + ?Sized,
        R: ResponseSink + ?Sized,
    {
        metrics.commands += 1;

        if command.code == DEFAULT_POSITIONS_CODE {
            let channels = self.default_positions(registry, pwm, metrics, now_ms);
            responses.emit(Response::Message(format!("DP default positions ({} channels)", channels)));
            return Outcome::DefaultPositions { channels };
        }

        let resolved = ChannelCode::try_from(command.code)
            .ok()
            .and_then(|code| registry.resolve(code));
        let Some(id) = resolved else {
            metrics.unsupported += 1;
            warn!("[Dispatcher] unsupported servo code {:?}", command.code);
            self.record(|| Event::Unsupported { ts_ms: now_ms, code: command.code.to_string() });
            responses.emit(Response::unsupported(command.code));
            return Outcome::Unsupported;
        };

        if command.fallback {
            metrics.fallback_values += 1;
            warn!("[Dispatcher] {} has no numeric value, applying relative 0", command.code);
        }

        let Some((code, last_angle, inverted)) = registry.get(id).map(|c| (c.code, c.last_angle(), c.inverted)) else {
            return Outcome::Unsupported;
        };

        let percent = if command.relative {
            let baseline = match last_angle {
                Some(angle) => angle,
                None => {
                    let baseline = mapper::percent_to_angle(DEFAULT_POSITION_PERCENT);
                    debug!("[Dispatcher] {} unset, baseline {} deg", code, baseline.degrees());
                    registry.record(id, baseline, now_ms);
                    baseline
                }
            };
            mapper::clamp_percent(mapper::angle_to_percent(baseline).saturating_add(command.value))
        } else if inverted {
            mapper::clamp_percent(MAX_PERCENT.saturating_sub(command.value))
        } else {
            mapper::clamp_percent(command.value)
        };
        let angle = mapper::percent_to_angle(percent);

        let Some(pulse) = self.apply(registry, pwm, id, percent, now_ms) else {
            return Outcome::Unsupported;
        };
        metrics.applied += 1;

        let mode = if command.relative { "relative" } else { "absolute" };
        let value = if command.relative {
            format!("{:+}", command.value)
        } else {
            command.value.to_string()
        };
        responses.emit(Response::Message(format!(
            "{} {} {} -> {} deg",
            command.code,
            mode,
            value,
            angle.degrees()
        )));
        self.record(|| Event::Applied {
            ts_ms: now_ms,
            code,
            angle: angle.degrees(),
            pulse,
            relative: command.relative,
        });

        Outcome::Moved { channel: id, angle, pulse }
    }

    /// Sends every default-positions channel to mid-range. Returns how many moved.
    fn default_positions<P>(
        &self,
        registry: &mut ChannelRegistry,
        pwm: &mut P,
        metrics: &mut Metrics,
        now_ms: u64,
    ) -> usize
    where
        P: PwmSink + ?Sized,
    {
        metrics.default_position_resets += 1;
        let mut moved = 0;
        for &id in &self.default_positions {
            if self.apply(registry, pwm, id, DEFAULT_POSITION_PERCENT, now_ms).is_some() {
                moved += 1;
            }
        }
        metrics.applied += moved as u64;
        debug!("[Dispatcher] default positions applied to {} channels", moved);
        moved
    }

    /// Stores the angle for `percent` and drives the output straight from the
    /// percentage. Returns the pulse sent.
    fn apply<P>(
        &self,
        registry: &mut ChannelRegistry,
        pwm: &mut P,
        id: ChannelId,
        percent: i32,
        now_ms: u64,
    ) -> Option<u16>
    where
        P: PwmSink + ?Sized,
    {
        let angle = mapper::percent_to_angle(percent);
        let channel = registry.record(id, angle, now_ms)?;
        let pulse = mapper::from_percentage(percent, channel.range);
        let address = channel.address();
        debug!("[Dispatcher] {} -> {} deg, pulse {} at {}", channel.code, angle.degrees(), pulse, address);
        pwm.set_pulse(address, pulse);
        Some(pulse)
    }

    fn record(&self, event: impl FnOnce() -> Event) {
        if let Some(recorder) = &self.recorder {
            recorder.record(event());
        }
    }
}
