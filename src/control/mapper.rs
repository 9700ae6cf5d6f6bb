//! mapper.rs
//! Pure conversions between user percentages, servo angles and pulse widths.
//!
//! Percent commands live in [0,100], stored angles in [0,180] degrees, and the
//! hardware value is a pulse width inside a channel's calibrated range. Every
//! conversion clamps its input first, then interpolates linearly with integer
//! rounding (half away from zero).

use serde::{Deserialize, Serialize};

pub const MAX_PERCENT: i32 = 100;
pub const MAX_DEGREES: u8 = 180;

/// Calibrated pulse bounds: `min` at 0 degrees, `max` at 180 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PulseRange {
    pub min: u16,
    pub max: u16,
}

impl PulseRange {
    pub fn new(min: u16, max: u16) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn span(&self) -> i32 {
        self.max as i32 - self.min as i32
    }

    #[inline]
    pub fn contains(&self, pulse: u16) -> bool {
        (self.min..=self.max).contains(&pulse)
    }
}

/// Servo angle in whole degrees, always within [0,180].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Angle(u8);

impl Angle {
    pub const MIN: Angle = Angle(0);
    pub const MID: Angle = Angle(MAX_DEGREES / 2);
    pub const MAX: Angle = Angle(MAX_DEGREES);

    /// Builds an angle, clamping anything outside [0,180].
    pub fn clamped(degrees: i32) -> Self {
        Angle(degrees.clamp(0, MAX_DEGREES as i32) as u8)
    }

    #[inline]
    pub fn degrees(self) -> u8 {
        self.0
    }
}

/// `round(numerator / denominator)` with halves rounded away from zero.
#[inline]
fn div_round(numerator: i64, denominator: i64) -> i64 {
    let half = denominator / 2;
    if numerator >= 0 {
        (numerator + half) / denominator
    } else {
        (numerator - half) / denominator
    }
}

/// Maps `value` in [0,domain] onto `range`. `value` must already be clamped.
#[inline]
fn interpolate(value: i32, domain: i32, range: PulseRange) -> u16 {
    let offset = div_round(range.span() as i64 * value as i64, domain as i64);
    (range.min as i64 + offset) as u16
}

/// Inverse of [`interpolate`]: position of `pulse` inside `range`, as a value in [0,domain].
#[inline]
fn inverse_interpolate(pulse: u16, domain: i32, range: PulseRange) -> i32 {
    if range.span() == 0 {
        // Degenerate calibration: every position is the same pulse.
        return domain / 2;
    }
    let clamped = pulse.clamp(range.min, range.max) as i64 - range.min as i64;
    div_round(clamped * domain as i64, range.span() as i64) as i32
}

#[inline]
pub fn clamp_percent(percent: i32) -> i32 {
    percent.clamp(0, MAX_PERCENT)
}

/// Percent of the calibrated range straight to a pulse width.
pub fn from_percentage(percent: i32, range: PulseRange) -> u16 {
    interpolate(clamp_percent(percent), MAX_PERCENT, range)
}

/// Moves `current_pulse` by `delta` percent, clamped to the calibrated range.
pub fn from_relative(delta: i32, range: PulseRange, current_pulse: u16) -> u16 {
    let current = inverse_interpolate(current_pulse, MAX_PERCENT, range);
    from_percentage(current.saturating_add(delta), range)
}

pub fn percent_to_angle(percent: i32) -> Angle {
    let degrees = div_round(clamp_percent(percent) as i64 * MAX_DEGREES as i64, MAX_PERCENT as i64);
    Angle::clamped(degrees as i32)
}

pub fn angle_to_percent(angle: Angle) -> i32 {
    div_round(angle.degrees() as i64 * MAX_PERCENT as i64, MAX_DEGREES as i64) as i32
}

/// Relative move expressed in percent, applied to a stored angle.
pub fn relative_angle(delta: i32, current: Angle) -> Angle {
    percent_to_angle(angle_to_percent(current).saturating_add(delta))
}

pub fn angle_to_pulse(angle: Angle, range: PulseRange) -> u16 {
    interpolate(angle.degrees() as i32, MAX_DEGREES as i32, range)
}
