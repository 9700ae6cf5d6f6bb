//! # servo_hat
//! Control core of a multi-channel animatronic servo controller.
//!
//! Text commands arrive over a serial link, are parsed into per-channel
//! position commands, mapped through each channel's calibration into PWM
//! pulse widths and pushed to a PWM sink. Channels left alone for longer than
//! the idle threshold are switched off.
//!
//! ## Layout
//! - **protocol:** line assembly, token parsing, response lines (`C:`, `M:`, `E100:`).
//! - **control:** channel registry, angle mapper, dispatcher, idle watchdog.
//! - **hardware:** PWM sink trait and sinks, output addressing, clocks, transport reader.
//! - **runtime:** the cooperative control loop tying everything together.
//! - **utils:** configuration, metrics and the event trace.

pub mod control;
pub mod hardware;
pub mod protocol;
pub mod runtime;
pub mod utils;
