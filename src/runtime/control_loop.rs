//! control_loop.rs
//! Single-threaded cooperative control loop.
//!
//! Each cycle:
//! 1. pulls whatever bytes the transport has delivered (never blocks),
//! 2. assembles at most one complete line and dispatches all of its tokens,
//! 3. sweeps the idle watchdog.
//!
//! Partial lines survive across cycles. [`run`] paces cycles with a
//! `SpinSleeper` and stops once the transport is closed and fully consumed.

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use log::{debug, error, info, warn};
use spin_sleep::{SpinSleeper, SpinStrategy};

use crate::control::dispatcher::Dispatcher;
use crate::control::registry::ChannelRegistry;
use crate::control::watchdog::IdleWatchdog;
use crate::hardware::clock::Clock;
use crate::hardware::pwm::{DISABLED_PULSE, PwmSink};
use crate::hardware::transport::ByteSource;
use crate::protocol::parser::{Line, LineAssembler, tokenize};
use crate::protocol::response::{Response, ResponseSink};
use crate::utils::config::ControllerConfig;
use crate::utils::events::{Event, EventRecorder};
use crate::utils::metrics::Metrics;

pub const DEFAULT_LOOP_PERIOD: Duration = Duration::from_millis(2);
const SLEEPER_ACCURACY_NS: u32 = 100_000;

pub struct Controller<P, C> {
    registry: ChannelRegistry,
    assembler: LineAssembler,
    dispatcher: Dispatcher,
    watchdog: IdleWatchdog,
    metrics: Metrics,
    recorder: Option<EventRecorder>,
    pwm: P,
    clock: C,
}

impl<P: PwmSink, C: Clock> Controller<P, C> {
    /// Builds the controller state and configures every driver page in use.
    pub fn new(config: &ControllerConfig, mut pwm: P, clock: C) -> Self {
        for page in config.pages() {
            pwm.configure(page, config.frequency_hz);
        }
        info!(
            "[Controller] {} channels, {} Hz, idle after {} ms",
            config.channels.len(),
            config.frequency_hz,
            config.idle_threshold_ms
        );

        Self {
            registry: ChannelRegistry::from_config(config),
            assembler: LineAssembler::new(config.line_capacity),
            dispatcher: Dispatcher::new(config),
            watchdog: IdleWatchdog::new(config.idle_threshold_ms),
            metrics: Metrics::default(),
            recorder: None,
            pwm,
            clock,
        }
    }

    /// Traces dispatch decisions, idle transitions and overflowed lines.
    pub fn with_recorder(mut self, recorder: EventRecorder) -> Self {
        self.dispatcher = self.dispatcher.with_recorder(recorder.clone());
        self.watchdog = self.watchdog.with_recorder(recorder.clone());
        self.recorder = Some(recorder);
        self
    }

    pub fn startup<R: ResponseSink + ?Sized>(&mut self, out: &mut R) {
        out.emit(Response::Message(format!("servo_hat ready ({} channels)", self.registry.len())));
    }

    /// Runs one cycle over `pending`. Returns true when a line was handled.
    pub fn cycle<R: ResponseSink + ?Sized>(&mut self, pending: &mut VecDeque<u8>, out: &mut R) -> bool {
        self.metrics.cycles += 1;

        let handled = match self.assembler.drain(pending) {
            Some(line) => {
                self.handle_line(&line, out);
                true
            }
            None => false,
        };

        let now = self.clock.now_ms();
        let newly_idle = self.watchdog.sweep(&self.registry, &mut self.pwm, now);
        self.metrics.idle_transitions += newly_idle as u64;

        handled
    }

    /// Echoes a complete line and dispatches its tokens in order.
    pub fn handle_line<R: ResponseSink + ?Sized>(&mut self, line: &Line, out: &mut R) {
        let now = self.clock.now_ms();
        self.metrics.lines += 1;

        if line.truncated {
            self.metrics.truncated_lines += 1;
            warn!(
                "[Controller] line longer than {} bytes, kept {:?}",
                self.assembler.capacity() - 1,
                line.text
            );
            if let Some(recorder) = &self.recorder {
                recorder.record(Event::Truncated { ts_ms: now, kept: line.text.len() });
            }
        }

        let text = line.text.trim_end_matches('\r');
        out.emit(Response::Echo(text.to_string()));

        for command in tokenize(text) {
            self.dispatcher
                .dispatch(&command, &mut self.registry, &mut self.pwm, out, &mut self.metrics, now);
        }
    }

    /// Drops any partial line and switches every output off.
    pub fn shutdown(&mut self) {
        let partial = self.assembler.partial_len();
        if partial > 0 {
            debug!("[Controller] discarding {} bytes of unterminated input", partial);
            self.assembler = LineAssembler::new(self.assembler.capacity());
        }

        for channel in self.registry.channels() {
            self.pwm.set_pulse(channel.address(), DISABLED_PULSE);
        }
        info!("[Controller] all {} outputs disabled", self.registry.len());
        self.metrics.log_summary();
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn watchdog(&self) -> &IdleWatchdog {
        &self.watchdog
    }

    pub fn pwm(&self) -> &P {
        &self.pwm
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }
}

/// Pins the calling thread to `core`. Returns false when the core does not exist
/// or the OS refuses.
pub fn pin_current_thread(core: usize) -> bool {
    let core_ids = core_affinity::get_core_ids().unwrap_or_default();
    match core_ids.get(core) {
        Some(core_id) => {
            if core_affinity::set_for_current(*core_id) {
                info!("[Controller] control loop pinned to core {}", core);
                true
            } else {
                error!("[Controller] failed to pin control loop to core {}", core);
                false
            }
        }
        None => {
            error!("[Controller] core {} not among {} available cores", core, core_ids.len());
            false
        }
    }
}

/// Drives `controller` from `source` until end of input, then shuts it down.
pub fn run<P, C, R>(controller: &mut Controller<P, C>, mut source: ByteSource, out: &mut R, period: Duration)
where
    P: PwmSink,
    C: Clock,
    R: ResponseSink + ?Sized,
{
    let sleeper = SpinSleeper::new(SLEEPER_ACCURACY_NS).with_spin_strategy(SpinStrategy::YieldThread);
    let mut pending = VecDeque::new();
    let mut late_cycles = 0u64;

    controller.startup(out);
    let mut next_release = Instant::now() + period;

    loop {
        source.poll(&mut pending);
        let handled = controller.cycle(&mut pending, out);

        // Lines already buffered are still drained after the reader is gone.
        if source.is_closed() && !handled && pending.is_empty() {
            break;
        }

        let now = Instant::now();
        if now < next_release {
            sleeper.sleep(next_release - now);
            next_release += period;
        } else {
            late_cycles += 1;
            next_release = now + period;
        }
    }

    info!("[Controller] input closed after {} cycles ({} late)", controller.metrics().cycles, late_cycles);
    controller.shutdown();
    source.join();
}
