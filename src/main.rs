//! # servo_hat entry point
//! Reads command lines from stdin (or a serial port), drives the servo channels
//! through the dry-run PWM sink and writes `C:`/`M:`/`E100:` responses back on
//! the same link.
//!
//! ## Outputs
//! - Responses: stdout, or the serial port when `--port` is given.
//! - Logs: stderr via `env_logger` (`RUST_LOG`, default `info`).
//! - `--trace events.csv`: event trace plus `events_metrics.csv` summary.

use std::{
    error::Error,
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use clap::Parser;
use env_logger::Env;
use log::{info, warn};

use servo_hat::hardware::clock::MonotonicClock;
use servo_hat::hardware::pwm::DryRunPwm;
use servo_hat::hardware::transport::{ByteSource, DEFAULT_BAUD, open_serial};
use servo_hat::protocol::response::LineWriter;
use servo_hat::runtime::control_loop::{Controller, DEFAULT_LOOP_PERIOD, pin_current_thread, run};
use servo_hat::utils::config::ControllerConfig;
use servo_hat::utils::events::EventRecorder;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// JSON channel table; the built-in table is used when absent
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Serial device to read commands from instead of stdin
    #[arg(short, long)]
    port: Option<String>,
    #[arg(long, default_value_t = DEFAULT_BAUD)]
    baud: u32,
    #[arg(long, default_value_t = DEFAULT_LOOP_PERIOD.as_micros() as u64)]
    loop_period_us: u64,
    /// Pin the control loop to this CPU core
    #[arg(long)]
    core: Option<usize>,
    /// CSV file receiving the event trace
    #[arg(long)]
    trace: Option<PathBuf>,
    /// Print the effective configuration as JSON and exit
    #[arg(long, default_value_t = false)]
    print_config: bool,
}

fn metrics_path(trace: &Path) -> PathBuf {
    let stem = trace.file_stem().and_then(|s| s.to_str()).unwrap_or("trace");
    trace.with_file_name(format!("{}_metrics.csv", stem))
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => ControllerConfig::from_path(path)?,
        None => {
            let config = ControllerConfig::default();
            config.validate()?;
            config
        }
    };

    if args.print_config {
        println!("{}", config.to_json_pretty()?);
        return Ok(());
    }

    info!("[Main] === SERVO HAT START ===");

    if let Some(core) = args.core {
        pin_current_thread(core);
    }

    let trace = args.trace.as_ref().map(|path| {
        let recorder = EventRecorder::new();
        let exporter = recorder.start_exporter(path.clone());
        (path.clone(), recorder, exporter)
    });

    let mut controller = Controller::new(&config, DryRunPwm::new(), MonotonicClock::new());
    if let Some((_, recorder, _)) = &trace {
        controller = controller.with_recorder(recorder.clone());
    }

    let period = Duration::from_micros(args.loop_period_us.max(1));
    match &args.port {
        Some(device) => {
            let port = open_serial(device, args.baud)?;
            let mut out = LineWriter::new(port.try_clone()?);
            run(&mut controller, ByteSource::spawn(device, port), &mut out, period);
        }
        None => {
            let mut out = LineWriter::new(io::stdout());
            run(&mut controller, ByteSource::spawn("stdin", io::stdin()), &mut out, period);
        }
    }

    if let Some((path, recorder, exporter)) = trace {
        recorder.finish(exporter);
        if recorder.dropped() > 0 {
            warn!("[Main] trace queue full, {} events dropped", recorder.dropped());
        }
        let summary = metrics_path(&path);
        controller.metrics().export_csv(&summary)?;
        info!("[Main] trace written to {} and {}", path.display(), summary.display());
    }

    info!("[Main] === SERVO HAT FINISHED ===");
    Ok(())
}
