use std::{collections::VecDeque, io::Cursor, path::Path, time::Duration};

use servo_hat::hardware::clock::{ManualClock, MonotonicClock};
use servo_hat::hardware::pwm::{DISABLED_PULSE, OutputAddress, RecordingPwm};
use servo_hat::hardware::transport::ByteSource;
use servo_hat::protocol::response::{LineWriter, Response};
use servo_hat::runtime::control_loop::{Controller, run};
use servo_hat::utils::config::ControllerConfig;
use servo_hat::utils::events::{Event, EventRecorder};

fn send(ctl: &mut Controller<RecordingPwm, &ManualClock>, bytes: &[u8]) -> Vec<String> {
    let mut pending: VecDeque<u8> = bytes.iter().copied().collect();
    let mut out: Vec<Response> = Vec::new();
    while ctl.cycle(&mut pending, &mut out) {}
    out.iter().map(|r| r.to_string()).collect()
}

fn pulse_of(ctl: &Controller<RecordingPwm, &ManualClock>, id: u8) -> Option<u16> {
    let address = OutputAddress::for_channel(id);
    ctl.pwm()
        .pulses()
        .into_iter()
        .rev()
        .find(|(a, _)| *a == address)
        .map(|(_, p)| p)
}

#[test]
fn shipped_config_matches_builtin_table() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/servo_hat.json");
    let config = ControllerConfig::from_path(&path).unwrap();
    assert_eq!(config, ControllerConfig::default());
}

#[test]
fn absolute_head_command() {
    let clock = ManualClock::new(0);
    let mut ctl = Controller::new(&ControllerConfig::default(), RecordingPwm::new(), &clock);
    let out = send(&mut ctl, b"HH90\n");
    assert_eq!(out, vec!["C:HH90", "M:HH absolute 90 -> 162 deg"]);
    assert_eq!(pulse_of(&ctl, 0), Some(540));

    send(&mut ctl, b"HH50\n");
    assert_eq!(pulse_of(&ctl, 0), Some(380));
}

#[test]
fn relative_brow_from_unset() {
    let clock = ManualClock::new(0);
    let mut ctl = Controller::new(&ControllerConfig::default(), RecordingPwm::new(), &clock);
    let out = send(&mut ctl, b"RB+10\n");
    assert_eq!(out, vec!["C:RB+10", "M:RB relative +10 -> 108 deg"]);
    assert_eq!(pulse_of(&ctl, 8), Some(420));
}

#[test]
fn default_positions_and_unknown_code_in_one_line() {
    let clock = ManualClock::new(0);
    let mut ctl = Controller::new(&ControllerConfig::default(), RecordingPwm::new(), &clock);
    let out = send(&mut ctl, b"ZZ10 DP\n");
    assert_eq!(out, vec!["C:ZZ10 DP", "E100:ZZ", "M:DP default positions (9 channels)"]);

    for id in 0..=8u8 {
        let range = ctl.registry().get(id).map(|c| c.range).unwrap();
        assert_eq!(pulse_of(&ctl, id), Some(range.min + (range.max - range.min) / 2));
    }
    assert_eq!(pulse_of(&ctl, 16), None);
}

#[test]
fn gripper_on_second_board_is_inverted() {
    let clock = ManualClock::new(0);
    let mut ctl = Controller::new(&ControllerConfig::default(), RecordingPwm::new(), &clock);
    send(&mut ctl, b"GR0 WR100\n");
    assert_eq!(pulse_of(&ctl, 16), Some(500));
    assert_eq!(pulse_of(&ctl, 17), Some(560));
    assert_eq!(OutputAddress::for_channel(16).i2c_address(), 0x41);
}

#[test]
fn idle_channels_are_switched_off_including_never_commanded() {
    let clock = ManualClock::new(0);
    let mut ctl = Controller::new(&ControllerConfig::default(), RecordingPwm::new(), &clock);
    send(&mut ctl, b"HH50\n");

    clock.set(5_000);
    send(&mut ctl, b"\n");
    assert_eq!(pulse_of(&ctl, 0), Some(380));
    assert_eq!(pulse_of(&ctl, 17), None);

    clock.set(5_001);
    send(&mut ctl, b"\n");
    for channel in ctl.registry().channels() {
        assert_eq!(pulse_of(&ctl, channel.id), Some(DISABLED_PULSE));
    }
    assert_eq!(ctl.metrics().idle_transitions, 13);

    send(&mut ctl, b"EV20\n");
    assert_ne!(pulse_of(&ctl, 3), Some(DISABLED_PULSE));
}

#[test]
fn custom_config_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rig.json");
    std::fs::write(
        &path,
        r#"{
            "idle_threshold_ms": 100,
            "line_capacity": 8,
            "channels": [
                { "id": 20, "code": "TL", "min_pulse": 100, "max_pulse": 300 }
            ],
            "default_positions": [20]
        }"#,
    )
    .unwrap();
    let config = ControllerConfig::from_path(&path).unwrap();
    assert_eq!(config.frequency_hz, 60);

    let clock = ManualClock::new(0);
    let mut ctl = Controller::new(&config, RecordingPwm::new(), &clock);
    let out = send(&mut ctl, b"TL25 HH90\n");
    // Seven content bytes fit.
    assert_eq!(out, vec!["C:TL25 HH", "M:TL absolute 25 -> 45 deg", "E100:HH"]);
    assert_eq!(pulse_of(&ctl, 20), Some(150));
    assert_eq!(ctl.metrics().truncated_lines, 1);
}

#[test]
fn stdin_style_session_end_to_end() {
    let input = b"HH90 RB+10\nGRx\nDP\n".to_vec();
    let recorder = EventRecorder::new();
    let mut ctl = Controller::new(&ControllerConfig::default(), RecordingPwm::new(), MonotonicClock::new())
        .with_recorder(recorder.clone());
    let mut out = LineWriter::new(Vec::new());

    run(&mut ctl, ByteSource::spawn("scenario", Cursor::new(input)), &mut out, Duration::from_micros(100));

    let text = String::from_utf8(out.into_inner()).unwrap();
    assert_eq!(
        text,
        "M:servo_hat ready (13 channels)\n\
         C:HH90 RB+10\n\
         M:HH absolute 90 -> 162 deg\n\
         M:RB relative +10 -> 108 deg\n\
         C:GRx\n\
         M:GR relative +0 -> 90 deg\n\
         C:DP\n\
         M:DP default positions (9 channels)\n"
    );
    assert_eq!(ctl.metrics().fallback_values, 1);

    let applied = recorder
        .drain()
        .into_iter()
        .filter(|e| matches!(e, Event::Applied { .. }))
        .count();
    assert_eq!(applied, 3);
}
