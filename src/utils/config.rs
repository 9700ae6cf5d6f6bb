//! config.rs
//! Deployment configuration: channel calibration table, default-positions list
//! and loop constants.
//!
//! Loaded once at startup (built-in table or a JSON file), validated, then only
//! ever borrowed. Invalid tables are the one hard failure of the controller.

use std::{
    collections::{BTreeSet, HashSet},
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::control::registry::ChannelId;
use crate::hardware::pwm::{DEFAULT_FREQUENCY_HZ, DISABLED_PULSE, MAX_PAGES, OUTPUTS_PER_PAGE, OutputAddress};
use crate::protocol::parser::{ChannelCode, DEFAULT_LINE_CAPACITY};

pub const DEFAULT_IDLE_THRESHOLD_MS: u64 = 5_000;
/// Code of the bulk "default positions" command; no channel may use it.
pub const DEFAULT_POSITIONS_CODE: &str = "DP";
const MIN_FREQUENCY_HZ: u16 = 24;
const MAX_FREQUENCY_HZ: u16 = 1_526;
const MIN_LINE_CAPACITY: usize = 2;
const MAX_LINE_CAPACITY: usize = 1_024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("no channels configured")]
    NoChannels,
    #[error("channel id {0} configured twice")]
    DuplicateId(ChannelId),
    #[error("channel code {0} configured twice")]
    DuplicateCode(ChannelCode),
    #[error("channel code {0} is reserved for the default positions command")]
    ReservedCode(ChannelCode),
    #[error("channel {code}: min pulse {min} above max pulse {max}")]
    InvertedRange { code: ChannelCode, min: u16, max: u16 },
    #[error("channel {code}: max pulse {max} must stay below the disabled pulse {off}", off = DISABLED_PULSE)]
    PulseOutOfRange { code: ChannelCode, max: u16 },
    #[error("channel {code}: id {id} is beyond the {pages} driver pages", pages = MAX_PAGES)]
    IdOutOfRange { code: ChannelCode, id: ChannelId },
    #[error("channels {0} and {1} are both inverted, only one may be")]
    MultipleInverted(ChannelCode, ChannelCode),
    #[error("default positions refer to unknown channel id {0}")]
    UnknownDefault(ChannelId),
    #[error("line capacity {0} is outside {min}..={max}", min = MIN_LINE_CAPACITY, max = MAX_LINE_CAPACITY)]
    LineCapacity(usize),
    #[error("frequency {0} Hz is outside the driver range {min}..={max}", min = MIN_FREQUENCY_HZ, max = MAX_FREQUENCY_HZ)]
    Frequency(u16),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    pub id: ChannelId,
    pub code: ChannelCode,
    pub min_pulse: u16,
    pub max_pulse: u16,
    #[serde(default)]
    pub inverted: bool,
}

impl ChannelConfig {
    fn new(id: ChannelId, code: &[u8; 2], min_pulse: u16, max_pulse: u16) -> Self {
        Self {
            id,
            code: ChannelCode::from_ascii(*code),
            min_pulse,
            max_pulse,
            inverted: false,
        }
    }

    fn inverted(mut self) -> Self {
        self.inverted = true;
        self
    }
}

fn default_frequency_hz() -> u16 {
    DEFAULT_FREQUENCY_HZ
}

fn default_idle_threshold_ms() -> u64 {
    DEFAULT_IDLE_THRESHOLD_MS
}

fn default_line_capacity() -> usize {
    DEFAULT_LINE_CAPACITY
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControllerConfig {
    #[serde(default = "default_frequency_hz")]
    pub frequency_hz: u16,
    #[serde(default = "default_idle_threshold_ms")]
    pub idle_threshold_ms: u64,
    #[serde(default = "default_line_capacity")]
    pub line_capacity: usize,
    pub channels: Vec<ChannelConfig>,
    /// Channel ids reset to mid-range by `DP`.
    #[serde(default)]
    pub default_positions: Vec<ChannelId>,
}

impl Default for ControllerConfig {
    /// Built-in table for the animatronic head and gripper rig.
    fn default() -> Self {
        let channels = vec![
            ChannelConfig::new(0, b"HH", 180, 580), // head horizontal
            ChannelConfig::new(1, b"HV", 200, 560), // head vertical
            ChannelConfig::new(2, b"EH", 250, 500), // eyes horizontal
            ChannelConfig::new(3, b"EV", 260, 480), // eyes vertical
            ChannelConfig::new(4, b"LU", 220, 520), // upper lids
            ChannelConfig::new(5, b"LL", 220, 520), // lower lids
            ChannelConfig::new(6, b"JW", 200, 450), // jaw
            ChannelConfig::new(7, b"LB", 200, 550), // left brow
            ChannelConfig::new(8, b"RB", 180, 580), // right brow
            ChannelConfig::new(9, b"LC", 230, 530), // left cheek
            ChannelConfig::new(10, b"RC", 230, 530), // right cheek
            ChannelConfig::new(16, b"GR", 240, 500).inverted(), // gripper pinch
            ChannelConfig::new(17, b"WR", 200, 560), // wrist
        ];
        Self {
            frequency_hz: DEFAULT_FREQUENCY_HZ,
            idle_threshold_ms: DEFAULT_IDLE_THRESHOLD_MS,
            line_capacity: DEFAULT_LINE_CAPACITY,
            channels,
            default_positions: (0..=8).collect(),
        }
    }
}

impl ControllerConfig {
    /// Reads and validates a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ControllerConfig = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channels.is_empty() {
            return Err(ConfigError::NoChannels);
        }
        if !(MIN_LINE_CAPACITY..=MAX_LINE_CAPACITY).contains(&self.line_capacity) {
            return Err(ConfigError::LineCapacity(self.line_capacity));
        }
        if !(MIN_FREQUENCY_HZ..=MAX_FREQUENCY_HZ).contains(&self.frequency_hz) {
            return Err(ConfigError::Frequency(self.frequency_hz));
        }

        let mut ids = HashSet::new();
        let mut codes = HashSet::new();
        let mut inverted: Option<ChannelCode> = None;

        for ch in &self.channels {
            if ch.code.as_str() == DEFAULT_POSITIONS_CODE {
                return Err(ConfigError::ReservedCode(ch.code));
            }
            if !ids.insert(ch.id) {
                return Err(ConfigError::DuplicateId(ch.id));
            }
            if !codes.insert(ch.code) {
                return Err(ConfigError::DuplicateCode(ch.code));
            }
            if ch.min_pulse > ch.max_pulse {
                return Err(ConfigError::InvertedRange {
                    code: ch.code,
                    min: ch.min_pulse,
                    max: ch.max_pulse,
                });
            }
            if ch.max_pulse >= DISABLED_PULSE {
                return Err(ConfigError::PulseOutOfRange { code: ch.code, max: ch.max_pulse });
            }
            if ch.id >= MAX_PAGES * OUTPUTS_PER_PAGE {
                return Err(ConfigError::IdOutOfRange { code: ch.code, id: ch.id });
            }
            if ch.inverted {
                if let Some(first) = inverted {
                    return Err(ConfigError::MultipleInverted(first, ch.code));
                }
                inverted = Some(ch.code);
            }
        }

        if let Some(&unknown) = self.default_positions.iter().find(|id| !ids.contains(*id)) {
            return Err(ConfigError::UnknownDefault(unknown));
        }
        Ok(())
    }

    /// Driver pages hosting at least one channel.
    pub fn pages(&self) -> BTreeSet<u8> {
        self.channels
            .iter()
            .map(|c| OutputAddress::for_channel(c.id).page)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn code(s: &str) -> ChannelCode {
        ChannelCode::try_from(s).unwrap()
    }

    #[test]
    fn builtin_table_is_valid() {
        let config = ControllerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.pages().into_iter().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(config.channels.iter().filter(|c| c.inverted).count(), 1);
    }

    #[test]
    fn loads_minimal_json_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "channels": [
                    {{ "id": 0, "code": "HH", "min_pulse": 180, "max_pulse": 580 }},
                    {{ "id": 20, "code": "GR", "min_pulse": 240, "max_pulse": 500, "inverted": true }}
                ],
                "default_positions": [0]
            }}"#
        )
        .unwrap();

        let config = ControllerConfig::from_path(file.path()).unwrap();
        assert_eq!(config.frequency_hz, 60);
        assert_eq!(config.idle_threshold_ms, 5_000);
        assert_eq!(config.line_capacity, 32);
        assert_eq!(config.channels[1].code, code("GR"));
        assert!(config.channels[1].inverted);
    }

    #[test]
    fn json_round_trips_through_pretty_print() {
        let config = ControllerConfig::default();
        let text = config.to_json_pretty().unwrap();
        let back: ControllerConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn missing_file_and_bad_json_are_reported() {
        let err = ControllerConfig::from_path("/nonexistent/servo_hat.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "channels": [ {{ "id": 0, "code": "HHH", "min_pulse": 1, "max_pulse": 2 }} ] }}"#).unwrap();
        let err = ControllerConfig::from_path(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn rejects_broken_tables() {
        let base = ControllerConfig::default();

        let mut c = base.clone();
        c.channels[1].id = 0;
        assert!(matches!(c.validate(), Err(ConfigError::DuplicateId(0))));

        let mut c = base.clone();
        c.channels[1].code = code("HH");
        assert!(matches!(c.validate(), Err(ConfigError::DuplicateCode(_))));

        let mut c = base.clone();
        c.channels[0].min_pulse = 600;
        assert!(matches!(c.validate(), Err(ConfigError::InvertedRange { .. })));

        let mut c = base.clone();
        c.channels[0].max_pulse = DISABLED_PULSE;
        assert!(matches!(c.validate(), Err(ConfigError::PulseOutOfRange { .. })));

        let mut c = base.clone();
        c.channels[0].id = 32;
        assert!(matches!(c.validate(), Err(ConfigError::IdOutOfRange { .. })));

        let mut c = base.clone();
        c.channels[0].inverted = true;
        assert!(matches!(c.validate(), Err(ConfigError::MultipleInverted(..))));

        let mut c = base.clone();
        c.channels[0].code = code("DP");
        assert!(matches!(c.validate(), Err(ConfigError::ReservedCode(_))));

        let mut c = base.clone();
        c.default_positions.push(30);
        assert!(matches!(c.validate(), Err(ConfigError::UnknownDefault(30))));

        let mut c = base.clone();
        c.frequency_hz = 0;
        assert!(matches!(c.validate(), Err(ConfigError::Frequency(0))));

        let mut c = base;
        c.channels.clear();
        assert!(matches!(c.validate(), Err(ConfigError::NoChannels)));
    }

    #[test]
    fn line_capacity_is_bounded_both_ways() {
        let mut c = ControllerConfig::default();
        c.line_capacity = 1;
        assert!(matches!(c.validate(), Err(ConfigError::LineCapacity(1))));

        c.line_capacity = usize::MAX / 2;
        assert!(matches!(c.validate(), Err(ConfigError::LineCapacity(_))));

        c.line_capacity = 1_024;
        c.validate().unwrap();
    }

    #[test]
    fn range_errors_name_the_limits() {
        assert_eq!(
            ConfigError::Frequency(10).to_string(),
            "frequency 10 Hz is outside the driver range 24..=1526"
        );
        assert_eq!(ConfigError::LineCapacity(0).to_string(), "line capacity 0 is outside 2..=1024");
    }
}
