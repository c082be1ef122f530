//! Application configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{CardcastError, CardcastResult};

/// Lowest frame rate an export accepts.
pub const MIN_FPS: u32 = 1;
/// Highest frame rate an export accepts.
pub const MAX_FPS: u32 = 60;
/// Frame rates outside this range work but are outside what card animations are tuned for.
pub const PRACTICAL_FPS: std::ops::RangeInclusive<u32> = 6..=30;
/// Longest export, in milliseconds. All blocks live in one cluster whose
/// relative timecodes must fit a signed 16-bit millisecond offset.
pub const MAX_DURATION_MS: u64 = i16::MAX as u64;

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory where exported clips are written by default.
    pub output_dir: PathBuf,

    /// Default export settings.
    pub export: ExportDefaults,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Default export parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDefaults {
    /// Frames per second.
    pub fps: u32,

    /// Total clip length in milliseconds.
    pub duration_ms: u64,

    /// Target bitrate in bits per second.
    pub bitrate: u32,

    /// Background used when the surface does not provide one.
    pub background: RgbColor,

    /// Burn a frame progress marker into each captured frame.
    #[serde(default)]
    pub debug_frame_counter: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "cardcast=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

/// An opaque sRGB color. Serialized as `#rrggbb`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RgbColor(pub [u8; 3]);

impl RgbColor {
    pub const WHITE: RgbColor = RgbColor([0xff, 0xff, 0xff]);

    pub fn channels(&self) -> [u8; 3] {
        self.0
    }
}

impl Default for RgbColor {
    fn default() -> Self {
        Self::WHITE
    }
}

impl fmt::Display for RgbColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b] = self.0;
        write!(f, "#{r:02x}{g:02x}{b:02x}")
    }
}

impl FromStr for RgbColor {
    type Err = CardcastError;

    /// Parses `#rrggbb` or the `#rgb` shorthand.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.trim().strip_prefix('#').ok_or_else(|| {
            CardcastError::configuration(format!("Color must start with '#': {s:?}"))
        })?;
        let invalid = || CardcastError::configuration(format!("Invalid hex color: {s:?}"));

        let expanded = match hex.len() {
            3 => hex.chars().flat_map(|c| [c, c]).collect::<String>(),
            6 => hex.to_string(),
            _ => return Err(invalid()),
        };

        let mut channels = [0u8; 3];
        for (i, channel) in channels.iter_mut().enumerate() {
            let pair = expanded.get(i * 2..i * 2 + 2).ok_or_else(invalid)?;
            *channel = u8::from_str_radix(pair, 16).map_err(|_| invalid())?;
        }
        Ok(Self(channels))
    }
}

impl Serialize for RgbColor {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for RgbColor {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_dir: dirs_default_output(),
            export: ExportDefaults::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ExportDefaults {
    fn default() -> Self {
        Self {
            fps: 30,
            duration_ms: 5000,
            bitrate: 2_500_000,
            background: RgbColor::WHITE,
            debug_frame_counter: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl ExportDefaults {
    /// Check the values against the limits the export pipeline supports.
    pub fn validate(&self) -> CardcastResult<()> {
        validate_export_params(self.fps, self.duration_ms, self.bitrate)
    }
}

/// Validate frame rate, duration, and bitrate for a single export.
pub fn validate_export_params(fps: u32, duration_ms: u64, bitrate: u32) -> CardcastResult<()> {
    if !(MIN_FPS..=MAX_FPS).contains(&fps) {
        return Err(CardcastError::configuration(format!(
            "Frame rate {fps} outside supported range {MIN_FPS}..={MAX_FPS}"
        )));
    }
    if !PRACTICAL_FPS.contains(&fps) {
        tracing::warn!(
            fps,
            "Frame rate outside the practical {}..={} range",
            PRACTICAL_FPS.start(),
            PRACTICAL_FPS.end()
        );
    }
    if duration_ms == 0 || duration_ms > MAX_DURATION_MS {
        return Err(CardcastError::configuration(format!(
            "Duration {duration_ms}ms outside supported range 1..={MAX_DURATION_MS}ms"
        )));
    }
    if bitrate == 0 {
        return Err(CardcastError::configuration("Bitrate must be positive"));
    }
    Ok(())
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }

    /// Where `load` and `save` look for the config file.
    pub fn path() -> PathBuf {
        config_file_path()
    }
}

/// Standard config file location.
fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("cardcast").join("config.json")
}

/// Default output directory for exported clips.
fn dirs_default_output() -> PathBuf {
    let base = std::env::var("XDG_VIDEOS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join("Videos")
        });
    base.join("cardcast")
}
