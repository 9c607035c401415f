use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::protocol;

pub const DEFAULT_SERVER: &str = "ws://localhost:8080/";
/// Seconds between reconnect attempts, both sides
pub const DEFAULT_RECONNECT_SECS: f64 = 5.0;
/// Minimum gap between two frame sends (~33 FPS ceiling)
pub const DEFAULT_FRAME_INTERVAL_MS: u64 = 30;
/// QQVGA keeps frames small on slow links
pub const DEFAULT_WIDTH: u32 = 160;
pub const DEFAULT_HEIGHT: u32 = 120;
pub const DEFAULT_JPEG_QUALITY: u8 = 30;
pub const DEFAULT_BUFFER_COUNT: usize = 2;
/// Largest frame edge the camera will encode
pub const MAX_DIMENSION: u32 = 8192;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("{0}")]
    InvalidEndpoint(String),
    #[error("invalid {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Where the camera gets its JPEG frames from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    /// Generated moving test pattern
    Synthetic,
    /// Primary display
    Screen,
    /// JPEG files in a directory, looped
    Directory(PathBuf),
}

impl FromStr for SourceKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "synthetic" | "test" => Ok(SourceKind::Synthetic),
            "screen" => Ok(SourceKind::Screen),
            _ => match s.strip_prefix("dir:") {
                Some(path) if !path.is_empty() => Ok(SourceKind::Directory(PathBuf::from(path))),
                _ => Err(ConfigError::InvalidValue {
                    field: "source",
                    reason: format!("'{}' (expected synthetic, screen or dir:<path>)", s),
                }),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct ViewerConfig {
    pub server_uri: String,
    pub reconnect_delay: Duration,
    pub auto_connect: bool,
    /// How often the host loop services the connection
    pub tick_interval: Duration,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            server_uri: DEFAULT_SERVER.to_string(),
            reconnect_delay: Duration::from_secs_f64(DEFAULT_RECONNECT_SECS),
            auto_connect: true,
            tick_interval: Duration::from_millis(16),
        }
    }
}

impl ViewerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        protocol::validate_endpoint(&self.server_uri).map_err(ConfigError::InvalidEndpoint)?;
        if self.reconnect_delay.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "reconnect_delay_s",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CameraConfig {
    pub server_uri: String,
    pub reconnect_interval: Duration,
    pub min_frame_interval: Duration,
    pub source: SourceKind,
    pub width: u32,
    pub height: u32,
    pub jpeg_quality: u8,
    pub buffer_count: usize,
    pub tick_interval: Duration,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            server_uri: DEFAULT_SERVER.to_string(),
            reconnect_interval: Duration::from_secs_f64(DEFAULT_RECONNECT_SECS),
            min_frame_interval: Duration::from_millis(DEFAULT_FRAME_INTERVAL_MS),
            source: SourceKind::Synthetic,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            buffer_count: DEFAULT_BUFFER_COUNT,
            tick_interval: Duration::from_millis(1),
        }
    }
}

impl CameraConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        protocol::validate_endpoint(&self.server_uri).map_err(ConfigError::InvalidEndpoint)?;
        if self.reconnect_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "reconnect_delay_s",
                reason: "must be greater than zero".to_string(),
            });
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(ConfigError::InvalidValue {
                field: "jpeg_quality",
                reason: format!("{} is outside 1..=100", self.jpeg_quality),
            });
        }
        if self.buffer_count == 0 {
            return Err(ConfigError::InvalidValue {
                field: "buffer_count",
                reason: "at least one buffer is required".to_string(),
            });
        }
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::InvalidValue {
                field: "width/height",
                reason: "frame dimensions must be non-zero".to_string(),
            });
        }
        if self.width > MAX_DIMENSION || self.height > MAX_DIMENSION {
            return Err(ConfigError::InvalidValue {
                field: "width/height",
                reason: format!(
                    "{}x{} exceeds {} pixels per edge",
                    self.width, self.height, MAX_DIMENSION
                ),
            });
        }
        Ok(())
    }
}

/// Optional JSON settings file. Any field present overrides the defaults;
/// flags given on the command line override the file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SettingsFile {
    pub server_uri: Option<String>,
    pub reconnect_delay_s: Option<f64>,
    pub min_frame_interval_ms: Option<u64>,
    pub auto_connect: Option<bool>,
    pub source: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub jpeg_quality: Option<u8>,
    pub buffer_count: Option<usize>,
}

impl SettingsFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `path` if given, otherwise an empty overlay
    pub fn load_optional(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn apply_viewer(&self, config: &mut ViewerConfig) -> Result<(), ConfigError> {
        if let Some(ref uri) = self.server_uri {
            config.server_uri = uri.clone();
        }
        if let Some(secs) = self.reconnect_delay_s {
            config.reconnect_delay = secs_to_duration(secs)?;
        }
        if let Some(auto) = self.auto_connect {
            config.auto_connect = auto;
        }
        Ok(())
    }

    pub fn apply_camera(&self, config: &mut CameraConfig) -> Result<(), ConfigError> {
        if let Some(ref uri) = self.server_uri {
            config.server_uri = uri.clone();
        }
        if let Some(secs) = self.reconnect_delay_s {
            config.reconnect_interval = secs_to_duration(secs)?;
        }
        if let Some(ms) = self.min_frame_interval_ms {
            config.min_frame_interval = Duration::from_millis(ms);
        }
        if let Some(ref source) = self.source {
            config.source = source.parse()?;
        }
        if let Some(width) = self.width {
            config.width = width;
        }
        if let Some(height) = self.height {
            config.height = height;
        }
        if let Some(quality) = self.jpeg_quality {
            config.jpeg_quality = quality;
        }
        if let Some(count) = self.buffer_count {
            config.buffer_count = count;
        }
        Ok(())
    }
}

pub fn secs_to_duration(secs: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(secs).map_err(|e| ConfigError::InvalidValue {
        field: "reconnect_delay_s",
        reason: format!("{}: {}", secs, e),
    })
}
