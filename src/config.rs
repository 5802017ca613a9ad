//! Service configuration
//!
//! Configuration is read from environment-style key/value pairs once at
//! startup. `from_lookup` takes any key lookup so tests don't touch the
//! process environment.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &'static str, value: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Output format selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Keep the codec-copy capture only
    Raw,
    /// Capture raw, then convert to MP3
    Mp3,
}

impl OutputFormat {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "raw" | "ogg" | "webm" => Some(Self::Raw),
            "mp3" => Some(Self::Mp3),
            _ => None,
        }
    }
}

/// Target bitrate for post-conversion, in kbit/s
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bitrate(pub u32);

impl Bitrate {
    /// Parse `160k` or `160`
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim().to_ascii_lowercase();
        let digits = value.strip_suffix('k').unwrap_or(&value);
        match digits.parse::<u32>() {
            Ok(kbps) if kbps > 0 => Some(Self(kbps)),
            _ => None,
        }
    }

    /// Value as passed to the encoder (`-b:a`)
    pub fn as_ffmpeg_arg(&self) -> String {
        format!("{}k", self.0)
    }
}

impl Default for Bitrate {
    fn default() -> Self {
        Self(128)
    }
}

impl std::fmt::Display for Bitrate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}k", self.0)
    }
}

/// Settings that drive every recording session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingConfig {
    /// Directory holding descriptors and artifacts
    pub recordings_dir: PathBuf,

    /// Output format selector
    pub output_format: OutputFormat,

    /// Explicit post-conversion toggle
    pub convert_to_mp3: bool,

    /// Post-conversion bitrate
    pub mp3_bitrate: Bitrate,

    /// Keep the raw capture after a successful conversion
    pub keep_raw: bool,

    /// Address the relay transport sends to and the recorder listens on
    pub relay_listen_ip: IpAddr,

    /// Delay between recorder spawn and consumer resume
    pub settle_delay: Duration,

    /// How long an interrupted recorder may take before it is killed
    pub stop_grace: Duration,

    /// Captures smaller than this are not trusted on an ambiguous exit
    pub min_capture_bytes: u64,

    /// External tool used for capture and conversion
    pub ffmpeg_path: PathBuf,
}

impl RecordingConfig {
    /// Whether raw captures are converted after the recorder exits
    pub fn post_conversion_enabled(&self) -> bool {
        self.convert_to_mp3 || self.output_format == OutputFormat::Mp3
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            recordings_dir: PathBuf::from("./recordings"),
            output_format: OutputFormat::Raw,
            convert_to_mp3: false,
            mp3_bitrate: Bitrate::default(),
            keep_raw: false,
            relay_listen_ip: IpAddr::from([127, 0, 0, 1]),
            settle_delay: Duration::from_millis(1000),
            stop_grace: Duration::from_secs(10),
            min_capture_bytes: 4096,
            ffmpeg_path: PathBuf::from("ffmpeg"),
        }
    }
}

/// Whole-process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    /// Control-plane listen port
    pub http_port: u16,

    /// Media relay UDP/TCP port
    pub rtc_port: u16,

    /// Address announced to peers for NAT traversal
    pub announced_ip: Option<IpAddr>,

    pub recording: RecordingConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            http_port: 3000,
            rtc_port: 40000,
            announced_ip: None,
            recording: RecordingConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("HTTP_PORT") {
            config.http_port = parse_num("HTTP_PORT", &v)?;
        }
        if let Some(v) = get("RTC_PORT") {
            config.rtc_port = parse_num("RTC_PORT", &v)?;
        }
        if let Some(v) = get("ANNOUNCED_IP") {
            config.announced_ip = Some(parse_ip("ANNOUNCED_IP", &v)?);
        }

        let recording = &mut config.recording;
        if let Some(v) = get("RECORDINGS_DIR") {
            recording.recordings_dir = PathBuf::from(v);
        }
        if let Some(v) = get("OUTPUT_FORMAT") {
            recording.output_format = OutputFormat::parse(&v)
                .ok_or_else(|| ConfigError::invalid("OUTPUT_FORMAT", &v, "expected raw or mp3"))?;
        }
        if let Some(v) = get("CONVERT_TO_MP3") {
            recording.convert_to_mp3 = parse_bool("CONVERT_TO_MP3", &v)?;
        }
        if let Some(v) = get("MP3_BITRATE") {
            recording.mp3_bitrate = Bitrate::parse(&v)
                .ok_or_else(|| ConfigError::invalid("MP3_BITRATE", &v, "expected e.g. 128k"))?;
        }
        if let Some(v) = get("KEEP_RAW") {
            recording.keep_raw = parse_bool("KEEP_RAW", &v)?;
        }
        if let Some(v) = get("RELAY_LISTEN_IP") {
            recording.relay_listen_ip = parse_ip("RELAY_LISTEN_IP", &v)?;
        }
        if let Some(v) = get("RECORDER_SETTLE_MS") {
            recording.settle_delay = Duration::from_millis(parse_num("RECORDER_SETTLE_MS", &v)?);
        }
        if let Some(v) = get("RECORDER_STOP_GRACE_MS") {
            recording.stop_grace = Duration::from_millis(parse_num("RECORDER_STOP_GRACE_MS", &v)?);
        }
        if let Some(v) = get("MIN_CAPTURE_BYTES") {
            recording.min_capture_bytes = parse_num("MIN_CAPTURE_BYTES", &v)?;
        }
        if let Some(v) = get("FFMPEG_PATH") {
            recording.ffmpeg_path = PathBuf::from(v);
        }

        Ok(config)
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(key, value, "expected a boolean")),
    }
}

fn parse_num<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::invalid(key, value, e.to_string()))
}

fn parse_ip(key: &'static str, value: &str) -> Result<IpAddr, ConfigError> {
    value
        .trim()
        .parse::<IpAddr>()
        .map_err(|e| ConfigError::invalid(key, value, e.to_string()))
}
