//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> on the command line
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! Every section is optional; missing keys fall back to the defaults below.

use crate::domain::types::ZoneRegion;
use anyhow::{bail, Context};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

/// How zone coordinates in the config are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneUnits {
    /// Fractions of frame width/height, resolved against the first frame
    Relative,
    /// Absolute pixel coordinates
    Pixels,
}

/// Which clip sink to hand flagged footage to
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipEncoder {
    /// Pipe raw BGR frames into an ffmpeg child process (mp4 output)
    Ffmpeg,
    /// Dump raw BGR frames to a file (no external encoder needed)
    Raw,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "default_camera_id")]
    pub id: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self { id: default_camera_id() }
    }
}

fn default_camera_id() -> String {
    "CAM_01".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    /// Scan window length after a trigger (ms)
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// How long a secondary entrant must persist to flag the scan (ms)
    #[serde(default = "default_tolerance_ms")]
    pub tolerance_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self { window_ms: default_window_ms(), tolerance_ms: default_tolerance_ms() }
    }
}

fn default_window_ms() -> u64 {
    3000
}

fn default_tolerance_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct BufferConfig {
    #[serde(default = "default_buffer_seconds")]
    pub seconds: u32,
    /// Fallback when the frame source reports no nominal rate
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self { seconds: default_buffer_seconds(), frame_rate: default_frame_rate() }
    }
}

fn default_buffer_seconds() -> u32 {
    10
}

fn default_frame_rate() -> u32 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoneConfig {
    #[serde(default = "default_zone_units")]
    pub units: ZoneUnits,
    #[serde(default = "default_zone_x1")]
    pub x1: f64,
    #[serde(default)]
    pub y1: f64,
    #[serde(default = "default_zone_x2")]
    pub x2: f64,
    #[serde(default = "default_zone_y2")]
    pub y2: f64,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            units: default_zone_units(),
            x1: default_zone_x1(),
            y1: 0.0,
            x2: default_zone_x2(),
            y2: default_zone_y2(),
        }
    }
}

fn default_zone_units() -> ZoneUnits {
    ZoneUnits::Relative
}

fn default_zone_x1() -> f64 {
    0.25
}

fn default_zone_x2() -> f64 {
    0.75
}

fn default_zone_y2() -> f64 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClipsConfig {
    #[serde(default = "default_clip_dir")]
    pub dir: String,
    #[serde(default = "default_clip_encoder")]
    pub encoder: ClipEncoder,
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
}

impl Default for ClipsConfig {
    fn default() -> Self {
        Self {
            dir: default_clip_dir(),
            encoder: default_clip_encoder(),
            ffmpeg_path: default_ffmpeg_path(),
        }
    }
}

fn default_clip_dir() -> String {
    "clips".to_string()
}

fn default_clip_encoder() -> ClipEncoder {
    ClipEncoder::Ffmpeg
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    /// JSONL file every scan event is appended to
    #[serde(default = "default_events_file")]
    pub file: String,
    /// Optional backend insert endpoint (basic auth may be embedded in the URL)
    #[serde(default)]
    pub http_url: Option<String>,
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            file: default_events_file(),
            http_url: None,
            timeout_ms: default_http_timeout_ms(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            queue_size: default_queue_size(),
        }
    }
}

fn default_events_file() -> String {
    "events.jsonl".to_string()
}

fn default_http_timeout_ms() -> u64 {
    5000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_queue_size() -> usize {
    256
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_mqtt_topic")]
    pub topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            topic: default_mqtt_topic(),
            username: None,
            password: None,
        }
    }
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_mqtt_topic() -> String {
    "entry-guard/events".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_bind_address")]
    pub bind_address: String,
    /// Control server port (0 to disable)
    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { bind_address: default_http_bind_address(), port: default_http_port() }
    }
}

fn default_http_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    5055
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayConfig {
    /// JSONL capture of frames and tracker output
    #[serde(default)]
    pub path: Option<String>,
    /// Pace frames by their timestamps instead of as fast as possible
    #[serde(default = "default_replay_realtime")]
    pub realtime: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self { path: None, realtime: default_replay_realtime() }
    }
}

fn default_replay_realtime() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

fn default_metrics_interval() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub zone: ZoneConfig,
    #[serde(default)]
    pub clips: ClipsConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    camera_id: String,
    scan_window_ms: u64,
    tolerance_ms: u64,
    buffer_seconds: u32,
    frame_rate: u32,
    zone_units: ZoneUnits,
    zone: ZoneRegion,
    clip_dir: String,
    clip_encoder: ClipEncoder,
    ffmpeg_path: String,
    events_file: String,
    events_http_url: Option<String>,
    events_timeout_ms: u64,
    events_max_attempts: u32,
    events_initial_backoff_ms: u64,
    events_max_backoff_ms: u64,
    events_queue_size: usize,
    mqtt_enabled: bool,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_topic: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    http_bind_address: String,
    http_port: u16,
    replay_path: Option<String>,
    replay_realtime: bool,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        let zone = toml_config.zone;
        Self {
            camera_id: toml_config.camera.id,
            scan_window_ms: toml_config.scan.window_ms,
            tolerance_ms: toml_config.scan.tolerance_ms,
            buffer_seconds: toml_config.buffer.seconds,
            frame_rate: toml_config.buffer.frame_rate,
            zone_units: zone.units,
            zone: ZoneRegion::new(zone.x1, zone.y1, zone.x2, zone.y2),
            clip_dir: toml_config.clips.dir,
            clip_encoder: toml_config.clips.encoder,
            ffmpeg_path: toml_config.clips.ffmpeg_path,
            events_file: toml_config.events.file,
            events_http_url: toml_config.events.http_url,
            events_timeout_ms: toml_config.events.timeout_ms,
            events_max_attempts: toml_config.events.max_attempts,
            events_initial_backoff_ms: toml_config.events.initial_backoff_ms,
            events_max_backoff_ms: toml_config.events.max_backoff_ms,
            events_queue_size: toml_config.events.queue_size,
            mqtt_enabled: toml_config.mqtt.enabled,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_topic: toml_config.mqtt.topic,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            http_bind_address: toml_config.http.bind_address,
            http_port: toml_config.http.port,
            replay_path: toml_config.replay.path,
            replay_realtime: toml_config.replay.realtime,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            config_file,
        }
    }

    /// Pick the config file: an explicit path, then `CONFIG_FILE`, then the default
    pub fn resolve_config_path(explicit: Option<&str>) -> String {
        if let Some(path) = explicit {
            return path.to_string();
        }
        env::var("CONFIG_FILE").unwrap_or_else(|_| "config/dev.toml".to_string())
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        let config = Self::from_toml(toml_config, path.display().to_string());
        config
            .validate()
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Load from an explicit path, falling back to defaults on any error
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), path = %path, "config_fallback_to_defaults");
                Self::default()
            }
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.scan_window_ms == 0 {
            bail!("scan.window_ms must be greater than zero");
        }
        if self.tolerance_ms == 0 {
            bail!("scan.tolerance_ms must be greater than zero");
        }
        if !(self.zone.x1 < self.zone.x2 && self.zone.y1 < self.zone.y2) {
            bail!("zone must satisfy x1 < x2 and y1 < y2");
        }
        if self.zone_units == ZoneUnits::Relative
            && [self.zone.x1, self.zone.y1, self.zone.x2, self.zone.y2]
                .iter()
                .any(|v| !(0.0..=1.0).contains(v))
        {
            bail!("relative zone coordinates must lie within [0, 1]");
        }
        if self.events_max_attempts == 0 {
            bail!("events.max_attempts must be at least 1");
        }
        Ok(())
    }

    /// Rolling buffer capacity for a given source frame rate
    pub fn buffer_capacity(&self, source_fps: Option<u32>) -> usize {
        let fps = source_fps.filter(|&f| f > 0).unwrap_or(self.frame_rate);
        (fps as usize * self.buffer_seconds as usize).max(1)
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    pub fn scan_window_ms(&self) -> u64 {
        self.scan_window_ms
    }

    pub fn tolerance_ms(&self) -> u64 {
        self.tolerance_ms
    }

    pub fn buffer_seconds(&self) -> u32 {
        self.buffer_seconds
    }

    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    pub fn zone_units(&self) -> ZoneUnits {
        self.zone_units
    }

    pub fn zone(&self) -> &ZoneRegion {
        &self.zone
    }

    pub fn clip_dir(&self) -> &str {
        &self.clip_dir
    }

    pub fn clip_encoder(&self) -> ClipEncoder {
        self.clip_encoder
    }

    pub fn ffmpeg_path(&self) -> &str {
        &self.ffmpeg_path
    }

    pub fn events_file(&self) -> &str {
        &self.events_file
    }

    pub fn events_http_url(&self) -> Option<&str> {
        self.events_http_url.as_deref()
    }

    pub fn events_timeout_ms(&self) -> u64 {
        self.events_timeout_ms
    }

    pub fn events_max_attempts(&self) -> u32 {
        self.events_max_attempts
    }

    pub fn events_initial_backoff_ms(&self) -> u64 {
        self.events_initial_backoff_ms
    }

    pub fn events_max_backoff_ms(&self) -> u64 {
        self.events_max_backoff_ms
    }

    pub fn events_queue_size(&self) -> usize {
        self.events_queue_size
    }

    pub fn mqtt_enabled(&self) -> bool {
        self.mqtt_enabled
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_topic(&self) -> &str {
        &self.mqtt_topic
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn http_bind_address(&self) -> &str {
        &self.http_bind_address
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn replay_path(&self) -> Option<&str> {
        self.replay_path.as_deref()
    }

    pub fn replay_realtime(&self) -> bool {
        self.replay_realtime
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to override scan timing
    pub fn with_scan_timing(mut self, window_ms: u64, tolerance_ms: u64) -> Self {
        self.scan_window_ms = window_ms;
        self.tolerance_ms = tolerance_ms;
        self
    }

    /// Builder method for tests to set a pixel-space zone
    pub fn with_pixel_zone(mut self, zone: ZoneRegion) -> Self {
        self.zone_units = ZoneUnits::Pixels;
        self.zone = zone;
        self
    }

    /// Builder method for tests to set the buffer length
    pub fn with_buffer(mut self, seconds: u32, frame_rate: u32) -> Self {
        self.buffer_seconds = seconds;
        self.frame_rate = frame_rate;
        self
    }

    /// Builder method for tests to redirect clip output
    pub fn with_clips(mut self, dir: &str, encoder: ClipEncoder) -> Self {
        self.clip_dir = dir.to_string();
        self.clip_encoder = encoder;
        self
    }

    /// Builder method for tests to point MQTT at a given broker
    pub fn with_mqtt(mut self, host: &str, port: u16) -> Self {
        self.mqtt_enabled = true;
        self.mqtt_host = host.to_string();
        self.mqtt_port = port;
        self
    }

    /// Builder method for tests to redirect event output
    pub fn with_events_file(mut self, file: &str) -> Self {
        self.events_file = file.to_string();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.camera_id(), "CAM_01");
        assert_eq!(config.scan_window_ms(), 3000);
        assert_eq!(config.tolerance_ms(), 1000);
        assert_eq!(config.buffer_seconds(), 10);
        assert_eq!(config.frame_rate(), 30);
        assert_eq!(config.zone_units(), ZoneUnits::Relative);
        assert_eq!(config.zone(), &ZoneRegion::new(0.25, 0.0, 0.75, 1.0));
        assert_eq!(config.clip_dir(), "clips");
        assert_eq!(config.clip_encoder(), ClipEncoder::Ffmpeg);
        assert_eq!(config.events_file(), "events.jsonl");
        assert!(config.events_http_url().is_none());
        assert!(!config.mqtt_enabled());
        assert_eq!(config.http_port(), 5055);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_buffer_capacity() {
        let config = Config::default();
        assert_eq!(config.buffer_capacity(None), 300);
        assert_eq!(config.buffer_capacity(Some(10)), 100);
        assert_eq!(config.buffer_capacity(Some(0)), 300);

        let tiny = Config::default().with_buffer(0, 30);
        assert_eq!(tiny.buffer_capacity(None), 1);
    }

    #[test]
    fn test_validate_rejects_inverted_zone() {
        let config = Config::default().with_pixel_zone(ZoneRegion::new(100.0, 0.0, 50.0, 10.0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_relative_zone() {
        let mut config = Config::default();
        config.zone = ZoneRegion::new(0.1, 0.0, 1.5, 1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_tolerance() {
        let config = Config::default().with_scan_timing(3000, 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_config_path() {
        assert_eq!(Config::resolve_config_path(Some("config/lobby.toml")), "config/lobby.toml");
        if env::var("CONFIG_FILE").is_err() {
            assert_eq!(Config::resolve_config_path(None), "config/dev.toml");
        }
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let toml_config: TomlConfig = toml::from_str("").unwrap();
        let config = Config::from_toml(toml_config, "inline".to_string());
        assert_eq!(config.scan_window_ms(), 3000);
        assert_eq!(config.events_max_attempts(), 5);
        assert_eq!(config.mqtt_topic(), "entry-guard/events");
    }
}
