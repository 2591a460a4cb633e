use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::door::{ColorSample, Region};
use crate::motion::{KernelShape, StructuringElement};
use crate::report::ReportFormat;

pub const DEFAULT_LEFT_DOOR: Region = Region::new(440, 270, 90, 230);
pub const DEFAULT_RIGHT_DOOR: Region = Region::new(540, 270, 90, 230);
/// Closed-leaf color in RGB channel order.
pub const DEFAULT_EXPECTED_COLOR: ColorSample = ColorSample::rgb(115.0, 113.0, 73.0);
pub const DEFAULT_INTENSITY_THRESHOLD: u8 = 20;
pub const DEFAULT_MOVEMENT_CUTOFF: u64 = 100;
pub const DEFAULT_COLOR_CUTOFF: f64 = 50.0;

const DEFAULT_SOURCE_URL: &str = "stub://doorway";
const DEFAULT_TARGET_FPS: u32 = 10;
const DEFAULT_FRAME_WIDTH: u32 = 1280;
const DEFAULT_FRAME_HEIGHT: u32 = 720;
const DEFAULT_FRAME_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_RECONNECT_BACKOFF_MS: u64 = 1_000;
const DEFAULT_MQTT_CLIENT_ID: &str = "doorwatchd";
const DEFAULT_MQTT_TOPIC_PREFIX: &str = "doorwatch";

// ----------------------------------------------------------------------------
// Monitor configuration (analysis constants)
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KernelSpec {
    pub shape: KernelShape,
    pub width: u32,
    pub height: u32,
}

impl KernelSpec {
    pub const fn ellipse(width: u32, height: u32) -> Self {
        Self {
            shape: KernelShape::Ellipse,
            width,
            height,
        }
    }

    pub fn element(&self) -> StructuringElement {
        StructuringElement::new(self.shape, self.width, self.height)
    }
}

/// Immutable analysis constants, built once at startup and handed to every
/// component that needs them.
#[derive(Clone, Debug, PartialEq)]
pub struct MonitorConfig {
    pub left_door: Region,
    pub right_door: Region,
    pub expected_color: ColorSample,
    pub intensity_threshold: u8,
    pub dilation: KernelSpec,
    pub erosion: KernelSpec,
    pub movement_cutoff: u64,
    pub color_cutoff: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            left_door: DEFAULT_LEFT_DOOR,
            right_door: DEFAULT_RIGHT_DOOR,
            expected_color: DEFAULT_EXPECTED_COLOR,
            intensity_threshold: DEFAULT_INTENSITY_THRESHOLD,
            dilation: KernelSpec::ellipse(2, 2),
            erosion: KernelSpec::ellipse(6, 6),
            movement_cutoff: DEFAULT_MOVEMENT_CUTOFF,
            color_cutoff: DEFAULT_COLOR_CUTOFF,
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, region) in [("left_door", self.left_door), ("right_door", self.right_door)] {
            if region.width == 0 || region.height == 0 {
                return Err(anyhow!("{} region must have a non-zero size", name));
            }
        }
        for (name, kernel) in [("dilation", self.dilation), ("erosion", self.erosion)] {
            if kernel.width == 0 || kernel.height == 0 {
                return Err(anyhow!("{} kernel must have a non-zero size", name));
            }
        }
        if self.expected_color.0.iter().any(|c| !c.is_finite() || *c < 0.0) {
            return Err(anyhow!("expected door color channels must be finite and >= 0"));
        }
        if !self.color_cutoff.is_finite() || self.color_cutoff <= 0.0 {
            return Err(anyhow!("color cutoff must be a positive number"));
        }
        Ok(())
    }

    /// Checks both door regions fit inside frames of the given size.
    pub fn validate_for_frame(&self, width: u32, height: u32) -> Result<()> {
        self.left_door
            .check_fits(width, height)
            .map_err(|e| anyhow!("left_door: {}", e))?;
        self.right_door
            .check_fits(width, height)
            .map_err(|e| anyhow!("right_door: {}", e))?;
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Daemon configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
struct DoorwatchdConfigFile {
    monitor: Option<MonitorConfigFile>,
    source: Option<SourceConfigFile>,
    report: Option<ReportConfigFile>,
    alert: Option<AlertConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct MonitorConfigFile {
    left_door: Option<Region>,
    right_door: Option<Region>,
    expected_color: Option<Vec<f64>>,
    intensity_threshold: Option<u8>,
    dilation: Option<KernelConfigFile>,
    erosion: Option<KernelConfigFile>,
    movement_cutoff: Option<u64>,
    color_cutoff: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct KernelConfigFile {
    shape: Option<KernelShape>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    frame_timeout_ms: Option<u64>,
    reconnect_attempts: Option<u32>,
    reconnect_backoff_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ReportConfigFile {
    format: Option<ReportFormat>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertConfigFile {
    frames_threshold: Option<u64>,
    mqtt: Option<MqttConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct MqttConfigFile {
    broker: Option<String>,
    client_id: Option<String>,
    topic_prefix: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DoorwatchdConfig {
    pub monitor: MonitorConfig,
    pub source: SourceSettings,
    pub report_format: ReportFormat,
    pub alert: AlertSettings,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub url: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
    pub frame_timeout: Duration,
    pub reconnect_attempts: u32,
    pub reconnect_backoff: Duration,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_SOURCE_URL.to_string(),
            target_fps: DEFAULT_TARGET_FPS,
            width: DEFAULT_FRAME_WIDTH,
            height: DEFAULT_FRAME_HEIGHT,
            frame_timeout: Duration::from_millis(DEFAULT_FRAME_TIMEOUT_MS),
            reconnect_attempts: 0,
            reconnect_backoff: Duration::from_millis(DEFAULT_RECONNECT_BACKOFF_MS),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AlertSettings {
    /// Alerting is off unless a threshold is configured.
    pub frames_threshold: Option<u64>,
    pub mqtt: Option<MqttSettings>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttSettings {
    pub broker: String,
    pub client_id: String,
    pub topic_prefix: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl DoorwatchdConfig {
    /// Load from `$DOORWATCH_CONFIG` (if set), then apply env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("DOORWATCH_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: DoorwatchdConfigFile) -> Result<Self> {
        let monitor = monitor_from_file(file.monitor.unwrap_or_default())?;

        let src = file.source.unwrap_or_default();
        let defaults = SourceSettings::default();
        let source = SourceSettings {
            url: src.url.unwrap_or(defaults.url),
            target_fps: src.target_fps.unwrap_or(defaults.target_fps),
            width: src.width.unwrap_or(defaults.width),
            height: src.height.unwrap_or(defaults.height),
            frame_timeout: src
                .frame_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.frame_timeout),
            reconnect_attempts: src.reconnect_attempts.unwrap_or(defaults.reconnect_attempts),
            reconnect_backoff: src
                .reconnect_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.reconnect_backoff),
        };

        let report_format = file
            .report
            .and_then(|report| report.format)
            .unwrap_or_default();

        let alert_file = file.alert.unwrap_or_default();
        let mqtt = match alert_file.mqtt {
            Some(mqtt) => Some(MqttSettings {
                broker: mqtt
                    .broker
                    .ok_or_else(|| anyhow!("alert.mqtt.broker is required"))?,
                client_id: mqtt
                    .client_id
                    .unwrap_or_else(|| DEFAULT_MQTT_CLIENT_ID.to_string()),
                topic_prefix: mqtt
                    .topic_prefix
                    .unwrap_or_else(|| DEFAULT_MQTT_TOPIC_PREFIX.to_string()),
                username: mqtt.username,
                password: mqtt.password,
            }),
            None => None,
        };
        let alert = AlertSettings {
            frames_threshold: alert_file.frames_threshold,
            mqtt,
        };

        Ok(Self {
            monitor,
            source,
            report_format,
            alert,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("DOORWATCH_SOURCE_URL") {
            if !url.trim().is_empty() {
                self.source.url = url;
            }
        }
        if let Ok(format) = std::env::var("DOORWATCH_REPORT_FORMAT") {
            if !format.trim().is_empty() {
                self.report_format = format.parse()?;
            }
        }
        if let Ok(frames) = std::env::var("DOORWATCH_ALERT_FRAMES") {
            if !frames.trim().is_empty() {
                let frames: u64 = frames.trim().parse().map_err(|_| {
                    anyhow!("DOORWATCH_ALERT_FRAMES must be an integer number of frames")
                })?;
                self.alert.frames_threshold = Some(frames);
            }
        }
        if let Ok(broker) = std::env::var("DOORWATCH_MQTT_BROKER") {
            if !broker.trim().is_empty() {
                match self.alert.mqtt.as_mut() {
                    Some(mqtt) => mqtt.broker = broker,
                    None => {
                        self.alert.mqtt = Some(MqttSettings {
                            broker,
                            client_id: DEFAULT_MQTT_CLIENT_ID.to_string(),
                            topic_prefix: DEFAULT_MQTT_TOPIC_PREFIX.to_string(),
                            username: None,
                            password: None,
                        })
                    }
                }
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.monitor.validate()?;
        if self.source.url.trim().is_empty() {
            return Err(anyhow!("source url must not be empty"));
        }
        if self.source.frame_timeout.is_zero() {
            return Err(anyhow!("source frame timeout must be greater than zero"));
        }
        // Sources with a fixed frame size can be checked before the first frame.
        if self.source.url.starts_with("stub://") {
            self.monitor
                .validate_for_frame(self.source.width, self.source.height)?;
        }
        if self.alert.frames_threshold == Some(0) {
            return Err(anyhow!("alert frames threshold must be greater than zero"));
        }
        if self.alert.mqtt.is_some() && self.alert.frames_threshold.is_none() {
            log::warn!("alert.mqtt configured without alert.frames_threshold; no alerts will fire");
        }
        Ok(())
    }
}

fn monitor_from_file(file: MonitorConfigFile) -> Result<MonitorConfig> {
    let defaults = MonitorConfig::default();
    let expected_color = match file.expected_color {
        Some(channels) => parse_color(&channels)?,
        None => defaults.expected_color,
    };
    Ok(MonitorConfig {
        left_door: file.left_door.unwrap_or(defaults.left_door),
        right_door: file.right_door.unwrap_or(defaults.right_door),
        expected_color,
        intensity_threshold: file
            .intensity_threshold
            .unwrap_or(defaults.intensity_threshold),
        dilation: kernel_from_file(file.dilation, defaults.dilation),
        erosion: kernel_from_file(file.erosion, defaults.erosion),
        movement_cutoff: file.movement_cutoff.unwrap_or(defaults.movement_cutoff),
        color_cutoff: file.color_cutoff.unwrap_or(defaults.color_cutoff),
    })
}

fn kernel_from_file(file: Option<KernelConfigFile>, default: KernelSpec) -> KernelSpec {
    let Some(file) = file else {
        return default;
    };
    KernelSpec {
        shape: file.shape.unwrap_or(default.shape),
        width: file.width.unwrap_or(default.width),
        height: file.height.unwrap_or(default.height),
    }
}

fn parse_color(channels: &[f64]) -> Result<ColorSample> {
    match channels {
        [r, g, b] => Ok(ColorSample([*r, *g, *b, 0.0])),
        [r, g, b, a] => Ok(ColorSample([*r, *g, *b, *a])),
        _ => Err(anyhow!(
            "expected_color must have 3 or 4 channels, got {}",
            channels.len()
        )),
    }
}

fn read_config_file(path: &Path) -> Result<DoorwatchdConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() -> Result<()> {
        let cfg = MonitorConfig::default();
        cfg.validate()?;
        cfg.validate_for_frame(1280, 720)?;
        Ok(())
    }

    #[test]
    fn default_regions_do_not_fit_small_frames() {
        assert!(MonitorConfig::default().validate_for_frame(320, 240).is_err());
    }

    #[test]
    fn zero_sized_kernel_is_rejected() {
        let cfg = MonitorConfig {
            erosion: KernelSpec::ellipse(0, 6),
            ..MonitorConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn color_accepts_three_or_four_channels() -> Result<()> {
        assert_eq!(parse_color(&[1.0, 2.0, 3.0])?, ColorSample([1.0, 2.0, 3.0, 0.0]));
        assert_eq!(
            parse_color(&[1.0, 2.0, 3.0, 4.0])?,
            ColorSample([1.0, 2.0, 3.0, 4.0])
        );
        assert!(parse_color(&[1.0]).is_err());
        Ok(())
    }

    #[test]
    fn monitor_section_overrides_individual_fields() -> Result<()> {
        let file: DoorwatchdConfigFile = toml::from_str(
            r#"
            [monitor]
            movement_cutoff = 250
            erosion = { width = 8 }
            left_door = { x = 1, y = 2, width = 3, height = 4 }
            "#,
        )?;
        let cfg = DoorwatchdConfig::from_file(file)?;
        assert_eq!(cfg.monitor.movement_cutoff, 250);
        assert_eq!(cfg.monitor.erosion, KernelSpec::ellipse(8, 6));
        assert_eq!(cfg.monitor.left_door, Region::new(1, 2, 3, 4));
        assert_eq!(cfg.monitor.right_door, DEFAULT_RIGHT_DOOR);
        Ok(())
    }
}
