use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::detect::mask::MAX_BLUR_KERNEL;
use crate::ingest::{video_device, DeviceConfig};

const DEFAULT_SENSITIVITY: u8 = 25;
const DEFAULT_MIN_AREA: u32 = 500;
const DEFAULT_MIN_MOTION_FRAMES: u32 = 3;
const DEFAULT_COOLDOWN_SECS: f64 = 10.0;
const DEFAULT_BACKGROUND_WEIGHT: f32 = 0.5;
const DEFAULT_BLUR_KERNEL: u32 = 21;
const DEFAULT_DILATE_ITERATIONS: u32 = 2;
const MAX_DILATE_ITERATIONS: u32 = 32;
const DEFAULT_TARGET_OBJECTS: &str = "cat,person";
const DEFAULT_FRAME_DIR: &str = "frames";
const DEFAULT_DEVICE: &str = "/dev/video0";
const DEFAULT_FPS: u32 = 10;
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_RETRY_DELAY_SECS: u64 = 5;
const DEFAULT_WEB_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_TELEGRAM_API: &str = "https://api.telegram.org";

// ----------------------------------------------------------------------------
// Live settings (hot-swappable between evaluation cycles)
// ----------------------------------------------------------------------------

/// Motion detector tuning. Snapshotted at the start of every evaluation cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Per-pixel difference a pixel must exceed to count as changed.
    pub sensitivity: u8,
    /// Minimum changed-region area in pixels (inclusive).
    pub min_area: u32,
    /// Consecutive qualifying frames required before an event fires.
    pub min_motion_frames: u32,
    /// Minimum seconds between emitted events.
    pub cooldown_seconds: f64,
    /// Write event frames to the frame directory before emitting.
    pub persist_mode: bool,
    /// Weight of the newest frame in the background running average. 0 freezes the
    /// background at the seed frame.
    pub background_weight: f32,
    /// Gaussian blur kernel size (odd).
    pub blur_kernel: u32,
    /// 3x3 dilation passes applied to the motion mask.
    pub dilate_iterations: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            sensitivity: DEFAULT_SENSITIVITY,
            min_area: DEFAULT_MIN_AREA,
            min_motion_frames: DEFAULT_MIN_MOTION_FRAMES,
            cooldown_seconds: DEFAULT_COOLDOWN_SECS,
            persist_mode: true,
            background_weight: DEFAULT_BACKGROUND_WEIGHT,
            blur_kernel: DEFAULT_BLUR_KERNEL,
            dilate_iterations: DEFAULT_DILATE_ITERATIONS,
        }
    }
}

impl DetectorConfig {
    /// Cooldown as a `Duration`. Values too large to represent mean "never again".
    pub fn cooldown(&self) -> Duration {
        Duration::try_from_secs_f64(self.cooldown_seconds.max(0.0)).unwrap_or(Duration::MAX)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sensitivity == 0 {
            return Err(anyhow!("sensitivity must be at least 1"));
        }
        if self.min_area == 0 {
            return Err(anyhow!("min_area must be at least 1"));
        }
        if self.min_motion_frames == 0 {
            return Err(anyhow!("min_motion_frames must be at least 1"));
        }
        if self.cooldown_seconds < 0.0 || Duration::try_from_secs_f64(self.cooldown_seconds).is_err() {
            return Err(anyhow!(
                "cooldown_seconds must be a non-negative number of seconds, got {}",
                self.cooldown_seconds
            ));
        }
        if !(0.0..=1.0).contains(&self.background_weight) {
            return Err(anyhow!("background_weight must be within 0.0..=1.0"));
        }
        if self.blur_kernel % 2 == 0 || self.blur_kernel > MAX_BLUR_KERNEL {
            return Err(anyhow!(
                "blur_kernel must be an odd number between 1 and {}",
                MAX_BLUR_KERNEL
            ));
        }
        if self.dilate_iterations > MAX_DILATE_ITERATIONS {
            return Err(anyhow!(
                "dilate_iterations must be at most {}",
                MAX_DILATE_ITERATIONS
            ));
        }
        Ok(())
    }
}

/// Everything that may change while the pipeline runs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LiveSettings {
    pub detector: DetectorConfig,
    /// Labels that make an event notification-worthy (lowercase).
    pub target_objects: Vec<String>,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            detector: DetectorConfig::default(),
            target_objects: split_csv(DEFAULT_TARGET_OBJECTS),
        }
    }
}

/// Shared handle to the live settings. Readers take cheap snapshots.
#[derive(Clone, Debug, Default)]
pub struct SharedSettings {
    inner: Arc<RwLock<LiveSettings>>,
}

impl SharedSettings {
    pub fn new(settings: LiveSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    pub fn snapshot(&self) -> LiveSettings {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn detector(&self) -> DetectorConfig {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .detector
            .clone()
    }

    pub fn target_objects(&self) -> Vec<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .target_objects
            .clone()
    }

    /// Apply `change` to a copy and swap it in only if the result validates.
    pub fn update(&self, change: impl FnOnce(&mut LiveSettings)) -> Result<LiveSettings> {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = guard.clone();
        change(&mut next);
        next.detector.validate()?;
        next.target_objects = normalize_labels(&next.target_objects);
        *guard = next.clone();
        Ok(next)
    }
}

// ----------------------------------------------------------------------------
// Daemon configuration (file + environment)
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
struct WatchConfigFile {
    frame_dir: Option<PathBuf>,
    events_log: Option<PathBuf>,
    detector: Option<DetectorConfigFile>,
    camera: Option<CameraConfigFile>,
    web: Option<WebConfigFile>,
    notify: Option<NotifyConfigFile>,
    target_objects: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    sensitivity: Option<u8>,
    min_area: Option<u32>,
    min_motion_frames: Option<u32>,
    cooldown_seconds: Option<f64>,
    persist_mode: Option<bool>,
    background_weight: Option<f32>,
    blur_kernel: Option<u32>,
    dilate_iterations: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    index: Option<u32>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    retry_delay_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct WebConfigFile {
    addr: Option<String>,
    enabled: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct NotifyConfigFile {
    telegram_token: Option<String>,
    telegram_chat_id: Option<String>,
    telegram_api: Option<String>,
    discord_webhook_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub frame_dir: PathBuf,
    pub events_log: Option<PathBuf>,
    pub settings: LiveSettings,
    pub camera: DeviceConfig,
    pub retry_delay: Duration,
    pub web: WebSettings,
    pub notify: NotifySettings,
}

#[derive(Debug, Clone)]
pub struct WebSettings {
    pub addr: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Default)]
pub struct NotifySettings {
    pub telegram_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub telegram_api: String,
    pub discord_webhook_url: Option<String>,
}

impl WatchConfig {
    /// Load from `MOTION_CONFIG` (JSON, or TOML for `.toml` files), then apply
    /// environment overrides, then validate.
    pub fn load() -> Result<Self> {
        let config_path = env_string("MOTION_CONFIG").map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Like `load`, with the config file given explicitly.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => WatchConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: WatchConfigFile) -> Self {
        let defaults = DetectorConfig::default();
        let detector_file = file.detector.unwrap_or_default();
        let detector = DetectorConfig {
            sensitivity: detector_file.sensitivity.unwrap_or(defaults.sensitivity),
            min_area: detector_file.min_area.unwrap_or(defaults.min_area),
            min_motion_frames: detector_file
                .min_motion_frames
                .unwrap_or(defaults.min_motion_frames),
            cooldown_seconds: detector_file
                .cooldown_seconds
                .unwrap_or(defaults.cooldown_seconds),
            persist_mode: detector_file.persist_mode.unwrap_or(defaults.persist_mode),
            background_weight: detector_file
                .background_weight
                .unwrap_or(defaults.background_weight),
            blur_kernel: detector_file.blur_kernel.unwrap_or(defaults.blur_kernel),
            dilate_iterations: detector_file
                .dilate_iterations
                .unwrap_or(defaults.dilate_iterations),
        };

        let camera_file = file.camera.unwrap_or_default();
        let device = match (camera_file.device, camera_file.index) {
            (Some(device), _) => device,
            (None, Some(index)) => video_device(index),
            (None, None) => DEFAULT_DEVICE.to_string(),
        };
        let camera = DeviceConfig {
            device,
            target_fps: camera_file.target_fps.unwrap_or(DEFAULT_FPS),
            width: camera_file.width.unwrap_or(DEFAULT_WIDTH),
            height: camera_file.height.unwrap_or(DEFAULT_HEIGHT),
        };

        let web_file = file.web.unwrap_or_default();
        let notify_file = file.notify.unwrap_or_default();

        Self {
            frame_dir: file
                .frame_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_FRAME_DIR)),
            events_log: file.events_log,
            settings: LiveSettings {
                detector,
                target_objects: file
                    .target_objects
                    .unwrap_or_else(|| split_csv(DEFAULT_TARGET_OBJECTS)),
            },
            camera,
            retry_delay: Duration::from_secs(
                camera_file
                    .retry_delay_secs
                    .unwrap_or(DEFAULT_RETRY_DELAY_SECS),
            ),
            web: WebSettings {
                addr: web_file
                    .addr
                    .unwrap_or_else(|| DEFAULT_WEB_ADDR.to_string()),
                enabled: web_file.enabled.unwrap_or(true),
            },
            notify: NotifySettings {
                telegram_token: notify_file.telegram_token,
                telegram_chat_id: notify_file.telegram_chat_id,
                telegram_api: notify_file
                    .telegram_api
                    .unwrap_or_else(|| DEFAULT_TELEGRAM_API.to_string()),
                discord_webhook_url: notify_file.discord_webhook_url,
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        let detector = &mut self.settings.detector;
        if let Some(value) = env_parse::<u8>("MOTION_SENSITIVITY")? {
            detector.sensitivity = value;
        }
        if let Some(value) = env_parse::<u32>("MOTION_MIN_AREA")? {
            detector.min_area = value;
        }
        if let Some(value) = env_parse::<u32>("MOTION_MIN_FRAMES")? {
            detector.min_motion_frames = value;
        }
        if let Some(value) = env_parse::<f64>("MOTION_COOLDOWN_SECS")? {
            detector.cooldown_seconds = value;
        }
        if let Some(value) = env_parse::<bool>("MOTION_PERSIST")? {
            detector.persist_mode = value;
        }
        if let Some(dir) = env_string("MOTION_FRAME_DIR") {
            self.frame_dir = PathBuf::from(dir);
        }
        if let Some(path) = env_string("MOTION_EVENTS_LOG") {
            self.events_log = Some(PathBuf::from(path));
        }
        if let Some(index) = env_parse::<u32>("MOTION_CAMERA_INDEX")? {
            self.camera.device = video_device(index);
        }
        if let Some(device) = env_string("MOTION_DEVICE") {
            self.camera.device = device;
        }
        if let Some(secs) = env_parse::<u64>("MOTION_RETRY_DELAY_SECS")? {
            self.retry_delay = Duration::from_secs(secs);
        }
        if let Some(objects) = env_string("MOTION_TARGET_OBJECTS") {
            self.settings.target_objects = split_csv(&objects);
        }
        if let Some(addr) = env_string("MOTION_WEB_ADDR") {
            self.web.addr = addr;
        }
        if let Some(token) = env_string("TELEGRAM_TOKEN") {
            self.notify.telegram_token = Some(token);
        }
        if let Some(chat_id) = env_string("TELEGRAM_CHAT_ID") {
            self.notify.telegram_chat_id = Some(chat_id);
        }
        if let Some(url) = env_string("DISCORD_WEBHOOK_URL") {
            self.notify.discord_webhook_url = Some(url);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.settings.detector.validate()?;
        self.settings.target_objects = normalize_labels(&self.settings.target_objects);

        if self.camera.device.trim().is_empty() {
            return Err(anyhow!("camera device must not be empty"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be greater than zero"));
        }
        self.web
            .addr
            .parse::<std::net::SocketAddr>()
            .map_err(|e| anyhow!("invalid web address '{}': {}", self.web.addr, e))?;
        if let Some(url) = &self.notify.discord_webhook_url {
            validate_http_url("DISCORD_WEBHOOK_URL", url)?;
        }
        validate_http_url("telegram_api", &self.notify.telegram_api)?;
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<WatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env_string(key) {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|_| anyhow!("{} has an invalid value: '{}'", key, value)),
        None => Ok(None),
    }
}

fn validate_http_url(name: &str, value: &str) -> Result<()> {
    let parsed =
        url::Url::parse(value).map_err(|e| anyhow!("{} is not a valid URL: {}", name, e))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(anyhow!("{} must use http or https, not '{}'", name, other)),
    }
}

pub fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

fn normalize_labels(labels: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(labels.len());
    for label in labels {
        let label = label.trim().to_lowercase();
        if !label.is_empty() && !out.contains(&label) {
            out.push(label);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detector_defaults_validate() {
        assert!(DetectorConfig::default().validate().is_ok());
    }

    #[test]
    fn detector_rejects_bad_values() {
        let bad = [
            DetectorConfig {
                sensitivity: 0,
                ..DetectorConfig::default()
            },
            DetectorConfig {
                min_area: 0,
                ..DetectorConfig::default()
            },
            DetectorConfig {
                min_motion_frames: 0,
                ..DetectorConfig::default()
            },
            DetectorConfig {
                cooldown_seconds: -1.0,
                ..DetectorConfig::default()
            },
            DetectorConfig {
                background_weight: 1.5,
                ..DetectorConfig::default()
            },
            DetectorConfig {
                blur_kernel: 4,
                ..DetectorConfig::default()
            },
            DetectorConfig {
                blur_kernel: MAX_BLUR_KERNEL + 2,
                ..DetectorConfig::default()
            },
            DetectorConfig {
                blur_kernel: 3_000_000_001,
                ..DetectorConfig::default()
            },
            DetectorConfig {
                cooldown_seconds: 1e20,
                ..DetectorConfig::default()
            },
            DetectorConfig {
                cooldown_seconds: f64::NAN,
                ..DetectorConfig::default()
            },
            DetectorConfig {
                dilate_iterations: 1000,
                ..DetectorConfig::default()
            },
        ];
        for cfg in bad {
            assert!(cfg.validate().is_err(), "{:?} should be rejected", cfg);
        }
    }

    #[test]
    fn shared_settings_reject_invalid_updates() {
        let shared = SharedSettings::default();
        let err = shared.update(|s| s.detector.min_area = 0);
        assert!(err.is_err());
        assert_eq!(shared.detector().min_area, DEFAULT_MIN_AREA);

        let updated = shared
            .update(|s| {
                s.detector.sensitivity = 40;
                s.target_objects = vec![" Dog ".to_string(), "dog".to_string()];
            })
            .unwrap();
        assert_eq!(updated.detector.sensitivity, 40);
        assert_eq!(shared.target_objects(), vec!["dog".to_string()]);
    }

    #[test]
    fn cooldown_converts_without_panicking() {
        let cfg = DetectorConfig {
            cooldown_seconds: 2.5,
            ..DetectorConfig::default()
        };
        assert_eq!(cfg.cooldown(), Duration::from_millis(2500));
        let huge = DetectorConfig {
            cooldown_seconds: 1e20,
            ..DetectorConfig::default()
        };
        assert_eq!(huge.cooldown(), Duration::MAX);
    }

    #[test]
    fn shared_settings_reject_unrepresentable_cooldown() {
        let shared = SharedSettings::default();
        assert!(shared.update(|s| s.detector.cooldown_seconds = 1e20).is_err());
        assert_eq!(shared.detector().cooldown_seconds, DEFAULT_COOLDOWN_SECS);
    }

    #[test]
    fn split_csv_drops_blanks() {
        assert_eq!(split_csv(" cat, ,person,"), vec!["cat", "person"]);
    }
}
