use anyhow::{Context, Result};
use facewatch_core::{
    CaptureConstraints, DebounceTimings, FacingMode, RecognitionSettings, DEFAULT_MATCH_THRESHOLD,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runtime configuration: an optional TOML file overridden by `FACEWATCH_*`
/// environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// A descriptor matches a label when its Euclidean distance is below
    /// this. The ArcFace descriptors are unit length, so distance `d` and
    /// cosine similarity `s` are related by `d = sqrt(2 - 2s)`: the default
    /// 1.095 accepts cosine similarity above 0.40, and 0.6 would demand
    /// about 0.82.
    pub match_threshold: f32,
    /// Same-label announcements are repeated after this long.
    pub reannounce_ms: u64,
    /// Recognition text is cleared after this long without a face.
    pub grace_ms: u64,
    /// Scheduler tick of the recognition loop.
    pub tick_ms: u64,
    /// Auto-hide delay for transient status messages.
    pub message_timeout_ms: u64,
    pub capture_width: u32,
    pub capture_height: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            model_dir: default_model_dir(),
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            reannounce_ms: 3000,
            grace_ms: 2000,
            tick_ms: 16,
            message_timeout_ms: 3000,
            capture_width: 640,
            capture_height: 480,
        }
    }
}

impl Config {
    /// Load the file named by `FACEWATCH_CONFIG` (if any), then apply the
    /// process environment on top.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var_os("FACEWATCH_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Override fields from `FACEWATCH_*` variables resolved through `lookup`.
    /// Values that fail to parse are ignored with a warning.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(device) = lookup("FACEWATCH_CAMERA_DEVICE") {
            self.camera_device = device;
        }
        if let Some(dir) = lookup("FACEWATCH_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        override_parsed(&lookup, "FACEWATCH_MATCH_THRESHOLD", &mut self.match_threshold);
        override_parsed(&lookup, "FACEWATCH_REANNOUNCE_MS", &mut self.reannounce_ms);
        override_parsed(&lookup, "FACEWATCH_GRACE_MS", &mut self.grace_ms);
        override_parsed(&lookup, "FACEWATCH_TICK_MS", &mut self.tick_ms);
        override_parsed(&lookup, "FACEWATCH_MESSAGE_TIMEOUT_MS", &mut self.message_timeout_ms);
        override_parsed(&lookup, "FACEWATCH_CAPTURE_WIDTH", &mut self.capture_width);
        override_parsed(&lookup, "FACEWATCH_CAPTURE_HEIGHT", &mut self.capture_height);
    }

    pub fn settings(&self) -> RecognitionSettings {
        RecognitionSettings {
            match_threshold: self.match_threshold,
            timings: DebounceTimings {
                reannounce_after: Duration::from_millis(self.reannounce_ms),
                grace: Duration::from_millis(self.grace_ms),
            },
            tick: Duration::from_millis(self.tick_ms),
            message_timeout: Duration::from_millis(self.message_timeout_ms),
            constraints: CaptureConstraints {
                facing: FacingMode::User,
                ideal_width: self.capture_width,
                ideal_height: self.capture_height,
            },
        }
    }
}

fn override_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *target = value,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable environment override"),
    }
}

/// `$XDG_DATA_HOME/facewatch/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facewatch")
        .join("models")
}
