//! Application configuration loaded from disk and merged with overrides.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::AutopilotErr;
use crate::error::Result;
use crate::safety::DEFAULT_DENY_PATTERNS;

/// Configuration file looked up in the working directory when no explicit
/// path is given.
pub const CONFIG_TOML_FILE: &str = "autopilot.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Base directory of the file-system message bus.
    pub messages_dir: PathBuf,

    /// How often the actuator polls the program topic.
    pub poll_interval: Duration,

    /// Pixels from each screen edge that vision-guided coordinates must
    /// keep clear of.
    pub screen_margin: u32,

    /// Pointer drift beyond this many pixels from the last observed
    /// position terminates the run as a user interrupt. Zero disables the
    /// check.
    pub pointer_drift_threshold_px: u32,

    /// Case-insensitive substrings that block keyboard-text actions.
    pub dangerous_patterns: Vec<String>,

    pub vision_primary_model: String,
    pub vision_fallback_model: String,
    pub vision_timeout: Duration,
    pub vision_api_base: String,
    /// Environment variable the vision API key is read from.
    pub vision_api_key_env: String,

    /// Replace every handler invocation with logging.
    pub dry_run: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            messages_dir: PathBuf::from("messages"),
            poll_interval: Duration::from_millis(500),
            screen_margin: 5,
            pointer_drift_threshold_px: 50,
            dangerous_patterns: DEFAULT_DENY_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            vision_primary_model: "gemini-2.0-flash-exp".to_string(),
            vision_fallback_model: "gemini-1.5-flash".to_string(),
            vision_timeout: Duration::from_secs(10),
            vision_api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            vision_api_key_env: "GEMINI_API_KEY".to_string(),
            dry_run: false,
        }
    }
}

/// CLI-supplied values that win over both defaults and the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub messages_dir: Option<PathBuf>,
    pub poll_interval_ms: Option<u64>,
    pub dry_run: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigToml {
    messages_dir: Option<PathBuf>,
    poll_interval_ms: Option<u64>,
    screen_margin: Option<u32>,
    pointer_drift_threshold_px: Option<u32>,
    dangerous_patterns: Option<Vec<String>>,
    #[serde(default)]
    vision: VisionToml,
}

#[derive(Debug, Default, Deserialize)]
struct VisionToml {
    primary_model: Option<String>,
    fallback_model: Option<String>,
    timeout_seconds: Option<u64>,
    api_base: Option<String>,
    api_key_env: Option<String>,
}

impl Config {
    /// Loads `path` (or [`CONFIG_TOML_FILE`] when present) and applies
    /// `overrides` on top.
    pub fn load(path: Option<&Path>, overrides: ConfigOverrides) -> Result<Self> {
        let parsed = match path {
            Some(explicit) => Some(read_config_toml(explicit)?),
            None => {
                let default_path = Path::new(CONFIG_TOML_FILE);
                if default_path.exists() {
                    Some(read_config_toml(default_path)?)
                } else {
                    None
                }
            }
        };

        let mut config = Config::default();
        if let Some(file) = parsed {
            if let Some(dir) = file.messages_dir {
                config.messages_dir = dir;
            }
            if let Some(ms) = file.poll_interval_ms {
                config.poll_interval = Duration::from_millis(ms);
            }
            if let Some(margin) = file.screen_margin {
                config.screen_margin = margin;
            }
            if let Some(threshold) = file.pointer_drift_threshold_px {
                config.pointer_drift_threshold_px = threshold;
            }
            if let Some(patterns) = file.dangerous_patterns {
                config.dangerous_patterns = patterns;
            }
            if let Some(model) = file.vision.primary_model {
                config.vision_primary_model = model;
            }
            if let Some(model) = file.vision.fallback_model {
                config.vision_fallback_model = model;
            }
            if let Some(seconds) = file.vision.timeout_seconds {
                config.vision_timeout = Duration::from_secs(seconds);
            }
            if let Some(base) = file.vision.api_base {
                config.vision_api_base = base;
            }
            if let Some(env) = file.vision.api_key_env {
                config.vision_api_key_env = env;
            }
        }

        if let Some(dir) = overrides.messages_dir {
            config.messages_dir = dir;
        }
        if let Some(ms) = overrides.poll_interval_ms {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(dry_run) = overrides.dry_run {
            config.dry_run = dry_run;
        }

        Ok(config)
    }
}

fn read_config_toml(path: &Path) -> Result<ConfigToml> {
    let contents = std::fs::read_to_string(path)?;
    toml::from_str(&contents).map_err(|e| {
        AutopilotErr::Validation(format!("invalid config file {}: {e}", path.display()))
    })
}
