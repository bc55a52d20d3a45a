use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::util::paths::config_path;

/// Example configuration file contents (bundled with the crate)
pub const EXAMPLE_CONFIG: &str = include_str!("config.toml.example");

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// What the snapshot does with `<script>` elements.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ScriptHandling {
    #[default]
    Remove,
    KeepSafe,
    KeepAll,
}

/// Treatment of inline scripts under [`ScriptHandling::KeepSafe`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum InlineScriptHandling {
    #[default]
    Remove,
    Keep,
}

/// 0 skips the resource pass, 1 runs it, 2 adds the aggressive pass.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(try_from = "u8", into = "u8")]
pub enum OptimizationLevel {
    None,
    #[default]
    Standard,
    Aggressive,
}

impl OptimizationLevel {
    pub fn optimizes_resources(self) -> bool {
        self >= OptimizationLevel::Standard
    }

    pub fn is_aggressive(self) -> bool {
        self == OptimizationLevel::Aggressive
    }
}

impl TryFrom<u8> for OptimizationLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Standard),
            2 => Ok(Self::Aggressive),
            other => Err(format!("optimization level must be 0, 1 or 2 (got {other})")),
        }
    }
}

impl From<OptimizationLevel> for u8 {
    fn from(level: OptimizationLevel) -> Self {
        match level {
            OptimizationLevel::None => 0,
            OptimizationLevel::Standard => 1,
            OptimizationLevel::Aggressive => 2,
        }
    }
}

/// Capture and snapshot settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Start recording as soon as the recorder is launched
    pub auto_start: bool,
    /// Hard cap on session length (0 = unlimited)
    pub max_duration_seconds: u64,
    /// Periodic save interval (0 = only save on stop)
    pub save_interval_seconds: u64,
    pub user_id: Option<String>,
    pub capture_mouse_move: bool,
    pub throttle_mouse_move_ms: u64,
    pub throttle_scroll_ms: u64,
    pub throttle_resize_ms: u64,
    /// Elements matching any of these (or inside one) are never recorded
    pub exclude_element_selectors: Vec<String>,
    /// Take one sanitized HTML snapshot when the session starts
    pub capture_html: bool,
    pub script_handling: ScriptHandling,
    /// Hosts whose external scripts survive `keep-safe`
    pub safe_script_sources: Vec<String>,
    pub inline_script_handling: InlineScriptHandling,
    pub optimization_level: OptimizationLevel,
    pub inline_css: bool,
    pub keep_external_resources: bool,
    pub allowed_resource_domains: Vec<String>,
    pub remove_invisible_elements: bool,
    pub use_placeholders_for_images: bool,
    pub keep_fonts: bool,
    pub remove_iframes: bool,
    pub remove_media: bool,
    /// Upper bound on in-flight resource fetches
    pub fetch_concurrency: usize,
    pub fetch_timeout_ms: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            auto_start: false,
            max_duration_seconds: 1800,
            save_interval_seconds: 30,
            user_id: None,
            capture_mouse_move: true,
            throttle_mouse_move_ms: 50,
            throttle_scroll_ms: 100,
            throttle_resize_ms: 100,
            exclude_element_selectors: Vec::new(),
            capture_html: true,
            script_handling: ScriptHandling::Remove,
            safe_script_sources: Vec::new(),
            inline_script_handling: InlineScriptHandling::Remove,
            optimization_level: OptimizationLevel::Standard,
            inline_css: true,
            // Documented as false in places; true is what ships.
            keep_external_resources: true,
            allowed_resource_domains: Vec::new(),
            remove_invisible_elements: false,
            use_placeholders_for_images: true,
            keep_fonts: true,
            remove_iframes: false,
            remove_media: false,
            fetch_concurrency: 6,
            fetch_timeout_ms: 5000,
        }
    }
}

/// Playback settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub speed: f64,
    #[serde(rename = "loop")]
    pub loop_playback: bool,
    pub show_cursor: bool,
    /// Dispatch synthetic input events into the sandbox
    pub simulate_real_events: bool,
    pub scale_to_fit: bool,
    pub skip_inactivity: bool,
    pub max_inactivity_delay_ms: u64,
    pub sandboxed: bool,
    pub sandbox_capabilities: Vec<String>,
    pub allow_scripts: bool,
    /// Most recent synthetic events the sandbox keeps for inspection
    pub dispatch_log_limit: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            speed: 1.0,
            loop_playback: false,
            show_cursor: true,
            simulate_real_events: true,
            scale_to_fit: true,
            skip_inactivity: false,
            max_inactivity_delay_ms: 2000,
            sandboxed: true,
            sandbox_capabilities: vec!["allow-same-origin".to_string()],
            allow_scripts: false,
            dispatch_log_limit: 500,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub recorder: RecorderConfig,
    pub replay: ReplayConfig,
}

impl Config {
    /// Load configuration from ~/.pagetape/config.toml, falling back to defaults
    pub fn load() -> Self {
        let config_file = config_path();

        // Create example config on first run
        if !config_file.exists() {
            Self::create_default_config(&config_file);
        }

        match Self::load_from(&config_file) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %e, "Using default configuration");
                Config::default()
            }
        }
    }

    /// Load and validate a specific config file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let speed = self.replay.speed;
        if !speed.is_finite() || speed <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "replay.speed must be a positive number (got {speed})"
            )));
        }
        if self.recorder.fetch_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "recorder.fetch_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Create the default config file from the bundled example
    fn create_default_config(path: &Path) {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                if let Err(e) = fs::create_dir_all(parent) {
                    tracing::warn!(error = %e, "Failed to create config directory");
                    return;
                }
            }
        }

        if let Err(e) = fs::write(path, EXAMPLE_CONFIG) {
            tracing::warn!(error = %e, "Failed to write default config");
        }
    }
}
