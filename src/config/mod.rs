mod settings;

pub use settings::{
    Config, ConfigError, InlineScriptHandling, OptimizationLevel, RecorderConfig, ReplayConfig,
    ScriptHandling, EXAMPLE_CONFIG,
};
