// Configuration management: TOML settings and the interactive setup wizard

pub mod interactive;
pub mod settings;


pub use interactive::{run_interactive_config, show_config};
pub use settings::{
    BackendConfig, BackendKind, CONFIG_DIR_ENV, Config, ConfigError, HashingConfig,
    KeywordsConfig, OllamaConfig, ServerConfig,
};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::config_dir()
}
