// Configuration management module
// Handles the TOML configuration file and interactive setup

pub mod interactive;
pub mod settings;


pub use interactive::{run_interactive_config, show_config};
pub use settings::{Config, ConfigError, HOME_ENV_VAR, MAX_BATCH_SIZE, OllamaConfig};
