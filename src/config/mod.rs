//! Configuration management for the WAF service.
//!
//! This module handles loading application configuration from an optional
//! configuration file and environment variables, with defaults for every key.

use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use std::env;

use crate::models::Config;

/// Load configuration from the `CONFIG_FILE` file (if present) and the
/// environment. Every key has a default so a bare environment still yields
/// a usable configuration.
pub fn load_config() -> Result<Config, ConfigError> {
    let config_file = env::var("CONFIG_FILE").unwrap_or_else(|_| "config/default.toml".to_string());

    let config = ConfigBuilder::builder()
        .add_source(File::with_name(&config_file).required(false))
        .add_source(Environment::default().separator("__"))
        .set_default("server.host", "127.0.0.1")?
        .set_default("server.port", 8080)?
        .set_default("server.trust_forwarded_for", false)?
        .set_default("rules.rules_file", "config/rules.json")?
        .set_default("rules.root_dir", None::<String>)?
        .set_default("rules.max_extends_depth", 16)?
        .set_default("enforcement.enabled", true)?
        .set_default("enforcement.mode", "block")?
        .set_default("dynamic_block.enabled", true)?
        .set_default("dynamic_block.base_score", 1)?
        .set_default("dynamic_block.threshold", 100)?
        .set_default("dynamic_block.window_seconds", 60)?
        .set_default("dynamic_block.ban_seconds", 600)?
        .set_default("dynamic_block.max_tracked_ips", 65536)?
        .set_default("audit_log.path", "logs/waf_audit.log")?
        .set_default("audit_log.min_level", "info")?
        .build()?;

    config.try_deserialize()
}
