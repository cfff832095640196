//!
//! Documentation of the config module.
//! Sets up the 'config' and 'logger'.
//!
//! Values come from `safetymapper.toml` (created with defaults on first run),
//! then from the environment, a `.env` file included. The JWT secret has no
//! default, startup fails until one is configured.
//!

extern crate confy;

use serde::{Serialize, Deserialize};
use std::default::Default;
use std::str::FromStr;
use thiserror::Error;

pub const CONFIG_FILE: &str = "safetymapper.toml";
pub const MIN_SECRET_CHARS: usize = 32;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not load safetymapper.toml: {0}")]
    Load(#[from] confy::ConfyError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfyConfig {
    pub print_log: bool,
    pub log_file: String,
    pub log_level: String,
    /// `development` or `production`
    pub environment: String,
    pub address: String,
    pub port: u16,
    pub database: String,
    pub database_uri: String,
    /// seconds
    pub timeout: u64,
    pub jwt_secret: String,
    pub max_upload_mb: u64,
    pub upload_dir: String,
    /// Origin allowed by CORS
    pub frontend_origin: String,
    pub tokens_per_km: f64,
    pub event_report_reward: f64,
    pub event_update_reward: f64,
    pub default_page_size: u64,
    pub max_page_size: u64,
}

///Config check
impl Default for ConfyConfig {
    fn default() -> Self {
        ConfyConfig {
            print_log: true,
            log_file: "output.log".to_string(),
            log_level: "info".to_string(),
            environment: "development".to_string(),
            address: "0.0.0.0".to_string(),
            port: 5000,
            database: "safetymapper".to_string(),
            database_uri: "mongodb://localhost:27017/".to_string(),
            timeout: 2,
            jwt_secret: String::new(),
            max_upload_mb: 100,
            upload_dir: "uploads".to_string(),
            frontend_origin: "http://localhost:3000".to_string(),
            tokens_per_km: 2.0,
            event_report_reward: 5.0,
            event_update_reward: 3.0,
            default_page_size: 20,
            max_page_size: 100,
        }
    }
}

impl ConfyConfig {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }

    /// Applies environment overrides, `lookup` returns the value of a variable if set
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str| lookup(key).map(|value| value.trim().to_string()).filter(|value| !value.is_empty());

        if let Some(value) = text("APP_ENV") { self.environment = value; }
        if let Some(value) = text("ADDRESS") { self.address = value; }
        if let Some(value) = text("MONGODB_URI") { self.database_uri = value; }
        if let Some(value) = text("MONGODB_DATABASE") { self.database = value; }
        if let Some(value) = text("JWT_SECRET") { self.jwt_secret = value; }
        if let Some(value) = text("UPLOAD_DIR") { self.upload_dir = value; }
        if let Some(value) = text("FRONTEND_URL") { self.frontend_origin = value; }
        if let Some(value) = text("LOG_LEVEL") { self.log_level = value; }
        if let Some(value) = text("LOG_FILE") { self.log_file = value; }

        if let Some(value) = text("PORT") {
            self.port = parse_number("PORT", &value)?;
        }
        if let Some(value) = text("MAX_FILE_SIZE_MB") {
            self.max_upload_mb = parse_number("MAX_FILE_SIZE_MB", &value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.chars().count() < MIN_SECRET_CHARS {
            return Err(ConfigError::Invalid(format!(
                "JWT_SECRET must be set to at least {} characters", MIN_SECRET_CHARS
            )));
        }
        if self.max_upload_mb == 0 {
            return Err(ConfigError::Invalid("max_upload_mb must be greater than 0".into()));
        }
        for (name, value) in [
            ("tokens_per_km", self.tokens_per_km),
            ("event_report_reward", self.event_report_reward),
            ("event_update_reward", self.event_update_reward),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid(format!("{} must be a non-negative number", name)));
            }
        }
        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            return Err(ConfigError::Invalid("default_page_size must be between 1 and max_page_size".into()));
        }
        if log::LevelFilter::from_str(&self.log_level).is_err() {
            return Err(ConfigError::Invalid(format!("unknown log level {}", self.log_level)));
        }
        Ok(())
    }
}

fn parse_number<T: FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse::<T>()
        .map_err(|_| ConfigError::Invalid(format!("{} must be a number, got {}", name, value)))
}

/// Initialize config and load
pub async fn init() -> Result<ConfyConfig, ConfigError> {
    let _ = dotenvy::dotenv();
    let mut cfg: ConfyConfig = confy::load_path(CONFIG_FILE)?;
    cfg.apply_overrides(|key| std::env::var(key).ok())?;
    cfg.validate()?;
    Ok(cfg)
}

/// Sets up logger
pub async fn setup_logger(file: &ConfyConfig) -> Result<(), fern::InitError> {
    let level = log::LevelFilter::from_str(&file.log_level).unwrap_or(log::LevelFilter::Info);

    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(level)
        .level_for("mongodb", log::LevelFilter::Warn)
        .chain(fern::log_file(&file.log_file)?);

    if file.print_log {
        dispatch = dispatch.chain(std::io::stdout());
    }
    dispatch.apply()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn defaults_need_a_secret() {
        let cfg = ConfyConfig::default();
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
        assert!(!cfg.is_production());
        assert_eq!(cfg.max_upload_bytes(), 100 * 1024 * 1024);
    }

    #[test]
    fn environment_overrides_file_values() {
        let vars = env(&[
            ("APP_ENV", "production"),
            ("PORT", "8080"),
            ("JWT_SECRET", SECRET),
            ("MAX_FILE_SIZE_MB", "25"),
            ("FRONTEND_URL", "https://safetymapper.example"),
            ("MONGODB_URI", " "),
        ]);
        let mut cfg = ConfyConfig::default();
        cfg.apply_overrides(|key| vars.get(key).cloned()).unwrap();

        assert!(cfg.is_production());
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.max_upload_mb, 25);
        assert_eq!(cfg.frontend_origin, "https://safetymapper.example");
        // blank values are ignored
        assert_eq!(cfg.database_uri, ConfyConfig::default().database_uri);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let vars = env(&[("PORT", "eighty")]);
        let mut cfg = ConfyConfig::default();
        assert!(cfg.apply_overrides(|key| vars.get(key).cloned()).is_err());
    }

    #[test]
    fn short_secret_and_bad_tunables_fail_validation() {
        let mut cfg = ConfyConfig { jwt_secret: "short".into(), ..Default::default() };
        assert!(cfg.validate().is_err());

        cfg.jwt_secret = SECRET.into();
        cfg.tokens_per_km = -1.0;
        assert!(cfg.validate().is_err());

        cfg.tokens_per_km = 2.0;
        cfg.log_level = "loud".into();
        assert!(cfg.validate().is_err());
    }
}
