//! YAML configuration: database, API, monitoring and logging sections

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub timeout_sec: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default)]
    pub interval_sec: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub file: LogFileConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogFileConfig {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub max_size: i64,
    #[serde(default)]
    pub max_backups: i64,
    #[serde(default)]
    pub max_age: i64,
    #[serde(default)]
    pub compress: bool,
}

const VALID_LEVELS: &[&str] = &["debug", "info", "warn", "error", "dpanic", "panic", "fatal"];
const VALID_FORMATS: &[&str] = &["json", "console"];

impl Config {
    /// Read, default-fill and validate the configuration at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("error reading config file {}", path.display()))?;
        let mut config: Config =
            serde_yaml::from_str(&data).context("error parsing config file")?;
        config.apply_defaults();
        config.validate().context("invalid configuration")?;
        Ok(config)
    }

    fn apply_defaults(&mut self) {
        if self.logging.level.is_empty() {
            self.logging.level = "info".to_string();
        }
        if self.logging.format.is_empty() {
            self.logging.format = "json".to_string();
        }
        if self.logging.file.path.is_empty() {
            self.logging.file.path = "logs/tunnelgrid.log".to_string();
        }
        if self.logging.file.max_size <= 0 {
            self.logging.file.max_size = 100;
        }
        if self.logging.file.max_backups <= 0 {
            self.logging.file.max_backups = 5;
        }
        if self.logging.file.max_age <= 0 {
            self.logging.file.max_age = 30;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.database.host.is_empty() {
            bail!("database host is required");
        }
        if self.database.port == 0 {
            bail!("invalid database port: {}", self.database.port);
        }
        if self.database.user.is_empty() {
            bail!("database user is required");
        }
        if self.database.password.is_empty() {
            bail!("database password is required");
        }
        if self.database.name.is_empty() {
            bail!("database name is required");
        }
        if self.database.timeout_sec == 0 {
            bail!("invalid database timeout: {}", self.database.timeout_sec);
        }

        if self.api.port == 0 {
            bail!("invalid API port: {}", self.api.port);
        }

        if self.monitoring.interval_sec == 0 {
            bail!("invalid monitoring interval: {}", self.monitoring.interval_sec);
        }

        if !VALID_LEVELS.contains(&self.logging.level.as_str()) {
            bail!("invalid log level: {}", self.logging.level);
        }
        if !VALID_FORMATS.contains(&self.logging.format.as_str()) {
            bail!("invalid log format: {}", self.logging.format);
        }
        if self.logging.file.max_size < 0 {
            bail!("invalid log max size: {}", self.logging.file.max_size);
        }
        if self.logging.file.max_backups < 0 {
            bail!("invalid log max backups: {}", self.logging.file.max_backups);
        }
        if self.logging.file.max_age < 0 {
            bail!("invalid log max age: {}", self.logging.file.max_age);
        }

        Ok(())
    }
}

impl LoggingConfig {
    /// Map the configured level onto a tracing filter directive. The zap
    /// levels above `error` have no tracing equivalent.
    pub fn tracing_level(&self) -> &str {
        match self.level.as_str() {
            "dpanic" | "panic" | "fatal" => "error",
            level => level,
        }
    }
}
