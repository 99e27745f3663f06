//! Configuration management

use clap::Parser;
use config::{Config as ConfigBuilder, ConfigError as BuilderError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid server configuration: {0}")]
    InvalidServer(String),

    #[error("Invalid database configuration: {0}")]
    InvalidDatabase(String),

    #[error("Invalid logging configuration: {0}")]
    InvalidLogging(String),

    #[error("Invalid auth configuration: {0}")]
    InvalidAuth(String),

    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
}

impl From<BuilderError> for ConfigError {
    fn from(err: BuilderError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub auth: AuthConfig,
}

/// Environment prefix; nesting uses `__`, e.g. `PASSAGE_AUTH__JWT_SECRET`
const ENV_PREFIX: &str = "PASSAGE";

fn with_defaults(
    builder: config::builder::ConfigBuilder<config::builder::DefaultState>,
) -> Result<config::builder::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
    Ok(builder
        .set_default("server.host", "127.0.0.1")?
        .set_default("server.port", 8080)?
        .set_default("server.request_timeout", 30)?
        .set_default("server.allowed_origins", vec!["*"])?
        .set_default("database.path", "./data/passage.db")?
        .set_default("database.connection_pool_size", 10)?
        .set_default("database.busy_timeout", 5000)?
        .set_default("logging.level", "info")?
        .set_default("logging.format", "json")?
        .set_default("logging.output", "stdout")?
        .set_default("auth.jwt_secret", "")?
        .set_default("auth.access_ttl", 900)? // 15 minutes
        .set_default("auth.refresh_ttl", 2_592_000)? // 30 days
        .set_default("auth.password_cost", 12)?
        .set_default("auth.cookie_secure", false)?
        .set_default("auth.session_sweep_interval", 3600)?)
}

impl Config {
    /// Load configuration with precedence: CLI args > Environment variables > Config file > Defaults
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();

        let mut builder = with_defaults(ConfigBuilder::builder())?;

        if let Some(config_path) = &cli_args.config {
            if !config_path.exists() {
                return Err(ConfigError::FileNotFound(config_path.display().to_string()));
            }
            builder = builder.add_source(File::from(config_path.as_path()));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        if let Some(host) = &cli_args.host {
            builder = builder.set_override("server.host", host.clone())?;
        }
        if let Some(port) = cli_args.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(db_path) = &cli_args.database {
            builder = builder.set_override("database.path", db_path.display().to_string())?;
        }
        if let Some(log_level) = &cli_args.log_level {
            builder = builder.set_override("logging.level", log_level.clone())?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file path, on top of the defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let config: Config = with_defaults(ConfigBuilder::builder())?
            .add_source(File::from(path))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.logging.validate()?;
        self.auth.validate()?;
        Ok(())
    }
}

/// Command-line arguments for configuration override
#[derive(Debug, Parser)]
#[command(name = "passage")]
#[command(about = "Passage authentication server", long_about = None)]
pub struct CliArgs {
    /// Path to configuration file (TOML format)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Server host address
    #[arg(long, value_name = "HOST")]
    pub host: Option<String>,

    /// Server port
    #[arg(short, long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Database file path
    #[arg(short, long, value_name = "PATH")]
    pub database: Option<PathBuf>,

    /// Log level (debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout: u64, // seconds
    pub allowed_origins: Vec<String>,
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::InvalidServer("host cannot be empty".to_string()));
        }

        if self.port == 0 {
            return Err(ConfigError::InvalidServer("port must be greater than 0".to_string()));
        }

        if self.request_timeout == 0 {
            return Err(ConfigError::InvalidServer(
                "request_timeout must be greater than 0".to_string(),
            ));
        }

        if self.allowed_origins.is_empty() {
            return Err(ConfigError::InvalidServer("allowed_origins cannot be empty".to_string()));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub connection_pool_size: usize,
    pub busy_timeout: u64, // milliseconds
}

impl DatabaseConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidDatabase("path cannot be empty".to_string()));
        }

        if self.connection_pool_size == 0 {
            return Err(ConfigError::InvalidDatabase(
                "connection_pool_size must be greater than 0".to_string(),
            ));
        }

        if self.busy_timeout == 0 {
            return Err(ConfigError::InvalidDatabase(
                "busy_timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
    pub log_file: Option<PathBuf>,
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "level must be one of: {:?}",
                valid_levels
            )));
        }

        let valid_formats = ["json", "text"];
        if !valid_formats.contains(&self.format.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "format must be one of: {:?}",
                valid_formats
            )));
        }

        let valid_outputs = ["stdout", "file"];
        if !valid_outputs.contains(&self.output.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "output must be one of: {:?}",
                valid_outputs
            )));
        }

        if self.output == "file" && self.log_file.is_none() {
            return Err(ConfigError::InvalidLogging(
                "log_file must be specified when output is 'file'".to_string(),
            ));
        }

        Ok(())
    }
}

/// bcrypt accepts work factors in this range
const MIN_PASSWORD_COST: u32 = 4;
const MAX_PASSWORD_COST: u32 = 31;

/// Credential lifecycle settings
#[derive(Clone, Deserialize)]
pub struct AuthConfig {
    /// Symmetric signing secret for access tokens
    pub jwt_secret: String,
    pub access_ttl: u64,  // seconds
    pub refresh_ttl: u64, // seconds
    /// bcrypt work factor
    pub password_cost: u32,
    /// Mark auth cookies `Secure`
    pub cookie_secure: bool,
    pub session_sweep_interval: u64, // seconds
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"<redacted>")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("password_cost", &self.password_cost)
            .field("cookie_secure", &self.cookie_secure)
            .field("session_sweep_interval", &self.session_sweep_interval)
            .finish()
    }
}

impl AuthConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.trim().is_empty() {
            return Err(ConfigError::InvalidAuth("jwt_secret is required".to_string()));
        }

        if self.access_ttl == 0 {
            return Err(ConfigError::InvalidAuth("access_ttl must be greater than 0".to_string()));
        }

        if self.refresh_ttl <= self.access_ttl {
            return Err(ConfigError::InvalidAuth(
                "refresh_ttl must be greater than access_ttl".to_string(),
            ));
        }

        if !(MIN_PASSWORD_COST..=MAX_PASSWORD_COST).contains(&self.password_cost) {
            return Err(ConfigError::InvalidAuth(format!(
                "password_cost must be between {} and {}",
                MIN_PASSWORD_COST, MAX_PASSWORD_COST
            )));
        }

        if self.session_sweep_interval == 0 {
            return Err(ConfigError::InvalidAuth(
                "session_sweep_interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn access_ttl(&self) -> Duration {
        Duration::from_secs(self.access_ttl)
    }

    pub fn refresh_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn auth_config() -> AuthConfig {
        AuthConfig {
            jwt_secret: "secret".to_string(),
            access_ttl: 900,
            refresh_ttl: 86400,
            password_cost: 12,
            cookie_secure: false,
            session_sweep_interval: 60,
        }
    }

    #[test]
    fn test_auth_config_requires_secret() {
        let mut config = auth_config();
        assert!(config.validate().is_ok());

        config.jwt_secret = "   ".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidAuth(_))));
    }

    #[test]
    fn test_auth_config_ttl_ordering() {
        let mut config = auth_config();
        config.refresh_ttl = config.access_ttl;
        assert!(config.validate().is_err());

        config.access_ttl = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_auth_config_cost_bounds() {
        let mut config = auth_config();
        config.password_cost = 3;
        assert!(config.validate().is_err());
        config.password_cost = 32;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let rendered = format!("{:?}", auth_config());
        assert!(!rendered.contains("\"secret\""));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_from_file_layers_over_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[auth]\njwt_secret = \"from-file\"\naccess_ttl = 60\n\n[server]\nport = 9090"
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.auth.jwt_secret, "from-file");
        assert_eq!(config.auth.access_ttl(), Duration::from_secs(60));
        assert_eq!(config.auth.refresh_ttl, 2_592_000);
    }

    #[test]
    fn test_from_file_without_secret_is_fatal() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[server]\nport = 9090").unwrap();

        assert!(matches!(
            Config::from_file(file.path()),
            Err(ConfigError::InvalidAuth(_))
        ));
    }
}
