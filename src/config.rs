use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Placeholder in `db.connection_string` replaced by the escaped password.
pub const PASSWORD_PLACEHOLDER: &str = "{password}";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub service: ServiceConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_connection_string")]
    pub connection_string: String,
    /// Secret substituted into the connection string template.
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_db_name")]
    pub name: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            connection_string: default_connection_string(),
            password: None,
            name: default_db_name(),
        }
    }
}

fn default_connection_string() -> String {
    "sqlite://./data/movies.sqlite".to_string()
}
fn default_db_name() -> String {
    "imdb".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: default_max_file_size_mb(),
        }
    }
}

fn default_max_file_size_mb() -> u64 {
    100
}

impl UploadConfig {
    /// Upload limit in bytes (decimal megabytes).
    pub fn max_bytes(&self) -> usize {
        usize::try_from(self.max_file_size_mb.saturating_mul(1_000_000)).unwrap_or(usize::MAX)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Deployment stage, e.g. `local`, `dev`, `prod`.
    #[serde(default = "default_stage")]
    pub stage: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            stage: default_stage(),
        }
    }
}

fn default_service_name() -> String {
    "imdb-app".to_string()
}
fn default_stage() -> String {
    "local".to_string()
}

impl ServiceConfig {
    pub fn qualified_name(&self) -> String {
        format!("{}-{}", self.name, self.stage)
    }
}

impl Config {
    /// Applies environment overrides using `lookup` to read variables.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MOVIES_DB_CONNECTION_STRING") {
            self.db.connection_string = v;
        }
        if let Some(v) = lookup("MOVIES_DB_PASSWORD") {
            self.db.password = Some(v);
        }
        if let Some(v) = lookup("MOVIES_BIND") {
            self.server.bind = v;
        }
        if let Some(v) = lookup("MAX_CSV_FILE_SIZE_IN_MB") {
            self.upload.max_file_size_mb = v
                .trim()
                .parse()
                .with_context(|| format!("MAX_CSV_FILE_SIZE_IN_MB must be an integer, got '{}'", v))?;
        }
        if let Some(v) = lookup("ENV") {
            self.service.stage = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.upload.max_file_size_mb == 0 {
            bail!("upload.max_file_size_mb must be > 0");
        }

        if self.db.name.is_empty()
            || !self
                .db
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            bail!(
                "db.name '{}' may only contain ASCII letters, digits and '_'",
                self.db.name
            );
        }

        if self.db.connection_string.contains(PASSWORD_PLACEHOLDER) && self.db.password.is_none() {
            bail!(
                "db.connection_string contains {} but no password is configured (set db.password or MOVIES_DB_PASSWORD)",
                PASSWORD_PLACEHOLDER
            );
        }

        Ok(())
    }
}

/// Loads configuration from an optional TOML file, then the process
/// environment, then validates the result.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str(&content).with_context(|| "Failed to parse config file")?
        }
        None => Config::default(),
    };

    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}
