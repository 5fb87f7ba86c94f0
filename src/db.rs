use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

use crate::config::{Config, PASSWORD_PLACEHOLDER};
use crate::store::SqliteDocumentStore;

/// How long a request waits for a pooled connection before failing.
pub const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(60);

/// Substitutes the URL-escaped password into the connection string template.
pub fn resolve_connection_string(template: &str, password: Option<&str>) -> String {
    match password {
        Some(password) if template.contains(PASSWORD_PLACEHOLDER) => {
            // form_urlencoded writes spaces as '+', which is wrong outside a query string.
            let escaped: String = url::form_urlencoded::byte_serialize(password.as_bytes())
                .collect::<String>()
                .replace('+', "%20");
            template.replace(PASSWORD_PLACEHOLDER, &escaped)
        }
        _ => template.to_string(),
    }
}

/// Builds the process-wide pool. No connection is opened until first use.
pub fn connect(config: &Config) -> Result<SqlitePool> {
    let url = resolve_connection_string(
        &config.db.connection_string,
        config.db.password.as_deref(),
    );

    let options = SqliteConnectOptions::from_str(&url)
        .with_context(|| "Invalid db.connection_string")?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    // Ensure parent directory exists
    if let Some(parent) = options.get_filename().parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory: {}", parent.display())
            })?;
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_lazy_with(options);

    Ok(pool)
}

/// Opens the document store named by `db.name`.
pub fn open_store(config: &Config) -> Result<SqliteDocumentStore> {
    SqliteDocumentStore::new(connect(config)?, &config.db.name)
}
