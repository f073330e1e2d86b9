use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// Key for the admin token API (`X-Admin-Key`). Admin routes are closed
    /// when unset.
    pub admin_key: Option<String>,
    /// Set via VIGIL_DB_MAX_CONNECTIONS. Default: 10.
    pub db_max_connections: u32,
    /// Pool acquisition and statement timeout for the token store.
    /// Set via VIGIL_STORE_TIMEOUT_MS. Default: 3000.
    pub store_timeout_ms: u64,
    pub log_format: LogFormat,
}

impl Config {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

/// Empty means the default, `text`.
pub fn parse_log_format(raw: &str) -> anyhow::Result<LogFormat> {
    match raw.trim().to_lowercase().as_str() {
        "" | "text" => Ok(LogFormat::Text),
        "json" => Ok(LogFormat::Json),
        other => anyhow::bail!("VIGIL_LOG_FORMAT must be 'text' or 'json', got '{}'", other),
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let log_format = parse_log_format(&std::env::var("VIGIL_LOG_FORMAT").unwrap_or_default())?;

    let admin_key = std::env::var("VIGIL_ADMIN_KEY")
        .ok()
        .filter(|k| !k.trim().is_empty());

    Ok(Config {
        port: std::env::var("VIGIL_PORT")
            .unwrap_or_else(|_| "8443".into())
            .parse()
            .unwrap_or(8443),
        database_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/vigil".into()),
        admin_key,
        db_max_connections: std::env::var("VIGIL_DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10),
        store_timeout_ms: std::env::var("VIGIL_STORE_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3000),
        log_format,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_accepts_known_values() {
        assert_eq!(parse_log_format("").unwrap(), LogFormat::Text);
        assert_eq!(parse_log_format("JSON").unwrap(), LogFormat::Json);
        assert_eq!(parse_log_format(" text ").unwrap(), LogFormat::Text);
    }

    #[test]
    fn log_format_rejects_unknown_values() {
        let err = parse_log_format("yaml").unwrap_err();
        assert!(err.to_string().contains("yaml"));
    }
}
