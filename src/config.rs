use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TaskletError};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub sqlite_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    pub token_secret: Option<String>,
    pub token_ttl_minutes: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    pub server: Option<ServerConfig>,
    pub database: Option<DatabaseConfig>,
    pub auth: Option<AuthConfig>,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| TaskletError::Config(e.to_string()))?;
        let config: Config =
            serde_json::from_str(&content).map_err(|e| TaskletError::Config(e.to_string()))?;
        Ok(config)
    }

    pub fn host(&self) -> String {
        self.server
            .as_ref()
            .and_then(|server| server.host.clone())
            .unwrap_or_else(|| "127.0.0.1".to_string())
    }

    pub fn port(&self) -> u16 {
        self.server
            .as_ref()
            .and_then(|server| server.port)
            .unwrap_or(8000)
    }

    pub fn sqlite_path(&self) -> String {
        self.database
            .as_ref()
            .and_then(|database| database.sqlite_path.clone())
            .unwrap_or_else(|| "./data/tasklet.db".to_string())
    }

    pub fn token_secret(&self) -> Option<String> {
        self.auth
            .as_ref()
            .and_then(|auth| auth.token_secret.clone())
            .filter(|secret| !secret.is_empty())
    }

    pub fn token_ttl_minutes(&self) -> i64 {
        self.auth
            .as_ref()
            .and_then(|auth| auth.token_ttl_minutes)
            .unwrap_or(30)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_sections_missing() {
        let config = Config::default();
        assert_eq!(config.host(), "127.0.0.1");
        assert_eq!(config.port(), 8000);
        assert_eq!(config.sqlite_path(), "./data/tasklet.db");
        assert_eq!(config.token_secret(), None);
        assert_eq!(config.token_ttl_minutes(), 30);
    }

    #[test]
    fn parses_partial_json() {
        let config: Config = serde_json::from_str(
            r#"{"server": {"port": 9000}, "auth": {"token_secret": "s3cret"}}"#,
        )
        .unwrap();
        assert_eq!(config.port(), 9000);
        assert_eq!(config.host(), "127.0.0.1");
        assert_eq!(config.token_secret().as_deref(), Some("s3cret"));
    }
}
