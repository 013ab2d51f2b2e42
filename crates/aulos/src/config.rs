use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

const EMBEDDED_CONFIG: &str = include_str!("../config.json");
const DEFAULT_PORT: &str = "7779";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Server configuration.
///
/// Every field is optional; accessors apply the defaults. `port` accepts a
/// JSON string or integer.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "workPool")]
    pub work_pool: Option<bool>,
    pub debug: Option<bool>,
    pub port: Option<serde_json::Value>,
    pub ssl: Option<SslConfig>,
    pub dns: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct SslConfig {
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
}

impl Config {
    /// Load order: explicit path, else the `CONFIG_PATH` env var, else the
    /// embedded default.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = std::env::var("CONFIG_PATH").ok().filter(|p| !p.is_empty());
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| env_path.map(PathBuf::from));

        let raw = match &path {
            Some(path) => std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?,
            None => EMBEDDED_CONFIG.to_string(),
        };

        Ok(serde_json::from_str(&raw)?)
    }

    pub fn work_pool(&self) -> bool {
        self.work_pool.unwrap_or(false)
    }

    pub fn debug(&self) -> bool {
        self.debug.unwrap_or(false)
    }

    /// A missing `dns` field is the empty string, which selects automatic
    /// resolver racing at startup.
    pub fn dns(&self) -> &str {
        self.dns.as_deref().unwrap_or("")
    }

    pub fn port(&self) -> String {
        match &self.port {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            Some(other) => {
                warn!(?other, "unparsable port value, using default {DEFAULT_PORT}");
                DEFAULT_PORT.to_string()
            }
            None => DEFAULT_PORT.to_string(),
        }
    }

    /// Cert and key paths, only when both are configured and exist on disk.
    pub fn ssl_paths(&self) -> Option<(PathBuf, PathBuf)> {
        let ssl = self.ssl.as_ref()?;
        let (cert, key) = match (&ssl.cert, &ssl.key) {
            (Some(cert), Some(key)) => (cert, key),
            _ => {
                warn!("ssl config incomplete, serving plain http");
                return None;
            }
        };
        if cert.exists() && key.exists() {
            Some((cert.clone(), key.clone()))
        } else {
            warn!("ssl cert or key not found on disk, serving plain http");
            None
        }
    }
}
