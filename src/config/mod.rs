//! Service configuration: TOML file, then environment overrides.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_ROGU_URL: &str = "https://github.com/MHmorgan/rogu/releases/latest/download/rogu";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// SQLite database file. `~` is expanded.
    pub database: String,
    /// Upper bound for request bodies, in bytes.
    pub max_body_bytes: usize,
    /// Where `GET /` sends clients looking for the command-line client.
    pub rogu_url: String,
    /// Fallback filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            database: default_database(),
            max_body_bytes: 64 * 1024 * 1024,
            rogu_url: DEFAULT_ROGU_URL.to_string(),
            log_level: "info".to_string(),
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "ugor")
}

fn default_database() -> String {
    project_dirs()
        .map(|d| d.data_dir().join("ugor.sqlite3").to_string_lossy().into_owned())
        .unwrap_or_else(|| "ugor.sqlite3".to_string())
}

/// Default config file location, if the platform has one.
pub fn default_path() -> Option<PathBuf> {
    project_dirs().map(|d| d.config_dir().join("config.toml"))
}

impl Config {
    /// Load from `path` (or the default location). A missing file yields
    /// defaults; environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).or_else(default_path);
        let mut config = match path {
            Some(p) if p.exists() => Self::from_file(&p)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = var("UGOR_HOST") {
            self.host = host;
        }
        if let Some(port) = var("UGOR_PORT") {
            self.port = port.parse().with_context(|| format!("Invalid UGOR_PORT: {port}"))?;
        }
        if let Some(db) = var("UGOR_DATABASE") {
            self.database = db;
        }
        if let Some(level) = var("UGOR_LOG") {
            self.log_level = level;
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.database).into_owned())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
