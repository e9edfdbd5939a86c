use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, anyhow};
use tracing::{debug, info};

use crate::models::AppConfig;

pub const CONFIG_PATH_VAR: &str = "SCANWARD_CONFIG_PATH";
pub const CONFIG_JSON_VAR: &str = "SCANWARD_CONFIG_JSON";

const DEFAULT_FILES: &[&str] = &[
    "scanward.toml",
    "scanward.json",
    "config/scanward.toml",
    "config/scanward.json",
];

/// Source that produced the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

/// Read `.env` from the working directory or its parents, if present.
pub fn load_env_file() -> anyhow::Result<Option<PathBuf>> {
    match dotenvy::dotenv() {
        Ok(path) => {
            debug!(path = %path.display(), "loaded .env");
            Ok(Some(path))
        }
        Err(err) if err.not_found() => Ok(None),
        Err(err) => Err(err).context("failed to read .env"),
    }
}

/// A validated configuration and where it came from.
#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: AppConfig,
    pub source: ConfigSource,
}

impl AppConfig {
    /// Load from the process environment after reading `.env`.
    ///
    /// Evaluation order:
    /// 1) `$SCANWARD_CONFIG_PATH` (TOML or JSON file),
    /// 2) `$SCANWARD_CONFIG_JSON` (inline JSON),
    /// 3) the first default file found under the working directory,
    /// 4) defaults.
    ///
    /// Environment overrides apply on top, then the guard rails run.
    pub fn load() -> anyhow::Result<ConfigLoad> {
        load_env_file()?;
        Self::load_with(Path::new("."), |key| env::var(key).ok())
    }

    /// Same as [`AppConfig::load`] with an explicit lookup and base directory.
    pub fn load_with<F>(base_dir: &Path, lookup: F) -> anyhow::Result<ConfigLoad>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_blank = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let (mut config, source) = if let Some(path) = non_blank(CONFIG_PATH_VAR) {
            let path = PathBuf::from(path);
            (Self::load_from_file(&path)?, ConfigSource::EnvPath(path))
        } else if let Some(raw) = non_blank(CONFIG_JSON_VAR) {
            let parsed = Self::parse_json(&raw).with_context(|| format!("failed to parse {CONFIG_JSON_VAR}"))?;
            (parsed, ConfigSource::EnvInline)
        } else if let Some(path) = Self::find_default_file(base_dir) {
            (Self::load_from_file(&path)?, ConfigSource::File(path))
        } else {
            (Self::default(), ConfigSource::Default)
        };

        config.apply_env_overrides(non_blank)?;
        config.validate()?;

        info!(source = ?source, "configuration loaded");
        Ok(ConfigLoad { config, source })
    }

    /// Apply `DATABASE_URL`, `SERVER_HOST`, `SERVER_PORT` and
    /// `SCANWARD_WORKERS` on top of the loaded values.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL") {
            self.database.url = Some(url);
        }
        if let Some(host) = lookup("SERVER_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("SERVER_PORT") {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("SERVER_PORT is not a port number: {port}"))?;
        }
        if let Some(workers) = lookup("SCANWARD_WORKERS") {
            self.orchestrator.workers.parallelism = workers
                .trim()
                .parse()
                .with_context(|| format!("SCANWARD_WORKERS is not a worker count: {workers}"))?;
        }
        Ok(())
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => {
                Self::parse_json(&contents).with_context(|| format!("invalid config {}", path.display()))
            }
            Some("toml") => toml::from_str(&contents)
                .map_err(|err| anyhow!("invalid config {}: {}", path.display(), err)),
            _ => Self::parse_from_str(&contents, &path.display().to_string()),
        }
    }

    /// Parse TOML, falling back to JSON.
    pub fn parse_from_str(contents: &str, origin: &str) -> anyhow::Result<Self> {
        toml::from_str(contents).or_else(|toml_err| {
            serde_json::from_str(contents).map_err(|json_err| {
                anyhow!(
                    "failed to parse config {}: toml error: {}; json error: {}",
                    origin,
                    toml_err,
                    json_err
                )
            })
        })
    }

    pub fn parse_json(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw).map_err(|err| anyhow!("invalid config json: {err}"))
    }

    fn find_default_file(base_dir: &Path) -> Option<PathBuf> {
        DEFAULT_FILES
            .iter()
            .map(|candidate| base_dir.join(candidate))
            .find(|path| path.exists())
    }
}
