use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use refuge_core::{RefugeError, RefugeResult};

const DEFAULT_CONFIG_NAME: &str = "refuge.json";
const DEFAULT_DB_FILE: &str = "refuge.sqlite";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum DatabaseConfig {
    Sqlite { path: Option<String> },
    Postgres { url: String },
    Mysql { url: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    pub max_connections: Option<u32>,
    pub min_connections: Option<u32>,
    pub connect_timeout_ms: Option<u64>,
    pub acquire_timeout_ms: Option<u64>,
    pub idle_timeout_ms: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub max_page_size: Option<u64>,
    pub max_payload_bytes: Option<usize>,
    pub max_links_per_cell: Option<usize>,
}

impl LimitsConfig {
    pub fn with_defaults() -> Self {
        Self {
            max_page_size: Some(500),
            max_payload_bytes: Some(1_048_576),
            max_links_per_cell: Some(100),
        }
    }
}

/// How payload keys that name no active atomic field are treated.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    Off,
    Warn,
    Error,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RefugeConfig {
    pub database: DatabaseConfig,
    pub pool: Option<PoolConfig>,
    pub limits: Option<LimitsConfig>,
    pub validation_mode: Option<ValidationMode>,
    pub failpoints: Option<Vec<String>>,
}

impl RefugeConfig {
    pub fn default_sqlite(path: impl Into<String>) -> Self {
        Self {
            database: DatabaseConfig::Sqlite {
                path: Some(path.into()),
            },
            pool: None,
            limits: Some(LimitsConfig::with_defaults()),
            validation_mode: Some(ValidationMode::Error),
            failpoints: None,
        }
    }

    pub fn load_or_init(base_dir: &Path, default_sqlite_path: &Path) -> RefugeResult<Self> {
        fs::create_dir_all(base_dir)
            .map_err(|err| RefugeError::storage(format!("create config dir: {err}")))?;
        let config_path = base_dir.join(DEFAULT_CONFIG_NAME);
        if config_path.exists() {
            let raw = fs::read_to_string(&config_path)
                .map_err(|err| RefugeError::storage(format!("read config: {err}")))?;
            let config: RefugeConfig = serde_json::from_str(&raw)
                .map_err(|err| RefugeError::validation(err.to_string()))?;
            return Ok(config);
        }
        let default = RefugeConfig::default_sqlite(default_sqlite_path.to_string_lossy());
        let payload = serde_json::to_string_pretty(&default)
            .map_err(|err| RefugeError::storage(format!("serialize config: {err}")))?;
        fs::write(&config_path, payload)
            .map_err(|err| RefugeError::storage(format!("write config: {err}")))?;
        Ok(default)
    }

    pub fn sqlite_path(&self, base_dir: &Path) -> RefugeResult<PathBuf> {
        match &self.database {
            DatabaseConfig::Sqlite { path } => {
                let path = path.clone().unwrap_or_else(|| DEFAULT_DB_FILE.to_string());
                let candidate = PathBuf::from(path);
                if candidate.is_absolute() {
                    Ok(candidate)
                } else {
                    Ok(base_dir.join(candidate))
                }
            }
            _ => Err(RefugeError::validation("config is not sqlite backend")),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self.database {
            DatabaseConfig::Sqlite { .. } => "sqlite",
            DatabaseConfig::Postgres { .. } => "postgres",
            DatabaseConfig::Mysql { .. } => "mysql",
        }
    }

    pub fn connection_url(&self, base_dir: &Path) -> RefugeResult<String> {
        match &self.database {
            DatabaseConfig::Sqlite { .. } => {
                let path = self.sqlite_path(base_dir)?;
                Ok(format!("sqlite://{}?mode=rwc", path.display()))
            }
            DatabaseConfig::Postgres { url } | DatabaseConfig::Mysql { url } => Ok(url.clone()),
        }
    }
}
