use crate::ingest::{IngestOptions, DEFAULT_BATCH_SIZE};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CatalogConfig {
    #[serde(rename = "type", default = "default_catalog_type")]
    pub catalog_type: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            catalog_type: default_catalog_type(),
            host: None,
            port: None,
            database: None,
            user: None,
            password: None,
        }
    }
}

fn default_catalog_type() -> String {
    "sqlite".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct PathsConfig {
    /// Base directory for all WideDB data (catalog.db, staging/).
    /// Defaults to ~/.widedb
    pub base_dir: Option<String>,
    /// Directory uploads are staged in before ingestion. Defaults to {base_dir}/staging
    pub staging_dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestConfig {
    /// Rows per bulk insert transaction.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_counter_refresh_secs")]
    pub counter_refresh_secs: u64,
    #[serde(default = "default_completion_poll_secs")]
    pub completion_poll_secs: u64,
    /// Upper bound on how long a record counter may run for one upload.
    #[serde(default = "default_counter_timeout_secs")]
    pub counter_timeout_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            counter_refresh_secs: default_counter_refresh_secs(),
            completion_poll_secs: default_completion_poll_secs(),
            counter_timeout_secs: default_counter_timeout_secs(),
        }
    }
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_counter_refresh_secs() -> u64 {
    10
}

fn default_completion_poll_secs() -> u64 {
    60
}

fn default_counter_timeout_secs() -> u64 {
    24 * 60 * 60
}

impl IngestConfig {
    pub fn to_options(&self) -> IngestOptions {
        IngestOptions {
            batch_size: self.batch_size,
            counter_refresh: Duration::from_secs(self.counter_refresh_secs),
            completion_poll: Duration::from_secs(self.completion_poll_secs),
            counter_timeout: Duration::from_secs(self.counter_timeout_secs),
        }
    }
}

impl AppConfig {
    /// Load configuration from an optional file and environment variables
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Add environment variables with prefix WIDEDB_
        // Example: WIDEDB_SERVER__PORT=8080, WIDEDB_INGEST__BATCH_SIZE=1000
        builder = builder.add_source(
            config::Environment::with_prefix("WIDEDB")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        match self.catalog.catalog_type.as_str() {
            "postgres" => {
                if self.catalog.host.is_none() {
                    anyhow::bail!("Postgres catalog requires 'host'");
                }
                if self.catalog.database.is_none() {
                    anyhow::bail!("Postgres catalog requires 'database'");
                }
                if self.catalog.user.is_none() {
                    anyhow::bail!("Postgres catalog requires 'user'");
                }
                if self.catalog.password.is_none() {
                    anyhow::bail!("Postgres catalog requires 'password'");
                }
            }
            "sqlite" => {
                // SQLite uses paths config, no additional validation needed
            }
            _ => anyhow::bail!("Invalid catalog type: {}", self.catalog.catalog_type),
        }

        self.ingest
            .to_options()
            .validate()
            .context("Invalid [ingest] configuration")?;

        Ok(())
    }

    /// Connection string for a postgres catalog.
    pub fn postgres_url(&self) -> Result<String> {
        let c = &self.catalog;
        let (Some(host), Some(database), Some(user), Some(password)) =
            (&c.host, &c.database, &c.user, &c.password)
        else {
            anyhow::bail!("Postgres catalog requires host, database, user and password");
        };
        Ok(format!(
            "postgres://{}:{}@{}:{}/{}",
            user,
            password,
            host,
            c.port.unwrap_or(5432),
            database
        ))
    }
}
