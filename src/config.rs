// ⚙️ Configuration - defaults, optional feuerwehr.toml, then FEUERWEHR__* env vars

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::Deserialize;

use crate::service::MAX_PAGE_SIZE;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Page size for list endpoints when the request names none
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_database_path() -> PathBuf {
    PathBuf::from("feuerwehr.db")
}

fn default_page_size() -> usize {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from defaults, `feuerwehr.toml` and the environment
    ///
    /// Environment variables use a `FEUERWEHR__` prefix and `__` between
    /// sections, e.g. `FEUERWEHR__SERVER__PORT=9000`.
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::load_from("feuerwehr")
    }

    /// Same layering with an explicit config file base name (extension optional)
    pub fn load_from(file: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            .set_default("database.path", default_database_path().to_string_lossy().to_string())?
            .set_default("api.page_size", default_page_size() as i64)?
            .set_default("logging.level", default_log_level())?
            .set_default("logging.json", false)?
            .add_source(config::File::with_name(file).required(false))
            .add_source(
                config::Environment::with_prefix("FEUERWEHR")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: Config = config.try_deserialize()?;
        config.api.page_size = config.api.page_size.clamp(1, MAX_PAGE_SIZE);
        Ok(config)
    }

    pub fn server_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = format!("{}:{}", self.server.host, self.server.port);
        Ok(addr.parse()?)
    }
}
