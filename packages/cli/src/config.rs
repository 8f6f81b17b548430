use config::{Config, ConfigError, Environment, File};
use dedup_store::DedupConfig;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Connection URL. Default: a SQLite file in the working directory.
    #[serde(default = "default_database_url")]
    pub url: String,
}

fn default_database_url() -> String {
    "sqlite://dedup.db?mode=rwc".into()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub store: DedupConfig,
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let config_path = config_path.unwrap_or("config/dedup");

        let s = Config::builder()
            .add_source(File::with_name(config_path).required(false))
            // e.g. DEDUP__DATABASE__URL, DEDUP__STORE__STORAGE__ROOT
            .add_source(Environment::with_prefix("DEDUP").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
