use std::path::PathBuf;

use anyhow::{Context, Result};

/// Daemon configuration: a TOML file with environment overrides. Every
/// field has a workable default so a bare `enrichd` starts against a local
/// database.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    pub db_path: PathBuf,
    /// Enrichment service endpoint the invoker posts to.
    pub invoker_url: String,
    /// Cadence of the dispatch tick (tokio-cron-scheduler syntax).
    pub dispatch_cron: String,
    /// Queue batch size requested per tick; admission still caps it.
    pub dispatch_limit: usize,
    /// Global in-flight slots. Leave at 1 unless you know better.
    pub dispatch_slots: usize,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("enrichd");
        Self {
            db_path: data_dir.join("enrichd.db"),
            invoker_url: "http://127.0.0.1:8720/api/enrich/run".to_string(),
            dispatch_cron: "*/30 * * * * *".to_string(),
            dispatch_limit: 5,
            dispatch_slots: 1,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = std::env::var("ENRICHD_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("enrichd/config.toml")
            });

        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config at {}", path.display()))?;
            toml::from_str(&raw)
                .with_context(|| format!("failed to parse config at {}", path.display()))?
        } else {
            Self::default()
        };

        if let Ok(db_path) = std::env::var("ENRICHD_DB_PATH") {
            config.db_path = PathBuf::from(db_path);
        }
        if let Ok(url) = std::env::var("ENRICHD_INVOKER_URL") {
            config.invoker_url = url;
        }
        if let Ok(cron) = std::env::var("ENRICHD_DISPATCH_CRON") {
            config.dispatch_cron = cron;
        }

        Ok(config)
    }
}
