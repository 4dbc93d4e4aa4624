//! Application configuration shared by the core and the gateway.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Global application configuration. Load from TOML or env.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Display name logged at startup and reported by the health route.
    pub app_name: String,
    pub host: String,
    /// HTTP port for the gateway.
    pub port: u16,
    /// Knowledge-base snapshot (JSON).
    pub knowledge_base_path: String,
    /// LLM backend settings file (JSON). Missing file means defaults.
    pub llm_config_path: String,
    /// Turns retained per conversation.
    pub max_history_length: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            app_name: "NianQA".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8001,
            knowledge_base_path: crate::knowledge::DEFAULT_PATH.to_string(),
            llm_config_path: crate::llm::DEFAULT_CONFIG_PATH.to_string(),
            max_history_length: crate::dialogue::DEFAULT_MAX_HISTORY_LENGTH,
        }
    }
}

impl CoreConfig {
    /// Load config from file and environment. Precedence: `NIANQA__*` env vars >
    /// file at `NIANQA_CONFIG` (default `config/gateway.toml`) > defaults.
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("NIANQA_CONFIG").unwrap_or_else(|_| "config/gateway.toml".to_string());
        let defaults = Self::default();
        let builder = config::Config::builder()
            .set_default("app_name", defaults.app_name)?
            .set_default("host", defaults.host)?
            .set_default("port", i64::from(defaults.port))?
            .set_default("knowledge_base_path", defaults.knowledge_base_path)?
            .set_default("llm_config_path", defaults.llm_config_path)?
            .set_default("max_history_length", defaults.max_history_length as i64)?;

        let path = Path::new(&config_path);
        let builder = if path.exists() {
            builder.add_source(config::File::from(path))
        } else {
            builder
        };

        let built = builder
            .add_source(config::Environment::with_prefix("NIANQA").separator("__"))
            .build()?;

        built.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_reads_file_over_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "port = 9100\nmax_history_length = 8").unwrap();
        std::env::set_var("NIANQA_CONFIG", file.path());
        let cfg = CoreConfig::load().unwrap();
        std::env::remove_var("NIANQA_CONFIG");

        assert_eq!(cfg.port, 9100);
        assert_eq!(cfg.max_history_length, 8);
        assert_eq!(cfg.knowledge_base_path, "data/knowledge-base.json");
        assert_eq!(cfg.app_name, "NianQA");
    }
}
