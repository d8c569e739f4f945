//! Engine settings, loaded from a TOML file.
//!
//! ```toml
//! database_url = "sqlite://flowcalc.db?mode=rwc"
//! max_connections = 5
//!
//! [executor]
//! max_retries = 3
//! retry_base_delay_ms = 100
//!
//! [system]
//! no1 = 1
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use expression::SystemVars;

use crate::executor::ExecutorConfig;
use crate::EngineError;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSettings {
    pub database_url: String,
    pub max_connections: u32,
    pub executor: ExecutorSettings,
    /// Extra `$system` constants, alongside the built-in `now`. A constant
    /// may not reuse a built-in name.
    pub system: BTreeMap<String, Value>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".into(),
            max_connections: 5,
            executor: ExecutorSettings::default(),
            system: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutorSettings {
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        let defaults = ExecutorConfig::default();
        Self {
            max_retries: defaults.max_retries,
            retry_base_delay_ms: defaults.retry_base_delay.as_millis() as u64,
        }
    }
}

impl EngineSettings {
    pub fn from_toml_str(source: &str) -> Result<Self, EngineError> {
        let settings: Self = toml::from_str(source).map_err(|e| EngineError::Config(e.to_string()))?;
        let builtins = SystemVars::with_defaults();
        if let Some(name) = settings.system.keys().find(|name| builtins.get(name).is_some()) {
            return Err(EngineError::Config(format!(
                "[system] {name} would shadow the built-in $system.{name}"
            )));
        }
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, EngineError> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            max_retries: self.executor.max_retries,
            retry_base_delay: Duration::from_millis(self.executor.retry_base_delay_ms),
        }
    }

    pub fn system_vars(&self) -> SystemVars {
        SystemVars::with_defaults().constants(self.system.clone())
    }
}
