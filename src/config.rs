use std::env;
use std::time::Duration;

use serde_json::Value;

pub const DEFAULT_GENERATOR_URL: &str = "http://127.0.0.1:8787";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq)]
pub enum StoreBackend {
    /// SQLite database inside the selected workspace.
    Workspace,
    /// REST CRUD backend.
    Remote { base_url: String, token: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    pub store: StoreBackend,
    pub generator: GeneratorConfig,
    pub default_duration_minutes: Option<i64>,
}

fn non_empty(v: Result<String, env::VarError>) -> Option<String> {
    v.ok().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl DaemonConfig {
    /// Reads `LESSOND_*` variables; unset values fall back to defaults.
    pub fn from_env() -> Self {
        let store = match non_empty(env::var("LESSOND_STORE_URL")) {
            Some(base_url) => StoreBackend::Remote {
                base_url,
                token: non_empty(env::var("LESSOND_STORE_TOKEN")),
            },
            None => StoreBackend::Workspace,
        };
        let timeout_secs = non_empty(env::var("LESSOND_HTTP_TIMEOUT_SECS"))
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        Self {
            store,
            generator: GeneratorConfig {
                base_url: non_empty(env::var("LESSOND_GENERATOR_URL"))
                    .unwrap_or_else(|| DEFAULT_GENERATOR_URL.to_string()),
                api_key: non_empty(env::var("LESSOND_GENERATOR_KEY")),
                timeout: Duration::from_secs(timeout_secs),
            },
            default_duration_minutes: None,
        }
    }

    /// Applies the workspace `setup.generation` section. Blank values keep
    /// the current setting.
    pub fn apply_generation_setup(&mut self, section: &Value) {
        if let Some(url) = section
            .get("baseUrl")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            self.generator.base_url = url.to_string();
        }
        if let Some(secs) = section
            .get("timeoutSecs")
            .and_then(|v| v.as_u64())
            .filter(|n| *n > 0)
        {
            self.generator.timeout = Duration::from_secs(secs);
        }
    }

    pub fn apply_sessions_setup(&mut self, section: &Value) {
        self.default_duration_minutes = section
            .get("defaultDurationMinutes")
            .and_then(|v| v.as_i64())
            .filter(|n| *n > 0);
    }

    pub fn backend_name(&self) -> &'static str {
        match self.store {
            StoreBackend::Workspace => "workspace",
            StoreBackend::Remote { .. } => "remote",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base() -> DaemonConfig {
        DaemonConfig {
            store: StoreBackend::Workspace,
            generator: GeneratorConfig {
                base_url: DEFAULT_GENERATOR_URL.into(),
                api_key: None,
                timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            },
            default_duration_minutes: None,
        }
    }

    #[test]
    fn generation_setup_overrides_only_present_values() {
        let mut cfg = base();
        cfg.apply_generation_setup(&json!({ "baseUrl": "  ", "timeoutSecs": 15 }));
        assert_eq!(cfg.generator.base_url, DEFAULT_GENERATOR_URL);
        assert_eq!(cfg.generator.timeout, Duration::from_secs(15));

        cfg.apply_generation_setup(&json!({ "baseUrl": "http://ai.internal:9000" }));
        assert_eq!(cfg.generator.base_url, "http://ai.internal:9000");
        assert_eq!(cfg.generator.timeout, Duration::from_secs(15));
    }

    #[test]
    fn sessions_setup_sets_default_duration() {
        let mut cfg = base();
        cfg.apply_sessions_setup(&json!({ "defaultDurationMinutes": 20 }));
        assert_eq!(cfg.default_duration_minutes, Some(20));
        cfg.apply_sessions_setup(&json!({ "defaultDurationMinutes": 0 }));
        assert_eq!(cfg.default_duration_minutes, None);
    }
}
