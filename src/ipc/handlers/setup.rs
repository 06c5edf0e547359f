use crate::config::DaemonConfig;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SetupSection {
    Generation,
    Sessions,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "generation" => Some(Self::Generation),
            "sessions" => Some(Self::Sessions),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Generation => "setup.generation",
            Self::Sessions => "setup.sessions",
        }
    }
}

/// `null` means "use the environment / built-in value".
fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Generation => json!({
            "baseUrl": null,
            "timeoutSecs": null
        }),
        SetupSection::Sessions => json!({
            "defaultDurationMinutes": null
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_nullable_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<Value, String> {
    if v.is_null() {
        return Ok(Value::Null);
    }
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer or null", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(Value::from(n))
}

fn parse_nullable_url(v: &Value, key: &str) -> Result<Value, String> {
    if v.is_null() {
        return Ok(Value::Null);
    }
    let s = v
        .as_str()
        .ok_or_else(|| format!("{} must be string or null", key))?
        .trim();
    if s.is_empty() {
        return Ok(Value::Null);
    }
    if s.len() > 500 {
        return Err(format!("{} length must be <= 500", key));
    }
    if !(s.starts_with("http://") || s.starts_with("https://")) {
        return Err(format!("{} must start with http:// or https://", key));
    }
    Ok(Value::String(s.trim_end_matches('/').to_string()))
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Generation => match k.as_str() {
                "baseUrl" => {
                    obj.insert(k.clone(), parse_nullable_url(v, k)?);
                }
                "timeoutSecs" => {
                    obj.insert(k.clone(), parse_nullable_i64_range(v, k, 1, 600)?);
                }
                _ => return Err(format!("unknown generation field: {}", k)),
            },
            SetupSection::Sessions => match k.as_str() {
                "defaultDurationMinutes" => {
                    obj.insert(k.clone(), parse_nullable_i64_range(v, k, 1, 240)?);
                }
                _ => return Err(format!("unknown sessions field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed stored values fall back to defaults.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

/// Layers the workspace's stored setup on top of `base`.
pub(crate) fn workspace_config(
    conn: &rusqlite::Connection,
    base: &DaemonConfig,
) -> anyhow::Result<DaemonConfig> {
    let mut config = base.clone();
    config.apply_generation_setup(&load_section(conn, SetupSection::Generation)?);
    config.apply_sessions_setup(&load_section(conn, SetupSection::Sessions)?);
    Ok(config)
}

fn handle_setup_get(state: &AppState, req: &Request) -> serde_json::Value {
    let Some(db) = state.db() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let generation = match load_section(db.conn(), SetupSection::Generation) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let sessions = match load_section(db.conn(), SetupSection::Sessions) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(
        &req.id,
        json!({
            "generation": generation,
            "sessions": sessions
        }),
    )
}

fn handle_setup_update(state: &AppState, req: &Request) -> serde_json::Value {
    let Some(db) = state.db() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(db.conn(), section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(db.conn(), section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    match workspace_config(db.conn(), &state.base_config) {
        Ok(config) => {
            *state.config.borrow_mut() = config;
            if section == SetupSection::Generation {
                state.rebuild_services();
            }
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    tracing::info!(section = section.key(), "setup updated");
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patch(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn generation_patch_normalizes_url_and_rejects_unknown_fields() {
        let mut current = default_section(SetupSection::Generation);
        merge_section_patch(
            SetupSection::Generation,
            &mut current,
            &patch(json!({ "baseUrl": " https://ai.example.org/ ", "timeoutSecs": 30 })),
        )
        .unwrap();
        assert_eq!(current["baseUrl"], "https://ai.example.org");
        assert_eq!(current["timeoutSecs"], 30);

        let e = merge_section_patch(
            SetupSection::Generation,
            &mut current,
            &patch(json!({ "model": "x" })),
        )
        .unwrap_err();
        assert!(e.contains("unknown generation field"));

        let e = merge_section_patch(
            SetupSection::Generation,
            &mut current,
            &patch(json!({ "baseUrl": "ftp://x" })),
        )
        .unwrap_err();
        assert!(e.contains("http://"));
    }

    #[test]
    fn sessions_patch_range_checks_duration() {
        let mut current = default_section(SetupSection::Sessions);
        assert!(merge_section_patch(
            SetupSection::Sessions,
            &mut current,
            &patch(json!({ "defaultDurationMinutes": 0 })),
        )
        .is_err());
        merge_section_patch(
            SetupSection::Sessions,
            &mut current,
            &patch(json!({ "defaultDurationMinutes": 20 })),
        )
        .unwrap();
        assert_eq!(current["defaultDurationMinutes"], 20);
        merge_section_patch(
            SetupSection::Sessions,
            &mut current,
            &patch(json!({ "defaultDurationMinutes": null })),
        )
        .unwrap();
        assert!(current["defaultDurationMinutes"].is_null());
    }

    #[test]
    fn stored_setup_layers_over_base_config() {
        let conn = db::open_in_memory().unwrap();
        db::settings_set_json(
            &conn,
            "setup.generation",
            &json!({ "baseUrl": "http://gen.local:9000", "timeoutSecs": 5 }),
        )
        .unwrap();
        db::settings_set_json(&conn, "setup.sessions", &json!({ "defaultDurationMinutes": 25 }))
            .unwrap();
        let base = DaemonConfig {
            store: crate::config::StoreBackend::Workspace,
            generator: crate::config::GeneratorConfig {
                base_url: "http://127.0.0.1:8787".into(),
                api_key: Some("k".into()),
                timeout: std::time::Duration::from_secs(60),
            },
            default_duration_minutes: None,
        };
        let cfg = workspace_config(&conn, &base).unwrap();
        assert_eq!(cfg.generator.base_url, "http://gen.local:9000");
        assert_eq!(cfg.generator.timeout, std::time::Duration::from_secs(5));
        assert_eq!(cfg.generator.api_key.as_deref(), Some("k"));
        assert_eq!(cfg.default_duration_minutes, Some(25));
    }
}
