use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::store::LocalStore;
use serde_json::json;
use std::path::PathBuf;
use std::rc::Rc;

use super::setup::workspace_config;

fn handle_health(state: &AppState, req: &Request) -> serde_json::Value {
    let config = state.config.borrow();
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.borrow().as_ref().map(|p| p.to_string_lossy().to_string()),
            "storeBackend": config.backend_name(),
            "generatorUrl": config.generator.base_url,
            "ready": state.services().is_some()
        }),
    )
}

fn handle_workspace_select(state: &AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    let conn = match db::open_db(&path) {
        Ok(conn) => conn,
        Err(e) => return err(&req.id, "db_open_failed", format!("{e:?}"), None),
    };
    let config = match workspace_config(&conn, &state.base_config) {
        Ok(c) => c,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    *state.config.borrow_mut() = config;
    *state.db.borrow_mut() = Some(Rc::new(LocalStore::new(conn)));
    *state.workspace.borrow_mut() = Some(path.clone());
    state.rebuild_services();
    // Anything shown belonged to the previous workspace.
    state.view.borrow_mut().replace(None);

    tracing::info!(workspace = %path.display(), backend = state.config.borrow().backend_name(), "workspace selected");
    ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
}

pub fn try_handle(state: &AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
