use crate::dashboard::dashboard_status;
use crate::ipc::error::ok;
use crate::ipc::helpers::{required_str, services};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};

async fn handle_dashboard_status(state: &AppState, req: &Request) -> Value {
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let svc = match services(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (status, failure) =
        dashboard_status(svc.directory.as_ref(), svc.store.as_ref(), &teacher_id).await;
    let warnings: Vec<Value> = failure
        .iter()
        .map(|e| json!({ "code": e.code(), "stage": e.stage(), "message": e.to_string() }))
        .collect();
    ok(
        &req.id,
        json!({
            "hasStudents": status.has_students,
            "hasGroups": status.has_groups,
            "hasLessonPlans": status.has_lesson_plans,
            "warnings": warnings,
        }),
    )
}

pub async fn try_handle(state: &AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "dashboard.status" => Some(handle_dashboard_status(state, req).await),
        _ => None,
    }
}
