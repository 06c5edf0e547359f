use crate::datekey::normalize_session_date;
use crate::error::{LessonError, Stage};
use crate::ipc::error::{err, lesson_err, ok};
use crate::ipc::helpers::{parse_opt_i64, parse_opt_string, parse_opt_text, required_str, services};
use crate::ipc::types::{AppState, Request};
use crate::model::WorkflowKind;
use crate::resolver::resolve_or_empty;
use crate::store::roster_for;
use crate::view::Selection;
use crate::workflow::descriptor;
use serde_json::{json, Value};

pub(crate) fn no_session(req: &Request) -> Value {
    err(&req.id, "no_session", "open a session first", None)
}

/// The selection plus the gate phase for its key.
pub(crate) fn session_json(state: &AppState, sel: &Selection) -> Value {
    let mut v = sel.to_json();
    if let Some(svc) = state.services() {
        let phase = svc.orchestrator.phase(&sel.key);
        v["phase"] = json!(phase.as_str());
        v["busy"] = json!(phase.is_busy());
    }
    v
}

fn warning_json(e: &LessonError) -> Value {
    json!({
        "code": e.code(),
        "stage": e.stage(),
        "message": e.to_string(),
    })
}

async fn handle_session_open(state: &AppState, req: &Request) -> Value {
    let workflow = match required_str(req, "workflow") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(kind) = WorkflowKind::parse(&workflow) else {
        return err(
            &req.id,
            "bad_params",
            "workflow must be one of: guided_reading, intervention",
            None,
        );
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let group_id = match required_str(req, "groupId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let date_raw = match required_str(req, "date") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let lesson_type = match parse_opt_string(req.params.get("lessonType")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("lessonType {}", m), None),
    };

    let date = match normalize_session_date(&date_raw) {
        Ok(d) => d,
        Err(e) => return lesson_err(&req.id, &e),
    };
    let descriptor = descriptor(kind);
    let key = match descriptor.key(&group_id, date, &teacher_id, lesson_type.as_deref()) {
        Ok(k) => k,
        Err(e) => return lesson_err(&req.id, &e),
    };
    let svc = match services(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let teacher = match svc.directory.teacher_profile(&teacher_id).await {
        Ok(t) => t,
        Err(e) => return lesson_err(&req.id, &LessonError::at(Stage::FetchTeacher, e)),
    };
    let groups = match svc.directory.list_groups(&teacher_id).await {
        Ok(g) => g,
        Err(e) => return lesson_err(&req.id, &LessonError::at(Stage::FetchGroups, e)),
    };
    let Some(group) = groups.into_iter().find(|g| g.id == key.group_id) else {
        return err(
            &req.id,
            "not_found",
            format!("group {} not found for teacher", key.group_id),
            None,
        );
    };
    let students = match svc.directory.list_students(&teacher_id).await {
        Ok(s) => s,
        Err(e) => return lesson_err(&req.id, &LessonError::at(Stage::FetchStudents, e)),
    };
    let roster = roster_for(&group, &students);
    let (resolved, warning) = resolve_or_empty(svc.store.as_ref(), &key).await;

    let default_duration = state.config.borrow().default_duration_minutes;
    let selection = Selection::new(
        descriptor,
        key,
        &teacher_id,
        teacher,
        roster,
        resolved,
        default_duration,
    );
    tracing::info!(
        workflow = kind.as_str(),
        group = %selection.key.group_id,
        date = %selection.key.date_str(),
        students = selection.records.len(),
        existing = selection.anchor_id.is_some(),
        "session opened"
    );

    let mut view = state.view.borrow_mut();
    let epoch = view.replace(Some(selection));
    let session = match view.selection.as_ref() {
        Some(sel) => session_json(state, sel),
        None => Value::Null,
    };
    let warnings: Vec<Value> = warning.iter().map(warning_json).collect();
    ok(
        &req.id,
        json!({
            "epoch": epoch,
            "session": session,
            "warnings": warnings,
        }),
    )
}

fn handle_session_view(state: &AppState, req: &Request) -> Value {
    let view = state.view.borrow();
    let session = view
        .selection
        .as_ref()
        .map(|sel| session_json(state, sel))
        .unwrap_or(Value::Null);
    ok(&req.id, json!({ "epoch": view.epoch, "session": session }))
}

fn handle_update_scalars(state: &AppState, req: &Request) -> Value {
    let book_title = match parse_opt_text(req.params.get("bookTitle")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("bookTitle {}", m), None),
    };
    let reading_level = match parse_opt_text(req.params.get("readingLevel")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("readingLevel {}", m), None),
    };
    let duration = match req.params.get("durationMinutes") {
        None => None,
        Some(v) => match parse_opt_i64(Some(v)) {
            Ok(Some(n)) if n <= 0 => {
                return err(&req.id, "bad_params", "durationMinutes must be positive", None)
            }
            Ok(n) => Some(n),
            Err(m) => {
                return err(&req.id, "bad_params", format!("durationMinutes {}", m), None)
            }
        },
    };

    let mut view = state.view.borrow_mut();
    let Some(sel) = view.selection.as_mut() else {
        return no_session(req);
    };
    if let Some(v) = book_title {
        sel.scalars.book_title = v;
    }
    if let Some(v) = reading_level {
        sel.scalars.reading_level = v;
    }
    if let Some(v) = duration {
        sel.scalars.duration_minutes = v;
    }
    ok(&req.id, json!({ "scalars": sel.scalars }))
}

fn handle_update_record(state: &AppState, req: &Request) -> Value {
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let field = match required_str(req, "field") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let value = match parse_opt_text(req.params.get("value")) {
        Ok(v) => v.unwrap_or_default(),
        Err(m) => return err(&req.id, "bad_params", format!("value {}", m), None),
    };

    let mut view = state.view.borrow_mut();
    let Some(sel) = view.selection.as_mut() else {
        return no_session(req);
    };
    if sel.descriptor.field_index(&field).is_none() {
        return err(
            &req.id,
            "bad_params",
            format!(
                "field must be one of: {}, {}",
                sel.descriptor.primary_field, sel.descriptor.secondary_field
            ),
            None,
        );
    }
    if !sel.set_field(&student_id, &field, &value) {
        return err(
            &req.id,
            "not_found",
            format!("student {} is not in this group", student_id),
            None,
        );
    }
    ok(&req.id, json!({ "record": sel.record_view(&student_id) }))
}

fn handle_set_requirements(state: &AppState, req: &Request) -> Value {
    let additional = match parse_opt_text(req.params.get("additional")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("additional {}", m), None),
    };
    let resource = match parse_opt_text(req.params.get("resource")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("resource {}", m), None),
    };
    let mut view = state.view.borrow_mut();
    let Some(sel) = view.selection.as_mut() else {
        return no_session(req);
    };
    if let Some(v) = additional {
        sel.additional_requirements = v;
    }
    if let Some(v) = resource {
        sel.resource_requirements = v;
    }
    ok(
        &req.id,
        json!({
            "additional": sel.additional_requirements,
            "resource": sel.resource_requirements,
        }),
    )
}

pub async fn try_handle(state: &AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "session.open" => Some(handle_session_open(state, req).await),
        "session.view" => Some(handle_session_view(state, req)),
        "session.updateScalars" => Some(handle_update_scalars(state, req)),
        "session.updateRecord" => Some(handle_update_record(state, req)),
        "session.setRequirements" => Some(handle_set_requirements(state, req)),
        _ => None,
    }
}
