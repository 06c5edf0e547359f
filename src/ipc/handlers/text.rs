use std::rc::Rc;

use crate::error::{LessonError, Stage};
use crate::ipc::error::{err, event, ok};
use crate::ipc::helpers::{required_str, services};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};

use super::sessions::no_session;

fn handle_text_improve(state: &Rc<AppState>, req: &Request) -> Value {
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let field = match required_str(req, "field") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let svc = match services(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let (epoch, text) = {
        let mut view = state.view.borrow_mut();
        let epoch = view.epoch;
        let Some(sel) = view.selection.as_mut() else {
            return no_session(req);
        };
        let Some(text) = sel.field_value(&student_id, &field) else {
            return err(
                &req.id,
                "bad_params",
                format!("unknown student or field: {}/{}", student_id, field),
                None,
            );
        };
        if text.trim().is_empty() {
            return err(&req.id, "bad_params", "nothing to improve", None);
        }
        if !sel.improve.start(&student_id, &field) {
            return ok(&req.id, json!({ "started": false, "state": "pending" }));
        }
        (epoch, text)
    };

    let generator = svc.generator.clone();
    let st = Rc::clone(state);
    tokio::task::spawn_local(async move {
        let outcome = generator.improve_text(&text).await;
        let mut view = st.view.borrow_mut();
        let Some(sel) = view.current_mut(epoch) else {
            tracing::info!(student = %student_id, field = %field, "stale text improvement dropped");
            return;
        };
        let payload = match outcome {
            Ok(improved) => {
                sel.set_field(&student_id, &field, &improved);
                sel.improve.finish(&student_id, &field, true);
                json!({
                    "studentId": student_id,
                    "field": field,
                    "ok": true,
                    "text": improved,
                })
            }
            Err(e) => {
                let e = LessonError::at(Stage::ImproveText, e);
                tracing::warn!(student = %student_id, field = %field, error = %e, "text improvement failed");
                sel.improve.finish(&student_id, &field, false);
                json!({
                    "studentId": student_id,
                    "field": field,
                    "ok": false,
                    "error": { "code": e.code(), "stage": e.stage(), "message": e.to_string() },
                })
            }
        };
        drop(view);
        st.emit(event("text.improved", payload));
    });
    ok(&req.id, json!({ "started": true, "state": "pending" }))
}

fn handle_text_status(state: &AppState, req: &Request) -> Value {
    let view = state.view.borrow();
    let Some(sel) = view.selection.as_ref() else {
        return no_session(req);
    };
    ok(&req.id, json!({ "improve": sel.improve.to_json() }))
}

pub fn try_handle(state: &Rc<AppState>, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "text.improve" => Some(handle_text_improve(state, req)),
        "text.status" => Some(handle_text_status(state, req)),
        _ => None,
    }
}
