use std::rc::Rc;

use crate::error::{LessonError, StageFailure};
use crate::ipc::error::{event, lesson_err, ok};
use crate::ipc::helpers::{parse_bool, services};
use crate::ipc::types::{AppState, Request};
use crate::model::AnchorKey;
use crate::orchestrator::{validate, GenerationReport};
use serde_json::{json, Value};

use super::sessions::no_session;

fn key_json(key: &AnchorKey) -> Value {
    json!({
        "workflow": key.kind.as_str(),
        "groupId": key.group_id,
        "date": key.date_str(),
        "discriminator": key.discriminator,
    })
}

/// Applies a finished run to the view if it still shows the key the run was
/// issued for, then announces it. Reopening the same key does not discard
/// the result; results for a different key are dropped.
fn settle(
    state: &AppState,
    epoch: u64,
    key: &AnchorKey,
    outcome: Result<GenerationReport, LessonError>,
) {
    let applied = {
        let mut view = state.view.borrow_mut();
        let reopened = view.epoch != epoch;
        match view.for_key_mut(key) {
            Some(sel) => {
                if reopened {
                    tracing::debug!(group = %key.group_id, date = %key.date_str(), epoch, "applying run to reopened session");
                }
                match &outcome {
                    Ok(report) => sel.apply_report(report),
                    Err(e) => sel.last_failure = Some(StageFailure::from(e)),
                }
                true
            }
            None => false,
        }
    };
    if !applied {
        tracing::info!(
            group = %key.group_id,
            date = %key.date_str(),
            success = outcome.as_ref().map(|r| r.failure.is_none()).unwrap_or(false),
            "stale generation result dropped from view"
        );
        return;
    }

    let payload = match &outcome {
        Ok(report) => json!({
            "key": key_json(key),
            "ok": report.failure.is_none(),
            "persisted": report.persisted.is_some(),
            "report": report,
        }),
        Err(e) => json!({
            "key": key_json(key),
            "ok": false,
            "persisted": false,
            "error": {
                "code": e.code(),
                "stage": e.stage(),
                "message": e.to_string(),
            },
        }),
    };
    state.emit(event("generation.settled", payload));
}

fn handle_generation_start(state: &Rc<AppState>, req: &Request) -> Value {
    let generate_resources = match parse_bool(req.params.get("generateResources"), false) {
        Ok(v) => v,
        Err(m) => {
            return crate::ipc::error::err(
                &req.id,
                "bad_params",
                format!("generateResources {}", m),
                None,
            )
        }
    };
    let svc = match services(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (epoch, request) = {
        let view = state.view.borrow();
        let Some(sel) = view.selection.as_ref() else {
            return no_session(req);
        };
        (view.epoch, sel.generation_request(generate_resources))
    };

    if svc.orchestrator.is_busy(&request.key) {
        return ok(&req.id, json!({ "started": false, "busy": true }));
    }
    if let Err(e) = validate(&request) {
        return lesson_err(&req.id, &e);
    }
    let Some(reservation) = svc.orchestrator.reserve(&request.key) else {
        return ok(&req.id, json!({ "started": false, "busy": true }));
    };

    let key = request.key.clone();
    let orchestrator = svc.orchestrator.clone();
    let st = Rc::clone(state);
    tracing::info!(group = %key.group_id, date = %key.date_str(), epoch, "generation started");
    tokio::task::spawn_local(async move {
        let outcome = orchestrator.run(reservation, request).await;
        settle(&st, epoch, &key, outcome);
    });
    ok(&req.id, json!({ "started": true, "busy": true }))
}

fn handle_generation_status(state: &AppState, req: &Request) -> Value {
    let svc = match services(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let view = state.view.borrow();
    let Some(sel) = view.selection.as_ref() else {
        return no_session(req);
    };
    let phase = svc.orchestrator.phase(&sel.key);
    ok(
        &req.id,
        json!({
            "key": key_json(&sel.key),
            "phase": phase.as_str(),
            "busy": phase.is_busy(),
            "hasDraft": sel.draft.is_some(),
            "lastFailure": sel.last_failure,
        }),
    )
}

async fn handle_generation_save(state: &AppState, req: &Request) -> Value {
    let svc = match services(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (descriptor, draft, records) = {
        let view = state.view.borrow();
        let Some(sel) = view.selection.as_ref() else {
            return no_session(req);
        };
        let Some(draft) = sel.draft.clone() else {
            return crate::ipc::error::err(&req.id, "no_draft", "nothing generated to save", None);
        };
        (sel.descriptor, draft, sel.records.clone())
    };

    match svc.orchestrator.save(descriptor, &draft, &records).await {
        Ok(persisted) => {
            if let Some(sel) = state.view.borrow_mut().for_key_mut(&draft.key) {
                sel.apply_persisted(&persisted);
            }
            ok(&req.id, json!({ "persisted": persisted }))
        }
        Err(e) => {
            if let Some(sel) = state.view.borrow_mut().for_key_mut(&draft.key) {
                sel.last_failure = Some(StageFailure::from(&e));
            }
            lesson_err(&req.id, &e)
        }
    }
}

pub async fn try_handle(state: &Rc<AppState>, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "generation.start" => Some(handle_generation_start(state, req)),
        "generation.status" => Some(handle_generation_status(state, req)),
        "generation.save" => Some(handle_generation_save(state, req).await),
        _ => None,
    }
}
