use std::rc::Rc;

use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

pub async fn handle_request(state: &Rc<AppState>, req: Request) -> serde_json::Value {
    if let Some(resp) = handlers::core::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::setup::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::roster::try_handle(state, &req).await {
        return resp;
    }
    if let Some(resp) = handlers::sessions::try_handle(state, &req).await {
        return resp;
    }
    if let Some(resp) = handlers::generation::try_handle(state, &req).await {
        return resp;
    }
    if let Some(resp) = handlers::text::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::dashboard::try_handle(state, &req).await {
        return resp;
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
