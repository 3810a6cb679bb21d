use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::{err, HandlerErr};
use tracing::debug;

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    debug!(id = %req.id, method = %req.method, "request");
    if let Some(resp) = handlers::core::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::attendance::try_handle(state, &req) {
        return resp;
    }

    err(
        &req.id,
        HandlerErr::new("not_implemented", format!("unknown method: {}", req.method)),
    )
}
