use crate::{entities::Protocol, error::AppResult, response::ApiResponse, states::GlobalState};
use axum::extract::State;
use serde_json::{json, Value};

#[inline(always)]
pub(crate) async fn index() -> ApiResponse<Value> {
    ApiResponse::new(
        "panel api is running",
        json!({
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "protocols": Protocol::ALL,
        }),
    )
}

#[inline(always)]
pub(crate) async fn status(State(state): State<GlobalState>) -> AppResult<ApiResponse<Value>> {
    let summary = state.engine.summary().await?;
    let server = state.engine.server_metadata().await;

    Ok(ApiResponse::new(
        "ok",
        json!({
            "domain": server.domain,
            "protocols": summary,
            "pending_trials": state.engine.pending_trials().len(),
        }),
    ))
}
