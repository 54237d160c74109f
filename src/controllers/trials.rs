use super::json_body;
use crate::{
    entities::{PendingTrial, Protocol, TrialBatchRequest, TrialTarget},
    error::{AccountError, AppResult},
    response::ApiResponse,
    states::GlobalState,
};
use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::Serialize;
use serde_json::{json, Map, Value};

fn parse_target(service: Option<&str>) -> AppResult<TrialTarget> {
    service
        .map(str::trim)
        .unwrap_or("all")
        .parse()
        .map_err(|e: crate::entities::UnknownProtocol| AccountError::Validation(e.to_string()))
}

/// `{"<protocol>": {"status": "success", "data": ...} | {"status": "error", "kind": ..., "message": ...}}`
///
/// Returns the map and how many protocols succeeded.
fn per_protocol<T, I>(results: I) -> (Map<String, Value>, usize)
where
    T: Serialize,
    I: IntoIterator<Item = (Protocol, AppResult<T>)>,
{
    let mut succeeded = 0;
    let mut outcome = Map::new();

    for (protocol, result) in results {
        let entry = match result {
            Ok(data) => {
                succeeded += 1;
                json!({ "status": "success", "data": data })
            }
            Err(e) => json!({ "status": "error", "kind": e.kind(), "message": e.to_string() }),
        };
        outcome.insert(protocol.to_string(), entry);
    }

    (outcome, succeeded)
}

#[inline(always)]
pub(crate) async fn create_trials(
    State(state): State<GlobalState>,
    body: Result<Json<TrialBatchRequest>, JsonRejection>,
) -> AppResult<ApiResponse<Map<String, Value>>> {
    let input = json_body(body)?;
    let target = parse_target(input.service.as_deref())?;

    let results = state.engine.create_trials(target, input.minutes).await;
    let (outcome, created) = per_protocol(results);

    Ok(ApiResponse::new(
        format!("{created} of {} trial accounts created", outcome.len()),
        outcome,
    ))
}

#[inline(always)]
pub(crate) async fn list_trials(State(state): State<GlobalState>) -> ApiResponse<Vec<PendingTrial>> {
    let pending = state.engine.pending_trials();
    ApiResponse::new(format!("{} pending trial accounts", pending.len()), pending)
}

#[inline(always)]
pub(crate) async fn delete_trial(
    State(state): State<GlobalState>,
    body: Result<Json<TrialBatchRequest>, JsonRejection>,
) -> AppResult<ApiResponse<Map<String, Value>>> {
    let input = json_body(body)?;
    let target = parse_target(input.service.as_deref())?;

    let mut results = Vec::new();
    for protocol in target.protocols() {
        let deleted = state
            .engine
            .delete(protocol, input.username.as_deref())
            .await
            .map(|existed| json!({ "existed": existed }));
        results.push((protocol, deleted));
    }
    let (outcome, deleted) = per_protocol(results);

    Ok(ApiResponse::new(
        format!("{deleted} of {} protocols processed", outcome.len()),
        outcome,
    ))
}
