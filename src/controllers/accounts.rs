use super::{json_body, parse_protocol};
use crate::{
    entities::{CreateAccount, DeleteAccount, ListedAccount, Provisioned, RenewAccount, Renewed, TrialRequest},
    error::AppResult,
    response::ApiResponse,
    states::GlobalState,
};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use serde_json::{json, Value};

#[inline(always)]
pub(crate) async fn create_account(
    State(state): State<GlobalState>,
    Path(protocol): Path<String>,
    body: Result<Json<CreateAccount>, JsonRejection>,
) -> AppResult<ApiResponse<Provisioned>> {
    let protocol = parse_protocol(&protocol)?;
    let input = json_body(body)?;

    let provisioned = state.engine.create(protocol, input).await?;

    Ok(ApiResponse::new(
        format!("{protocol} account {} created", provisioned.account.username),
        provisioned,
    ))
}

#[inline(always)]
pub(crate) async fn create_trial(
    State(state): State<GlobalState>,
    Path(protocol): Path<String>,
    body: Result<Json<TrialRequest>, JsonRejection>,
) -> AppResult<ApiResponse<Provisioned>> {
    let protocol = parse_protocol(&protocol)?;
    let input = json_body(body)?;

    let provisioned = state.engine.create_trial(protocol, input.minutes).await?;

    Ok(ApiResponse::new(
        format!("{protocol} trial account {} created", provisioned.account.username),
        provisioned,
    ))
}

#[inline(always)]
pub(crate) async fn list_accounts(
    State(state): State<GlobalState>,
    Path(protocol): Path<String>,
) -> AppResult<ApiResponse<Vec<ListedAccount>>> {
    let protocol = parse_protocol(&protocol)?;
    let accounts = state.engine.list(protocol).await?;

    Ok(ApiResponse::new(
        format!("{} {protocol} accounts", accounts.len()),
        accounts,
    ))
}

#[inline(always)]
pub(crate) async fn delete_account(
    State(state): State<GlobalState>,
    Path(protocol): Path<String>,
    body: Result<Json<DeleteAccount>, JsonRejection>,
) -> AppResult<ApiResponse<Value>> {
    let protocol = parse_protocol(&protocol)?;
    let input = json_body(body)?;

    let existed = state
        .engine
        .delete(protocol, input.username.as_deref())
        .await?;
    let username = input.username.as_deref().map(str::trim).unwrap_or_default();

    let message = if existed {
        format!("{protocol} account {username} deleted")
    } else {
        format!("{protocol} account {username} did not exist")
    };

    Ok(ApiResponse::new(
        message,
        json!({ "username": username, "existed": existed }),
    ))
}

#[inline(always)]
pub(crate) async fn renew_account(
    State(state): State<GlobalState>,
    Path(protocol): Path<String>,
    body: Result<Json<RenewAccount>, JsonRejection>,
) -> AppResult<ApiResponse<Renewed>> {
    let protocol = parse_protocol(&protocol)?;
    let input = json_body(body)?;

    let renewed = state.engine.renew(protocol, input).await?;

    Ok(ApiResponse::new(
        format!(
            "{protocol} account {} renewed until {}",
            renewed.account.username, renewed.account.expiry
        ),
        renewed,
    ))
}
