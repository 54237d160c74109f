use crate::{
    controllers::{
        create_account, create_trial, create_trials, delete_account, delete_trial, index, list_accounts,
        list_trials, renew_account, require_api_key, status,
    },
    error::ErrorKind,
    response::ApiErrorResponse,
    states::GlobalState,
};
use axum::{
    error_handling::HandleErrorLayer,
    http::StatusCode,
    middleware::from_fn_with_state,
    response::Response,
    routing::{get, post, IntoMakeService},
    BoxError, Router,
};
use std::time::Duration;
use tower::{load_shed::error::Overloaded, timeout::error::Elapsed, load_shed::LoadShedLayer, ServiceBuilder};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[inline(always)]
async fn handle(error: BoxError) -> Response {
    if error.is::<Elapsed>() {
        ApiErrorResponse::send(
            StatusCode::REQUEST_TIMEOUT,
            ErrorKind::Unavailable,
            Some("Request timed out".to_string()),
        )
    } else if error.is::<Overloaded>() {
        ApiErrorResponse::send(
            StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Unavailable,
            Some("Service overloaded".to_string()),
        )
    } else {
        ApiErrorResponse::send(StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::Storage, None)
    }
}

pub fn router(state: GlobalState) -> Router {
    let api = Router::new()
        .route("/api/status", get(status))
        .route("/api/trial/create", post(create_trials))
        .route("/api/trial/list", get(list_trials))
        .route("/api/trial/delete", post(delete_trial))
        .route("/api/:protocol/create", post(create_account))
        .route("/api/:protocol/trial", post(create_trial))
        .route("/api/:protocol/list", get(list_accounts))
        .route("/api/:protocol/delete", post(delete_account))
        .route("/api/:protocol/renew", post(renew_account))
        .route_layer(from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/", get(index))
        .merge(api)
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle))
                .layer(LoadShedLayer::new())
                .timeout(REQUEST_TIMEOUT),
        )
        .with_state(state)
}

#[inline(always)]
pub fn routes(state: GlobalState) -> IntoMakeService<Router> {
    router(state).into_make_service()
}
