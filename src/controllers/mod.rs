mod accounts;
mod auth;
mod status;
mod trials;

pub(crate) use accounts::*;
pub(crate) use auth::*;
pub(crate) use status::*;
pub(crate) use trials::*;

use crate::{
    entities::Protocol,
    error::{AccountError, AppResult},
};
use axum::{extract::rejection::JsonRejection, Json};

fn parse_protocol(raw: &str) -> Result<Protocol, AccountError> {
    raw.parse()
        .map_err(|e: crate::entities::UnknownProtocol| AccountError::NotFound(e.to_string()))
}

/// An absent body reads as all-defaults; a body that is not valid JSON for `T` is rejected.
fn json_body<T: Default>(body: Result<Json<T>, JsonRejection>) -> AppResult<T> {
    match body {
        Ok(Json(input)) => Ok(input),
        Err(JsonRejection::MissingJsonContentType(_)) => Ok(T::default()),
        Err(rejection) => Err(AccountError::Validation(rejection.body_text())),
    }
}
