use crate::{error::AuthError, states::GlobalState};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::warn;

pub const API_KEY_HEADER: &str = "x-api-key";
const API_KEY_PARAM: &str = "api_key";

/// Rejects requests without the configured key; a no-op when no key is configured.
pub(crate) async fn require_api_key(
    State(state): State<GlobalState>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let Some(expected) = state.settings.api_key.as_deref() else {
        return Ok(next.run(request).await);
    };

    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| query_key(request.uri().query()));

    match provided {
        Some(provided) if keys_match(provided.as_bytes(), expected.as_bytes()) => {
            Ok(next.run(request).await)
        }
        _ => {
            warn!(path = %request.uri().path(), "rejected request with invalid api key");
            Err(AuthError::InvalidKey)
        }
    }
}

fn query_key(query: Option<&str>) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(name, _)| *name == API_KEY_PARAM)
        .and_then(|(_, value)| urlencoding::decode(value).ok())
        .map(|value| value.into_owned())
}

/// Length leaks, contents do not.
fn keys_match(provided: &[u8], expected: &[u8]) -> bool {
    provided.len() == expected.len()
        && provided
            .iter()
            .zip(expected)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_key_from_query() {
        assert_eq!(query_key(Some("a=1&api_key=s%3Acret")), Some("s:cret".to_string()));
        assert_eq!(query_key(Some("apikey=x")), None);
        assert_eq!(query_key(None), None);
    }

    #[test]
    fn compares_whole_keys() {
        assert!(keys_match(b"s3cret", b"s3cret"));
        assert!(!keys_match(b"s3cre", b"s3cret"));
        assert!(!keys_match(b"s3creT", b"s3cret"));
    }
}
