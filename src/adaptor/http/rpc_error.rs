use reqwest::StatusCode;
use serde::Deserialize;

use crate::error::{
    aborted, already_exists, data_loss, deadline_exceeded, failed_precondition, internal_error,
    invalid_argument, not_found, permission_denied, resource_exhausted, unauthenticated,
    unavailable, DbError,
};

#[derive(Debug, Deserialize)]
struct GoogleErrorBody {
    error: Option<GoogleError>,
}

#[derive(Debug, Deserialize)]
struct GoogleError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

/// Maps a failed REST response to a database error, preferring the
/// `google.rpc.Status` name in the body over the HTTP status.
pub fn map_http_error(status: StatusCode, body: &str) -> DbError {
    let payload = extract_error_payload(body);
    let message = payload
        .as_ref()
        .and_then(|payload| payload.message.clone())
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("HTTP error").to_string());

    if let Some(rpc_status) = payload.as_ref().and_then(|payload| payload.status.as_deref()) {
        if let Some(error) = map_status_code(rpc_status, &message) {
            return error;
        }
    }

    match status {
        StatusCode::BAD_REQUEST => invalid_argument(message),
        StatusCode::UNAUTHORIZED => unauthenticated(message),
        StatusCode::FORBIDDEN => permission_denied(message),
        StatusCode::NOT_FOUND => not_found(message),
        StatusCode::CONFLICT => aborted(message),
        StatusCode::PRECONDITION_FAILED => failed_precondition(message),
        StatusCode::TOO_MANY_REQUESTS => resource_exhausted(message),
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => unavailable(message),
        StatusCode::GATEWAY_TIMEOUT | StatusCode::REQUEST_TIMEOUT => deadline_exceeded(message),
        StatusCode::OK => internal_error("Received HTTP 200 while handling error"),
        status if status.is_client_error() => invalid_argument(message),
        _ => internal_error(message),
    }
}

fn map_status_code(status: &str, message: &str) -> Option<DbError> {
    let message = message.to_string();
    let error = match status {
        "INVALID_ARGUMENT" | "OUT_OF_RANGE" => invalid_argument(message),
        "FAILED_PRECONDITION" => failed_precondition(message),
        "UNAUTHENTICATED" => unauthenticated(message),
        "PERMISSION_DENIED" => permission_denied(message),
        "NOT_FOUND" => not_found(message),
        "ALREADY_EXISTS" => already_exists(message),
        "ABORTED" => aborted(message),
        "RESOURCE_EXHAUSTED" => resource_exhausted(message),
        "DATA_LOSS" => data_loss(message),
        "CANCELLED" | "UNKNOWN" | "INTERNAL" => internal_error(message),
        "UNAVAILABLE" => unavailable(message),
        "DEADLINE_EXCEEDED" => deadline_exceeded(message),
        _ => return None,
    };
    Some(error)
}

fn extract_error_payload(body: &str) -> Option<GoogleError> {
    serde_json::from_str::<GoogleErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbErrorCode;

    #[test]
    fn prefers_rpc_status_from_body() {
        let body = r#"{"error":{"code":409,"message":"Transaction lock timeout","status":"ABORTED"}}"#;
        let error = map_http_error(StatusCode::CONFLICT, body);
        assert_eq!(error.code, DbErrorCode::Aborted);
        assert_eq!(error.message(), "Transaction lock timeout");
    }

    #[test]
    fn update_of_missing_document_is_not_found() {
        let body = r#"{"error":{"code":404,"message":"No document to update","status":"NOT_FOUND"}}"#;
        assert_eq!(
            map_http_error(StatusCode::NOT_FOUND, body).code,
            DbErrorCode::NotFound
        );
    }

    #[test]
    fn falls_back_to_http_status() {
        let error = map_http_error(StatusCode::SERVICE_UNAVAILABLE, "oops");
        assert_eq!(error.code, DbErrorCode::Unavailable);
        assert_eq!(error.message(), "Service Unavailable");
    }
}
