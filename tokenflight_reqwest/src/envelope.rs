//! The normalized response envelope
//!
//! Every call made through [`ApiClient`][crate::ApiClient] resolves to an
//! [`ApiResponse`], whether the backend answered with its own envelope, with
//! a bare JSON payload, with an error status, or not at all.

use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokenflight_tokens::RefreshFailure;

/// Error codes used when the backend does not supply its own
pub mod codes {
    /// The request never produced a response
    pub const NETWORK_ERROR: &str = "NETWORK_ERROR";
    /// A successful response carried a body that could not be understood
    pub const PARSE_ERROR: &str = "PARSE_ERROR";
    /// The backend answered with an error status
    pub const HTTP_ERROR: &str = "HTTP_ERROR";
    /// The backend rejected the request's credentials
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    /// The session could not be renewed, so the request was not sent
    pub const REFRESH_FAILED: &str = "REFRESH_FAILED";
    /// The request could not be built
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
}

/// A failed call
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message} ({code}, status {status})")]
pub struct ApiError {
    /// The HTTP status, or `0` if no response was received
    pub status: u16,
    /// A human-readable description
    pub message: String,
    /// A machine-readable code
    pub code: String,
    /// Additional structured detail from the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ApiError {
    /// Constructs an error without details
    pub fn new(status: u16, message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code: code.into(),
            details: None,
        }
    }

    /// Attaches structured detail
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// The default error for a status, before looking at the body
    fn from_status(status: StatusCode) -> Self {
        let code = if status == StatusCode::UNAUTHORIZED {
            codes::UNAUTHORIZED
        } else {
            codes::HTTP_ERROR
        };

        Self::new(
            status.as_u16(),
            status.canonical_reason().unwrap_or("Request failed"),
            code,
        )
    }

    fn parse(status: StatusCode, error: &serde_json::Error) -> Self {
        Self::new(
            status.as_u16(),
            format!("unable to parse response body: {}", error),
            codes::PARSE_ERROR,
        )
    }

    /// Whether the backend rejected the request's credentials, or the
    /// session could not be renewed
    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }
}

/// The outcome of a call
///
/// Callers distinguish success from failure by [`success`][Self::success].
/// On success, `data` holds the payload, if any. On failure, `error`
/// describes what went wrong.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the call succeeded
    pub success: bool,
    /// The payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// What went wrong
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
    /// A human-readable message from the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    /// A successful response
    pub fn ok(data: Option<T>) -> Self {
        Self {
            success: true,
            data,
            error: None,
            message: None,
        }
    }

    /// A failed response
    pub fn failure(error: ApiError) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(error.message.clone()),
            error: Some(error),
        }
    }

    fn with_message(mut self, message: Option<String>) -> Self {
        self.message = message;
        self
    }

    /// Converts the envelope into a `Result`
    pub fn into_result(self) -> Result<Option<T>, ApiError> {
        match (self.success, self.error) {
            (true, _) => Ok(self.data),
            (false, Some(error)) => Err(error),
            (false, None) => Err(ApiError::new(
                0,
                self.message.unwrap_or_else(|| "Request failed".to_owned()),
                codes::HTTP_ERROR,
            )),
        }
    }
}

impl<T: DeserializeOwned> ApiResponse<T> {
    /// Normalizes a response received from the backend
    pub(crate) async fn from_response(resp: reqwest::Response) -> Self {
        let status = resp.status();
        let body = match resp.bytes().await {
            Ok(body) => body,
            Err(error) => return Self::failure(transport_error(error.into())),
        };

        tracing::trace!(
            response.status = status.as_u16(),
            response.length = body.len(),
            "normalizing response"
        );

        if status.is_success() {
            parse_success(status, &body)
        } else {
            Self::failure(parse_failure(status, &body))
        }
    }
}

/// Normalizes the body of a response with a success status
///
/// An empty body succeeds without data. A body carrying the backend's own
/// envelope (an object with a boolean `success`) is unwrapped. Anything
/// else is taken as the payload itself.
pub(crate) fn parse_success<T: DeserializeOwned>(status: StatusCode, body: &[u8]) -> ApiResponse<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return ApiResponse::ok(None);
    }

    let value: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(error) => return ApiResponse::failure(ApiError::parse(status, &error)),
    };

    let envelope = value
        .as_object()
        .and_then(|obj| Some((obj, obj.get("success")?.as_bool()?)));

    match envelope {
        Some((_, false)) => ApiResponse::failure(extract_error(ApiError::from_status(status), &value)),
        Some((obj, true)) => {
            let message = obj.get("message").and_then(Value::as_str).map(str::to_owned);
            match obj.get("data").filter(|d| !d.is_null()) {
                None => ApiResponse::ok(None).with_message(message),
                Some(data) => match T::deserialize(data) {
                    Ok(data) => ApiResponse::ok(Some(data)).with_message(message),
                    Err(error) => ApiResponse::failure(ApiError::parse(status, &error)),
                },
            }
        }
        None => match serde_json::from_value(value) {
            Ok(data) => ApiResponse::ok(Some(data)),
            Err(error) => ApiResponse::failure(ApiError::parse(status, &error)),
        },
    }
}

/// Normalizes the body of a response with an error status
pub(crate) fn parse_failure(status: StatusCode, body: &[u8]) -> ApiError {
    let default = ApiError::from_status(status);
    match serde_json::from_slice::<Value>(body) {
        Ok(value) => extract_error(default, &value),
        Err(_) => default,
    }
}

/// Picks `message`, `code`, and `details` out of an error body
///
/// Fields nested under `error` take precedence over those at the top level.
fn extract_error(mut error: ApiError, body: &Value) -> ApiError {
    let Some(top) = body.as_object() else {
        return error;
    };

    let nested = top.get("error");
    let scopes: Vec<&Map<String, Value>> = nested
        .and_then(Value::as_object)
        .into_iter()
        .chain(Some(top))
        .collect();
    let field = |key: &str| scopes.iter().find_map(|scope| scope.get(key));

    if let Some(message) = field("message").and_then(Value::as_str) {
        error.message = message.to_owned();
    } else if let Some(message) = nested.and_then(Value::as_str) {
        error.message = message.to_owned();
    }

    if let Some(code) = field("code").and_then(Value::as_str) {
        error.code = code.to_owned();
    }

    if let Some(details) = field("details").or_else(|| field("errors")) {
        error.details = Some(details.clone());
    }

    error
}

/// Describes a request that never produced a response
pub(crate) fn transport_error(error: reqwest_middleware::Error) -> ApiError {
    if let reqwest_middleware::Error::Middleware(inner) = &error {
        if let Some(failure) = inner.downcast_ref::<RefreshFailure>() {
            return ApiError::new(
                401,
                "Session expired, please sign in again",
                codes::REFRESH_FAILED,
            )
            .with_details(Value::String(failure.to_string()));
        }
    }

    if let reqwest_middleware::Error::Reqwest(inner) = &error {
        if inner.is_builder() {
            return ApiError::new(0, inner.to_string(), codes::INVALID_REQUEST);
        }
    }

    ApiError::new(0, error.to_string(), codes::NETWORK_ERROR)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[derive(Debug, PartialEq, Deserialize)]
    struct Profile {
        id: u32,
        name: String,
    }

    mod when_status_is_success {
        use super::*;

        #[test]
        fn bare_payload_becomes_data() {
            let resp: ApiResponse<Profile> =
                parse_success(StatusCode::OK, br#"{"id":7,"name":"Ada"}"#);

            assert!(resp.success);
            assert_eq!(
                resp.data,
                Some(Profile {
                    id: 7,
                    name: "Ada".into()
                })
            );
        }

        #[test]
        fn backend_envelope_is_unwrapped() {
            let resp: ApiResponse<Profile> = parse_success(
                StatusCode::OK,
                br#"{"success":true,"data":{"id":7,"name":"Ada"},"message":"found"}"#,
            );

            assert!(resp.success);
            assert_eq!(resp.data.map(|p| p.id), Some(7));
            assert_eq!(resp.message.as_deref(), Some("found"));
        }

        #[test]
        fn empty_body_succeeds_without_data() {
            let resp: ApiResponse<Profile> = parse_success(StatusCode::NO_CONTENT, b"");
            assert!(resp.success);
            assert_eq!(resp.data, None);
        }

        #[test]
        fn envelope_reporting_failure_is_a_failure() {
            let resp: ApiResponse<Profile> = parse_success(
                StatusCode::OK,
                br#"{"success":false,"message":"quota exceeded","code":"QUOTA"}"#,
            );

            assert!(!resp.success);
            let error = resp.error.unwrap();
            assert_eq!(error.message, "quota exceeded");
            assert_eq!(error.code, "QUOTA");
        }

        #[test]
        fn invalid_json_is_a_parse_error() {
            let resp: ApiResponse<Profile> = parse_success(StatusCode::OK, b"<html>oops</html>");

            assert!(!resp.success);
            let error = resp.error.unwrap();
            assert_eq!(error.code, codes::PARSE_ERROR);
            assert_eq!(error.status, 200);
        }

        #[test]
        fn payload_of_the_wrong_shape_is_a_parse_error() {
            let resp: ApiResponse<Profile> = parse_success(StatusCode::OK, br#"{"id":"seven"}"#);
            assert_eq!(resp.error.map(|e| e.code), Some(codes::PARSE_ERROR.to_owned()));
        }
    }

    mod when_status_is_failure {
        use super::*;

        #[test]
        fn uses_server_fields_at_the_top_level() {
            let error = parse_failure(
                StatusCode::UNPROCESSABLE_ENTITY,
                br#"{"message":"name is required","code":"VALIDATION","details":{"field":"name"}}"#,
            );

            assert_eq!(error.status, 422);
            assert_eq!(error.message, "name is required");
            assert_eq!(error.code, "VALIDATION");
            assert_eq!(error.details, Some(json!({"field": "name"})));
        }

        #[test]
        fn prefers_fields_nested_under_error() {
            let error = parse_failure(
                StatusCode::CONFLICT,
                br#"{"message":"outer","error":{"message":"inner","code":"DUPLICATE"}}"#,
            );

            assert_eq!(error.message, "inner");
            assert_eq!(error.code, "DUPLICATE");
        }

        #[test]
        fn accepts_a_string_error_and_an_errors_list() {
            let error = parse_failure(
                StatusCode::BAD_REQUEST,
                br#"{"error":"bad input","errors":["a","b"]}"#,
            );

            assert_eq!(error.message, "bad input");
            assert_eq!(error.code, codes::HTTP_ERROR);
            assert_eq!(error.details, Some(json!(["a", "b"])));
        }

        #[test]
        fn falls_back_to_the_canonical_reason() {
            let error = parse_failure(StatusCode::SERVICE_UNAVAILABLE, b"upstream down");

            assert_eq!(error.status, 503);
            assert_eq!(error.message, "Service Unavailable");
            assert_eq!(error.code, codes::HTTP_ERROR);
            assert_eq!(error.details, None);
        }

        #[test]
        fn unauthorized_has_its_own_code() {
            let error = parse_failure(StatusCode::UNAUTHORIZED, b"");

            assert_eq!(error.code, codes::UNAUTHORIZED);
            assert!(error.is_unauthorized());
        }
    }

    #[test]
    fn into_result_splits_success_from_failure() {
        assert_eq!(ApiResponse::ok(Some(3)).into_result(), Ok(Some(3)));

        let error = ApiError::new(404, "Not Found", codes::HTTP_ERROR);
        assert_eq!(
            ApiResponse::<u8>::failure(error.clone()).into_result(),
            Err(error)
        );
    }

    #[test]
    fn envelope_serializes_without_empty_fields() {
        let value = serde_json::to_value(ApiResponse::ok(Some(1))).unwrap();
        assert_eq!(value, json!({"success": true, "data": 1}));
    }
}
