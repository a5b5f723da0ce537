use common::error::DiagnosticMessage;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Platform error codes that signal lock contention or a temporarily
/// unavailable service.
pub const TRANSIENT_CODES: &[&str] = &[
    "UNABLE_TO_LOCK_ROW",
    "SERVER_UNAVAILABLE",
    "QUERY_TIMEOUT",
    "TIMEOUT",
];
pub const SESSION_CODES: &[&str] = &["INVALID_SESSION_ID", "INVALID_AUTH_HEADER"];
pub const RATE_LIMIT_CODE: &str = "REQUEST_LIMIT_EXCEEDED";
/// Row code for a request that failed in transport without a platform code,
/// e.g. a refused connection.
pub const TRANSPORT_ERROR_CODE: &str = "TRANSPORT_ERROR";
/// Row code for a request refused without a platform code.
pub const REQUEST_REJECTED_CODE: &str = "REQUEST_REJECTED";

/// How a caller should react to a failed platform call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    NonRetryable,
    Auth,
    RateLimited,
    Connectivity,
}

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("authentication failed: {context}")]
    Auth { context: DiagnosticMessage },
    #[error("org must be reconnected: {context}")]
    ReconnectRequired { context: DiagnosticMessage },
    #[error("rate limit exceeded: {context}")]
    RateLimited {
        context: DiagnosticMessage,
        retry_after: Option<Duration>,
    },
    #[error("transient platform error: {context}")]
    Transient {
        context: DiagnosticMessage,
        code: Option<String>,
    },
    #[error("request rejected ({status}): {context}")]
    Rejected {
        context: DiagnosticMessage,
        status: u16,
        code: Option<String>,
    },
    #[error("org unreachable: {context}")]
    Connectivity { context: DiagnosticMessage },
    #[error("credentials unavailable: {context}")]
    Credentials { context: DiagnosticMessage },
    #[error("unexpected response: {context}")]
    Unexpected { context: DiagnosticMessage },
}

impl PlatformError {
    #[track_caller]
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            context: DiagnosticMessage::new(message.into()),
        }
    }

    #[track_caller]
    pub fn reconnect_required(message: impl Into<String>) -> Self {
        Self::ReconnectRequired {
            context: DiagnosticMessage::new(message.into()),
        }
    }

    #[track_caller]
    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::RateLimited {
            context: DiagnosticMessage::new(message.into()),
            retry_after,
        }
    }

    #[track_caller]
    pub fn transient(message: impl Into<String>, code: Option<String>) -> Self {
        Self::Transient {
            context: DiagnosticMessage::new(message.into()),
            code,
        }
    }

    #[track_caller]
    pub fn rejected(status: u16, message: impl Into<String>, code: Option<String>) -> Self {
        Self::Rejected {
            context: DiagnosticMessage::new(message.into()),
            status,
            code,
        }
    }

    #[track_caller]
    pub fn connectivity(message: impl Into<String>) -> Self {
        Self::Connectivity {
            context: DiagnosticMessage::new(message.into()),
        }
    }

    #[track_caller]
    pub fn credentials(message: impl Into<String>) -> Self {
        Self::Credentials {
            context: DiagnosticMessage::new(message.into()),
        }
    }

    #[track_caller]
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected {
            context: DiagnosticMessage::new(message.into()),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            PlatformError::Auth { .. } | PlatformError::ReconnectRequired { .. } => {
                ErrorClass::Auth
            }
            PlatformError::RateLimited { .. } => ErrorClass::RateLimited,
            PlatformError::Transient { .. } => ErrorClass::Retryable,
            PlatformError::Connectivity { .. } => ErrorClass::Connectivity,
            PlatformError::Rejected { .. }
            | PlatformError::Credentials { .. }
            | PlatformError::Unexpected { .. } => ErrorClass::NonRetryable,
        }
    }

    /// Platform error code, when the response carried one.
    pub fn code(&self) -> Option<&str> {
        match self {
            PlatformError::Transient { code, .. } | PlatformError::Rejected { code, .. } => {
                code.as_deref()
            }
            PlatformError::RateLimited { .. } => Some(RATE_LIMIT_CODE),
            _ => None,
        }
    }

    /// Transport, throttling and lock-contention failures.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Retryable | ErrorClass::RateLimited | ErrorClass::Connectivity
        )
    }

    /// Code reported for the rows of a failed request: the platform code,
    /// or a transport/rejection marker when the response carried none.
    pub fn row_code(&self) -> &str {
        match self.code() {
            Some(code) => code,
            None if self.is_transient() => TRANSPORT_ERROR_CODE,
            None => REQUEST_REJECTED_CODE,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            PlatformError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn requires_reconnect(&self) -> bool {
        matches!(self, PlatformError::ReconnectRequired { .. })
    }

    /// Classifies a non-success response from its status and body.
    #[track_caller]
    pub fn from_response(status: StatusCode, body: &str, retry_after: Option<Duration>) -> Self {
        let (code, message) = parse_error_body(body);
        let message = message.unwrap_or_else(|| format!("HTTP {status}"));
        let code_is = |set: &[&str]| code.as_deref().is_some_and(|c| set.contains(&c));

        if status == StatusCode::UNAUTHORIZED || code_is(SESSION_CODES) {
            Self::auth(message)
        } else if status == StatusCode::TOO_MANY_REQUESTS || code_is(&[RATE_LIMIT_CODE]) {
            Self::rate_limited(message, retry_after)
        } else if status.is_server_error() || code_is(TRANSIENT_CODES) {
            Self::transient(message, code)
        } else {
            Self::rejected(status.as_u16(), message, code)
        }
    }
}

impl From<reqwest::Error> for PlatformError {
    #[track_caller]
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PlatformError::transient(err.to_string(), Some("TIMEOUT".to_string()))
        } else if err.is_connect() {
            PlatformError::connectivity(err.to_string())
        } else if err.is_decode() {
            PlatformError::unexpected(format!("could not decode response: {err}"))
        } else {
            PlatformError::transient(err.to_string(), None)
        }
    }
}

impl From<serde_json::Error> for PlatformError {
    #[track_caller]
    fn from(err: serde_json::Error) -> Self {
        PlatformError::unexpected(format!("could not decode response: {err}"))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorBody {
    Api(Vec<ApiError>),
    OAuth {
        error: String,
        #[serde(default)]
        error_description: Option<String>,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ApiError {
    #[serde(alias = "statusCode")]
    pub error_code: String,
    pub message: String,
    #[serde(default)]
    pub fields: Vec<String>,
}

/// Platform API errors arrive as `[{errorCode, message}]`; the token
/// endpoint answers with `{error, error_description}`.
pub(crate) fn parse_error_body(body: &str) -> (Option<String>, Option<String>) {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody::Api(errors)) => match errors.into_iter().next() {
            Some(e) => (Some(e.error_code), Some(e.message)),
            None => (None, None),
        },
        Ok(ErrorBody::OAuth {
            error,
            error_description,
        }) => {
            let message = error_description.unwrap_or_else(|| error.clone());
            (Some(error), Some(message))
        }
        Err(_) if body.trim().is_empty() => (None, None),
        Err(_) => (None, Some(body.chars().take(512).collect())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matches::assert_matches;

    #[test]
    fn classifies_statuses_and_codes() {
        let locked = r#"[{"errorCode":"UNABLE_TO_LOCK_ROW","message":"unable to obtain exclusive access"}]"#;
        let err = PlatformError::from_response(StatusCode::BAD_REQUEST, locked, None);
        assert_eq!(err.class(), ErrorClass::Retryable);
        assert_eq!(err.code(), Some("UNABLE_TO_LOCK_ROW"));

        let session = r#"[{"errorCode":"INVALID_SESSION_ID","message":"Session expired or invalid"}]"#;
        assert_eq!(
            PlatformError::from_response(StatusCode::UNAUTHORIZED, session, None).class(),
            ErrorClass::Auth
        );

        let limited = PlatformError::from_response(
            StatusCode::FORBIDDEN,
            r#"[{"errorCode":"REQUEST_LIMIT_EXCEEDED","message":"TotalRequests Limit exceeded."}]"#,
            Some(Duration::from_secs(3)),
        );
        assert_matches!(
            limited,
            PlatformError::RateLimited { retry_after: Some(d), .. } if d == Duration::from_secs(3)
        );

        assert_eq!(
            PlatformError::from_response(StatusCode::SERVICE_UNAVAILABLE, "", None).class(),
            ErrorClass::Retryable
        );
        let missing = PlatformError::from_response(
            StatusCode::NOT_FOUND,
            r#"[{"errorCode":"NOT_FOUND","message":"The requested resource does not exist"}]"#,
            None,
        );
        assert_eq!(missing.class(), ErrorClass::NonRetryable);
        assert_eq!(missing.code(), Some("NOT_FOUND"));
    }

    #[test]
    fn reads_oauth_error_bodies() {
        let err = PlatformError::from_response(
            StatusCode::BAD_REQUEST,
            r#"{"error":"invalid_grant","error_description":"expired access/refresh token"}"#,
            None,
        );
        assert_eq!(err.code(), Some("invalid_grant"));
        assert!(err.to_string().contains("expired access/refresh token"));
    }

    #[test]
    fn row_codes_fall_back_by_class() {
        let timeout = PlatformError::transient("timed out", Some("TIMEOUT".to_string()));
        assert_eq!(timeout.row_code(), "TIMEOUT");
        assert_eq!(PlatformError::connectivity("refused").row_code(), TRANSPORT_ERROR_CODE);
        assert_eq!(PlatformError::unexpected("garbled").row_code(), REQUEST_REJECTED_CODE);

        let throttled = PlatformError::rate_limited("limit", Some(Duration::from_secs(3)));
        assert_eq!(throttled.row_code(), RATE_LIMIT_CODE);
        assert_eq!(throttled.retry_after(), Some(Duration::from_secs(3)));
        assert!(throttled.is_transient());
    }
}
