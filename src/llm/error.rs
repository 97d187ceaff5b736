//! LLM error types.
//!
//! Errors are classified by origin so callers can tell a provider outage
//! from a malformed request, but no retry machinery lives here — a failed
//! model call fails the phase that issued it.

/// Error from an LLM API call.
#[derive(Debug, Clone)]
pub struct LlmError {
    /// The kind of error
    pub kind: LlmErrorKind,
    /// HTTP status code, if applicable
    pub status_code: Option<u16>,
    /// Error message
    pub message: String,
}

/// Classification of LLM errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// 429 from the provider
    RateLimited,
    /// 5xx from the provider
    ServerError,
    /// 4xx other than 429 (bad request, auth, ...)
    ClientError,
    /// Connection, DNS, or timeout failure before a response arrived
    NetworkError,
    /// Response body could not be interpreted
    ParseError,
}

impl LlmError {
    pub fn rate_limited(message: String) -> Self {
        Self {
            kind: LlmErrorKind::RateLimited,
            status_code: Some(429),
            message,
        }
    }

    pub fn server_error(status_code: u16, message: String) -> Self {
        Self {
            kind: LlmErrorKind::ServerError,
            status_code: Some(status_code),
            message,
        }
    }

    pub fn client_error(status_code: u16, message: String) -> Self {
        Self {
            kind: LlmErrorKind::ClientError,
            status_code: Some(status_code),
            message,
        }
    }

    pub fn network_error(message: String) -> Self {
        Self {
            kind: LlmErrorKind::NetworkError,
            status_code: None,
            message,
        }
    }

    pub fn parse_error(message: String) -> Self {
        Self {
            kind: LlmErrorKind::ParseError,
            status_code: None,
            message,
        }
    }
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{:?} ({}): {}", self.kind, code, self.message),
            None => write!(f, "{:?}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for LlmError {}

/// Classify an HTTP status code into an error kind.
pub fn classify_http_status(status_code: u16) -> LlmErrorKind {
    match status_code {
        429 => LlmErrorKind::RateLimited,
        500..=599 => LlmErrorKind::ServerError,
        400..=499 => LlmErrorKind::ClientError,
        _ => LlmErrorKind::ServerError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_buckets() {
        assert_eq!(classify_http_status(429), LlmErrorKind::RateLimited);
        assert_eq!(classify_http_status(500), LlmErrorKind::ServerError);
        assert_eq!(classify_http_status(503), LlmErrorKind::ServerError);
        assert_eq!(classify_http_status(400), LlmErrorKind::ClientError);
        assert_eq!(classify_http_status(401), LlmErrorKind::ClientError);
    }

    #[test]
    fn display_includes_status_when_present() {
        let err = LlmError::client_error(401, "bad key".to_string());
        let shown = err.to_string();
        assert!(shown.contains("401"));
        assert!(shown.contains("bad key"));
    }
}
