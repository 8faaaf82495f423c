use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Session rejected ({status}) - will re-authenticate")]
    SessionRejected { status: u16 },

    #[error("Rate limited - will retry next tick")]
    RateLimited,

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("GraphQL error: {0}")]
    GraphQl(String),

    #[error("Claim of {expected} not confirmed (got {got:?})")]
    ClaimNotConfirmed { expected: String, got: Option<String> },

    #[error("Employee id not resolved yet")]
    NotReady,
}

/// Longest response body carried into an error message
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Cut a response body down for logging, on a char boundary.
    pub fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut cut = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..cut], body.len())
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        match status.as_u16() {
            code @ (401 | 403) => ApiError::SessionRejected { status: code },
            429 => ApiError::RateLimited,
            code => ApiError::Status {
                status: code,
                body: Self::truncate_body(body),
            },
        }
    }
}
