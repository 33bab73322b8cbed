use thiserror::Error;

/// Why the billing endpoint refused the credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// 401: the key is unknown, revoked or expired.
    InvalidCredential,
    /// 403: the key is valid but lacks admin scope.
    InsufficientScope,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Transient network error: {0}")]
    Transient(String),

    #[error("{}", auth_message(.kind, .message))]
    Authorization { kind: AuthFailure, message: String },

    #[error("Request rejected with HTTP {status}: {message}")]
    Request { status: u16, message: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Ledger snapshot is unreadable: {0}")]
    CacheCorruption(String),

    #[error("No admin key configured - set LEDGERLENS_ADMIN_KEY or ledger.api_key")]
    MissingCredential,

    #[error("Sync cancelled")]
    Cancelled,

    #[error("HTTP client setup failed: {0}")]
    Setup(String),
}

fn auth_message(kind: &AuthFailure, message: &str) -> String {
    match kind {
        AuthFailure::InvalidCredential => {
            format!("Authentication failed - the admin key is invalid or expired ({})", message)
        }
        AuthFailure::InsufficientScope => format!(
            "Access denied - billing data requires an admin-scoped key ({})",
            message
        ),
    }
}

impl LedgerError {
    /// Classify a non-success HTTP status. 429 and 5xx are worth retrying.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = truncate_body(body);
        match status {
            401 => Self::Authorization {
                kind: AuthFailure::InvalidCredential,
                message,
            },
            403 => Self::Authorization {
                kind: AuthFailure::InsufficientScope,
                message,
            },
            408 | 429 | 500..=599 => Self::Transient(format!("HTTP {}: {}", status, message)),
            _ => Self::Request { status, message },
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<reqwest::Error> for LedgerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::MalformedResponse(err.to_string());
        }
        if let Some(status) = err.status() {
            return Self::from_status(status.as_u16(), &err.to_string());
        }
        Self::Transient(err.to_string())
    }
}

fn truncate_body(body: &str) -> String {
    let body = body.trim();
    if body.chars().count() > 200 {
        body.chars().take(200).collect::<String>() + "…"
    } else {
        body.to_string()
    }
}
