use std::fmt;
use std::time::Duration;

use serde_json::Value;

pub const TIMEOUT_HINT: &str = "API is timing out, please consider using a batch-enabled client";

/// Errors returned by the Portall client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No API key could be resolved, or some other setting is unusable.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The transport gave up waiting for the server.
    #[error("{}", TIMEOUT_HINT)]
    Timeout,

    /// HTTP 401.
    #[error("wrong API key")]
    Authentication,

    /// HTTP 422, carrying the server-supplied `detail`.
    #[error("validation error: {0}")]
    Validation(String),

    /// A preflight (dry-run) request was rejected.
    #[error("preflight rejected ({}): {detail}", credits_label(.credits))]
    Preflight {
        credits: Option<u64>,
        detail: ErrorBody,
    },

    /// Any other non-success status.
    #[error("API request failed: HTTP {status}\n{body}")]
    UnknownApi { status: u16, body: ErrorBody },

    /// A deferred job did not complete within the configured wait budget.
    #[error("job {job} did not complete within {waited:?}")]
    DeadlineExceeded { job: String, waited: Duration },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The server answered with a success status but a body we cannot use.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// A request entity violates a field constraint.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, Error>;

fn credits_label(credits: &Option<u64>) -> String {
    match credits {
        Some(c) => format!("{c} credit(s)"),
        None => "cost unknown".to_string(),
    }
}

/// Response body preserved for diagnostics: JSON when it parses, raw text otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorBody {
    Json(Value),
    Text(String),
}

impl ErrorBody {
    pub fn parse(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(v) => ErrorBody::Json(v),
            Err(_) => ErrorBody::Text(text.to_string()),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ErrorBody::Json(v) => Some(v),
            ErrorBody::Text(_) => None,
        }
    }

    /// The `detail` member of a JSON object body.
    pub fn detail(&self) -> Option<&Value> {
        self.as_json().and_then(|v| v.get("detail"))
    }
}

impl fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorBody::Json(v) => write!(f, "{v}"),
            ErrorBody::Text(t) => f.write_str(t),
        }
    }
}

/// Maps a failed response onto the error taxonomy.
///
/// Only meaningful for statuses other than 200 and 202. Never fails: a body that
/// is not JSON is carried as text.
pub fn classify(status: u16, body: &str, preflight: bool) -> Error {
    let parsed = ErrorBody::parse(body);

    match status {
        401 => Error::Authentication,
        422 => Error::Validation(validation_message(&parsed)),
        _ if preflight => Error::Preflight {
            credits: preflight_credits(&parsed),
            detail: parsed,
        },
        _ => Error::UnknownApi {
            status,
            body: parsed,
        },
    }
}

impl Error {
    pub(crate) fn unknown_api(status: u16, body: &str) -> Self {
        Error::UnknownApi {
            status,
            body: ErrorBody::parse(body),
        }
    }

    /// Whether retrying the same request could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Timeout | Error::DeadlineExceeded { .. } => true,
            Error::UnknownApi { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

fn validation_message(body: &ErrorBody) -> String {
    match body.detail() {
        Some(Value::String(s)) => s.clone(),
        // FastAPI-style lists of error objects are kept as compact JSON.
        Some(other) => other.to_string(),
        None => body.to_string(),
    }
}

fn preflight_credits(body: &ErrorBody) -> Option<u64> {
    let json = body.as_json()?;
    let credits = json
        .get("credits")
        .or_else(|| json.get("detail").and_then(|d| d.get("credits")))?;
    match credits {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.ceil() as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
