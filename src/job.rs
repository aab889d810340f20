use crate::error::{Error, Result};

/// Body of an HTTP 202 reply: `{"detail": "<job poll url>"}`.
#[derive(Debug, serde::Deserialize)]
struct AcceptedReply {
    detail: String,
}

/// Poll URL of a deferred computation.
///
/// Only valid while the server keeps the job around; it is used by the call that
/// received it and then dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct JobHandle {
    url: String,
}

impl JobHandle {
    pub(crate) fn from_accepted(body: &str) -> Result<Self> {
        let reply: AcceptedReply = serde_json::from_str(body).map_err(|e| {
            Error::UnexpectedResponse(format!("deferred reply without a job url ({e}): {body}"))
        })?;

        let url = reply.detail.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::UnexpectedResponse(format!(
                "deferred reply detail is not a url: {url}"
            )));
        }

        Ok(Self {
            url: url.to_string(),
        })
    }

    pub(crate) fn url(&self) -> &str {
        &self.url
    }
}

/// What to do when a poll answers with something other than 200 or 202.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollFailurePolicy {
    /// Return `Value::Null` without raising. Matches the historical client, which
    /// treats this differently from the same status on the initial request.
    #[default]
    ReturnNull,
    /// Classify the status exactly like a top-level response.
    Raise,
}
