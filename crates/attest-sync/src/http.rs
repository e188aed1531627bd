//! Submission to a remote server's `/v1/operations` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use attest_core::Submission;
use serde::Deserialize;
use url::Url;

use crate::error::{is_retryable_status, SubmitError};
use crate::submitter::{OperationSubmitter, SubmitReceipt};

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Error code the server uses while its audit chain is halted.
const INTEGRITY_HALT_CODE: &str = "INTEGRITY_HALT";

#[derive(Debug, Clone)]
pub struct HttpSubmitterConfig {
    pub base_url: Url,
    pub timeout: Duration,
}

impl HttpSubmitterConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpSubmitter {
    client: reqwest::Client,
    endpoint: Url,
}

#[derive(Deserialize)]
struct AppliedBody {
    #[serde(default)]
    replayed: bool,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl HttpSubmitter {
    /// # Errors
    ///
    /// [`SubmitError::Client`] when the HTTP client cannot be built or the
    /// base URL cannot carry a path.
    pub fn new(config: HttpSubmitterConfig) -> Result<Self, SubmitError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SubmitError::Client(format!("failed to build HTTP client: {e}")))?;
        let mut base = config.base_url;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base
            .join("v1/operations")
            .map_err(|e| SubmitError::Client(format!("invalid base url {base}: {e}")))?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl OperationSubmitter for HttpSubmitter {
    async fn submit(&self, submission: &Submission) -> Result<SubmitReceipt, SubmitError> {
        let resp = self
            .client
            .post(self.endpoint.clone())
            .header(IDEMPOTENCY_KEY_HEADER, submission.operation_id.as_str())
            .json(submission)
            .send()
            .await
            .map_err(|e| SubmitError::Transient(format!("POST {}: {e}", self.endpoint)))?;

        let status = resp.status();
        if status.is_success() {
            let replayed = resp
                .json::<AppliedBody>()
                .await
                .map(|b| b.replayed)
                .unwrap_or(false);
            return Ok(SubmitReceipt { replayed });
        }

        let body = resp.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<ErrorBody>(&body).ok().map(|b| b.error);
        let message = match &detail {
            Some(d) => format!("HTTP {status} {}: {}", d.code, d.message),
            None => format!("HTTP {status}: {body}"),
        };
        if detail.as_ref().is_some_and(|d| d.code == INTEGRITY_HALT_CODE) {
            return Err(SubmitError::Halted(message));
        }
        if is_retryable_status(status.as_u16()) {
            Err(SubmitError::Transient(message))
        } else {
            Err(SubmitError::Fatal(message))
        }
    }
}
