//! Remote store transport
//!
//! One [`SubmissionTransport::send`] call is one attempt. The pipeline
//! owns retries; a transport only reports whether this attempt made it.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::redirect;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::SubmissionError;
use crate::timeline::session::{Platform, SessionRecord};

/// Body of a data submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataSubmission {
    /// The session record
    pub payload: Value,
    /// Participant identifier
    pub worker_id: String,
    /// Recruitment assignment identifier
    pub assignment_id: Option<String>,
    /// Recruitment study identifier
    pub hit_id: Option<String>,
    /// Recruitment platform
    pub platform: Option<Platform>,
    /// Assigned condition
    pub condition: Option<String>,
}

impl DataSubmission {
    /// Builds the submission body for a finished session.
    ///
    /// # Errors
    ///
    /// Returns [`SubmissionError::Encode`] if the record cannot be encoded.
    pub fn from_session(session: &SessionRecord) -> Result<Self, SubmissionError> {
        let payload =
            serde_json::to_value(session).map_err(|e| SubmissionError::Encode(e.to_string()))?;
        Ok(Self {
            payload,
            worker_id: session.identity.worker_id.clone(),
            assignment_id: session.identity.assignment_id.clone(),
            hit_id: session.identity.hit_id.clone(),
            platform: session.identity.platform,
            condition: session.condition.clone(),
        })
    }
}

/// Body of a participant status update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusUpdate {
    /// Participant identifier
    pub worker_id: String,
    /// New status (e.g. `working_finished_consent`)
    pub status: String,
}

/// One request to the remote store.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionRequest {
    /// Session data
    Data(DataSubmission),
    /// Participant status
    Status(StatusUpdate),
}

impl SubmissionRequest {
    /// Short label used in logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Data(_) => "data",
            Self::Status(_) => "status",
        }
    }
}

/// Delivers requests to the remote store.
#[async_trait]
pub trait SubmissionTransport: Send + Sync {
    /// Makes one delivery attempt.
    ///
    /// # Errors
    ///
    /// Any error means this attempt failed and may be retried.
    async fn send(&self, request: &SubmissionRequest) -> Result<(), SubmissionError>;
}

/// HTTP transport: `POST {endpoint}/data` and `PATCH {endpoint}/participants`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpTransport {
    /// Creates a transport for the store at `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`SubmissionError::InvalidEndpoint`] unless `endpoint` is an
    /// absolute http(s) URL.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, SubmissionError> {
        let url = reqwest::Url::parse(endpoint)
            .map_err(|e| SubmissionError::InvalidEndpoint(format!("{endpoint}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SubmissionError::InvalidEndpoint(format!(
                "{endpoint}: scheme must be http or https"
            )));
        }
        let client = reqwest::Client::builder()
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| SubmissionError::Network(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// Base URL requests are sent to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl SubmissionTransport for HttpTransport {
    async fn send(&self, request: &SubmissionRequest) -> Result<(), SubmissionError> {
        let req = match request {
            SubmissionRequest::Data(body) => {
                self.client.post(format!("{}/data", self.endpoint)).json(body)
            }
            SubmissionRequest::Status(body) => self
                .client
                .patch(format!("{}/participants", self.endpoint))
                .json(body),
        };
        debug!(endpoint = %self.endpoint, kind = request.kind(), "sending submission");

        let response = tokio::time::timeout(self.timeout, req.send())
            .await
            .map_err(|_| SubmissionError::Timeout)?
            .map_err(|e| SubmissionError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SubmissionError::HttpStatus(status.as_u16()));
        }
        Ok(())
    }
}
