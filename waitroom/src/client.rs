//! Queue service client.
//!
//! Implements the waiting-room protocol against the remote queue service:
//! - Entry Gate: register for a token, then query status with it
//! - Capacity Gate: enter, query, exit, identified by the session credential
//! - No retries: every failure is terminal for the flow that issued it

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};

use crate::WAITROOM_VERSION;
use crate::config::GateConfig;
use crate::error::{GateError, GateOperation};
use crate::status::{GateToken, QueueStatus, RegisterResponse};

/// The five queue service operations a flow needs.
///
/// This abstraction lets flows run against an in-memory queue in tests.
#[async_trait]
pub trait QueueApi: Send + Sync {
    /// Request admission into the Entry Gate.
    async fn register_entry(&self) -> Result<GateToken, GateError>;

    /// Probe Entry Gate status. Safe to repeat; has no side effects.
    async fn query_entry_status(&self, token: &GateToken) -> Result<QueueStatus, GateError>;

    /// Request admission into the Capacity Gate. Success means the server now
    /// holds a slot for this session.
    async fn enter_capacity(&self) -> Result<(), GateError>;

    async fn query_capacity_status(&self) -> Result<QueueStatus, GateError>;

    /// Release this session's slot. Not assumed idempotent.
    async fn exit_capacity(&self) -> Result<(), GateError>;

    /// Release this session's slot without an async runtime.
    ///
    /// Only called from `Drop` contexts where no runtime is available.
    fn exit_capacity_blocking(&self) -> Result<(), GateError>;
}

pub struct HttpQueueClient {
    config: GateConfig,
    client: reqwest::Client,
}

impl HttpQueueClient {
    pub fn new(config: GateConfig) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();

        if let Some(ref token) = config.session_token
            && let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token))
        {
            headers.insert(AUTHORIZATION, value);
        }

        if let Ok(value) = HeaderValue::from_str(&user_agent()) {
            headers.insert(USER_AGENT, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    async fn send(
        &self,
        operation: GateOperation,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, GateError> {
        let response = request
            .send()
            .await
            .map_err(|e| GateError::unavailable(operation, e))?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(operation = %operation, status = %status, "Queue service rejected request");
            return Err(GateError::rejected(operation, status.as_u16()));
        }

        Ok(response)
    }

    async fn fetch_status(
        &self,
        operation: GateOperation,
        request: reqwest::RequestBuilder,
    ) -> Result<QueueStatus, GateError> {
        self.send(operation, request)
            .await?
            .json::<QueueStatus>()
            .await
            .map_err(|e| GateError::unavailable(operation, e))
    }
}

fn user_agent() -> String {
    format!("waitroom/{}", WAITROOM_VERSION)
}

#[async_trait]
impl QueueApi for HttpQueueClient {
    async fn register_entry(&self) -> Result<GateToken, GateError> {
        let operation = GateOperation::RegisterEntry;
        let url = self.config.url(&self.config.endpoints.register_entry);

        let body: RegisterResponse = self
            .send(operation, self.client.post(url))
            .await?
            .json()
            .await
            .map_err(|e| GateError::unavailable(operation, e))?;

        if body.token.is_empty() {
            return Err(GateError::unavailable(operation, "server issued an empty token"));
        }

        Ok(GateToken::new(body.token))
    }

    async fn query_entry_status(&self, token: &GateToken) -> Result<QueueStatus, GateError> {
        let url = self.config.url(&self.config.endpoints.entry_status);
        let request = self
            .client
            .get(url)
            .header(self.config.token_header.as_str(), token.as_str());

        self.fetch_status(GateOperation::QueryEntryStatus, request)
            .await
    }

    async fn enter_capacity(&self) -> Result<(), GateError> {
        let url = self.config.url(&self.config.endpoints.enter_capacity);
        self.send(GateOperation::EnterCapacity, self.client.post(url))
            .await?;
        Ok(())
    }

    async fn query_capacity_status(&self) -> Result<QueueStatus, GateError> {
        let url = self.config.url(&self.config.endpoints.capacity_status);
        self.fetch_status(GateOperation::QueryCapacityStatus, self.client.get(url))
            .await
    }

    async fn exit_capacity(&self) -> Result<(), GateError> {
        let url = self.config.url(&self.config.endpoints.exit_capacity);
        self.send(GateOperation::ExitCapacity, self.client.post(url))
            .await?;
        Ok(())
    }

    /// Uses ureq (blocking HTTP) instead of reqwest for non-async contexts.
    fn exit_capacity_blocking(&self) -> Result<(), GateError> {
        let operation = GateOperation::ExitCapacity;
        let url = self.config.url(&self.config.endpoints.exit_capacity);

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(self.config.request_timeout.max(Duration::from_millis(1))))
            .build()
            .new_agent();

        let mut request = agent.post(&url).header("User-Agent", &user_agent());
        if let Some(ref token) = self.config.session_token {
            request = request.header("Authorization", &format!("Bearer {}", token));
        }

        match request.send_empty() {
            Ok(_) => Ok(()),
            Err(ureq::Error::StatusCode(status)) => Err(GateError::rejected(operation, status)),
            Err(e) => Err(GateError::unavailable(operation, e)),
        }
    }
}
