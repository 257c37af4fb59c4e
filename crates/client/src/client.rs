//! Approval Escalation Client
//!
//! `ApprovalClient` creates approval requests for proposed function calls,
//! escalates them while they are still undecided and reads back the human's
//! decision. It holds no background tasks and no locks; clones share one
//! HTTP connection pool.
//!
//! ```no_run
//! # async fn demo() -> hitl_client::Result<()> {
//! use hitl_client::ApprovalClient;
//! use hitl_common::{ClientConfig, ContactChannel, FunctionCallSpec};
//!
//! let client = ApprovalClient::new(&ClientConfig::load(None)?)?;
//! let spec = FunctionCallSpec::builder()
//!     .fn_name("multiply")
//!     .channel(ContactChannel::email("reviewer@example.com"))
//!     .build()
//!     .map_err(|e| hitl_client::ApprovalError::validation("spec", e.to_string()))?;
//! let call = client.create_function_call(spec).await?;
//! let _status = client.fetch_decision(&call.call_id).await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use hitl_common::{
    CallId, ClientConfig, ContactChannel, Decision, DecisionStatus, Escalation, EventStreamConfig,
    FunctionCall, FunctionCallResponse, FunctionCallSpec, HumanContact, HumanContactResponse, HumanContactSpec,
};
use serde::{de::DeserializeOwned, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::connection::CloudConnection;
use crate::error::{ApprovalError, Result};
use crate::events::EventStream;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::validation::{
    validate_call_id, validate_escalation, validate_function_call_spec,
    validate_human_contact_spec,
};

const FUNCTION_CALL: &str = "function call";
const HUMAN_CONTACT: &str = "human contact";

/// Body of a create request; the id is chosen client-side
#[derive(Serialize)]
struct CreateRequest<'a, S: Serialize> {
    run_id: &'a str,
    call_id: &'a CallId,
    spec: &'a S,
}

#[derive(Debug, Clone)]
pub struct ApprovalClient {
    connection: CloudConnection,
    run_id: String,
    contact_channel: Option<ContactChannel>,
    retry: RetryPolicy,
    poll_interval: Duration,
    events: EventStreamConfig,
}

impl ApprovalClient {
    /// Build a client from configuration.
    ///
    /// Fails with a configuration error when the API key is missing or a
    /// setting is out of range.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let connection = CloudConnection::new(config)?;
        let run_id = config.resolved_run_id();
        debug!("approval client for {} (run {})", connection.base_url(), run_id);

        Ok(Self {
            connection,
            run_id,
            contact_channel: config.contact_channel.clone(),
            retry: RetryPolicy::from(&config.retry),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            events: config.events.clone(),
        })
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn with_contact_channel(mut self, channel: ContactChannel) -> Self {
        self.contact_channel = Some(channel);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn contact_channel(&self) -> Option<&ContactChannel> {
        self.contact_channel.as_ref()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// A new event stream sharing this client's connection pool
    pub fn event_stream(&self) -> EventStream {
        EventStream::new(self.connection.clone(), &self.events)
    }

    /// Race `fut` against `cancel`, yielding `Cancelled` if the token fires first
    pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ApprovalError::Cancelled),
            result = fut => result,
        }
    }

    // ------------------------------------------------------------------
    // Function calls
    // ------------------------------------------------------------------

    /// Register a new approval request and notify its channel.
    ///
    /// A spec without a channel falls back to the configured default. When
    /// retries are enabled, a retried attempt first looks the generated id up
    /// so a request the service already stored is not created twice.
    #[instrument(skip_all, fields(fn_name = %spec.fn_name))]
    pub async fn create_function_call(&self, mut spec: FunctionCallSpec) -> Result<FunctionCall> {
        if spec.channel.is_none() {
            spec.channel = self.contact_channel.clone();
        }
        validate_function_call_spec(&spec)?;

        let call_id = CallId::generate("call");
        let call: FunctionCall = self
            .create_once("/function_calls", FUNCTION_CALL, &call_id, &spec)
            .await?;

        if call.call_id.is_empty() {
            return Err(ApprovalError::Decode {
                endpoint: "/function_calls".to_string(),
                message: "response carries an empty call_id".to_string(),
            });
        }

        info!("created function call {} for {}", call.call_id, call.spec.fn_name);
        Ok(call)
    }

    #[instrument(skip_all, fields(call_id = %call_id))]
    pub async fn get_function_call(&self, call_id: &CallId) -> Result<FunctionCall> {
        validate_call_id(call_id)?;
        let path = format!("/function_calls/{}", call_id);
        self.read(&path, FUNCTION_CALL, call_id).await
    }

    /// Current decision state of a function call. Pure read.
    pub async fn fetch_decision(&self, call_id: &CallId) -> Result<DecisionStatus> {
        let call = self.get_function_call(call_id).await?;
        Ok(call.decision_status())
    }

    /// Notify additional recipients about a still-undecided call.
    ///
    /// Each successful call sends a fresh notification, so this is never
    /// retried automatically.
    #[instrument(skip_all, fields(call_id = %call_id))]
    pub async fn escalate_function_call(
        &self,
        call_id: &CallId,
        escalation: &Escalation,
    ) -> Result<FunctionCall> {
        validate_call_id(call_id)?;
        validate_escalation(escalation)?;

        let path = format!("/function_calls/{}/escalate/email", call_id);
        let call: FunctionCall = self
            .connection
            .post(&path, escalation, FUNCTION_CALL, Some(call_id.as_str()))
            .await?;

        ensure_same_id(&path, call_id, &call.call_id)?;
        info!("escalated function call {}", call_id);
        Ok(call)
    }

    /// Record a human response to a function call
    #[instrument(skip_all, fields(call_id = %call_id, approved = response.approved))]
    pub async fn respond_to_function_call(
        &self,
        call_id: &CallId,
        response: &FunctionCallResponse,
    ) -> Result<FunctionCall> {
        validate_call_id(call_id)?;
        let path = format!("/agent/function_calls/{}/respond", call_id);
        let call: FunctionCall = self
            .connection
            .post(&path, response, FUNCTION_CALL, Some(call_id.as_str()))
            .await?;
        ensure_same_id(&path, call_id, &call.call_id)?;
        Ok(call)
    }

    pub async fn approve_function_call(
        &self,
        call_id: &CallId,
        comment: Option<String>,
    ) -> Result<FunctionCall> {
        let response = FunctionCallResponse {
            approved: true,
            comment,
            reject_option_name: None,
        };
        self.respond_to_function_call(call_id, &response).await
    }

    /// Deny a function call. A reason is required so the agent can adapt.
    pub async fn deny_function_call(
        &self,
        call_id: &CallId,
        reason: impl Into<String>,
    ) -> Result<FunctionCall> {
        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(ApprovalError::validation("comment", "a reason is required to deny"));
        }
        let response = FunctionCallResponse {
            approved: false,
            comment: Some(reason),
            reject_option_name: None,
        };
        self.respond_to_function_call(call_id, &response).await
    }

    /// Function calls still waiting for a human
    #[instrument(skip(self))]
    pub async fn pending_function_calls(&self) -> Result<Vec<FunctionCall>> {
        retry_with_backoff(&self.retry, "pending_function_calls", |_| {
            self.connection
                .get("/agent/function_calls/pending", FUNCTION_CALL, None)
        })
        .await
    }

    /// Poll until the call is decided or `cancel` fires.
    ///
    /// Every poll is an independent request; `None` uses the configured interval.
    #[instrument(skip_all, fields(call_id = %call_id))]
    pub async fn wait_for_decision(
        &self,
        call_id: &CallId,
        poll_interval: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<Decision> {
        let interval = poll_interval.unwrap_or(self.poll_interval);
        loop {
            match Self::cancellable(cancel, self.fetch_decision(call_id)).await? {
                DecisionStatus::Decided(decision) => {
                    info!("function call {} decided: approved={}", call_id, decision.approved);
                    return Ok(decision);
                }
                DecisionStatus::Pending { escalated } => {
                    debug!("function call {} still pending (escalated={})", call_id, escalated);
                }
            }
            sleep_or_cancel(interval, cancel).await?;
        }
    }

    /// Create a function call and wait for its decision
    pub async fn fetch_approval(
        &self,
        spec: FunctionCallSpec,
        cancel: &CancellationToken,
    ) -> Result<Decision> {
        let call = Self::cancellable(cancel, self.create_function_call(spec)).await?;
        self.wait_for_decision(&call.call_id, None, cancel).await
    }

    // ------------------------------------------------------------------
    // Human contacts
    // ------------------------------------------------------------------

    #[instrument(skip_all)]
    pub async fn create_human_contact(&self, mut spec: HumanContactSpec) -> Result<HumanContact> {
        if spec.channel.is_none() {
            spec.channel = self.contact_channel.clone();
        }
        validate_human_contact_spec(&spec)?;

        let call_id = CallId::generate("contact");
        let contact: HumanContact = self
            .create_once("/contact_requests", HUMAN_CONTACT, &call_id, &spec)
            .await?;
        info!("created human contact {}", contact.call_id);
        Ok(contact)
    }

    #[instrument(skip_all, fields(call_id = %call_id))]
    pub async fn get_human_contact(&self, call_id: &CallId) -> Result<HumanContact> {
        validate_call_id(call_id)?;
        let path = format!("/contact_requests/{}", call_id);
        self.read(&path, HUMAN_CONTACT, call_id).await
    }

    #[instrument(skip_all, fields(call_id = %call_id))]
    pub async fn escalate_human_contact(
        &self,
        call_id: &CallId,
        escalation: &Escalation,
    ) -> Result<HumanContact> {
        validate_call_id(call_id)?;
        validate_escalation(escalation)?;

        let path = format!("/contact_requests/{}/escalate/email", call_id);
        let contact: HumanContact = self
            .connection
            .post(&path, escalation, HUMAN_CONTACT, Some(call_id.as_str()))
            .await?;
        ensure_same_id(&path, call_id, &contact.call_id)?;
        info!("escalated human contact {}", call_id);
        Ok(contact)
    }

    #[instrument(skip_all, fields(call_id = %call_id))]
    pub async fn respond_to_human_contact(
        &self,
        call_id: &CallId,
        response: &HumanContactResponse,
    ) -> Result<HumanContact> {
        validate_call_id(call_id)?;
        if response.response.trim().is_empty() {
            return Err(ApprovalError::validation("response", "must not be empty"));
        }
        let path = format!("/agent/human_contacts/{}/respond", call_id);
        let contact: HumanContact = self
            .connection
            .post(&path, response, HUMAN_CONTACT, Some(call_id.as_str()))
            .await?;
        ensure_same_id(&path, call_id, &contact.call_id)?;
        Ok(contact)
    }

    #[instrument(skip(self))]
    pub async fn pending_human_contacts(&self) -> Result<Vec<HumanContact>> {
        retry_with_backoff(&self.retry, "pending_human_contacts", |_| {
            self.connection
                .get("/agent/human_contacts/pending", HUMAN_CONTACT, None)
        })
        .await
    }

    /// Poll until the human answers, returning the response text
    #[instrument(skip_all, fields(call_id = %call_id))]
    pub async fn wait_for_response(
        &self,
        call_id: &CallId,
        poll_interval: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let interval = poll_interval.unwrap_or(self.poll_interval);
        loop {
            let contact = Self::cancellable(cancel, self.get_human_contact(call_id)).await?;
            if let Some(response) = contact.response() {
                return Ok(response.to_string());
            }
            debug!("human contact {} not answered yet", call_id);
            sleep_or_cancel(interval, cancel).await?;
        }
    }

    // ------------------------------------------------------------------
    // Shared plumbing
    // ------------------------------------------------------------------

    /// GET with the configured retry policy; reads are always safe to repeat
    async fn read<T: DeserializeOwned>(&self, path: &str, resource: &str, id: &CallId) -> Result<T> {
        retry_with_backoff(&self.retry, path, |_| {
            self.connection.get(path, resource, Some(id.as_str()))
        })
        .await
    }

    /// POST a create request, so that a retry never produces a second record.
    ///
    /// The first attempt posts directly. Later attempts look the client-chosen
    /// id up first and return the stored record if the earlier attempt landed.
    async fn create_once<S, T>(
        &self,
        collection: &str,
        resource: &str,
        call_id: &CallId,
        spec: &S,
    ) -> Result<T>
    where
        S: Serialize,
        T: DeserializeOwned,
    {
        let body = CreateRequest {
            run_id: &self.run_id,
            call_id,
            spec,
        };
        let lookup_path = format!("{}/{}", collection, call_id);

        retry_with_backoff(&self.retry, collection, |attempt| {
            let body = &body;
            let lookup_path = lookup_path.as_str();
            async move {
                if attempt > 1 {
                    match self
                        .connection
                        .get::<T>(lookup_path, resource, Some(call_id.as_str()))
                        .await
                    {
                        Ok(existing) => {
                            info!("{} {} already exists, not creating again", resource, call_id);
                            return Ok(existing);
                        }
                        Err(ApprovalError::NotFound { .. }) => {
                            debug!("{} {} not stored yet, posting again", resource, call_id);
                        }
                        Err(e) => return Err(e),
                    }
                }
                self.connection.post(collection, body, resource, None).await
            }
        })
        .await
    }
}

fn ensure_same_id(endpoint: &str, expected: &CallId, actual: &CallId) -> Result<()> {
    if expected != actual {
        return Err(ApprovalError::Decode {
            endpoint: endpoint.to_string(),
            message: format!("expected call_id '{}', got '{}'", expected, actual),
        });
    }
    Ok(())
}

async fn sleep_or_cancel(interval: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ApprovalError::Cancelled),
        _ = tokio::time::sleep(interval) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ApprovalClient {
        let config = ClientConfig {
            api_base_url: "http://127.0.0.1:9".to_string(),
            api_key: Some("sk-test".to_string()),
            run_id: Some("unit-run".to_string()),
            ..Default::default()
        };
        ApprovalClient::new(&config).unwrap()
    }

    #[test]
    fn test_construction_uses_config() {
        let client = client();
        assert_eq!(client.run_id(), "unit-run");
        assert_eq!(client.poll_interval(), Duration::from_millis(3000));
        assert!(!client.retry_policy().is_enabled());
        assert!(client.contact_channel().is_none());
    }

    #[tokio::test]
    async fn test_missing_channel_fails_before_sending() {
        let spec = FunctionCallSpec::builder().fn_name("multiply").build().unwrap();
        let err = client().create_function_call(spec).await.unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
    }

    #[tokio::test]
    async fn test_cancellable_prefers_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<()> =
            ApprovalClient::cancellable(&cancel, std::future::pending()).await;
        assert!(matches!(result, Err(ApprovalError::Cancelled)));
    }

    #[test]
    fn test_ensure_same_id() {
        let a = CallId::new("call-a");
        assert!(ensure_same_id("/x", &a, &a).is_ok());
        let err = ensure_same_id("/x", &a, &CallId::new("call-b")).unwrap_err();
        assert_eq!(err.kind(), "DecodeError");
    }
}
