//! Wire data model for the approval service
//!
//! These types mirror the JSON the remote service accepts and returns. Field
//! names follow the wire format; optional fields are omitted when serializing
//! so requests stay minimal.

use chrono::{DateTime, Utc};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use strum_macros::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Generate a prefixed opaque identifier, e.g. `call-3f9a2b1c`
pub fn genid(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &suffix[..8])
}

/// Identifier of a function call or human contact.
///
/// Assigned once at creation and never changed afterwards; the type offers no
/// way to mutate it in place.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh client-side id with the given prefix
    pub fn generate(prefix: &str) -> Self {
        Self(genid(prefix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CallId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CallId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for CallId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Contact channels
// ============================================================================

/// Which header an additional email recipient is placed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RecipientField {
    To,
    Cc,
    Bcc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailRecipient {
    pub address: String,
    pub field: RecipientField,
}

impl EmailRecipient {
    pub fn to(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            field: RecipientField::To,
        }
    }

    pub fn cc(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            field: RecipientField::Cc,
        }
    }
}

/// Email delivery target
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailContactChannel {
    pub address: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_about_user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_recipients: Option<Vec<EmailRecipient>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experimental_subject_line: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experimental_in_reply_to_message_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experimental_references_message_id: Option<String>,
}

/// Slack delivery target
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlackContactChannel {
    pub channel_or_user_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_about_channel_or_user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_responder_ids: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experimental_slack_blocks: Option<bool>,
}

/// Where the human gets notified. Exactly one target should be set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactChannel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<EmailContactChannel>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack: Option<SlackContactChannel>,
}

impl ContactChannel {
    pub fn email(address: impl Into<String>) -> Self {
        Self {
            email: Some(EmailContactChannel {
                address: address.into(),
                ..Default::default()
            }),
            slack: None,
        }
    }

    pub fn slack(channel_or_user_id: impl Into<String>) -> Self {
        Self {
            email: None,
            slack: Some(SlackContactChannel {
                channel_or_user_id: channel_or_user_id.into(),
                ..Default::default()
            }),
        }
    }

    /// Number of configured delivery targets
    pub fn target_count(&self) -> usize {
        usize::from(self.email.is_some()) + usize::from(self.slack.is_some())
    }

    /// Short human-readable target, as shown when reviewing a call
    pub fn describe(&self) -> String {
        match (&self.email, &self.slack) {
            (Some(email), _) => format!("email:{}", email.address),
            (None, Some(slack)) => slack
                .context_about_channel_or_user
                .clone()
                .unwrap_or_else(|| format!("slack:{}", slack.channel_or_user_id)),
            (None, None) => "no channel".to_string(),
        }
    }
}

/// A selectable answer offered to the human
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseOption {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_fill: Option<String>,

    #[serde(default)]
    pub interactive: bool,
}

/// Returns the first option name that appears more than once
pub fn duplicate_option_name(options: &[ResponseOption]) -> Option<&str> {
    let mut seen = HashSet::new();
    options
        .iter()
        .find(|opt| !seen.insert(opt.name.as_str()))
        .map(|opt| opt.name.as_str())
}

// ============================================================================
// Function calls
// ============================================================================

/// What the agent wants to run, and who should approve it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[builder(setter(into))]
pub struct FunctionCallSpec {
    #[serde(rename = "fn")]
    pub fn_name: String,

    #[serde(default)]
    #[builder(default)]
    pub kwargs: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(default, setter(into, strip_option))]
    pub channel: Option<ContactChannel>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(default, setter(into, strip_option))]
    pub reject_options: Option<Vec<ResponseOption>>,

    /// Opaque caller state echoed back by the service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(default, setter(into, strip_option))]
    pub state: Option<Value>,
}

impl FunctionCallSpec {
    pub fn builder() -> FunctionCallSpecBuilder {
        FunctionCallSpecBuilder::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responded_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject_option_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_escalated_at: Option<DateTime<Utc>>,
}

/// Lifecycle state of a function call, derived from its status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CallState {
    Pending,
    Approved,
    Rejected,
    Escalated,
}

impl CallState {
    pub fn is_decided(self) -> bool {
        matches!(self, CallState::Approved | CallState::Rejected)
    }
}

/// A remote-tracked request for human approval of a function invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub run_id: String,
    pub call_id: CallId,
    pub spec: FunctionCallSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<FunctionCallStatus>,
}

impl FunctionCall {
    pub fn state(&self) -> CallState {
        match &self.status {
            Some(FunctionCallStatus {
                approved: Some(true),
                ..
            }) => CallState::Approved,
            Some(FunctionCallStatus {
                approved: Some(false),
                ..
            }) => CallState::Rejected,
            Some(FunctionCallStatus {
                last_escalated_at: Some(_),
                ..
            }) => CallState::Escalated,
            _ => CallState::Pending,
        }
    }

    /// Terminal decision, if the human has responded
    pub fn decision(&self) -> Option<Decision> {
        let status = self.status.as_ref()?;
        let approved = status.approved?;
        Some(Decision {
            approved,
            comment: status.comment.clone(),
            reject_option_name: status.reject_option_name.clone(),
            responded_at: status.responded_at,
        })
    }

    pub fn decision_status(&self) -> DecisionStatus {
        match self.decision() {
            Some(decision) => DecisionStatus::Decided(decision),
            None => DecisionStatus::Pending {
                escalated: self.state() == CallState::Escalated,
            },
        }
    }
}

/// Terminal human response to a function call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub approved: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject_option_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responded_at: Option<DateTime<Utc>>,
}

impl Decision {
    pub fn approve(comment: Option<String>) -> Self {
        Self {
            approved: true,
            comment,
            reject_option_name: None,
            responded_at: Some(Utc::now()),
        }
    }

    pub fn deny(comment: impl Into<String>) -> Self {
        Self {
            approved: false,
            comment: Some(comment.into()),
            reject_option_name: None,
            responded_at: Some(Utc::now()),
        }
    }
}

/// Result of a single decision poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DecisionStatus {
    Pending { escalated: bool },
    Decided(Decision),
}

impl DecisionStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, DecisionStatus::Pending { .. })
    }
}

/// Body of an operator response to a function call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallResponse {
    pub approved: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject_option_name: Option<String>,
}

// ============================================================================
// Escalation
// ============================================================================

/// Extends the notification fan-out of a still-pending request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[builder(setter(into))]
pub struct Escalation {
    pub escalation_msg: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(default, setter(into, strip_option))]
    pub additional_recipients: Option<Vec<EmailRecipient>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(default, setter(into, strip_option))]
    pub channel: Option<ContactChannel>,
}

impl Escalation {
    pub fn builder() -> EscalationBuilder {
        EscalationBuilder::default()
    }

    pub fn with_recipients(msg: impl Into<String>, recipients: Vec<EmailRecipient>) -> Self {
        Self {
            escalation_msg: msg.into(),
            additional_recipients: Some(recipients),
            channel: None,
        }
    }
}

// ============================================================================
// Human contacts
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanContactSpec {
    pub msg: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<ContactChannel>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_options: Option<Vec<ResponseOption>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
}

impl HumanContactSpec {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            msg: msg.into(),
            subject: None,
            channel: None,
            response_options: None,
            state: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HumanContactStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responded_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_option_name: Option<String>,
}

/// A free-form question put to a human
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanContact {
    pub run_id: String,
    pub call_id: CallId,
    pub spec: HumanContactSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<HumanContactStatus>,
}

impl HumanContact {
    pub fn response(&self) -> Option<&str> {
        self.status.as_ref()?.response.as_deref()
    }
}

/// Body of an operator answer to a human contact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanContactResponse {
    pub response: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_option_name: Option<String>,
}

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventType {
    NewApproval,
    ApprovalResolved,
    SessionStatusChanged,
    Heartbeat,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,
}

/// A server-pushed notification from the event stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(default)]
    pub data: EventData,
}
