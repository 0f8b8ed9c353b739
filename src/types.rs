//! Core types for the a3s-bridge system
//!
//! All serialized types use camelCase JSON. Payload structs also accept the
//! agent server's `sessionID` / `messageID` spelling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a decoded remote event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Incremental assistant text
    Delta,
    /// An assistant message finished
    MessageComplete,
    /// The remote session has nothing left to do
    Idle,
    /// The remote session failed
    Error,
    /// The agent asks for permission to run something
    PermissionRequested,
    /// The agent asks the user a question
    QuestionRequested,
    /// Any other event, kept as an attribute map
    Other,
}

/// A single event received from the remote agent service
///
/// Immutable once parsed; `kind` always matches the payload variant.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub kind: EventKind,
    pub payload: EventPayload,
    pub received_at: DateTime<Utc>,
}

impl Event {
    /// Wrap a payload, stamping the receive time
    pub fn new(payload: EventPayload) -> Self {
        Self {
            kind: payload.kind(),
            payload,
            received_at: Utc::now(),
        }
    }

    /// Remote session the event belongs to, if any
    pub fn session_id(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::Delta(d) => Some(&d.session_id),
            EventPayload::MessageComplete(m) => Some(&m.session_id),
            EventPayload::Idle(i) => Some(&i.session_id),
            EventPayload::Error(e) => e.session_id.as_deref(),
            EventPayload::PermissionRequested(p) => Some(&p.session_id),
            EventPayload::QuestionRequested(q) => Some(&q.session_id),
            EventPayload::Other { attributes, .. } => attributes
                .get("sessionID")
                .or_else(|| attributes.get("sessionId"))
                .and_then(|v| v.as_str()),
        }
    }
}

/// Kind-specific event data
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", tag = "type", content = "data")]
pub enum EventPayload {
    Delta(DeltaEvent),
    MessageComplete(MessageCompleteEvent),
    Idle(IdleEvent),
    Error(ErrorEvent),
    PermissionRequested(PermissionRequest),
    QuestionRequested(QuestionRequest),
    /// Unrecognized event with its wire name and raw attributes
    Other {
        name: String,
        attributes: serde_json::Map<String, serde_json::Value>,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Delta(_) => EventKind::Delta,
            EventPayload::MessageComplete(_) => EventKind::MessageComplete,
            EventPayload::Idle(_) => EventKind::Idle,
            EventPayload::Error(_) => EventKind::Error,
            EventPayload::PermissionRequested(_) => EventKind::PermissionRequested,
            EventPayload::QuestionRequested(_) => EventKind::QuestionRequested,
            EventPayload::Other { .. } => EventKind::Other,
        }
    }
}

/// Incremental text appended to an assistant message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaEvent {
    #[serde(alias = "sessionID")]
    pub session_id: String,
    #[serde(alias = "messageID")]
    pub message_id: String,
    pub delta: String,
}

/// An assistant message finished
///
/// `text` is the authoritative full text when the server provides it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageCompleteEvent {
    #[serde(alias = "sessionID")]
    pub session_id: String,
    #[serde(alias = "messageID")]
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// The remote session went idle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdleEvent {
    #[serde(alias = "sessionID")]
    pub session_id: String,
}

/// The remote session reported a failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    #[serde(default, alias = "sessionID", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub message: String,
}

/// Permission request raised by the agent before running a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    #[serde(alias = "sessionID")]
    pub session_id: String,
    #[serde(alias = "id", alias = "requestID")]
    pub request_id: String,
    /// What is being asked for (tool or permission name)
    #[serde(default, alias = "title")]
    pub permission: String,
    /// Paths or command patterns the permission applies to
    #[serde(default)]
    pub patterns: Vec<String>,
}

/// One or more questions the agent wants answered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionRequest {
    #[serde(alias = "sessionID")]
    pub session_id: String,
    #[serde(alias = "id", alias = "requestID")]
    pub request_id: String,
    pub questions: Vec<Question>,
}

/// A single question with its choices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    #[serde(default)]
    pub header: String,
    pub question: String,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    /// Whether several options may be selected
    #[serde(default)]
    pub multiple: bool,
    /// Whether a free-text answer is accepted
    #[serde(default = "default_custom")]
    pub custom: bool,
}

fn default_custom() -> bool {
    true
}

/// A selectable answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionOption {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Status of a conversation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    #[default]
    Idle,
    Busy,
    Error,
}

/// Snapshot of one conversation's state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    pub id: String,
    pub status: ConversationStatus,
    pub last_activity: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: ConversationStatus::Idle,
            last_activity: Utc::now(),
        }
    }
}

/// A selectable option attached to an outbound message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyOption {
    /// Text shown to the user
    pub label: String,
    /// Compact payload returned when the option is chosen
    pub data: String,
}

impl ReplyOption {
    pub fn new(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            data: data.into(),
        }
    }
}

/// Reply to a permission request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionReply {
    Once,
    Always,
    Reject,
}

impl PermissionReply {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionReply::Once => "once",
            PermissionReply::Always => "always",
            PermissionReply::Reject => "reject",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "once" => Some(PermissionReply::Once),
            "always" => Some(PermissionReply::Always),
            "reject" => Some(PermissionReply::Reject),
            _ => None,
        }
    }
}

/// Answer sent back to the agent for an interactive request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum InteractionAnswer {
    Permission { reply: PermissionReply },
    /// Selected labels per question, in question order
    Question { answers: Vec<Vec<String>> },
    /// The user declined to answer
    Dismiss,
}
