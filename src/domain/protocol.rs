//! G2P Connect envelopes exchanged with the ID mapper authority.
//!
//! Outbound requests and inbound callbacks share the `signature`/`header`/
//! `message` layout; the per-record array is named after the action
//! (`resolve_request`, `link_response`, ...).

use super::mapping::{Action, StatusEnum};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;

/// Placeholder signature sent while message signing is not configured.
pub const UNSIGNED_SIGNATURE: &str = "Signature:  namespace=\"g2p\", \
    kidId=\"{sender_id}|{unique_key_id}|{algorithm}\", \
    algorithm=\"ed25519\", created=\"1606970629\", \
    expires=\"1607030629\", \
    headers=\"(created) (expires) digest\", \
    signature=\"Base64(signing content)";

pub const PROTOCOL_VERSION: &str = "1.0.0";
pub const DEFAULT_LOCALE: &str = "eng";

/// Error code returned in a NACK for a callback naming an unknown transaction.
pub const TRANSACTION_ID_INVALID: &str = "transaction.id.invalid";

/// Wire timestamps. Peers may send RFC 3339 or a naive ISO 8601 value,
/// which is read as UTC.
mod wire_timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        ts.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(ts.with_timezone(&Utc));
        }
        raw.parse::<NaiveDateTime>()
            .map(|naive| naive.and_utc())
            .map_err(|e| serde::de::Error::custom(format!("invalid timestamp {raw:?}: {e}")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<H, M> {
    pub signature: String,
    pub header: H,
    pub message: M,
}

pub type RequestEnvelope = Envelope<MsgHeader, RequestMessage>;
pub type CallbackEnvelope = Envelope<MsgCallbackHeader, CallbackMessage>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MsgHeader {
    pub version: String,
    pub message_id: String,
    #[serde(with = "wire_timestamp")]
    pub message_ts: DateTime<Utc>,
    pub action: Action,
    pub sender_id: String,
    #[serde(default)]
    pub sender_uri: String,
    #[serde(default)]
    pub receiver_id: String,
    pub total_count: usize,
    #[serde(default)]
    pub is_encrypted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MsgCallbackHeader {
    #[serde(default = "default_version")]
    pub version: String,
    pub message_id: String,
    #[serde(with = "wire_timestamp")]
    pub message_ts: DateTime<Utc>,
    pub action: String,
    #[serde(default)]
    pub status: Option<StatusEnum>,
    #[serde(default)]
    pub status_reason_code: Option<String>,
    #[serde(default)]
    pub status_reason_message: Option<String>,
    #[serde(default = "unknown_count")]
    pub total_count: i64,
    #[serde(default = "unknown_count")]
    pub completed_count: i64,
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub receiver_id: Option<String>,
    #[serde(default)]
    pub is_encrypted: bool,
}

fn default_version() -> String {
    PROTOCOL_VERSION.to_string()
}

fn unknown_count() -> i64 {
    -1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveScope {
    YesNo,
    Details,
}

/// One record of an outbound request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestLine {
    pub reference_id: String,
    #[serde(with = "wire_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fa: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<ResolveScope>,
    pub locale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RequestLines {
    #[serde(rename = "resolve_request")]
    Resolve(Vec<RequestLine>),
    #[serde(rename = "link_request")]
    Link(Vec<RequestLine>),
    #[serde(rename = "update_request")]
    Update(Vec<RequestLine>),
}

impl RequestLines {
    pub fn new(action: Action, lines: Vec<RequestLine>) -> Self {
        match action {
            Action::Resolve => RequestLines::Resolve(lines),
            Action::Link => RequestLines::Link(lines),
            Action::Update => RequestLines::Update(lines),
        }
    }

    pub fn lines(&self) -> &[RequestLine] {
        match self {
            RequestLines::Resolve(lines) | RequestLines::Link(lines) | RequestLines::Update(lines) => {
                lines
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestMessage {
    pub transaction_id: String,
    #[serde(flatten)]
    pub lines: RequestLines,
}

/// One per-reference outcome delivered by a callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackLine {
    pub reference_id: String,
    #[serde(with = "wire_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub status: StatusEnum,
    #[serde(default, deserialize_with = "non_empty")]
    pub status_reason_code: Option<String>,
    #[serde(default)]
    pub status_reason_message: Option<String>,
    #[serde(default, deserialize_with = "non_empty")]
    pub fa: Option<String>,
    #[serde(default, deserialize_with = "non_empty")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CallbackLines {
    #[serde(rename = "resolve_response")]
    Resolve(Vec<CallbackLine>),
    #[serde(rename = "link_response")]
    Link(Vec<CallbackLine>),
    #[serde(rename = "update_response")]
    Update(Vec<CallbackLine>),
}

impl CallbackLines {
    pub fn action(&self) -> Action {
        match self {
            CallbackLines::Resolve(_) => Action::Resolve,
            CallbackLines::Link(_) => Action::Link,
            CallbackLines::Update(_) => Action::Update,
        }
    }

    pub fn lines(&self) -> &[CallbackLine] {
        match self {
            CallbackLines::Resolve(lines)
            | CallbackLines::Link(lines)
            | CallbackLines::Update(lines) => lines,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackMessage {
    pub transaction_id: String,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(flatten)]
    pub results: CallbackLines,
}

/// Empty strings on the wire mean "not provided".
fn non_empty<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ack {
    #[serde(rename = "ACK")]
    Ack,
    #[serde(rename = "NACK")]
    Nack,
    #[serde(rename = "ERR")]
    Err,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckMessage {
    pub ack_status: Ack,
    #[serde(with = "wire_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub error: Option<ErrorBody>,
    #[serde(default)]
    pub correlation_id: String,
}

/// Synchronous reply to a request or a callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckResponse {
    pub message: AckMessage,
}

impl AckResponse {
    pub fn ack() -> Self {
        Self::with_status(Ack::Ack, None)
    }

    pub fn nack(code: &str, message: &str) -> Self {
        Self::with_status(
            Ack::Nack,
            Some(ErrorBody {
                code: code.to_string(),
                message: message.to_string(),
            }),
        )
    }

    pub fn err(code: &str, message: &str) -> Self {
        Self::with_status(
            Ack::Err,
            Some(ErrorBody {
                code: code.to_string(),
                message: message.to_string(),
            }),
        )
    }

    fn with_status(ack_status: Ack, error: Option<ErrorBody>) -> Self {
        Self {
            message: AckMessage {
                ack_status,
                timestamp: Utc::now(),
                error,
                correlation_id: uuid::Uuid::new_v4().to_string(),
            },
        }
    }

    pub fn is_ack(&self) -> bool {
        self.message.ack_status == Ack::Ack
    }
}

/// Reason codes the authority attaches to resolve outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveReasonCode {
    ReferenceIdInvalid,
    ReferenceIdDuplicate,
    TimestampInvalid,
    IdInvalid,
    FaInvalid,
    ResolveTypeNotSupported,
    FaActive,
    FaInactive,
    FaNotFound,
    FaNotLinkedToId,
    IdActive,
    IdInactive,
    IdNotFound,
}

impl ResolveReasonCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ResolveReasonCode::ReferenceIdInvalid => "rjct.reference_id.invalid",
            ResolveReasonCode::ReferenceIdDuplicate => "rjct.reference_id.duplicate",
            ResolveReasonCode::TimestampInvalid => "rjct.timestamp.invalid",
            ResolveReasonCode::IdInvalid => "rjct.id.invalid",
            ResolveReasonCode::FaInvalid => "rjct.fa.invalid",
            ResolveReasonCode::ResolveTypeNotSupported => "rjct.resolve_type.not_supported",
            ResolveReasonCode::FaActive => "succ.fa.active",
            ResolveReasonCode::FaInactive => "succ.fa.inactive",
            ResolveReasonCode::FaNotFound => "succ.fa.not_found",
            ResolveReasonCode::FaNotLinkedToId => "succ.fa.not_linked_to_id",
            ResolveReasonCode::IdActive => "succ.id.active",
            ResolveReasonCode::IdInactive => "succ.id.inactive",
            ResolveReasonCode::IdNotFound => "succ.id.not_found",
        }
    }

    /// True when the lookup itself succeeded but found no usable mapping.
    pub fn is_not_found(self) -> bool {
        matches!(
            self,
            ResolveReasonCode::FaNotFound
                | ResolveReasonCode::FaNotLinkedToId
                | ResolveReasonCode::IdNotFound
        )
    }
}

impl FromStr for ResolveReasonCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const ALL: [ResolveReasonCode; 13] = [
            ResolveReasonCode::ReferenceIdInvalid,
            ResolveReasonCode::ReferenceIdDuplicate,
            ResolveReasonCode::TimestampInvalid,
            ResolveReasonCode::IdInvalid,
            ResolveReasonCode::FaInvalid,
            ResolveReasonCode::ResolveTypeNotSupported,
            ResolveReasonCode::FaActive,
            ResolveReasonCode::FaInactive,
            ResolveReasonCode::FaNotFound,
            ResolveReasonCode::FaNotLinkedToId,
            ResolveReasonCode::IdActive,
            ResolveReasonCode::IdInactive,
            ResolveReasonCode::IdNotFound,
        ];
        ALL.into_iter()
            .find(|code| code.as_str() == s)
            .ok_or_else(|| format!("unknown resolve reason code: {s}"))
    }
}
