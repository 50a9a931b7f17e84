use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One subject to be resolved, linked or updated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingValue {
    pub id: Option<String>,
    pub fa: Option<String>,
}

impl MappingValue {
    pub fn new(id: impl Into<String>, fa: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            fa: Some(fa.into()),
        }
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            fa: None,
        }
    }
}

/// Request status as it travels on the wire (`rcvd`, `pdng`, `succ`, `rjct`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StatusEnum {
    #[default]
    #[serde(rename = "rcvd")]
    Received,
    #[serde(rename = "pdng")]
    Pending,
    #[serde(rename = "succ")]
    Success,
    #[serde(rename = "rjct")]
    Rejected,
}

impl StatusEnum {
    pub fn is_terminal(self) -> bool {
        matches!(self, StatusEnum::Success | StatusEnum::Rejected)
    }
}

/// The three operations the ID mapper authority accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Resolve,
    Link,
    Update,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Resolve => "resolve",
            Action::Link => "link",
            Action::Update => "update",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Store namespace a transaction record lives under.
///
/// Each action has its own namespace; `Combined` holds the merged record of an
/// update-or-link saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    Resolve,
    Link,
    Update,
    Combined,
}

impl Namespace {
    pub fn as_str(self) -> &'static str {
        match self {
            Namespace::Resolve => "resolve",
            Namespace::Link => "link",
            Namespace::Update => "update",
            Namespace::Combined => "update-or-link",
        }
    }

    pub fn error_code(self) -> &'static str {
        match self {
            Namespace::Resolve => "G2P-MAP-101",
            Namespace::Link => "G2P-MAP-102",
            Namespace::Update => "G2P-MAP-103",
            Namespace::Combined => "G2P-MAP-104",
        }
    }
}

impl From<Action> for Namespace {
    fn from(action: Action) -> Self {
        match action {
            Action::Resolve => Namespace::Resolve,
            Action::Link => Namespace::Link,
            Action::Update => Namespace::Update,
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceStatus {
    pub reference_id: String,
    pub id: Option<String>,
    pub fa: Option<String>,
    pub status: StatusEnum,
    #[serde(default)]
    pub status_reason_code: Option<String>,
}

impl ReferenceStatus {
    pub fn received(reference_id: String, mapping: &MappingValue) -> Self {
        Self {
            reference_id,
            id: mapping.id.clone(),
            fa: mapping.fa.clone(),
            status: StatusEnum::Received,
            status_reason_code: None,
        }
    }
}

/// Progress of the update-or-link saga, persisted on the combined record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaProgress {
    pub stage: SagaStage,
    /// Caller mappings keyed by the resolve reference id they were sent under.
    pub requested: BTreeMap<String, MappingValue>,
    /// Reference ids of the link sub-transaction.
    #[serde(default)]
    pub link_refs: Vec<String>,
    /// Reference ids of the update sub-transaction.
    #[serde(default)]
    pub update_refs: Vec<String>,
    #[serde(default)]
    pub link_settled: bool,
    #[serde(default)]
    pub update_settled: bool,
    #[serde(default)]
    pub notified: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStage {
    Resolve,
    LinkOrUpdate,
    Completed,
}

/// State of one batch request/callback cycle.
///
/// `completion_callback_ref` names a handler in the completion registry; the
/// record crosses the store boundary so it never carries the handler itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionStatus {
    pub txn_id: String,
    pub status: StatusEnum,
    pub refs: BTreeMap<String, ReferenceStatus>,
    #[serde(default)]
    pub completion_callback_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saga: Option<SagaProgress>,
}

impl TransactionStatus {
    /// Moves the aggregate and every reference to `status` in one step.
    pub fn change_all_status(&mut self, status: StatusEnum) {
        self.status = status;
        for reference in self.refs.values_mut() {
            reference.status = status;
        }
    }

    /// Re-derives the aggregate from the reference statuses.
    pub fn recompute_status(&mut self) {
        self.status = aggregate_status(self.refs.values().map(|r| r.status));
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Counting rule for the aggregate status of a transaction.
///
/// No success and nothing pending is a rejection; nothing pending otherwise is
/// a success, even when some references were rejected. Anything still pending
/// keeps the aggregate non-terminal.
pub fn aggregate_status<I>(statuses: I) -> StatusEnum
where
    I: IntoIterator<Item = StatusEnum>,
{
    let mut success_count = 0usize;
    let mut pending_count = 0usize;
    for status in statuses {
        match status {
            StatusEnum::Success => success_count += 1,
            StatusEnum::Rejected => {}
            StatusEnum::Received | StatusEnum::Pending => pending_count += 1,
        }
    }

    if success_count == 0 && pending_count == 0 {
        StatusEnum::Rejected
    } else if pending_count == 0 {
        StatusEnum::Success
    } else {
        StatusEnum::Pending
    }
}
