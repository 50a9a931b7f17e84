use crate::config::AuthorityConfig;
use crate::domain::mapping::{Action, MappingValue, ReferenceStatus, StatusEnum, TransactionStatus};
use crate::domain::protocol::{
    DEFAULT_LOCALE, Envelope, MsgHeader, PROTOCOL_VERSION, RequestEnvelope, RequestLine,
    RequestLines, RequestMessage, ResolveScope, UNSIGNED_SIGNATURE,
};
use chrono::Utc;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Builds the request envelope for `mappings` and the transaction record
/// tracking it.
///
/// Every mapping gets a fresh reference id and starts `received`. An empty
/// batch yields no envelope and a record that is already `success`, so the
/// caller skips the network entirely. Nothing is persisted here.
pub fn build_request(
    action: Action,
    mappings: &[MappingValue],
    completion_callback_ref: Option<String>,
    txn_id: Option<String>,
    authority: &AuthorityConfig,
) -> (Option<RequestEnvelope>, TransactionStatus) {
    let txn_id = txn_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let timestamp = Utc::now();

    let mut refs = BTreeMap::new();
    let mut lines = Vec::with_capacity(mappings.len());
    for mapping in mappings {
        let reference_id = Uuid::new_v4().to_string();
        lines.push(RequestLine {
            reference_id: reference_id.clone(),
            timestamp,
            id: mapping.id.clone(),
            fa: mapping.fa.clone(),
            scope: (action == Action::Resolve).then_some(ResolveScope::Details),
            locale: DEFAULT_LOCALE.to_string(),
        });
        refs.insert(
            reference_id.clone(),
            ReferenceStatus::received(reference_id, mapping),
        );
    }

    let mut status = TransactionStatus {
        txn_id: txn_id.clone(),
        status: StatusEnum::Received,
        refs,
        completion_callback_ref,
        saga: None,
    };

    if mappings.is_empty() {
        status.status = StatusEnum::Success;
        return (None, status);
    }

    let envelope = Envelope {
        signature: UNSIGNED_SIGNATURE.to_string(),
        header: MsgHeader {
            version: PROTOCOL_VERSION.to_string(),
            message_id: Uuid::new_v4().to_string(),
            message_ts: timestamp,
            action,
            sender_id: authority.sender_id.clone(),
            sender_uri: authority.sender_uri(action).to_string(),
            receiver_id: String::new(),
            total_count: mappings.len(),
            is_encrypted: false,
        },
        message: RequestMessage {
            transaction_id: txn_id,
            lines: RequestLines::new(action, lines),
        },
    };

    (Some(envelope), status)
}
