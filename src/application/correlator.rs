use super::mapper::IdMapper;
use crate::domain::mapping::{Action, StatusEnum, TransactionStatus};
use crate::domain::ports::TransactionStoreExt;
use crate::domain::protocol::{AckResponse, CallbackEnvelope, TRANSACTION_ID_INVALID};
use crate::error::Result;
use std::sync::Arc;
use tracing::{error, info, warn};

impl IdMapper {
    /// Folds an authority callback into the stored transaction record.
    ///
    /// Unknown transactions get a NACK and leave the store untouched. Unknown
    /// reference ids are logged and skipped. Updates to one record are
    /// serialized on its store key.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::MapperError::CompletionNotRegistered`] when the
    /// record became terminal but names a handler nobody registered. The
    /// record is persisted before the error is raised.
    pub async fn on_callback(
        self: &Arc<Self>,
        action: Action,
        envelope: &CallbackEnvelope,
    ) -> Result<AckResponse> {
        let txn_id = envelope.message.transaction_id.as_str();
        let key = self.key(action.into(), txn_id);

        let guard = self.locks.lock(&key).await;
        if !self.store.exists(&key).await? {
            error!(%txn_id, %action, "Callback for unknown transaction id");
            return Ok(AckResponse::nack(TRANSACTION_ID_INVALID, "Unknown transaction id."));
        }
        let Some(mut status) = self.store.load_status(&key).await? else {
            error!(%txn_id, %action, "Transaction record vanished before it could be read");
            return Ok(AckResponse::nack(TRANSACTION_ID_INVALID, "Unknown transaction id."));
        };

        if envelope.message.results.action() != action {
            warn!(
                %txn_id,
                %action,
                received = %envelope.message.results.action(),
                "Callback results do not match the endpoint action"
            );
        }

        apply_callback(&mut status, envelope);
        self.store.save_status(&key, &status).await?;
        drop(guard);

        info!(
            %txn_id,
            %action,
            status = ?status.status,
            results = envelope.message.results.lines().len(),
            "Callback applied"
        );

        self.notify(&status)?;
        Ok(AckResponse::ack())
    }
}

/// Merges callback outcomes into `status` and settles the aggregate.
///
/// The header status wins when it carries anything but the default
/// `received`; otherwise the aggregate is recounted from the references.
pub(crate) fn apply_callback(status: &mut TransactionStatus, envelope: &CallbackEnvelope) {
    let header_status = envelope
        .header
        .status
        .filter(|s| *s != StatusEnum::Received);
    if let Some(header_status) = header_status {
        status.status = header_status;
    }

    for line in envelope.message.results.lines() {
        let Some(reference) = status.refs.get_mut(&line.reference_id) else {
            warn!(
                txn_id = %status.txn_id,
                reference_id = %line.reference_id,
                "Callback names an unknown reference id, skipping"
            );
            continue;
        };

        reference.status = line.status;
        reference.status_reason_code = line.status_reason_code.clone();
        if let Some(code) = &line.status_reason_code {
            error!(
                txn_id = %status.txn_id,
                reference_id = %line.reference_id,
                code = %code,
                reason = line.status_reason_message.as_deref().unwrap_or_default(),
                "Error received on callback"
            );
            continue;
        }
        if let Some(fa) = &line.fa {
            reference.fa = Some(fa.clone());
        }
        if let Some(id) = &line.id {
            reference.id = Some(id.clone());
        }
    }

    if header_status.is_none() {
        status.recompute_status();
    }
}
