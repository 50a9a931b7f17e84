use crate::domain::mapping::{Action, StatusEnum, TransactionStatus};
use crate::domain::ports::AuthorityClient;
use crate::domain::protocol::RequestEnvelope;
use crate::error::DispatchError;
use tracing::{error, info, warn};

/// What the synchronous leg of a request told us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The authority took the batch; outcomes arrive by callback.
    Accepted,
    /// NACK or failure: every reference is rejected, no callback expected.
    Rejected,
    /// Read timeout: the authority may still process the batch, so the
    /// record is left as it was.
    TimedOut,
}

impl DispatchOutcome {
    /// Status every still-`received` reference moves to, if any.
    pub fn reference_status(self) -> Option<StatusEnum> {
        match self {
            DispatchOutcome::Accepted => Some(StatusEnum::Pending),
            DispatchOutcome::Rejected => Some(StatusEnum::Rejected),
            DispatchOutcome::TimedOut => None,
        }
    }
}

/// Posts `envelope` to the authority and applies the synchronous reply to
/// `status`.
///
/// Only ever touches the one record it is handed; the caller persists it.
pub async fn dispatch(
    client: &dyn AuthorityClient,
    action: Action,
    envelope: &RequestEnvelope,
    status: &mut TransactionStatus,
) -> DispatchOutcome {
    let outcome = match client.post(action, envelope).await {
        Ok(reply) if reply.is_ack() => {
            info!(txn_id = %status.txn_id, %action, refs = status.refs.len(), "Request accepted by ID mapper");
            DispatchOutcome::Accepted
        }
        Ok(reply) => {
            error!(
                txn_id = %status.txn_id,
                %action,
                ack_status = ?reply.message.ack_status,
                error = ?reply.message.error,
                "Encountered negative ACK from ID mapper"
            );
            DispatchOutcome::Rejected
        }
        Err(DispatchError::ReadTimeout) => {
            warn!(
                txn_id = %status.txn_id,
                %action,
                alert = "transaction_outcome_unknown",
                "Timed out waiting for ID mapper; transaction left non-terminal"
            );
            DispatchOutcome::TimedOut
        }
        Err(e) => {
            error!(txn_id = %status.txn_id, %action, error = %e, "Encountered error during ID mapper request");
            DispatchOutcome::Rejected
        }
    };

    if let Some(next) = outcome.reference_status() {
        status.change_all_status(next);
    }
    outcome
}
