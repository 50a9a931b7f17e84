use super::mapper::IdMapper;
use crate::domain::mapping::{Namespace, TransactionStatus};
use crate::error::{MapperError, Result};
use std::time::Duration;
use tracing::debug;

impl IdMapper {
    /// Polls the stored record until it is `success` or `rejected`.
    ///
    /// Reads the store at most `max_retries` times, sleeping `poll_interval`
    /// between reads, then gives up with
    /// [`MapperError::MaxRetriesExhausted`]. A transaction that was never
    /// stored fails immediately.
    pub async fn wait_for_terminal(
        &self,
        namespace: Namespace,
        txn_id: &str,
        poll_interval: Duration,
        max_retries: u32,
    ) -> Result<TransactionStatus> {
        for attempt in 1..=max_retries {
            let status = self.status(namespace, txn_id).await?.ok_or_else(|| {
                MapperError::UnknownTransaction {
                    namespace,
                    txn_id: txn_id.to_string(),
                }
            })?;
            if status.is_terminal() {
                return Ok(status);
            }

            debug!(%txn_id, %namespace, attempt, max_retries, "Transaction not terminal yet");
            if attempt < max_retries && !poll_interval.is_zero() {
                tokio::time::sleep(poll_interval).await;
            }
        }

        Err(MapperError::MaxRetriesExhausted {
            namespace,
            attempts: max_retries,
        })
    }
}
