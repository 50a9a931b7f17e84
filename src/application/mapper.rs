use super::builder::build_request;
use super::dispatcher::{DispatchOutcome, dispatch};
use super::locks::KeyedLocks;
use super::registry::CompletionRegistry;
use crate::config::MapperConfig;
use crate::domain::mapping::{Action, MappingValue, Namespace, StatusEnum, TransactionStatus};
use crate::domain::ports::{AuthorityClientBox, TransactionStoreBox, TransactionStoreExt};
use crate::domain::protocol::RequestEnvelope;
use crate::error::{MapperError, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// The gateway between callers and the ID mapper authority.
///
/// `IdMapper` owns the store, the authority client and the completion
/// registry. It is built once at startup and shared behind an `Arc`; request
/// submission, callback correlation, waiting and the update-or-link saga all
/// go through it.
pub struct IdMapper {
    pub(crate) store: TransactionStoreBox,
    pub(crate) client: AuthorityClientBox,
    pub(crate) registry: CompletionRegistry,
    pub(crate) config: MapperConfig,
    pub(crate) locks: KeyedLocks,
}

impl IdMapper {
    /// Creates a new `IdMapper`.
    ///
    /// # Arguments
    ///
    /// * `store` - Durable store for transaction records.
    /// * `client` - Outbound client for the authority.
    /// * `registry` - Completion handlers, resolved by name.
    /// * `config` - Sender identity and key prefixes.
    pub fn new(
        store: TransactionStoreBox,
        client: AuthorityClientBox,
        registry: CompletionRegistry,
        config: MapperConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            client,
            registry,
            config,
            locks: KeyedLocks::new(),
        })
    }

    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    pub(crate) fn key(&self, namespace: Namespace, txn_id: &str) -> String {
        self.config.prefixes.key(namespace, txn_id)
    }

    /// Reads the stored record of a transaction.
    pub async fn status(&self, namespace: Namespace, txn_id: &str) -> Result<Option<TransactionStatus>> {
        self.store.load_status(&self.key(namespace, txn_id)).await
    }

    /// Submits `mappings` for `action` and returns the record as it stands
    /// once the synchronous leg is over.
    ///
    /// The record is persisted before the request leaves, so a callback that
    /// races the acknowledgement always finds it. If the record is already
    /// terminal (empty batch, NACK) the completion handler fires right away.
    pub async fn submit(
        self: &Arc<Self>,
        action: Action,
        mappings: &[MappingValue],
        completion_callback_ref: Option<String>,
        txn_id: Option<String>,
    ) -> Result<TransactionStatus> {
        let (envelope, status) = build_request(
            action,
            mappings,
            completion_callback_ref,
            txn_id,
            &self.config.authority,
        );
        self.launch(action, envelope, status).await
    }

    /// Submits and then polls until the transaction is terminal.
    pub async fn request_and_wait(
        self: &Arc<Self>,
        action: Action,
        mappings: &[MappingValue],
        txn_id: Option<String>,
        poll_interval: Duration,
        max_retries: u32,
    ) -> Result<TransactionStatus> {
        let status = self.submit(action, mappings, None, txn_id).await?;
        if status.is_terminal() {
            return Ok(status);
        }
        self.wait_for_terminal(action.into(), &status.txn_id, poll_interval, max_retries)
            .await
    }

    /// Persists a freshly built record, dispatches its envelope and merges the
    /// outcome back into the stored record.
    pub(crate) async fn launch(
        self: &Arc<Self>,
        action: Action,
        envelope: Option<RequestEnvelope>,
        status: TransactionStatus,
    ) -> Result<TransactionStatus> {
        let key = self.key(action.into(), &status.txn_id);
        self.store.save_status(&key, &status).await?;

        let Some(envelope) = envelope else {
            debug!(txn_id = %status.txn_id, %action, "Empty batch, nothing to dispatch");
            self.notify(&status)?;
            return Ok(status);
        };

        let mut dispatched = status.clone();
        let outcome = dispatch(self.client.as_ref(), action, &envelope, &mut dispatched).await;
        if outcome == DispatchOutcome::TimedOut {
            // A callback may have landed while we waited
            let current = self.store.load_status(&key).await?.unwrap_or(status);
            return Ok(current);
        }

        let (merged, settled_here) = {
            let _guard = self.locks.lock(&key).await;
            let mut stored = self.store.load_status(&key).await?.unwrap_or(status);
            // A callback that beat the ack already notified
            let was_terminal = stored.is_terminal();
            merge_dispatch_outcome(&mut stored, outcome);
            self.store.save_status(&key, &stored).await?;
            let settled_here = !was_terminal && stored.is_terminal();
            (stored, settled_here)
        };

        if settled_here {
            self.notify(&merged)?;
        }
        Ok(merged)
    }

    /// Fires the record's completion handler in the background if the record
    /// is terminal.
    pub(crate) fn notify(self: &Arc<Self>, status: &TransactionStatus) -> Result<()> {
        if !status.is_terminal() {
            return Ok(());
        }
        let Some(name) = status.completion_callback_ref.as_deref() else {
            return Ok(());
        };
        let handler = self.registry.resolve(name).ok_or_else(|| {
            error!(txn_id = %status.txn_id, callback = name, "Completion callback is not registered");
            MapperError::CompletionNotRegistered {
                name: name.to_string(),
                txn_id: status.txn_id.clone(),
            }
        })?;

        let mapper = Arc::clone(self);
        let status = status.clone();
        let callback = name.to_string();
        tokio::spawn(async move {
            let txn_id = status.txn_id.clone();
            if let Err(e) = handler.on_complete(mapper, status).await {
                error!(%txn_id, %callback, error = %e, "Completion callback failed");
            }
        });
        Ok(())
    }
}

/// Applies a dispatch outcome to the stored record.
///
/// References a callback already settled keep their outcome; only the ones
/// still `received` move.
fn merge_dispatch_outcome(stored: &mut TransactionStatus, outcome: DispatchOutcome) {
    let Some(next) = outcome.reference_status() else {
        return;
    };
    let mut moved = false;
    for reference in stored.refs.values_mut() {
        if reference.status == StatusEnum::Received {
            reference.status = next;
            moved = true;
        }
    }
    if moved || stored.status == StatusEnum::Received {
        stored.recompute_status();
    }
}
