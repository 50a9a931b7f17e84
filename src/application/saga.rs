//! Update-or-link saga.
//!
//! A single caller request fans out into three sub-transactions that share
//! the caller's transaction id:
//!
//! 1. **resolve** every id to find out whether it already has a financial
//!    address;
//! 2. **update** the ids that resolved to an address and **link** the rest,
//!    both dispatched independently;
//! 3. **merge** the link and update outcomes into the combined record and
//!    notify the caller once both halves have settled.
//!
//! The combined record lives in the `combined` namespace and carries the
//! partition in its [`SagaProgress`], so any process sharing the store can
//! pick up a callback for any stage.

use super::builder::build_request;
use super::mapper::IdMapper;
use super::registry::{CompletionHandler, CompletionRegistryBuilder};
use crate::domain::mapping::{
    Action, MappingValue, Namespace, ReferenceStatus, SagaProgress, SagaStage, StatusEnum,
    TransactionStatus, aggregate_status,
};
use crate::domain::ports::TransactionStoreExt;
use crate::domain::protocol::ResolveReasonCode;
use crate::error::{MapperError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const SAGA_ON_RESOLVE: &str = "update_or_link.on_resolve";
pub const SAGA_ON_LINK: &str = "update_or_link.on_link";
pub const SAGA_ON_UPDATE: &str = "update_or_link.on_update";

/// Adds the saga's own stage handlers to a registry under construction.
pub fn register_saga_handlers(builder: CompletionRegistryBuilder) -> Result<CompletionRegistryBuilder> {
    builder
        .register(SAGA_ON_RESOLVE, Arc::new(SagaStageHandler(Action::Resolve)))?
        .register(SAGA_ON_LINK, Arc::new(SagaStageHandler(Action::Link)))?
        .register(SAGA_ON_UPDATE, Arc::new(SagaStageHandler(Action::Update)))
}

/// Routes a finished sub-transaction back into the saga.
struct SagaStageHandler(Action);

#[async_trait]
impl CompletionHandler for SagaStageHandler {
    async fn on_complete(&self, mapper: Arc<IdMapper>, status: TransactionStatus) -> Result<()> {
        match self.0 {
            Action::Resolve => mapper.saga_on_resolve(status).await,
            Action::Link | Action::Update => mapper.saga_on_partition(self.0, status).await,
        }
    }
}

/// A resolve outcome that found an address the caller may update.
fn resolved_to_address(reference: &ReferenceStatus) -> bool {
    let not_found = reference
        .status_reason_code
        .as_deref()
        .and_then(|code| code.parse::<ResolveReasonCode>().ok())
        .is_some_and(ResolveReasonCode::is_not_found);
    reference.status == StatusEnum::Success && reference.fa.is_some() && !not_found
}

impl IdMapper {
    /// Links ids that have no financial address yet and updates the ones that
    /// do, reporting both as one transaction.
    ///
    /// Returns the combined record as first stored. `completion_callback_ref`
    /// fires once, after both the link and the update halves have settled.
    pub async fn update_or_link(
        self: &Arc<Self>,
        mappings: &[MappingValue],
        completion_callback_ref: Option<String>,
        txn_id: Option<String>,
    ) -> Result<TransactionStatus> {
        if let Some(position) = mappings.iter().position(|m| m.id.is_none()) {
            return Err(MapperError::ValidationError(format!(
                "mapping {position} has no id; update-or-link resolves by id"
            )));
        }

        let txn_id = txn_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let required = [SAGA_ON_RESOLVE, SAGA_ON_LINK, SAGA_ON_UPDATE];
        for name in required.into_iter().chain(completion_callback_ref.as_deref()) {
            if !self.registry.contains(name) {
                return Err(MapperError::CompletionNotRegistered {
                    name: name.to_string(),
                    txn_id,
                });
            }
        }

        let lookups: Vec<MappingValue> = mappings
            .iter()
            .map(|m| MappingValue {
                id: m.id.clone(),
                fa: None,
            })
            .collect();
        let (envelope, resolve_status) = build_request(
            Action::Resolve,
            &lookups,
            Some(SAGA_ON_RESOLVE.to_string()),
            Some(txn_id.clone()),
            &self.config.authority,
        );

        let requested: BTreeMap<String, MappingValue> = envelope
            .iter()
            .flat_map(|e| e.message.lines.lines())
            .map(|line| line.reference_id.clone())
            .zip(mappings.iter().cloned())
            .collect();

        let mut combined = TransactionStatus {
            txn_id: txn_id.clone(),
            status: StatusEnum::Received,
            refs: resolve_status.refs.clone(),
            completion_callback_ref,
            saga: Some(SagaProgress {
                stage: SagaStage::Resolve,
                requested,
                link_refs: Vec::new(),
                update_refs: Vec::new(),
                link_settled: false,
                update_settled: false,
                notified: false,
            }),
        };

        let key = self.key(Namespace::Combined, &txn_id);
        if mappings.is_empty() {
            combined.status = StatusEnum::Success;
            if let Some(progress) = combined.saga.as_mut() {
                progress.stage = SagaStage::Completed;
                progress.link_settled = true;
                progress.update_settled = true;
                progress.notified = true;
            }
            self.store.save_status(&key, &combined).await?;
            self.notify(&combined)?;
            return Ok(combined);
        }

        self.store.save_status(&key, &combined).await?;
        info!(%txn_id, mappings = mappings.len(), "Update-or-link started");

        self.launch(Action::Resolve, envelope, resolve_status).await?;
        Ok(combined)
    }

    /// Stage 2: split the resolved references into link and update batches
    /// and dispatch both.
    async fn saga_on_resolve(self: &Arc<Self>, resolved: TransactionStatus) -> Result<()> {
        let txn_id = resolved.txn_id.clone();
        let key = self.key(Namespace::Combined, &txn_id);

        let launches = {
            let _guard = self.locks.lock(&key).await;
            let mut combined = self.load_combined(&key, &txn_id).await?;
            let Some(mut progress) = combined.saga.take() else {
                error!(%txn_id, "Combined record carries no saga progress");
                return Ok(());
            };
            if progress.stage != SagaStage::Resolve {
                debug!(%txn_id, stage = ?progress.stage, "Resolve stage already handled");
                return Ok(());
            }

            let mut to_link = Vec::new();
            let mut to_update = Vec::new();
            let mut orphans = BTreeMap::new();
            for (reference_id, reference) in &resolved.refs {
                match progress.requested.get(reference_id) {
                    Some(mapping) if resolved_to_address(reference) => to_update.push(mapping.clone()),
                    Some(mapping) => to_link.push(mapping.clone()),
                    None => {
                        error!(%txn_id, %reference_id, "Resolved reference was never requested");
                        orphans.insert(reference_id.clone(), reference.clone());
                    }
                }
            }
            for (reference_id, mapping) in &progress.requested {
                if !resolved.refs.contains_key(reference_id) {
                    error!(%txn_id, %reference_id, "Requested reference missing from resolve outcome");
                    orphans.insert(
                        reference_id.clone(),
                        ReferenceStatus::received(reference_id.clone(), mapping),
                    );
                }
            }

            let (link_envelope, link_status) = build_request(
                Action::Link,
                &to_link,
                Some(SAGA_ON_LINK.to_string()),
                Some(txn_id.clone()),
                &self.config.authority,
            );
            let (update_envelope, update_status) = build_request(
                Action::Update,
                &to_update,
                Some(SAGA_ON_UPDATE.to_string()),
                Some(txn_id.clone()),
                &self.config.authority,
            );

            progress.stage = SagaStage::LinkOrUpdate;
            progress.link_refs = link_status.refs.keys().cloned().collect();
            progress.update_refs = update_status.refs.keys().cloned().collect();
            progress.link_settled = to_link.is_empty();
            progress.update_settled = to_update.is_empty();

            // Orphans stay pending so the combined record never looks done
            // while a reference is unaccounted for.
            combined.refs = link_status
                .refs
                .iter()
                .chain(update_status.refs.iter())
                .map(|(id, r)| (id.clone(), r.clone()))
                .chain(orphans.into_iter().map(|(id, mut r)| {
                    r.status = StatusEnum::Pending;
                    (id, r)
                }))
                .collect();
            combined.status = aggregate_status(combined.refs.values().map(|r| r.status));
            combined.saga = Some(progress);
            self.store.save_status(&key, &combined).await?;

            info!(%txn_id, link = to_link.len(), update = to_update.len(), "Update-or-link partitioned");

            let mut launches = Vec::new();
            if !to_link.is_empty() {
                launches.push((Action::Link, link_envelope, link_status));
            }
            if !to_update.is_empty() {
                launches.push((Action::Update, update_envelope, update_status));
            }
            launches
        };

        let mut sub_transactions = tokio::task::JoinSet::new();
        for (action, envelope, status) in launches {
            let mapper = Arc::clone(self);
            sub_transactions.spawn(async move { mapper.launch(action, envelope, status).await });
        }
        while let Some(joined) = sub_transactions.join_next().await {
            match joined {
                Ok(result) => {
                    result?;
                }
                Err(e) => error!(%txn_id, error = %e, "Sub-transaction task failed"),
            }
        }
        Ok(())
    }

    /// Stage 3: copy a finished link or update batch into the combined record
    /// and finish the saga once both halves are in.
    async fn saga_on_partition(self: &Arc<Self>, action: Action, finished: TransactionStatus) -> Result<()> {
        let txn_id = finished.txn_id.clone();
        let key = self.key(Namespace::Combined, &txn_id);

        let completed = {
            let _guard = self.locks.lock(&key).await;
            let mut combined = self.load_combined(&key, &txn_id).await?;
            let Some(mut progress) = combined.saga.take() else {
                error!(%txn_id, "Combined record carries no saga progress");
                return Ok(());
            };
            match progress.stage {
                SagaStage::LinkOrUpdate => {}
                SagaStage::Completed => {
                    debug!(%txn_id, %action, "Saga already completed");
                    return Ok(());
                }
                SagaStage::Resolve => {
                    error!(%txn_id, %action, "Partition finished before the resolve stage");
                    return Ok(());
                }
            }

            let assigned = match action {
                Action::Link => &progress.link_refs,
                _ => &progress.update_refs,
            };
            let assigned_set: BTreeSet<&String> = assigned.iter().collect();
            for reference_id in assigned {
                match finished.refs.get(reference_id) {
                    Some(reference) => {
                        combined.refs.insert(reference_id.clone(), reference.clone());
                    }
                    None => warn!(%txn_id, %action, %reference_id, "Assigned reference missing from outcome"),
                }
            }
            for reference_id in finished.refs.keys().filter(|id| !assigned_set.contains(id)) {
                warn!(%txn_id, %action, %reference_id, "Outcome names a reference outside its partition");
            }

            match action {
                Action::Link => progress.link_settled = true,
                _ => progress.update_settled = true,
            }
            combined.status = aggregate_status(combined.refs.values().map(|r| r.status));

            let both_settled = progress.link_settled && progress.update_settled;
            let completed = both_settled && combined.is_terminal() && !progress.notified;
            if completed {
                progress.notified = true;
                progress.stage = SagaStage::Completed;
            } else if both_settled && !combined.is_terminal() {
                error!(%txn_id, "Both partitions settled but references are still pending");
            }

            combined.saga = Some(progress);
            self.store.save_status(&key, &combined).await?;
            completed.then_some(combined)
        };

        if let Some(combined) = completed {
            info!(%txn_id, status = ?combined.status, "Update-or-link completed");
            self.notify(&combined)?;
        }
        Ok(())
    }

    async fn load_combined(&self, key: &str, txn_id: &str) -> Result<TransactionStatus> {
        self.store
            .load_status(key)
            .await?
            .ok_or_else(|| MapperError::UnknownTransaction {
                namespace: Namespace::Combined,
                txn_id: txn_id.to_string(),
            })
    }
}
