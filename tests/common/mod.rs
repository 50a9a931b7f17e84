#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use g2p_id_mapper::application::mapper::IdMapper;
use g2p_id_mapper::application::registry::{
    CompletionHandler, CompletionRegistry, CompletionRegistryBuilder,
};
use g2p_id_mapper::application::saga::register_saga_handlers;
use g2p_id_mapper::config::MapperConfig;
use g2p_id_mapper::domain::mapping::{Action, StatusEnum, TransactionStatus};
use g2p_id_mapper::domain::ports::{AuthorityClient, TransactionStore};
use g2p_id_mapper::domain::protocol::{
    AckResponse, CallbackEnvelope, CallbackLine, CallbackLines, CallbackMessage, Envelope,
    MsgCallbackHeader, RequestEnvelope,
};
use g2p_id_mapper::error::{DispatchError, Result};
use g2p_id_mapper::infrastructure::in_memory::InMemoryTransactionStore;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const CALLER_DONE: &str = "caller.done";

type Reply = fn(Action) -> std::result::Result<AckResponse, DispatchError>;

/// Authority double that records every envelope it is sent.
#[derive(Clone)]
pub struct RecordingAuthority {
    sent: Arc<Mutex<Vec<(Action, RequestEnvelope)>>>,
    reply: Reply,
}

impl RecordingAuthority {
    pub fn acking() -> Self {
        Self::replying(|_| Ok(AckResponse::ack()))
    }

    pub fn replying(reply: Reply) -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            reply,
        }
    }

    pub fn sent(&self) -> Vec<(Action, RequestEnvelope)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_for(&self, action: Action) -> Vec<RequestEnvelope> {
        self.sent()
            .into_iter()
            .filter(|(a, _)| *a == action)
            .map(|(_, e)| e)
            .collect()
    }

    /// Waits until at least `count` envelopes for `action` went out.
    pub async fn wait_for(&self, action: Action, count: usize) -> Vec<RequestEnvelope> {
        for _ in 0..200 {
            let sent = self.sent_for(action);
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {count} {action} request(s)");
    }
}

#[async_trait]
impl AuthorityClient for RecordingAuthority {
    async fn post(
        &self,
        action: Action,
        envelope: &RequestEnvelope,
    ) -> std::result::Result<AckResponse, DispatchError> {
        self.sent.lock().unwrap().push((action, envelope.clone()));
        (self.reply)(action)
    }
}

/// Completion handler forwarding every terminal record to a channel.
pub struct RecordingHandler(pub mpsc::UnboundedSender<TransactionStatus>);

#[async_trait]
impl CompletionHandler for RecordingHandler {
    async fn on_complete(&self, _mapper: Arc<IdMapper>, status: TransactionStatus) -> Result<()> {
        let _ = self.0.send(status);
        Ok(())
    }
}

/// Registry with the saga stages and a recording `caller.done` handler.
pub fn recording_registry() -> (CompletionRegistry, mpsc::UnboundedReceiver<TransactionStatus>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let builder: CompletionRegistryBuilder = register_saga_handlers(CompletionRegistry::builder())
        .unwrap()
        .register(CALLER_DONE, Arc::new(RecordingHandler(tx)))
        .unwrap();
    (builder.build(), rx)
}

pub struct Harness {
    pub mapper: Arc<IdMapper>,
    pub store: InMemoryTransactionStore,
    pub authority: RecordingAuthority,
    pub completions: mpsc::UnboundedReceiver<TransactionStatus>,
}

pub fn harness(authority: RecordingAuthority) -> Harness {
    let store = InMemoryTransactionStore::new();
    let (registry, completions) = recording_registry();
    let mapper = IdMapper::new(
        Box::new(store.clone()),
        Box::new(authority.clone()),
        registry,
        MapperConfig::default(),
    );
    Harness {
        mapper,
        store,
        authority,
        completions,
    }
}

/// Receives the next completion or fails after a second.
pub async fn next_completion(
    completions: &mut mpsc::UnboundedReceiver<TransactionStatus>,
) -> TransactionStatus {
    tokio::time::timeout(Duration::from_secs(1), completions.recv())
        .await
        .expect("completion handler did not fire")
        .expect("completion channel closed")
}

/// Asserts that no further completion arrives within a short grace period.
pub async fn assert_no_completion(completions: &mut mpsc::UnboundedReceiver<TransactionStatus>) {
    let extra = tokio::time::timeout(Duration::from_millis(100), completions.recv()).await;
    assert!(extra.is_err(), "unexpected extra completion: {extra:?}");
}

pub fn result_line(reference_id: &str, status: StatusEnum) -> CallbackLine {
    CallbackLine {
        reference_id: reference_id.to_string(),
        timestamp: Utc::now(),
        status,
        status_reason_code: None,
        status_reason_message: None,
        fa: None,
        id: None,
    }
}

pub fn callback(action: Action, txn_id: &str, lines: Vec<CallbackLine>) -> CallbackEnvelope {
    let results = match action {
        Action::Resolve => CallbackLines::Resolve(lines),
        Action::Link => CallbackLines::Link(lines),
        Action::Update => CallbackLines::Update(lines),
    };
    Envelope {
        signature: String::new(),
        header: MsgCallbackHeader {
            version: "1.0.0".to_string(),
            message_id: uuid::Uuid::new_v4().to_string(),
            message_ts: Utc::now(),
            action: format!("on-{action}"),
            status: None,
            status_reason_code: None,
            status_reason_message: None,
            total_count: -1,
            completed_count: -1,
            sender_id: None,
            receiver_id: None,
            is_encrypted: false,
        },
        message: CallbackMessage {
            transaction_id: txn_id.to_string(),
            correlation_id: None,
            results,
        },
    }
}

/// Reference ids of an outbound request, in envelope order.
pub fn reference_ids(envelope: &RequestEnvelope) -> Vec<String> {
    envelope
        .message
        .lines
        .lines()
        .iter()
        .map(|line| line.reference_id.clone())
        .collect()
}

/// Store that counts reads and can mark every record terminal from the
/// `settle_at`-th read on.
#[derive(Clone, Default)]
pub struct CountingStore {
    inner: InMemoryTransactionStore,
    armed: Arc<AtomicBool>,
    gets: Arc<AtomicUsize>,
    writes: Arc<AtomicUsize>,
    settle_at: Arc<AtomicUsize>,
}

impl CountingStore {
    /// Starts counting reads; records turn `success` on read `settle_at`
    /// (0 keeps them as stored).
    pub fn arm(&self, settle_at: usize) {
        self.gets.store(0, Ordering::SeqCst);
        self.settle_at.store(settle_at, Ordering::SeqCst);
        self.armed.store(true, Ordering::SeqCst);
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransactionStore for CountingStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key).await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let bytes = self.inner.get(key).await?;
        if !self.armed.load(Ordering::SeqCst) {
            return Ok(bytes);
        }
        let read = self.gets.fetch_add(1, Ordering::SeqCst) + 1;
        let settle_at = self.settle_at.load(Ordering::SeqCst);
        match bytes {
            Some(bytes) if settle_at != 0 && read >= settle_at => {
                let mut status: TransactionStatus = serde_json::from_slice(&bytes)?;
                status.status = StatusEnum::Success;
                Ok(Some(serde_json::to_vec(&status)?))
            }
            other => Ok(other),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, value).await
    }
}
