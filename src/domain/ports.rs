use super::mapping::{Action, TransactionStatus};
use super::protocol::{AckResponse, RequestEnvelope};
use crate::error::{DispatchError, Result};
use async_trait::async_trait;

/// Durable key/value store holding serialized transaction records.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;
}

/// JSON helpers over any [`TransactionStore`].
#[async_trait]
pub trait TransactionStoreExt: TransactionStore {
    async fn load_status(&self, key: &str) -> Result<Option<TransactionStatus>> {
        match self.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn save_status(&self, key: &str, status: &TransactionStatus) -> Result<()> {
        let bytes = serde_json::to_vec(status)?;
        self.set(key, bytes).await
    }
}

impl<T: TransactionStore + ?Sized> TransactionStoreExt for T {}

/// Outbound leg of the protocol: posts a request envelope to the authority
/// and returns its synchronous acknowledgement.
#[async_trait]
pub trait AuthorityClient: Send + Sync {
    async fn post(
        &self,
        action: Action,
        envelope: &RequestEnvelope,
    ) -> std::result::Result<AckResponse, DispatchError>;
}

pub type TransactionStoreBox = Box<dyn TransactionStore>;
pub type AuthorityClientBox = Box<dyn AuthorityClient>;
