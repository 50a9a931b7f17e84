use super::mapper::IdMapper;
use crate::domain::mapping::TransactionStatus;
use crate::error::{MapperError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Notified once a transaction reaches `success` or `rejected`.
///
/// Handlers receive the mapper so they can chain further requests without
/// holding a reference to it themselves.
#[async_trait]
pub trait CompletionHandler: Send + Sync {
    async fn on_complete(&self, mapper: Arc<IdMapper>, status: TransactionStatus) -> Result<()>;
}

/// Name to handler table, frozen once built.
///
/// Transaction records store the handler's name, so a record written by one
/// process can be completed by another that registered the same names.
#[derive(Default, Clone)]
pub struct CompletionRegistry {
    handlers: HashMap<String, Arc<dyn CompletionHandler>>,
}

impl CompletionRegistry {
    pub fn builder() -> CompletionRegistryBuilder {
        CompletionRegistryBuilder::default()
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn CompletionHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}

#[derive(Default)]
pub struct CompletionRegistryBuilder {
    handlers: HashMap<String, Arc<dyn CompletionHandler>>,
}

impl CompletionRegistryBuilder {
    pub fn register(
        mut self,
        name: impl Into<String>,
        handler: Arc<dyn CompletionHandler>,
    ) -> Result<Self> {
        let name = name.into();
        if self.handlers.contains_key(&name) {
            return Err(MapperError::DuplicateCompletion(name));
        }
        self.handlers.insert(name, handler);
        Ok(self)
    }

    pub fn build(self) -> CompletionRegistry {
        CompletionRegistry {
            handlers: self.handlers,
        }
    }
}
