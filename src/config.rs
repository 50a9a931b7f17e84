use crate::domain::mapping::{Action, Namespace};
use std::time::Duration;

/// Authority endpoints and the sender identity stamped on every request.
#[derive(Debug, Clone)]
pub struct AuthorityConfig {
    pub resolve_url: String,
    pub link_url: String,
    pub update_url: String,
    pub timeout: Duration,
    pub sender_id: String,
    pub resolve_sender_uri: String,
    pub link_sender_uri: String,
    pub update_sender_uri: String,
}

impl AuthorityConfig {
    pub fn url(&self, action: Action) -> &str {
        match action {
            Action::Resolve => &self.resolve_url,
            Action::Link => &self.link_url,
            Action::Update => &self.update_url,
        }
    }

    pub fn sender_uri(&self, action: Action) -> &str {
        match action {
            Action::Resolve => &self.resolve_sender_uri,
            Action::Link => &self.link_sender_uri,
            Action::Update => &self.update_sender_uri,
        }
    }
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            resolve_url: String::new(),
            link_url: String::new(),
            update_url: String::new(),
            timeout: Duration::from_secs(10),
            sender_id: "dev.openg2p.net".to_string(),
            resolve_sender_uri: String::new(),
            link_sender_uri: String::new(),
            update_sender_uri: String::new(),
        }
    }
}

/// Key prefixes separating the store namespaces.
#[derive(Debug, Clone)]
pub struct KeyPrefixes {
    pub resolve: String,
    pub link: String,
    pub update: String,
    pub combined: String,
}

impl KeyPrefixes {
    pub fn prefix(&self, namespace: Namespace) -> &str {
        match namespace {
            Namespace::Resolve => &self.resolve,
            Namespace::Link => &self.link,
            Namespace::Update => &self.update,
            Namespace::Combined => &self.combined,
        }
    }

    /// Store key of a transaction: `<prefix><txn_id>`.
    pub fn key(&self, namespace: Namespace, txn_id: &str) -> String {
        format!("{}{}", self.prefix(namespace), txn_id)
    }
}

impl Default for KeyPrefixes {
    fn default() -> Self {
        Self {
            resolve: "resolve:".to_string(),
            link: "link:".to_string(),
            update: "update:".to_string(),
            combined: "combined:".to_string(),
        }
    }
}

/// Everything the library consumes; the CLI builds one from flags and env.
#[derive(Debug, Clone, Default)]
pub struct MapperConfig {
    pub authority: AuthorityConfig,
    pub prefixes: KeyPrefixes,
}
