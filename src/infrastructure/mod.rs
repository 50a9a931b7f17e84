//! Adapters behind the domain ports: stores and the authority HTTP client.

pub mod http;
pub mod in_memory;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
