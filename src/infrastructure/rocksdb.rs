use crate::domain::ports::TransactionStore;
use crate::error::{MapperError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamilyDescriptor, DB, Options};
use std::path::Path;
use std::sync::Arc;

/// Column Family holding serialized transaction records.
pub const CF_TRANSACTIONS: &str = "transactions";

/// A persistent store implementation using RocksDB.
///
/// Records of every namespace share one column family; the key prefix keeps
/// them apart. Transactions survive a restart, so a callback for a request
/// dispatched by a previous process can still be correlated.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// # Arguments
    ///
    /// * `path` - The filesystem path where the database will be stored.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_transactions = ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Options::default());

        let db = DB::open_cf_descriptors(&opts, path, vec![cf_transactions])
            .map_err(storage_error)?;

        Ok(Self { db: Arc::new(db) })
    }

    fn column_family(&self) -> Result<&rocksdb::ColumnFamily> {
        self.db.cf_handle(CF_TRANSACTIONS).ok_or_else(|| {
            MapperError::StorageError("Transactions column family not found".to_string())
        })
    }
}

fn storage_error(e: rocksdb::Error) -> MapperError {
    MapperError::StorageError(e.to_string())
}

#[async_trait]
impl TransactionStore for RocksDBStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        let cf = self.column_family()?;
        // Pinned read avoids copying the value out
        let result = self.db.get_pinned_cf(cf, key.as_bytes()).map_err(storage_error)?;
        Ok(result.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let cf = self.column_family()?;
        self.db.get_cf(cf, key.as_bytes()).map_err(storage_error)
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let cf = self.column_family()?;
        self.db.put_cf(cf, key.as_bytes(), value).map_err(storage_error)
    }
}
