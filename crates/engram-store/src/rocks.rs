//! RocksDB-backed record store
//!
//! Durable [`RecordStore`] implementation. Records are keyed by their
//! tier-tagged id and encoded as JSON values; filtered queries and
//! vector search scan the record column family.

use crate::backend::{Filter, RecordStore, VectorHit};
use crate::embeddings::find_top_k;
use async_trait::async_trait;
use engram_core::{Error, MemoryRecord, RecordId, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Configuration for the RocksDB store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocksStoreConfig {
    /// Path to the storage directory
    pub path: String,

    /// Sync writes to disk immediately (slower but more durable)
    pub sync_writes: bool,

    /// Maximum write buffer size in bytes
    pub write_buffer_size: usize,

    /// Enable compression for stored data
    pub enable_compression: bool,
}

impl Default for RocksStoreConfig {
    fn default() -> Self {
        Self {
            path: "data/engram".to_string(),
            sync_writes: false,
            write_buffer_size: 64 * 1024 * 1024, // 64MB
            enable_compression: true,
        }
    }
}

impl RocksStoreConfig {
    /// Create config for testing with a temporary directory
    pub fn for_testing(path: &Path) -> Self {
        Self {
            path: path.to_string_lossy().to_string(),
            sync_writes: false,
            write_buffer_size: 4 * 1024 * 1024, // 4MB for tests
            enable_compression: false,
        }
    }
}

/// Column family names
mod cf {
    /// Records keyed by tier-tagged id
    pub const RECORDS: &str = "records";
}

/// RocksDB-backed record store
pub struct RocksDbStore {
    db: Arc<rocksdb::DB>,
    config: RocksStoreConfig,
}

impl RocksDbStore {
    /// Open or create a RocksDB-backed store
    pub fn open(config: RocksStoreConfig) -> Result<Self> {
        info!("Opening record store at {}", config.path);

        let mut db_opts = rocksdb::Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_write_buffer_size(config.write_buffer_size);

        if config.enable_compression {
            db_opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        }

        let mut cf_opts = rocksdb::Options::default();
        if config.enable_compression {
            cf_opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        }
        let cf_descriptors = vec![rocksdb::ColumnFamilyDescriptor::new(cf::RECORDS, cf_opts)];

        let db = rocksdb::DB::open_cf_descriptors(&db_opts, &config.path, cf_descriptors)
            .map_err(|e| Error::Storage(format!("Failed to open record store: {}", e)))?;

        info!("Record store opened successfully");

        Ok(Self {
            db: Arc::new(db),
            config,
        })
    }

    fn records_cf(&self) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(cf::RECORDS)
            .ok_or_else(|| Error::Internal(format!("Column family not found: {}", cf::RECORDS)))
    }

    fn encode(record: &MemoryRecord) -> Result<Vec<u8>> {
        serde_json::to_vec(record)
            .map_err(|e| Error::Serialization(format!("Failed to serialize record: {}", e)))
    }

    fn decode(bytes: &[u8]) -> Result<MemoryRecord> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::Deserialization(format!("Failed to deserialize record: {}", e)))
    }

    fn scan_all(&self) -> Result<Vec<MemoryRecord>> {
        let cf = self.records_cf()?;
        let mut records = Vec::new();

        for item in self.db.iterator_cf(cf, rocksdb::IteratorMode::Start) {
            let (_key, value) = item.map_err(|e| Error::Storage(e.to_string()))?;
            records.push(Self::decode(&value)?);
        }
        Ok(records)
    }
}

#[async_trait]
impl RecordStore for RocksDbStore {
    async fn put(&self, record: &MemoryRecord) -> Result<()> {
        let cf = self.records_cf()?;
        let value = Self::encode(record)?;

        let mut write_opts = rocksdb::WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);

        self.db
            .put_cf_opt(cf, record.id.as_str().as_bytes(), &value, &write_opts)
            .map_err(|e| Error::Storage(format!("Failed to store record: {}", e)))?;

        debug!("Stored record {}", record.id);
        Ok(())
    }

    async fn get(&self, id: &RecordId) -> Result<Option<MemoryRecord>> {
        let cf = self.records_cf()?;
        match self.db.get_cf(cf, id.as_str().as_bytes()) {
            Ok(Some(value)) => Ok(Some(Self::decode(&value)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(Error::Storage(format!("Failed to read record: {}", e))),
        }
    }

    async fn delete(&self, id: &RecordId) -> Result<bool> {
        let cf = self.records_cf()?;

        let existed = self
            .db
            .get_cf(cf, id.as_str().as_bytes())
            .map_err(|e| Error::Storage(format!("Failed to read record: {}", e)))?
            .is_some();

        if existed {
            self.db
                .delete_cf(cf, id.as_str().as_bytes())
                .map_err(|e| Error::Storage(format!("Failed to delete record: {}", e)))?;
            debug!("Deleted record {}", id);
        }
        Ok(existed)
    }

    async fn query(&self, filter: &Filter) -> Result<Vec<MemoryRecord>> {
        let compiled = filter.compile()?;
        let mut matches: Vec<MemoryRecord> = self
            .scan_all()?
            .into_iter()
            .filter(|r| compiled.matches(r))
            .collect();

        matches.sort_by_key(|r| (r.created_at, r.id.as_str().to_string()));

        if let Some(limit) = filter.limit {
            matches.truncate(limit);
        }
        Ok(matches)
    }

    async fn vector_search(&self, embedding: &[f32], limit: usize) -> Result<Vec<VectorHit>> {
        let records = self.scan_all()?;
        let hits = find_top_k(embedding, records, limit, |r| r.embedding.clone());

        Ok(hits
            .into_iter()
            .map(|s| VectorHit {
                record: s.item,
                score: s.score,
            })
            .collect())
    }

    async fn count(&self) -> Result<usize> {
        let cf = self.records_cf()?;
        let mut count = 0;
        for item in self.db.iterator_cf(cf, rocksdb::IteratorMode::Start) {
            item.map_err(|e| Error::Storage(e.to_string()))?;
            count += 1;
        }
        Ok(count)
    }

    async fn flush(&self) -> Result<()> {
        self.db
            .flush()
            .map_err(|e| Error::Storage(format!("Failed to flush: {}", e)))?;
        debug!("Record store flushed");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.flush().await?;
        info!("Record store closed");
        Ok(())
    }
}
