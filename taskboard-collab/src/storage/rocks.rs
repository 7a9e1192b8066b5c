//! RocksDB-backed Board Store.
//!
//! Column families:
//! - `boards`   — board documents, JSON encoded and LZ4 compressed, keyed by board id
//! - `metadata` — per-board metadata (bincode: version, sizes, timestamps)
//!
//! Document and metadata are written in one atomic batch, so a reader never
//! sees a version number that does not match the stored document.
//!
//! Writes, deletes and the subscriber notifications that follow them run
//! under one lock: versions never repeat, and the last snapshot every
//! subscriber saw is the document on disk.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;
use taskboard_core::Board;

use super::{BoardStore, Listener, Listeners, StoreError, StoreEvent, Subscription};

const CF_BOARDS: &str = "boards";
const CF_METADATA: &str = "metadata";

const COLUMN_FAMILIES: &[&str] = &[CF_BOARDS, CF_METADATA];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Enable fsync on every write (default: true)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 256)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 16MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("taskboard_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: true,
            max_open_files: 256,
            write_buffer_size: 16 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Create config for testing (small caches, no fsync).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

/// Metadata stored alongside each board document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoardMetadata {
    pub board_id: String,
    /// Number of writes so far (monotonically increasing)
    pub version: u64,
    /// Uncompressed JSON size in bytes
    pub document_size: u64,
    /// Compressed size in bytes
    pub compressed_size: u64,
    /// Seconds since epoch
    pub created_at: u64,
    /// Seconds since epoch
    pub updated_at: u64,
}

impl BoardMetadata {
    fn new(board_id: &str) -> Self {
        let now = now_secs();
        Self {
            board_id: board_id.to_string(),
            version: 0,
            document_size: 0,
            compressed_size: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::SerializationError(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (meta, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
        Ok(meta)
    }
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}

/// RocksDB board store.
///
/// Subscribers are tracked in-process: every handle sharing this store
/// (e.g. through an `Arc`) sees every write made through it.
pub struct RocksBoardStore {
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
    listeners: Arc<Listeners>,
    write_lock: Mutex<()>,
}

impl RocksBoardStore {
    /// Open the store, creating the database and column families if needed.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(&config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;
        log::info!("Opened board store at {}", config.path.display());

        Ok(Self {
            db,
            config,
            listeners: Listeners::new(),
            write_lock: Mutex::new(()),
        })
    }

    fn cf_options(config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);

        // values are already LZ4 framed
        opts.set_compression_type(DBCompressionType::None);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_max_write_buffer_number(2);
        opts.optimize_for_point_lookup(config.block_cache_size as u64);
        opts
    }

    /// Load and decompress a board document.
    pub fn load_board(&self, board_id: &str) -> Result<Board, StoreError> {
        let cf = self.cf(CF_BOARDS)?;
        match self.db.get_cf(cf, board_id.as_bytes())? {
            Some(compressed) => {
                let json = lz4_flex::decompress_size_prepended(&compressed)
                    .map_err(|e| StoreError::CompressionError(e.to_string()))?;
                Ok(Board::from_json(&json)?)
            }
            None => Err(StoreError::NotFound(board_id.to_string())),
        }
    }

    /// Held across read-modify-write of metadata and the notify after it.
    /// Listeners must not write to the store from inside their callback.
    fn serialized(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace a board document and bump its metadata in one batch.
    ///
    /// Subscribers are not notified; use [`BoardStore::write`] for that.
    pub fn save_board(&self, board_id: &str, board: &Board) -> Result<BoardMetadata, StoreError> {
        let _guard = self.serialized();
        self.save_unlocked(board_id, board)
    }

    fn save_unlocked(&self, board_id: &str, board: &Board) -> Result<BoardMetadata, StoreError> {
        let cf_boards = self.cf(CF_BOARDS)?;
        let cf_meta = self.cf(CF_METADATA)?;

        let json = board
            .to_json()
            .map_err(|e| StoreError::SerializationError(e.to_string()))?;
        let compressed = lz4_flex::compress_prepend_size(&json);

        let mut meta = self
            .load_metadata(board_id)
            .unwrap_or_else(|_| BoardMetadata::new(board_id));
        meta.version += 1;
        meta.document_size = json.len() as u64;
        meta.compressed_size = compressed.len() as u64;
        meta.updated_at = now_secs();

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_boards, board_id.as_bytes(), &compressed);
        batch.put_cf(cf_meta, board_id.as_bytes(), meta.encode()?);

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;

        Ok(meta)
    }

    pub fn load_metadata(&self, board_id: &str) -> Result<BoardMetadata, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        match self.db.get_cf(cf, board_id.as_bytes())? {
            Some(bytes) => BoardMetadata::decode(&bytes),
            None => Err(StoreError::NotFound(board_id.to_string())),
        }
    }

    /// All board ids with a persisted document.
    pub fn list_boards(&self) -> Result<Vec<String>, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        let mut ids = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            let id = String::from_utf8(key.to_vec())
                .map_err(|_| StoreError::DeserializationError("Invalid board id key".into()))?;
            ids.push(id);
        }
        Ok(ids)
    }

    /// Delete a board document. Subscribers are told it is missing.
    pub fn delete_board(&self, board_id: &str) -> Result<(), StoreError> {
        let _guard = self.serialized();
        let mut batch = WriteBatch::default();
        batch.delete_cf(self.cf(CF_BOARDS)?, board_id.as_bytes());
        batch.delete_cf(self.cf(CF_METADATA)?, board_id.as_bytes());
        self.db.write(batch)?;
        self.listeners.notify(board_id, &StoreEvent::Missing);
        Ok(())
    }

    /// Flush memtables to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::DatabaseError(format!("Column family '{name}' not found")))
    }
}

impl BoardStore for RocksBoardStore {
    fn read(&self, board_id: &str) -> Result<Option<Board>, StoreError> {
        match self.load_board(board_id) {
            Ok(board) => Ok(Some(board)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write(&self, board_id: &str, board: &Board) -> Result<(), StoreError> {
        let _guard = self.serialized();
        let meta = self.save_unlocked(board_id, board)?;
        log::debug!(
            "Persisted board {board_id} v{} ({} → {} bytes)",
            meta.version,
            meta.document_size,
            meta.compressed_size
        );
        self.listeners
            .notify(board_id, &StoreEvent::Snapshot(board.clone()));
        Ok(())
    }

    fn subscribe(&self, board_id: &str, listener: Listener) -> Subscription {
        let subscription = self.listeners.register(board_id, listener);
        let _guard = self.serialized();
        let initial = match self.read(board_id) {
            Ok(Some(board)) => StoreEvent::Snapshot(board),
            Ok(None) => StoreEvent::Missing,
            Err(e) => StoreEvent::Failed(e),
        };
        self.listeners.notify_one(&subscription, initial);
        subscription
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
