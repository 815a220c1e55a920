use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::{Batch, Db, Tree};
use thiserror::Error;

use super::block::Block;
use super::transaction::Transaction;

const CHAIN_KEY: &str = "chain";
const OPEN_TRANSACTIONS_KEY: &str = "open_transactions";
const PEERS_KEY: &str = "peers";

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sled::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

/// The persisted state of one ledger
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LedgerSnapshot {
    pub chain: Vec<Block>,
    pub open_transactions: Vec<Transaction>,
    pub peers: Vec<String>,
}

impl LedgerSnapshot {
    /// Three lines: the chain, the pending transactions, the peer list
    pub fn to_record(&self) -> Result<String, StorageError> {
        let lines = [
            encode_line(&self.chain)?,
            encode_line(&self.open_transactions)?,
            encode_line(&self.peers)?,
        ];
        Ok(lines.join("\n"))
    }

    pub fn from_record(record: &str) -> Result<Self, StorageError> {
        let mut lines = record.lines();
        let mut next = |what: &str| {
            lines.next().ok_or_else(|| {
                StorageError::DeserializationError(format!("record is missing the {} line", what))
            })
        };

        let chain = decode_line(next(CHAIN_KEY)?, CHAIN_KEY)?;
        let open_transactions = decode_line(next(OPEN_TRANSACTIONS_KEY)?, OPEN_TRANSACTIONS_KEY)?;
        let peers = decode_line(next(PEERS_KEY)?, PEERS_KEY)?;

        Ok(LedgerSnapshot {
            chain,
            open_transactions,
            peers,
        })
    }
}

fn encode_line<T: Serialize + ?Sized>(value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|e| StorageError::SerializationError(e.to_string()))
}

fn decode_line<T: DeserializeOwned>(line: &str, what: &str) -> Result<T, StorageError> {
    serde_json::from_str(line)
        .map_err(|e| StorageError::DeserializationError(format!("{}: {}", what, e)))
}

/// Durable home of a ledger's chain, pool and peers
pub trait LedgerStore: Send + Sync {
    /// `Ok(None)` when nothing has been saved yet
    fn load(&self) -> Result<Option<LedgerSnapshot>, StorageError>;

    fn save(&self, snapshot: &LedgerSnapshot) -> Result<(), StorageError>;
}

/// Plain-text record at `<dir>/blockchain-<node_id>.txt`
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new<P: AsRef<Path>>(dir: P, node_id: &str) -> Self {
        FileStore {
            path: dir.as_ref().join(format!("blockchain-{}.txt", node_id)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LedgerStore for FileStore {
    fn load(&self) -> Result<Option<LedgerSnapshot>, StorageError> {
        let record = match fs::read_to_string(&self.path) {
            Ok(record) => record,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        LedgerSnapshot::from_record(&record).map(Some)
    }

    fn save(&self, snapshot: &LedgerSnapshot) -> Result<(), StorageError> {
        let record = snapshot.to_record()?;

        // Write beside the target and swap it in so a crash never leaves a
        // half-written record.
        let staging = self.path.with_extension("txt.tmp");
        fs::write(&staging, record)?;
        fs::rename(&staging, &self.path)?;

        debug!("Saved ledger record to {}", self.path.display());
        Ok(())
    }
}

/// sled-backed store holding the same three records, one tree per node
pub struct SledStore {
    db: Db,
    tree: Tree,
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore").finish()
    }
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P, node_id: &str) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        let tree = db.open_tree(format!("ledger-{}", node_id))?;

        Ok(Self { db, tree })
    }

    fn get_line(&self, key: &str) -> Result<Option<String>, StorageError> {
        match self.tree.get(key)? {
            Some(value) => String::from_utf8(value.to_vec())
                .map(Some)
                .map_err(|e| StorageError::DeserializationError(format!("{}: {}", key, e))),
            None => Ok(None),
        }
    }
}

impl LedgerStore for SledStore {
    fn load(&self) -> Result<Option<LedgerSnapshot>, StorageError> {
        let chain = match self.get_line(CHAIN_KEY)? {
            Some(line) => decode_line(&line, CHAIN_KEY)?,
            None => return Ok(None),
        };

        let open_transactions = match self.get_line(OPEN_TRANSACTIONS_KEY)? {
            Some(line) => decode_line(&line, OPEN_TRANSACTIONS_KEY)?,
            None => Vec::new(),
        };

        let peers = match self.get_line(PEERS_KEY)? {
            Some(line) => decode_line(&line, PEERS_KEY)?,
            None => Vec::new(),
        };

        Ok(Some(LedgerSnapshot {
            chain,
            open_transactions,
            peers,
        }))
    }

    fn save(&self, snapshot: &LedgerSnapshot) -> Result<(), StorageError> {
        let mut batch = Batch::default();
        batch.insert(CHAIN_KEY, encode_line(&snapshot.chain)?.into_bytes());
        batch.insert(
            OPEN_TRANSACTIONS_KEY,
            encode_line(&snapshot.open_transactions)?.into_bytes(),
        );
        batch.insert(PEERS_KEY, encode_line(&snapshot.peers)?.into_bytes());

        self.tree.apply_batch(batch)?;
        self.db.flush()?;
        Ok(())
    }
}
