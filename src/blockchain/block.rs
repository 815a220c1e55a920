use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::transaction::Transaction;

/// Proof value carried by the genesis block
pub const GENESIS_PROOF: u64 = 100;

/// Represents a block in the chain.
///
/// Fields serialize in declaration order; that order is what gets hashed, so
/// it must stay identical on every node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Position in the chain, 0 for genesis
    pub index: u64,

    /// Digest of the preceding block, empty for genesis
    pub previous_hash: String,

    /// Transactions in insertion order, the mining reward last
    pub transactions: Vec<Transaction>,

    /// Proof of work (nonce)
    pub proof: u64,

    /// Timestamp when the block was created
    #[schema(value_type = String, example = "2023-01-01T12:00:00Z")]
    pub timestamp: DateTime<Utc>,
}

impl Block {
    /// Creates a new block stamped with the current time
    ///
    /// # Arguments
    ///
    /// * `index` - The index of the block in the chain
    /// * `previous_hash` - The digest of the previous block
    /// * `transactions` - The transactions to include, reward last
    /// * `proof` - The proof of work (nonce)
    ///
    /// # Returns
    ///
    /// A new Block instance
    pub fn new(
        index: u64,
        previous_hash: String,
        transactions: Vec<Transaction>,
        proof: u64,
    ) -> Self {
        Block {
            index,
            previous_hash,
            transactions,
            proof,
            timestamp: Utc::now(),
        }
    }

    /// The fixed first block shared by every node
    pub fn genesis() -> Self {
        Block {
            index: 0,
            previous_hash: String::new(),
            transactions: Vec::new(),
            proof: GENESIS_PROOF,
            timestamp: DateTime::<Utc>::default(),
        }
    }

    pub fn is_genesis(&self) -> bool {
        *self == Self::genesis()
    }

    /// Transactions covered by the proof of work: everything but the
    /// trailing reward.
    pub fn proof_transactions(&self) -> &[Transaction] {
        match self.transactions.split_last() {
            Some((_, rest)) => rest,
            None => &[],
        }
    }
}
