use log::{debug, warn};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::block::Block;
use super::crypto::{Address, SignatureService};
use super::hasher::{digest_block, digest_bytes};
use super::transaction::Transaction;

/// Default number of leading zero hex digits a proof digest must carry
pub const DEFAULT_DIFFICULTY: usize = 2;

/// A hex SHA-256 digest has 64 digits, so no proof can satisfy more
pub const MAX_DIFFICULTY: usize = 64;

/// Cancellation handle for a proof search.
///
/// The ledger bumps a shared generation counter whenever its chain tail
/// changes; a search started against an older tail sees the mismatch and
/// stops.
#[derive(Debug, Clone)]
pub struct CancelToken {
    generation: Arc<AtomicU64>,
    expected: u64,
}

impl CancelToken {
    pub fn new(generation: Arc<AtomicU64>, expected: u64) -> Self {
        CancelToken {
            generation,
            expected,
        }
    }

    /// A token nobody else holds, so it is never cancelled
    #[cfg(test)]
    pub fn never() -> Self {
        Self::new(Arc::new(AtomicU64::new(0)), 0)
    }

    pub fn is_cancelled(&self) -> bool {
        self.generation.load(Ordering::Acquire) != self.expected
    }
}

/// Pure validation rules: proof of work, chain integrity and transaction
/// admissibility.
#[derive(Clone)]
pub struct Verifier {
    difficulty: usize,
    signatures: Arc<dyn SignatureService>,
}

impl fmt::Debug for Verifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Verifier")
            .field("difficulty", &self.difficulty)
            .finish()
    }
}

impl Verifier {
    /// Creates a verifier
    ///
    /// # Arguments
    ///
    /// * `difficulty` - Leading zero hex digits a proof digest must carry
    /// * `signatures` - Service that checks transaction signatures
    ///
    /// # Returns
    ///
    /// A new `Verifier` instance
    pub fn new(difficulty: usize, signatures: Arc<dyn SignatureService>) -> Self {
        Verifier {
            difficulty,
            signatures,
        }
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    /// Accepts iff the digest of the canonical guess starts with
    /// `difficulty` zeros.
    pub fn proof_is_valid(&self, transactions: &[Transaction], previous_hash: &str, proof: u64) -> bool {
        let prefix = guess_prefix(transactions, previous_hash);
        self.guess_is_valid(&prefix, proof)
    }

    fn guess_is_valid(&self, prefix: &[u8], proof: u64) -> bool {
        let mut guess = Vec::with_capacity(prefix.len() + 20);
        guess.extend_from_slice(prefix);
        guess.extend_from_slice(proof.to_string().as_bytes());

        let digest = digest_bytes(&guess);
        digest.len() >= self.difficulty && digest.bytes().take(self.difficulty).all(|b| b == b'0')
    }

    /// Searches proofs upward from zero until one satisfies the predicate.
    ///
    /// Returns `None` once `cancel` fires.
    pub fn find_proof(
        &self,
        transactions: &[Transaction],
        previous_hash: &str,
        cancel: &CancelToken,
    ) -> Option<u64> {
        let prefix = guess_prefix(transactions, previous_hash);

        for proof in 0..=u64::MAX {
            if cancel.is_cancelled() {
                debug!("Proof search cancelled at {}", proof);
                return None;
            }
            if self.guess_is_valid(&prefix, proof) {
                return Some(proof);
            }
        }

        None
    }

    /// Checks linkage and proof of work of every non-genesis block, stopping
    /// at the first failure.
    pub fn chain_is_valid(&self, chain: &[Block]) -> bool {
        for (position, pair) in chain.windows(2).enumerate() {
            let (previous, block) = (&pair[0], &pair[1]);

            if block.previous_hash != digest_block(previous) {
                warn!("Block {} does not link to its predecessor", position + 1);
                return false;
            }

            if !self.proof_is_valid(block.proof_transactions(), &block.previous_hash, block.proof) {
                warn!("Block {} carries an invalid proof of work", position + 1);
                return false;
            }
        }

        true
    }

    pub fn signature_is_valid(&self, transaction: &Transaction) -> bool {
        self.signatures.verify(transaction)
    }

    /// With `check_funds`, the sender must be able to cover the amount as
    /// well as have signed it; without, only the signature is checked.
    pub fn transaction_is_admissible<F>(
        &self,
        transaction: &Transaction,
        balance_lookup: F,
        check_funds: bool,
    ) -> bool
    where
        F: Fn(&Address) -> f64,
    {
        if check_funds && balance_lookup(transaction.sender()) < transaction.amount() {
            return false;
        }
        self.signature_is_valid(transaction)
    }
}

/// Everything in a proof guess except the trailing proof digits:
/// the JSON list of transaction payloads followed by the predecessor digest.
fn guess_prefix(transactions: &[Transaction], previous_hash: &str) -> Vec<u8> {
    let mut prefix = vec![b'['];
    for (i, transaction) in transactions.iter().enumerate() {
        if i > 0 {
            prefix.push(b',');
        }
        transaction.write_payload(&mut prefix);
    }
    prefix.push(b']');
    prefix.extend_from_slice(previous_hash.as_bytes());
    prefix
}
