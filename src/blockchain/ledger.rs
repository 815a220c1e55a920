use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures::future::join_all;
use log::{debug, error, info, warn};
use thiserror::Error;

use super::block::Block;
use super::crypto::{Address, DigitalSignature, Ed25519Signatures, SignatureService};
use super::hasher::digest_block;
use super::peers::{BroadcastStatus, PeerTransport};
use super::storage::{LedgerSnapshot, LedgerStore, StorageError};
use super::transaction::{Transaction, TransactionError};
use super::verification::{CancelToken, Verifier, DEFAULT_DIFFICULTY};

/// Amount minted to the miner of every block
pub const DEFAULT_MINING_REWARD: f64 = 10.0;

/// Errors that can occur during ledger operations
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Transaction rejected: {0}")]
    Rejected(#[from] TransactionError),

    #[error("No identity to receive the mining reward")]
    NoIdentity,

    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Pending transaction from {0} has an invalid signature, mining aborted")]
    InvalidPoolTransaction(Address),

    #[error("Mining interrupted: the chain tail changed")]
    MiningInterrupted,

    #[error("Storage error: {0}")]
    Persistence(#[from] StorageError),

    #[error("System error: {0}")]
    SystemError(String),
}

/// Tunables shared by every node of a network
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerConfig {
    /// Leading zero hex digits required of a proof digest
    pub difficulty: usize,

    /// Amount credited to the miner of each block
    pub mining_reward: f64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            difficulty: DEFAULT_DIFFICULTY,
            mining_reward: DEFAULT_MINING_REWARD,
        }
    }
}

/// Everything mutated by ledger operations, behind one lock
#[derive(Debug)]
struct LedgerState {
    chain: Vec<Block>,
    open_transactions: Vec<Transaction>,
    peers: BTreeSet<String>,
    identity: Option<Address>,
    resolve_conflicts: bool,
}

impl LedgerState {
    fn new(identity: Option<Address>) -> Self {
        LedgerState {
            chain: vec![Block::genesis()],
            open_transactions: Vec::new(),
            peers: BTreeSet::new(),
            identity,
            resolve_conflicts: false,
        }
    }

    fn tail(&self) -> &Block {
        // The chain always holds at least the genesis block.
        &self.chain[self.chain.len() - 1]
    }

    /// Received minus sent over the confirmed chain and the pool
    fn balance_of(&self, identity: &Address) -> f64 {
        self.chain
            .iter()
            .flat_map(|block| block.transactions.iter())
            .chain(self.open_transactions.iter())
            .fold(0.0, |balance, transaction| {
                let mut balance = balance;
                if transaction.recipient() == identity {
                    balance += transaction.amount();
                }
                if transaction.sender() == identity {
                    balance -= transaction.amount();
                }
                balance
            })
    }

    /// Drops every pooled transaction that now sits in a block
    fn remove_confirmed(&mut self, confirmed: &[Transaction]) {
        self.open_transactions
            .retain(|pending| !confirmed.contains(pending));
    }

    fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            chain: self.chain.clone(),
            open_transactions: self.open_transactions.clone(),
            peers: self.peers.iter().cloned().collect(),
        }
    }
}

/// A single node's view of the ledger.
///
/// Cloning is cheap and every clone shares the same state. All mutation of the
/// chain and pool goes through one write lock, so appends happen one at a
/// time and always against the tail that was validated.
#[derive(Clone)]
pub struct Ledger {
    node_id: String,
    state: Arc<RwLock<LedgerState>>,
    verifier: Verifier,
    mining_reward: f64,
    /// Bumped whenever the chain tail changes; cancels stale proof searches
    tip_generation: Arc<AtomicU64>,
    transport: Arc<dyn PeerTransport>,
    storage: Option<Arc<dyn LedgerStore>>,
}

impl fmt::Debug for Ledger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ledger")
            .field("node_id", &self.node_id)
            .field("verifier", &self.verifier)
            .field("mining_reward", &self.mining_reward)
            .finish()
    }
}

impl Ledger {
    /// Creates an in-memory ledger holding only the genesis block
    ///
    /// # Arguments
    ///
    /// * `node_id` - Discriminator for this node's records and logs
    /// * `identity` - Recipient of mining rewards, if the node has a wallet
    /// * `config` - Difficulty and mining reward shared by the network
    /// * `transport` - Channel used to gossip with peers
    ///
    /// # Returns
    ///
    /// A new `Ledger` with an empty pool and no peers
    pub fn new(
        node_id: impl Into<String>,
        identity: Option<Address>,
        config: &LedgerConfig,
        transport: Arc<dyn PeerTransport>,
    ) -> Self {
        Ledger {
            node_id: node_id.into(),
            state: Arc::new(RwLock::new(LedgerState::new(identity))),
            verifier: Verifier::new(config.difficulty, Arc::new(Ed25519Signatures)),
            mining_reward: config.mining_reward,
            tip_generation: Arc::new(AtomicU64::new(0)),
            transport,
            storage: None,
        }
    }

    /// Creates a ledger backed by `storage`, restoring whatever it holds.
    ///
    /// An unreadable or foreign record is logged and the ledger starts from
    /// genesis; the next save overwrites it.
    ///
    /// # Arguments
    ///
    /// * `node_id` - Discriminator for this node's records and logs
    /// * `identity` - Recipient of mining rewards, if the node has a wallet
    /// * `config` - Difficulty and mining reward shared by the network
    /// * `transport` - Channel used to gossip with peers
    /// * `storage` - Backend every mutation is saved to
    ///
    /// # Returns
    ///
    /// A `Ledger` holding the restored chain, pool and peers
    pub fn with_storage(
        node_id: impl Into<String>,
        identity: Option<Address>,
        config: &LedgerConfig,
        transport: Arc<dyn PeerTransport>,
        storage: Arc<dyn LedgerStore>,
    ) -> Self {
        let mut ledger = Self::new(node_id, identity, config, transport);

        match storage.load() {
            Ok(Some(snapshot)) => ledger.restore(snapshot),
            Ok(None) => info!("No persisted ledger for node {}, starting from genesis", ledger.node_id),
            Err(err) => {
                error!("Failed to load ledger for node {}: {}", ledger.node_id, err);
                warn!("Starting from genesis");
            }
        }

        ledger.storage = Some(storage);
        ledger
    }

    /// Replaces the signature service; call before sharing the ledger
    #[cfg(test)]
    pub fn with_signatures(mut self, signatures: Arc<dyn SignatureService>) -> Self {
        self.verifier = Verifier::new(self.verifier.difficulty(), signatures);
        self
    }

    fn restore(&mut self, snapshot: LedgerSnapshot) {
        let mut state = self.write_state();

        if snapshot.chain.first().map_or(false, Block::is_genesis) {
            state.chain = snapshot.chain;
            state.open_transactions = snapshot.open_transactions;
        } else {
            // The pool was funded by that chain.
            warn!("Persisted chain does not start at genesis, ignoring it and its pending transactions");
        }
        state.peers = snapshot.peers.into_iter().collect();

        info!(
            "Restored ledger for node {}: {} blocks, {} pending transactions, {} peers",
            self.node_id,
            state.chain.len(),
            state.open_transactions.len(),
            state.peers.len()
        );
    }

    fn read_state(&self) -> RwLockReadGuard<'_, LedgerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, LedgerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Saves the state; a failure is reported but memory stays authoritative
    fn persist(&self, state: &LedgerState) {
        let Some(storage) = &self.storage else {
            return;
        };

        if let Err(err) = storage.save(&state.snapshot()) {
            error!("Failed to persist ledger for node {}: {}", self.node_id, err);
        }
    }

    /// Writes the current state to storage, surfacing any failure
    pub fn flush(&self) -> Result<(), LedgerError> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };

        storage.save(&self.read_state().snapshot())?;
        Ok(())
    }

    /// Records a new chain tail, invalidating in-flight proof searches
    fn advance_tip(&self) {
        self.tip_generation.fetch_add(1, Ordering::AcqRel);
    }

    fn cancel_token(&self) -> CancelToken {
        CancelToken::new(
            self.tip_generation.clone(),
            self.tip_generation.load(Ordering::Acquire),
        )
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn identity(&self) -> Option<Address> {
        self.read_state().identity.clone()
    }

    /// Switches the reward recipient, e.g. after a new wallet was created
    pub fn set_identity(&self, identity: Option<Address>) {
        self.write_state().identity = identity;
    }

    pub fn chain(&self) -> Vec<Block> {
        self.read_state().chain.clone()
    }

    pub fn last_block(&self) -> Block {
        self.read_state().tail().clone()
    }

    pub fn open_transactions(&self) -> Vec<Transaction> {
        self.read_state().open_transactions.clone()
    }

    pub fn peers(&self) -> Vec<String> {
        self.read_state().peers.iter().cloned().collect()
    }

    /// Whether a peer disagreed with one of our blocks
    pub fn needs_resolve(&self) -> bool {
        self.read_state().resolve_conflicts
    }

    pub fn flag_conflict(&self) {
        self.write_state().resolve_conflicts = true;
    }

    /// Checks the local chain
    pub fn is_valid(&self) -> bool {
        self.verifier.chain_is_valid(&self.read_state().chain)
    }

    /// Balance of `identity` across the confirmed chain and the pool
    pub fn balance_of(&self, identity: &Address) -> f64 {
        self.read_state().balance_of(identity)
    }

    /// Balance of this node's own identity, if it has one
    pub fn balance(&self) -> Option<f64> {
        let state = self.read_state();
        let identity = state.identity.as_ref()?;
        Some(state.balance_of(identity))
    }

    pub fn add_peer(&self, peer: impl Into<String>) {
        let mut state = self.write_state();
        state.peers.insert(peer.into());
        self.persist(&state);
    }

    pub fn remove_peer(&self, peer: &str) {
        let mut state = self.write_state();
        state.peers.remove(peer);
        self.persist(&state);
    }

    /// Admits a locally created transaction and gossips it to every peer
    pub async fn submit_transaction(
        &self,
        recipient: Address,
        sender: Address,
        signature: DigitalSignature,
        amount: f64,
    ) -> Result<Transaction, LedgerError> {
        let transaction = Transaction::new(sender, recipient, amount, signature);
        self.admit(transaction.clone())?;
        self.broadcast_transaction(&transaction).await;
        Ok(transaction)
    }

    /// Admits a transaction gossiped by a peer; it is not passed on again
    pub fn receive_transaction(
        &self,
        recipient: Address,
        sender: Address,
        signature: DigitalSignature,
        amount: f64,
    ) -> Result<Transaction, LedgerError> {
        let transaction = Transaction::new(sender, recipient, amount, signature);
        self.admit(transaction.clone())?;
        Ok(transaction)
    }

    fn admit(&self, transaction: Transaction) -> Result<(), LedgerError> {
        if transaction.is_reward() {
            return Err(TransactionError::ReservedSender(transaction.sender().to_string()).into());
        }
        if !transaction.amount().is_finite() || transaction.amount() < 0.0 {
            return Err(TransactionError::InvalidAmount(format!(
                "Amount must be a non-negative number: {}",
                transaction.amount()
            ))
            .into());
        }

        let mut state = self.write_state();

        if state.open_transactions.contains(&transaction) {
            return Err(TransactionError::Duplicate.into());
        }

        let available = state.balance_of(transaction.sender());
        if !self
            .verifier
            .transaction_is_admissible(&transaction, |_| available, true)
        {
            let reason = if available < transaction.amount() {
                TransactionError::InsufficientFunds {
                    required: transaction.amount(),
                    available,
                }
            } else {
                TransactionError::InvalidSignature
            };
            debug!("Rejected transaction from {}: {}", transaction.sender(), reason);
            return Err(reason.into());
        }

        info!(
            "Admitted transaction {} -> {} ({})",
            transaction.sender(),
            transaction.recipient(),
            transaction.amount()
        );
        state.open_transactions.push(transaction);
        self.persist(&state);
        Ok(())
    }

    /// Mines the pending transactions into a new block.
    ///
    /// The proof search runs on the blocking pool and is abandoned as soon as
    /// another block lands on the chain.
    pub async fn mine(&self) -> Result<Block, LedgerError> {
        let cancel = self.cancel_token();
        let (identity, pooled, previous_hash, index) = {
            let state = self.read_state();
            let identity = state.identity.clone().ok_or(LedgerError::NoIdentity)?;
            let tail = state.tail();
            (
                identity,
                state.open_transactions.clone(),
                digest_block(tail),
                tail.index + 1,
            )
        };

        // One bad signature blocks the whole batch.
        if let Some(bad) = pooled
            .iter()
            .find(|transaction| !self.verifier.transaction_is_admissible(transaction, |_| 0.0, false))
        {
            warn!("Pending transaction from {} failed verification", bad.sender());
            return Err(LedgerError::InvalidPoolTransaction(bad.sender().clone()));
        }

        info!(
            "Mining block {} with {} transactions at difficulty {}",
            index,
            pooled.len(),
            self.verifier.difficulty()
        );
        let verifier = self.verifier.clone();
        let search_input = pooled.clone();
        let search_hash = previous_hash.clone();
        let proof = tokio::task::spawn_blocking(move || {
            verifier.find_proof(&search_input, &search_hash, &cancel)
        })
        .await
        .map_err(|e| LedgerError::SystemError(e.to_string()))?
        .ok_or(LedgerError::MiningInterrupted)?;

        let mut transactions = pooled;
        transactions.push(Transaction::reward(identity, self.mining_reward));
        let block = Block::new(index, previous_hash, transactions, proof);

        {
            let mut state = self.write_state();
            if digest_block(state.tail()) != block.previous_hash {
                warn!("Chain moved while mining block {}, discarding it", index);
                return Err(LedgerError::MiningInterrupted);
            }

            state.chain.push(block.clone());
            state.remove_confirmed(&block.transactions);
            self.advance_tip();
            self.persist(&state);
        }

        info!("Mined block {} with proof {}", block.index, block.proof);
        self.broadcast_block(&block).await;
        Ok(block)
    }

    /// Appends a block mined by a peer if it extends our tail with a valid
    /// proof, then drops the transactions it confirms from the pool.
    pub fn accept_block(&self, candidate: Block) -> Result<(), LedgerError> {
        let mut state = self.write_state();
        let tail = state.tail();

        if candidate.index != tail.index + 1 {
            return Err(LedgerError::InvalidBlock(format!(
                "expected index {}, got {}",
                tail.index + 1,
                candidate.index
            )));
        }

        if candidate.previous_hash != digest_block(tail) {
            return Err(LedgerError::InvalidBlock(
                "previous hash does not match the chain tail".to_string(),
            ));
        }

        if !self.verifier.proof_is_valid(
            candidate.proof_transactions(),
            &candidate.previous_hash,
            candidate.proof,
        ) {
            return Err(LedgerError::InvalidBlock("invalid proof of work".to_string()));
        }

        info!("Accepted block {} from a peer", candidate.index);
        state.remove_confirmed(&candidate.transactions);
        state.chain.push(candidate);
        self.advance_tip();
        self.persist(&state);
        Ok(())
    }

    /// Replaces the local chain with the longest valid peer chain.
    ///
    /// Returns whether the chain was replaced. Unreachable peers are skipped;
    /// equal length keeps the local chain.
    pub async fn resolve(&self) -> bool {
        let peers = self.peers();
        let fetches = peers.iter().map(|peer| async move {
            (peer, self.transport.fetch_chain(peer).await)
        });
        let results = join_all(fetches).await;

        let mut state = self.write_state();
        let mut winner: Option<Vec<Block>> = None;
        let mut best_length = state.chain.len();

        for (peer, result) in results {
            let chain = match result {
                Ok(chain) => chain,
                Err(err) => {
                    warn!("Skipping peer during resolve: {}", err);
                    continue;
                }
            };

            if chain.len() <= best_length {
                continue;
            }
            if !chain.first().map_or(false, Block::is_genesis) {
                warn!("Chain from {} has a different genesis block", peer);
                continue;
            }
            if !self.verifier.chain_is_valid(&chain) {
                warn!("Chain from {} is invalid", peer);
                continue;
            }

            debug!("Chain from {} leads with {} blocks", peer, chain.len());
            best_length = chain.len();
            winner = Some(chain);
        }

        let replaced = match winner {
            Some(chain) => {
                info!("Replacing local chain with a peer chain of {} blocks", chain.len());
                state.chain = chain;
                state.open_transactions.clear();
                self.advance_tip();
                true
            }
            None => false,
        };

        state.resolve_conflicts = false;
        self.persist(&state);
        replaced
    }

    async fn broadcast_transaction(&self, transaction: &Transaction) {
        let peers = self.peers();
        let sends = peers.iter().map(|peer| async move {
            (peer, self.transport.broadcast_transaction(peer, transaction).await)
        });

        for (peer, result) in join_all(sends).await {
            match result {
                Ok(BroadcastStatus::Accepted) => debug!("Peer {} took the transaction", peer),
                Ok(status) => warn!("Peer {} declined the transaction: {:?}", peer, status),
                Err(err) => warn!("{}", err),
            }
        }
    }

    async fn broadcast_block(&self, block: &Block) {
        let peers = self.peers();
        let sends = peers.iter().map(|peer| async move {
            (peer, self.transport.broadcast_block(peer, block).await)
        });

        let mut conflict = false;
        for (peer, result) in join_all(sends).await {
            match result {
                Ok(BroadcastStatus::Accepted) => debug!("Peer {} took block {}", peer, block.index),
                Ok(BroadcastStatus::Conflict) => {
                    warn!("Peer {} reports a conflicting chain", peer);
                    conflict = true;
                }
                Ok(BroadcastStatus::Rejected) => warn!("Peer {} declined block {}", peer, block.index),
                Err(err) => warn!("{}", err),
            }
        }

        if conflict {
            self.flag_conflict();
        }
    }
}
