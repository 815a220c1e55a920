// Ledger core
//
// This module contains the ledger state machine and its collaborators:
// - Transaction and Block data model
// - Hashing and proof-of-work verification
// - Wallets and signature checks
// - Persistence backends
// - Peer transport

pub mod block;
pub mod crypto;
pub mod hasher;
pub mod ledger;
pub mod peers;
pub mod storage;
pub mod transaction;
pub mod verification;

// Re-export main components for easier access
pub use block::Block;
pub use crypto::{Address, Wallet};
pub use ledger::{Ledger, LedgerConfig, LedgerError};
pub use transaction::Transaction;
