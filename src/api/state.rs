use log::info;

use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};

use crate::blockchain::crypto::CryptoError;
use crate::blockchain::{Ledger, Wallet};

/// Shared by every request handler
#[derive(Debug)]
pub struct NodeState {
    pub ledger: Ledger,
    wallet: RwLock<Option<Wallet>>,
    wallet_path: PathBuf,
}

impl NodeState {
    pub fn new(ledger: Ledger, wallet: Option<Wallet>, wallet_path: PathBuf) -> Self {
        NodeState {
            ledger,
            wallet: RwLock::new(wallet),
            wallet_path,
        }
    }

    pub fn wallet(&self) -> Option<Wallet> {
        self.wallet
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Makes `wallet` this node's identity
    fn install(&self, wallet: Wallet) {
        self.ledger.set_identity(Some(wallet.address().clone()));
        info!("Node identity is now {}", wallet.address());
        *self.wallet.write().unwrap_or_else(PoisonError::into_inner) = Some(wallet);
    }

    /// Generates fresh keys, saves them and adopts them as the identity
    pub fn create_wallet(&self) -> Result<Wallet, CryptoError> {
        let wallet = Wallet::new();
        wallet.save_to(&self.wallet_path)?;
        self.install(wallet.clone());
        Ok(wallet)
    }

    /// Reloads the keys saved for this node
    pub fn load_wallet(&self) -> Result<Wallet, CryptoError> {
        let wallet = Wallet::load_from(&self.wallet_path)?;
        self.install(wallet.clone());
        Ok(wallet)
    }
}
