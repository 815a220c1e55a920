use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use std::fmt;
use std::fs;
use std::path::Path;

use super::transaction::{signing_payload, Transaction};

/// Sender identity used for system-minted mining rewards
pub const MINING_SENDER: &str = "MINING";

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Decoding error: {0}")]
    DecodingError(String),

    #[error("Key file error: {0}")]
    KeyFile(#[from] std::io::Error),
}

/// Identity of a ledger participant (public key in base58 format)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub struct Address(pub String);

impl Address {
    /// Creates a new address from a public key
    pub fn from_public_key(public_key: &VerifyingKey) -> Self {
        let bytes = public_key.as_bytes();
        let encoded = bs58::encode(bytes).into_string();
        Address(encoded)
    }

    /// The reserved sender of reward transactions
    pub fn mining() -> Self {
        Address(MINING_SENDER.to_string())
    }

    pub fn is_mining(&self) -> bool {
        self.0 == MINING_SENDER
    }

    /// Converts the address to a public key
    pub fn to_public_key(&self) -> Result<VerifyingKey, CryptoError> {
        let bytes = bs58::decode(&self.0)
            .into_vec()
            .map_err(|e| CryptoError::DecodingError(e.to_string()))?;

        VerifyingKey::from_bytes(&bytes.try_into().map_err(|_| {
            CryptoError::InvalidPublicKey("Invalid public key bytes".to_string())
        })?)
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Address(value.to_string())
    }
}

/// Base58-encoded signature; empty for reward transactions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DigitalSignature(pub String);

impl DigitalSignature {
    pub fn from_signature(signature: &Signature) -> Self {
        let bytes = signature.to_bytes();
        DigitalSignature(bs58::encode(bytes).into_string())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_signature(&self) -> Result<Signature, CryptoError> {
        let bytes = bs58::decode(&self.0)
            .into_vec()
            .map_err(|e| CryptoError::DecodingError(e.to_string()))?;

        let signature_bytes: [u8; 64] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidSignature("Invalid signature length".to_string())
        })?;

        Ok(Signature::from_bytes(&signature_bytes))
    }
}

/// Checks the signature binding a transaction's sender, recipient and amount.
///
/// The ledger never touches key material; it only asks this service whether a
/// transaction was signed by the identity it claims to come from.
pub trait SignatureService: Send + Sync {
    fn verify(&self, transaction: &Transaction) -> bool;
}

/// Ed25519 signatures where the sender identity is the base58 public key
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Signatures;

impl SignatureService for Ed25519Signatures {
    fn verify(&self, transaction: &Transaction) -> bool {
        if transaction.is_reward() || transaction.signature().is_empty() {
            return false;
        }

        let public_key = match transaction.sender().to_public_key() {
            Ok(key) => key,
            Err(_) => return false,
        };

        let message = signing_payload(
            transaction.sender(),
            transaction.recipient(),
            transaction.amount(),
        );

        verify_signature(&message, transaction.signature(), &public_key).unwrap_or(false)
    }
}

/// A key pair whose public half is this node's identity
#[derive(Debug, Clone)]
pub struct Wallet {
    signing_key: SigningKey,
    address: Address,
}

impl Wallet {
    /// Creates a new wallet with a random keypair
    pub fn new() -> Self {
        let mut csprng = OsRng;
        let signing_key = SigningKey::generate(&mut csprng);
        Self::from_signing_key(signing_key)
    }

    /// Creates a wallet from an existing secret key
    pub fn from_secret_key(secret_key_bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes_array: [u8; 32] = secret_key_bytes.try_into().map_err(|_| {
            CryptoError::InvalidPrivateKey("Invalid private key length".to_string())
        })?;

        Ok(Self::from_signing_key(SigningKey::from_bytes(&bytes_array)))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let address = Address::from_public_key(&signing_key.verifying_key());

        Wallet {
            signing_key,
            address,
        }
    }

    /// Loads a wallet from a file holding the hex-encoded secret key
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, CryptoError> {
        let contents = fs::read_to_string(path)?;
        let bytes = hex::decode(contents.trim())
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;
        Self::from_secret_key(&bytes)
    }

    /// Writes the hex-encoded secret key to `path`
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), CryptoError> {
        fs::write(path, hex::encode(self.export_secret_key()))?;
        Ok(())
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Signs a message with the wallet's private key
    pub fn sign(&self, message: &[u8]) -> DigitalSignature {
        let signature = self.signing_key.sign(message);
        DigitalSignature::from_signature(&signature)
    }

    /// Signs a transfer from this wallet's identity
    pub fn sign_transaction(&self, recipient: &Address, amount: f64) -> DigitalSignature {
        self.sign(&signing_payload(&self.address, recipient, amount))
    }

    pub fn export_secret_key(&self) -> Vec<u8> {
        self.signing_key.to_bytes().to_vec()
    }
}

impl Default for Wallet {
    fn default() -> Self {
        Self::new()
    }
}

/// Verifies a signature against a message and public key
pub fn verify_signature(
    message: &[u8],
    signature: &DigitalSignature,
    public_key: &VerifyingKey,
) -> Result<bool, CryptoError> {
    let signature = signature.to_signature()?;
    Ok(public_key.verify(message, &signature).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signing_and_verification() {
        let wallet = Wallet::new();
        let message = b"Hello, world!";

        let public_key = wallet.address().to_public_key().unwrap();

        let signature = wallet.sign(message);
        assert!(verify_signature(message, &signature, &public_key).unwrap());
        assert!(!verify_signature(b"Wrong message", &signature, &public_key).unwrap());
    }

    #[test]
    fn test_address_conversion() {
        let wallet = Wallet::new();
        let public_key = wallet.address().to_public_key().unwrap();
        assert_eq!(public_key, wallet.signing_key.verifying_key());
    }

    #[test]
    fn test_signed_transaction_verifies() {
        let sender = Wallet::new();
        let recipient = Wallet::new();
        let signature = sender.sign_transaction(recipient.address(), 12.5);

        let transaction = Transaction::new(
            sender.address().clone(),
            recipient.address().clone(),
            12.5,
            signature,
        );
        assert!(Ed25519Signatures.verify(&transaction));
    }

    #[test]
    fn test_tampered_amount_fails_verification() {
        let sender = Wallet::new();
        let recipient = Wallet::new();
        let signature = sender.sign_transaction(recipient.address(), 12.5);

        let transaction = Transaction::new(
            sender.address().clone(),
            recipient.address().clone(),
            125.0,
            signature,
        );
        assert!(!Ed25519Signatures.verify(&transaction));
    }

    #[test]
    fn test_reward_never_verifies() {
        let miner = Wallet::new();
        let reward = Transaction::reward(miner.address().clone(), 10.0);
        assert!(!Ed25519Signatures.verify(&reward));
    }

    #[test]
    fn test_wallet_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet-5000.txt");

        let wallet = Wallet::new();
        wallet.save_to(&path).unwrap();

        let loaded = Wallet::load_from(&path).unwrap();
        assert_eq!(loaded.address(), wallet.address());
    }

    #[test]
    fn test_load_missing_wallet_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = Wallet::load_from(dir.path().join("absent.txt"));
        assert!(matches!(result, Err(CryptoError::KeyFile(_))));
    }
}
