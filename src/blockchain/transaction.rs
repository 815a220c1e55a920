use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use super::crypto::{Address, DigitalSignature};

/// Reasons a transaction is refused admission to the pool
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: f64, available: f64 },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Sender {0} is reserved for mining rewards")]
    ReservedSender(String),

    #[error("Transaction is already pending")]
    Duplicate,
}

/// An immutable value transfer.
///
/// Field order is part of the persisted and hashed format: sender, recipient,
/// amount, signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    sender: Address,
    recipient: Address,
    amount: f64,
    #[serde(default)]
    signature: DigitalSignature,
}

/// The signed portion of a transaction, also the proof-of-work input
#[derive(Serialize)]
struct SigningPayload<'a> {
    sender: &'a str,
    recipient: &'a str,
    amount: f64,
}

impl Transaction {
    pub fn new(
        sender: Address,
        recipient: Address,
        amount: f64,
        signature: DigitalSignature,
    ) -> Self {
        Transaction {
            sender,
            recipient,
            amount,
            signature,
        }
    }

    /// Creates the system-minted reward credited to a block's miner
    pub fn reward(recipient: Address, amount: f64) -> Self {
        Transaction {
            sender: Address::mining(),
            recipient,
            amount,
            signature: DigitalSignature::default(),
        }
    }

    pub fn sender(&self) -> &Address {
        &self.sender
    }

    pub fn recipient(&self) -> &Address {
        &self.recipient
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }

    pub fn signature(&self) -> &DigitalSignature {
        &self.signature
    }

    pub fn is_reward(&self) -> bool {
        self.sender.is_mining()
    }

    pub(crate) fn write_payload(&self, out: &mut Vec<u8>) {
        write_payload(out, &self.sender, &self.recipient, self.amount);
    }
}

/// Canonical bytes signed by a sender and fed into proof-of-work guesses
pub fn signing_payload(sender: &Address, recipient: &Address, amount: f64) -> Vec<u8> {
    let mut out = Vec::new();
    write_payload(&mut out, sender, recipient, amount);
    out
}

fn write_payload(out: &mut Vec<u8>, sender: &Address, recipient: &Address, amount: f64) {
    let payload = SigningPayload {
        sender: &sender.0,
        recipient: &recipient.0,
        amount,
    };
    // Plain strings and a float cannot fail to encode.
    serde_json::to_writer(out, &payload).expect("transaction payload encoding");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(amount: f64) -> Transaction {
        Transaction::new(
            Address::from("alice"),
            Address::from("bob"),
            amount,
            DigitalSignature("sig".to_string()),
        )
    }

    #[test]
    fn test_reward_transaction() {
        let reward = Transaction::reward(Address::from("miner"), 10.0);

        assert!(reward.is_reward());
        assert_eq!(reward.sender().0, "MINING");
        assert_eq!(reward.recipient().0, "miner");
        assert!(reward.signature().is_empty());
    }

    #[test]
    fn test_payload_field_order() {
        let transaction = transfer(50.0);
        let payload = signing_payload(transaction.sender(), transaction.recipient(), transaction.amount());
        let payload = String::from_utf8(payload).unwrap();
        assert_eq!(payload, r#"{"sender":"alice","recipient":"bob","amount":50.0}"#);
    }

    #[test]
    fn test_payload_excludes_signature() {
        let mut other = transfer(50.0);
        other.signature = DigitalSignature("different".to_string());
        let mut original = Vec::new();
        transfer(50.0).write_payload(&mut original);
        let mut changed = Vec::new();
        other.write_payload(&mut changed);
        assert_eq!(original, changed);
    }

    #[test]
    fn test_serialized_field_order() {
        let json = serde_json::to_string(&transfer(1.5)).unwrap();
        assert_eq!(
            json,
            r#"{"sender":"alice","recipient":"bob","amount":1.5,"signature":"sig"}"#
        );
    }

    #[test]
    fn test_equality_covers_all_fields() {
        assert_eq!(transfer(5.0), transfer(5.0));
        assert_ne!(transfer(5.0), transfer(6.0));
    }
}
