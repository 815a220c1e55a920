use sha2::{Digest, Sha256};

use super::block::Block;

/// SHA-256 of arbitrary content as a lowercase hexadecimal string
pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Digest of every block field, used both for chain linkage and as the
/// predecessor input of the next block's proof of work.
pub fn digest_block(block: &Block) -> String {
    let encoded = serde_json::to_vec(block).expect("block encoding");
    digest_bytes(&encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::Address;
    use crate::blockchain::transaction::Transaction;

    #[test]
    fn test_digest_bytes() {
        assert_eq!(
            digest_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_genesis_digest_is_stable() {
        assert_eq!(digest_block(&Block::genesis()), digest_block(&Block::genesis()));
        assert_eq!(digest_block(&Block::genesis()).len(), 64);
    }

    #[test]
    fn test_digest_is_order_sensitive() {
        let first = Transaction::reward(Address::from("a"), 1.0);
        let second = Transaction::reward(Address::from("b"), 1.0);

        let block = Block::new(1, "h".to_string(), vec![first.clone(), second.clone()], 5);
        let mut swapped = block.clone();
        swapped.transactions = vec![second, first];

        assert_ne!(digest_block(&block), digest_block(&swapped));
    }

    #[test]
    fn test_digest_covers_proof() {
        let block = Block::new(1, "h".to_string(), Vec::new(), 5);
        let mut other = block.clone();
        other.proof = 6;
        assert_ne!(digest_block(&block), digest_block(&other));
    }
}
