use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use std::time::Duration;

use super::block::Block;
use super::transaction::Transaction;

/// Failures talking to a single peer; callers log and skip them
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("Peer {peer} unreachable: {reason}")]
    Unreachable { peer: String, reason: String },

    #[error("Peer {peer} answered with status {status}")]
    Status { peer: String, status: u16 },

    #[error("Peer {peer} sent an unreadable payload: {reason}")]
    Decode { peer: String, reason: String },
}

/// How a peer reacted to something we broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastStatus {
    Accepted,
    Rejected,
    /// The peer's chain disagrees with ours; a resolve is due
    Conflict,
}

impl BroadcastStatus {
    fn from_status(status: StatusCode) -> Self {
        if status == StatusCode::CONFLICT {
            BroadcastStatus::Conflict
        } else if status.is_success() {
            BroadcastStatus::Accepted
        } else {
            BroadcastStatus::Rejected
        }
    }
}

/// Body of a block broadcast
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BlockEnvelope {
    pub block: Block,
}

/// The part of a peer's chain response we care about
#[derive(Debug, Deserialize)]
struct ChainEnvelope {
    chain: Vec<Block>,
}

/// Best-effort delivery to and retrieval from other nodes
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn broadcast_transaction(
        &self,
        peer: &str,
        transaction: &Transaction,
    ) -> Result<BroadcastStatus, PeerError>;

    async fn broadcast_block(&self, peer: &str, block: &Block) -> Result<BroadcastStatus, PeerError>;

    async fn fetch_chain(&self, peer: &str) -> Result<Vec<Block>, PeerError>;
}

/// Talks to peers over their HTTP API
#[derive(Debug, Clone)]
pub struct HttpPeerTransport {
    client: reqwest::Client,
}

impl HttpPeerTransport {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpPeerTransport { client })
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        peer: &str,
        path: &str,
        body: &T,
    ) -> Result<BroadcastStatus, PeerError> {
        let response = self
            .client
            .post(peer_url(peer, path))
            .json(body)
            .send()
            .await
            .map_err(|e| unreachable(peer, e))?;

        Ok(BroadcastStatus::from_status(response.status()))
    }
}

#[async_trait]
impl PeerTransport for HttpPeerTransport {
    async fn broadcast_transaction(
        &self,
        peer: &str,
        transaction: &Transaction,
    ) -> Result<BroadcastStatus, PeerError> {
        self.post(peer, "broadcast-transaction", transaction).await
    }

    async fn broadcast_block(&self, peer: &str, block: &Block) -> Result<BroadcastStatus, PeerError> {
        let envelope = BlockEnvelope {
            block: block.clone(),
        };
        self.post(peer, "broadcast-block", &envelope).await
    }

    async fn fetch_chain(&self, peer: &str) -> Result<Vec<Block>, PeerError> {
        let response = self
            .client
            .get(peer_url(peer, "chain"))
            .send()
            .await
            .map_err(|e| unreachable(peer, e))?;

        if !response.status().is_success() {
            return Err(PeerError::Status {
                peer: peer.to_string(),
                status: response.status().as_u16(),
            });
        }

        let envelope: ChainEnvelope = response.json().await.map_err(|e| PeerError::Decode {
            peer: peer.to_string(),
            reason: e.to_string(),
        })?;

        Ok(envelope.chain)
    }
}

fn unreachable(peer: &str, error: reqwest::Error) -> PeerError {
    PeerError::Unreachable {
        peer: peer.to_string(),
        reason: error.to_string(),
    }
}

/// Peers are stored as `host:port`; a scheme is added when missing.
fn peer_url(peer: &str, path: &str) -> String {
    let base = peer.trim_end_matches('/');
    if base.starts_with("http://") || base.starts_with("https://") {
        format!("{}/api/v1/{}", base, path)
    } else {
        format!("http://{}/api/v1/{}", base, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_url() {
        assert_eq!(
            peer_url("localhost:5001", "chain"),
            "http://localhost:5001/api/v1/chain"
        );
        assert_eq!(
            peer_url("https://node.example/", "broadcast-block"),
            "https://node.example/api/v1/broadcast-block"
        );
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(BroadcastStatus::from_status(StatusCode::CREATED), BroadcastStatus::Accepted);
        assert_eq!(BroadcastStatus::from_status(StatusCode::CONFLICT), BroadcastStatus::Conflict);
        assert_eq!(BroadcastStatus::from_status(StatusCode::BAD_REQUEST), BroadcastStatus::Rejected);
    }

    #[test]
    fn test_chain_envelope_ignores_extra_fields() {
        let json = format!(
            r#"{{"length":1,"is_valid":true,"chain":[{}]}}"#,
            serde_json::to_string(&Block::genesis()).unwrap()
        );
        let envelope: ChainEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(envelope.chain, vec![Block::genesis()]);
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_an_error() {
        let transport = HttpPeerTransport::new(Duration::from_millis(200)).unwrap();
        // Port 9 (discard) on loopback is not served by anything here.
        let result = transport.fetch_chain("127.0.0.1:9").await;
        assert!(matches!(result, Err(PeerError::Unreachable { .. })));
    }
}
