use actix_web::{web, HttpResponse, Responder};
use log::warn;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::state::NodeState;
use crate::blockchain::peers::BlockEnvelope;
use crate::blockchain::{Address, Block, LedgerError, Transaction};

/// Data structure shared with every handler
pub type NodeData = web::Data<NodeState>;

/// Response for the chain endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The length of the chain
    pub length: usize,

    /// The blocks in the chain
    pub chain: Vec<Block>,

    /// Whether the chain is valid
    pub is_valid: bool,

    /// Whether a peer rejected one of our blocks
    pub resolve_conflicts: bool,
}

/// Request for a transfer signed by this node's wallet
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionRequest {
    /// The recipient's identity
    pub recipient: String,

    /// The amount to transfer
    pub amount: f64,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    pub message: String,
    pub transaction: Transaction,
    /// Sender balance after the transfer
    pub funds: f64,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineResponse {
    pub message: String,
    pub block: Block,
    /// Miner balance after the reward
    pub funds: f64,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ResolveResponse {
    pub message: String,
    /// Whether a peer chain replaced ours
    pub replaced: bool,
    pub length: usize,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    pub address: String,
    pub balance: f64,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct NodeRequest {
    /// Peer address as host:port
    pub node: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct NodesResponse {
    pub message: String,
    pub all_nodes: Vec<String>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct WalletResponse {
    /// The wallet's address
    pub address: String,

    /// Hex-encoded secret key, only returned when the wallet is created
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,

    pub balance: f64,
}

fn error_response(err: LedgerError) -> HttpResponse {
    let mut response = match &err {
        LedgerError::Rejected(_)
        | LedgerError::NoIdentity
        | LedgerError::InvalidBlock(_)
        | LedgerError::InvalidPoolTransaction(_) => HttpResponse::BadRequest(),
        LedgerError::MiningInterrupted => HttpResponse::Conflict(),
        LedgerError::Persistence(_) | LedgerError::SystemError(_) => {
            HttpResponse::InternalServerError()
        }
    };

    response.json(serde_json::json!({ "error": err.to_string() }))
}

fn no_wallet() -> HttpResponse {
    HttpResponse::BadRequest().json(serde_json::json!({
        "error": "No wallet set up"
    }))
}

/// Get the full chain
///
/// Also consumed by peers during conflict resolution
#[utoipa::path(
    get,
    path = "/api/v1/chain",
    responses(
        (status = 200, description = "Chain retrieved successfully", body = ChainResponse)
    )
)]
pub async fn get_chain(node: NodeData) -> impl Responder {
    let chain = node.ledger.chain();

    let response = ChainResponse {
        length: chain.len(),
        chain,
        is_valid: node.ledger.is_valid(),
        resolve_conflicts: node.ledger.needs_resolve(),
    };

    HttpResponse::Ok().json(response)
}

/// Get all pending transactions
#[utoipa::path(
    get,
    path = "/api/v1/transactions/pending",
    responses(
        (status = 200, description = "Pending transactions retrieved successfully", body = Vec<Transaction>)
    )
)]
pub async fn get_pending_transactions(node: NodeData) -> impl Responder {
    HttpResponse::Ok().json(node.ledger.open_transactions())
}

/// Create a new transaction
///
/// Signs a transfer from this node's wallet, pools it and gossips it to peers
#[utoipa::path(
    post,
    path = "/api/v1/transactions/new",
    request_body = TransactionRequest,
    responses(
        (status = 201, description = "Transaction created successfully", body = TransactionResponse),
        (status = 400, description = "Invalid transaction or no wallet")
    )
)]
pub async fn new_transaction(
    node: NodeData,
    transaction_req: web::Json<TransactionRequest>,
) -> impl Responder {
    let wallet = match node.wallet() {
        Some(wallet) => wallet,
        None => return no_wallet(),
    };

    if transaction_req.recipient.is_empty() {
        return HttpResponse::BadRequest().json(serde_json::json!({
            "error": "Recipient is required"
        }));
    }

    let recipient = Address(transaction_req.recipient.clone());
    let amount = transaction_req.amount;
    let signature = wallet.sign_transaction(&recipient, amount);

    match node
        .ledger
        .submit_transaction(recipient, wallet.address().clone(), signature, amount)
        .await
    {
        Ok(transaction) => HttpResponse::Created().json(TransactionResponse {
            message: "Successfully added transaction".to_string(),
            transaction,
            funds: node.ledger.balance_of(wallet.address()),
        }),
        Err(err) => error_response(err),
    }
}

/// Receive a transaction gossiped by a peer
#[utoipa::path(
    post,
    path = "/api/v1/broadcast-transaction",
    request_body = Transaction,
    responses(
        (status = 201, description = "Transaction pooled"),
        (status = 400, description = "Transaction rejected")
    )
)]
pub async fn broadcast_transaction(
    node: NodeData,
    transaction: web::Json<Transaction>,
) -> impl Responder {
    let transaction = transaction.into_inner();

    match node.ledger.receive_transaction(
        transaction.recipient().clone(),
        transaction.sender().clone(),
        transaction.signature().clone(),
        transaction.amount(),
    ) {
        Ok(_) => HttpResponse::Created().json(serde_json::json!({
            "message": "Successfully added transaction"
        })),
        Err(err) => error_response(err),
    }
}

/// Receive a block mined by a peer
///
/// A block that directly extends our tail is validated and appended. A block
/// further ahead means our chain is behind, so a resolve is flagged.
#[utoipa::path(
    post,
    path = "/api/v1/broadcast-block",
    request_body = BlockEnvelope,
    responses(
        (status = 201, description = "Block appended"),
        (status = 200, description = "Peer is ahead, local chain flagged for resolve"),
        (status = 409, description = "Block invalid or peer chain is shorter")
    )
)]
pub async fn broadcast_block(node: NodeData, envelope: web::Json<BlockEnvelope>) -> impl Responder {
    let block = envelope.into_inner().block;
    let tail = node.ledger.last_block();

    if block.index == tail.index + 1 {
        match node.ledger.accept_block(block) {
            Ok(()) => HttpResponse::Created().json(serde_json::json!({
                "message": "Block added"
            })),
            Err(err) => {
                warn!("Rejected broadcast block: {}", err);
                HttpResponse::Conflict().json(serde_json::json!({
                    "error": format!("Block seems invalid: {}", err)
                }))
            }
        }
    } else if block.index > tail.index {
        node.ledger.flag_conflict();
        HttpResponse::Ok().json(serde_json::json!({
            "message": "Blockchain seems to differ from local blockchain"
        }))
    } else {
        HttpResponse::Conflict().json(serde_json::json!({
            "error": "Blockchain seems to be shorter, block not added"
        }))
    }
}

/// Mine a new block
///
/// Refused while a conflict is pending resolution
#[utoipa::path(
    post,
    path = "/api/v1/mine",
    responses(
        (status = 201, description = "Block mined successfully", body = MineResponse),
        (status = 400, description = "No identity or an invalid pending transaction"),
        (status = 409, description = "Conflicts must be resolved first, or mining was interrupted")
    )
)]
pub async fn mine_block(node: NodeData) -> impl Responder {
    if node.ledger.needs_resolve() {
        return HttpResponse::Conflict().json(serde_json::json!({
            "error": "Resolve conflicts first, block not added"
        }));
    }

    match node.ledger.mine().await {
        Ok(block) => HttpResponse::Created().json(MineResponse {
            message: "New Block Mined".to_string(),
            block,
            funds: node.ledger.balance().unwrap_or_default(),
        }),
        Err(err) => error_response(err),
    }
}

/// Adopt the longest valid chain among peers
#[utoipa::path(
    post,
    path = "/api/v1/resolve-conflicts",
    responses(
        (status = 200, description = "Resolution finished", body = ResolveResponse)
    )
)]
pub async fn resolve_conflicts(node: NodeData) -> impl Responder {
    let replaced = node.ledger.resolve().await;

    let message = if replaced {
        "Chain was replaced"
    } else {
        "Local chain kept"
    };

    HttpResponse::Ok().json(ResolveResponse {
        message: message.to_string(),
        replaced,
        length: node.ledger.chain().len(),
    })
}

/// Get this node's balance
#[utoipa::path(
    get,
    path = "/api/v1/balance",
    responses(
        (status = 200, description = "Balance retrieved successfully", body = BalanceResponse),
        (status = 400, description = "No wallet set up")
    )
)]
pub async fn get_balance(node: NodeData) -> impl Responder {
    let identity = match node.ledger.identity() {
        Some(identity) => identity,
        None => return no_wallet(),
    };

    HttpResponse::Ok().json(BalanceResponse {
        balance: node.ledger.balance_of(&identity),
        address: identity.0,
    })
}

/// Get the balance of any identity
#[utoipa::path(
    get,
    path = "/api/v1/balance/{identity}",
    params(
        ("identity" = String, Path, description = "Identity to look up")
    ),
    responses(
        (status = 200, description = "Balance retrieved successfully", body = BalanceResponse)
    )
)]
pub async fn get_identity_balance(node: NodeData, identity: web::Path<String>) -> impl Responder {
    let identity = Address(identity.into_inner());

    HttpResponse::Ok().json(BalanceResponse {
        balance: node.ledger.balance_of(&identity),
        address: identity.0,
    })
}

/// List known peers
#[utoipa::path(
    get,
    path = "/api/v1/nodes",
    responses(
        (status = 200, description = "Peers retrieved successfully", body = NodesResponse)
    )
)]
pub async fn get_nodes(node: NodeData) -> impl Responder {
    HttpResponse::Ok().json(NodesResponse {
        message: "Known nodes".to_string(),
        all_nodes: node.ledger.peers(),
    })
}

/// Add a peer
#[utoipa::path(
    post,
    path = "/api/v1/nodes",
    request_body = NodeRequest,
    responses(
        (status = 201, description = "Peer added", body = NodesResponse),
        (status = 400, description = "No node given")
    )
)]
pub async fn add_node(node: NodeData, node_req: web::Json<NodeRequest>) -> impl Responder {
    let peer = node_req.node.trim();
    if peer.is_empty() {
        return HttpResponse::BadRequest().json(serde_json::json!({
            "error": "No node data found"
        }));
    }

    node.ledger.add_peer(peer);

    HttpResponse::Created().json(NodesResponse {
        message: "Node added successfully".to_string(),
        all_nodes: node.ledger.peers(),
    })
}

/// Remove a peer
#[utoipa::path(
    delete,
    path = "/api/v1/nodes/{node}",
    params(
        ("node" = String, Path, description = "Peer address to forget")
    ),
    responses(
        (status = 200, description = "Peer removed", body = NodesResponse)
    )
)]
pub async fn remove_node(node: NodeData, peer: web::Path<String>) -> impl Responder {
    node.ledger.remove_peer(&peer);

    HttpResponse::Ok().json(NodesResponse {
        message: "Node removed".to_string(),
        all_nodes: node.ledger.peers(),
    })
}

/// Get the wallet this node mines and signs with
#[utoipa::path(
    get,
    path = "/api/v1/wallet",
    responses(
        (status = 200, description = "Current wallet", body = WalletResponse),
        (status = 400, description = "No wallet set up")
    )
)]
pub async fn get_wallet(node: NodeData) -> impl Responder {
    match node.wallet() {
        Some(wallet) => HttpResponse::Ok().json(WalletResponse {
            address: wallet.address().0.clone(),
            private_key: None,
            balance: node.ledger.balance_of(wallet.address()),
        }),
        None => no_wallet(),
    }
}

/// Create a new wallet
///
/// The keys are saved for this node and become its identity
#[utoipa::path(
    post,
    path = "/api/v1/wallet",
    responses(
        (status = 201, description = "Wallet created successfully", body = WalletResponse),
        (status = 500, description = "Saving the keys failed")
    )
)]
pub async fn create_wallet(node: NodeData) -> impl Responder {
    match node.create_wallet() {
        Ok(wallet) => HttpResponse::Created().json(WalletResponse {
            address: wallet.address().0.clone(),
            private_key: Some(hex::encode(wallet.export_secret_key())),
            balance: node.ledger.balance_of(wallet.address()),
        }),
        Err(err) => HttpResponse::InternalServerError().json(serde_json::json!({
            "error": format!("Failed to create wallet: {}", err)
        })),
    }
}

/// Reload the wallet saved for this node
#[utoipa::path(
    post,
    path = "/api/v1/wallet/load",
    responses(
        (status = 200, description = "Wallet loaded", body = WalletResponse),
        (status = 500, description = "Loading the keys failed")
    )
)]
pub async fn load_wallet(node: NodeData) -> impl Responder {
    match node.load_wallet() {
        Ok(wallet) => HttpResponse::Ok().json(WalletResponse {
            address: wallet.address().0.clone(),
            private_key: None,
            balance: node.ledger.balance_of(wallet.address()),
        }),
        Err(err) => HttpResponse::InternalServerError().json(serde_json::json!({
            "error": format!("Failed to load wallet: {}", err)
        })),
    }
}

/// Check if the local chain is valid
#[utoipa::path(
    get,
    path = "/api/v1/validate",
    responses(
        (status = 200, description = "Chain validation status", body = bool)
    )
)]
pub async fn validate_chain(node: NodeData) -> impl Responder {
    HttpResponse::Ok().json(node.ledger.is_valid())
}
