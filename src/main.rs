use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use clap::Parser;
use log::{error, info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use std::path::Path;
use std::sync::Arc;

mod api;
mod blockchain;
mod config;

use blockchain::peers::{HttpPeerTransport, PeerTransport};
use blockchain::storage::{FileStore, SledStore};
use blockchain::{Address, Ledger, Wallet};
use config::{NodeConfig, StorageBackend};

// Load the node's wallet, creating and saving one on first start
fn load_or_create_wallet(path: &Path) -> Option<Wallet> {
    match Wallet::load_from(path) {
        Ok(wallet) => {
            info!("Loaded wallet with address: {}", wallet.address());
            Some(wallet)
        }
        Err(err) => {
            info!("No usable wallet at {} ({}), creating one", path.display(), err);
            let wallet = Wallet::new();
            match wallet.save_to(path) {
                Ok(()) => info!("Created wallet with address: {}", wallet.address()),
                Err(err) => {
                    warn!("Failed to save wallet: {}", err);
                    warn!("Mining is disabled until a wallet is created");
                    return None;
                }
            }
            Some(wallet)
        }
    }
}

// Build the ledger on the configured backend, falling back to memory
fn initialize_ledger(
    config: &NodeConfig,
    identity: Option<Address>,
    transport: Arc<dyn PeerTransport>,
) -> Ledger {
    let node_id = config.node_id();
    let ledger_config = config.ledger_config();

    match config.storage {
        StorageBackend::File => {
            let store = FileStore::new(&config.data_dir, &node_id);
            info!("Using ledger record at {}", store.path().display());
            Ledger::with_storage(node_id, identity, &ledger_config, transport, Arc::new(store))
        }
        StorageBackend::Sled => match SledStore::open(config.sled_path(), &node_id) {
            Ok(store) => {
                info!("Using sled database at {}", config.sled_path().display());
                Ledger::with_storage(node_id, identity, &ledger_config, transport, Arc::new(store))
            }
            Err(err) => {
                warn!("Failed to open sled database: {}", err);
                warn!("Creating in-memory ledger instead");
                Ledger::new(node_id, identity, &ledger_config, transport)
            }
        },
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::get_chain,
        api::handlers::get_pending_transactions,
        api::handlers::new_transaction,
        api::handlers::broadcast_transaction,
        api::handlers::broadcast_block,
        api::handlers::mine_block,
        api::handlers::resolve_conflicts,
        api::handlers::get_balance,
        api::handlers::get_identity_balance,
        api::handlers::get_nodes,
        api::handlers::add_node,
        api::handlers::remove_node,
        api::handlers::get_wallet,
        api::handlers::create_wallet,
        api::handlers::load_wallet,
        api::handlers::validate_chain
    ),
    components(
        schemas(
            blockchain::Block,
            blockchain::Transaction,
            blockchain::crypto::Address,
            blockchain::crypto::DigitalSignature,
            blockchain::peers::BlockEnvelope,
            api::handlers::ChainResponse,
            api::handlers::TransactionRequest,
            api::handlers::TransactionResponse,
            api::handlers::MineResponse,
            api::handlers::ResolveResponse,
            api::handlers::BalanceResponse,
            api::handlers::NodeRequest,
            api::handlers::NodesResponse,
            api::handlers::WalletResponse
        )
    ),
    tags(
        (name = "ledger", description = "Ledger node API endpoints")
    ),
    info(
        title = "Ledger Node API",
        version = "1.0.0",
        description = "A proof-of-work ledger node",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = NodeConfig::parse();

    std::fs::create_dir_all(&config.data_dir).unwrap_or_else(|e| {
        warn!("Failed to create data directory: {}", e);
    });

    let wallet = load_or_create_wallet(&config.wallet_path());
    let transport = Arc::new(HttpPeerTransport::new(config.peer_timeout())?);
    let ledger = initialize_ledger(
        &config,
        wallet.as_ref().map(|w| w.address().clone()),
        transport,
    );

    let node = web::Data::new(api::NodeState::new(
        ledger.clone(),
        wallet,
        config.wallet_path(),
    ));

    info!(
        "Starting node {} at http://{}:{}",
        ledger.node_id(),
        config.host,
        config.port
    );

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        let openapi = ApiDoc::openapi();

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(node.clone())
            .configure(api::configure_routes)
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", openapi.clone())
            )
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await?;

    if let Err(err) = ledger.flush() {
        error!("Final save failed: {}", err);
    }

    Ok(())
}
