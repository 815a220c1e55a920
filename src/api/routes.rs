use actix_web::web;

use super::handlers;

/// Configures the API routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/chain", web::get().to(handlers::get_chain))
            .route("/transactions/pending", web::get().to(handlers::get_pending_transactions))
            .route("/transactions/new", web::post().to(handlers::new_transaction))
            .route("/broadcast-transaction", web::post().to(handlers::broadcast_transaction))
            .route("/broadcast-block", web::post().to(handlers::broadcast_block))
            .route("/mine", web::post().to(handlers::mine_block))
            .route("/resolve-conflicts", web::post().to(handlers::resolve_conflicts))
            .route("/balance", web::get().to(handlers::get_balance))
            .route("/balance/{identity}", web::get().to(handlers::get_identity_balance))
            .route("/nodes", web::get().to(handlers::get_nodes))
            .route("/nodes", web::post().to(handlers::add_node))
            .route("/nodes/{node}", web::delete().to(handlers::remove_node))
            .route("/wallet", web::get().to(handlers::get_wallet))
            .route("/wallet", web::post().to(handlers::create_wallet))
            .route("/wallet/load", web::post().to(handlers::load_wallet))
            .route("/validate", web::get().to(handlers::validate_chain))
    );
}
