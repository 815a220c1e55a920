// API module
//
// This module contains the HTTP surface of a ledger node

pub mod handlers;
pub mod routes;
pub mod state;

// Re-export main components for easier access
pub use routes::configure_routes;
pub use state::NodeState;
