//! WebSocket support for real-time watch status updates
//!
//! Observers connect to receive every status event the scheduler emits,
//! rendered in the locale they asked for, without polling.

mod broadcast;
mod handlers;
mod manager;
pub mod messages;

pub use handlers::handle_observer_connection;
pub use manager::ObserverManager;
