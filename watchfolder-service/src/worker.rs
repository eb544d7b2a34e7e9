//! Import worker bridge
//!
//! The external worker connects over a WebSocket, receives `import`
//! requests and reports back with `status` messages.

mod bridge;
mod handlers;
pub mod messages;

pub use bridge::WorkerBridge;
pub use handlers::handle_worker_connection;
