//! WebSocket entry point, wire protocol and outbound transport

pub mod handler;
pub mod protocol;
pub mod transport;

pub use handler::ws_handler;
