//! TCP networking layer for nodewatch.
//!
//! Provides:
//! - `TcpTransport`: implements `StatusTransport` over plain TCP
//! - `ProxyServer`: serves the subscriber protocol to connected clients
//! - `SubscriberClient`: reads decoded updates from a proxy
//!
//! Connections open with a small line-based preamble carrying the chain's
//! network key and the requested protocol (see [`handshake`]).

pub mod client;
mod error;
pub mod handshake;
pub mod server;
pub mod subscriber;

pub use client::TcpTransport;
pub use error::NetError;
pub use server::{ProxyServer, ServerConfig};
pub use subscriber::SubscriberClient;
