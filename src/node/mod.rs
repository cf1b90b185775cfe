//! # Node Module
//!
//! - **`state`**: the connection state machine shared with transports
//! - **`client`**: `NodeClient`, one connection plus its health counters

pub mod client;
pub mod state;

pub use client::{NodeClient, NodeHealth, NodeStatus};
pub use state::ConnectionState;
