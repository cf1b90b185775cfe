//! # Cluster Module
//!
//! - **`builder`**: `ClusterBuilder`, validation and retry budget resolution
//! - **`client`**: `ClusterClient`, node selection and the retry loop

pub mod builder;
pub mod client;

pub use builder::{resolve_retry_budget, ClusterBuilder, DEFAULT_TIMEOUT};
pub use client::{ClusterClient, OpenErrorMode};
