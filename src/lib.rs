//! Heimdall - caching and authorization gateway for GraphQL backends
//!
//! Heimdall sits in front of a single GraphQL endpoint. Queries are cached
//! by (path, effective TTL, body digest) and replayed until their TTL runs
//! out; mutations always go straight to the backend. It also answers the
//! backend's authorization webhook, granting a role to allowed callers.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use heimdall::{Heimdall, router};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let gateway = Heimdall::builder()
//!         .endpoint("http://localhost:8080/v1/graphql")
//!         .default_ttl(30)
//!         .build()?;
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8787").await?;
//!     axum::serve(listener, router(Arc::new(gateway))).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod cache;
pub mod classify;
pub mod digest;
pub mod error;
pub mod gateway;
pub mod server;
pub mod telemetry;
pub mod upstream;

// Re-export main types at crate root
pub use error::{HeimdallError, Result};
pub use gateway::{CacheStatus, Gateway, GatewayResponse, Heimdall, HeimdallBuilder};
pub use server::router;

/// Package version.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");
