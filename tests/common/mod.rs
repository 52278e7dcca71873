//! Common test infrastructure
//!
//! This module provides all the infrastructure needed for end-to-end tests.
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{TestGateway, TEST_OWNER};
//!
//! #[tokio::test]
//! async fn test_ping() {
//!     let gateway = TestGateway::spawn().await;
//!     let mut client = gateway.connect(TEST_OWNER).await;
//!
//!     let response = client.request("ping", None).await;
//!     assert!(response.error.is_none());
//! }
//! ```

mod client;
mod constants;
mod server;

// Public API - this is what tests import
pub use client::{is_final_update, TestClient};
pub use constants::*;
pub use server::TestGateway;
