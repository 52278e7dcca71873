//! Shared constants for end-to-end tests
//!
//! This module contains all constants used across the test suite.

use std::time::Duration;

// ============================================================================
// Identities
// ============================================================================

/// Owner id used for most test sessions
pub const TEST_OWNER: &str = "test-owner";

/// Client name sent in `initialize`
pub const TEST_CLIENT_NAME: &str = "e2e-client";

// ============================================================================
// Timing
// ============================================================================

/// How long a test waits for a single outbound message
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Delay between streamed chunks, short to keep tests fast
pub const FAST_CHUNK_DELAY: Duration = Duration::from_millis(1);

/// Inbound channel size of a test client
pub const CLIENT_CHANNEL_SIZE: usize = 32;
