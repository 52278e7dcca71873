//! Test gateway lifecycle management
//!
//! Each test gets an isolated gateway with its own session registry and task
//! store. Clients are wired to it through in-memory channels instead of a
//! wire transport.

use super::client::TestClient;
use super::constants::*;
use pezzottify_gateway::session::{SessionKind, SessionParams};
use pezzottify_gateway::task::ExecutorConfig;
use pezzottify_gateway::{Gateway, GatewaySettings};
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Test gateway instance
pub struct TestGateway {
    pub gateway: Gateway,
}

impl TestGateway {
    /// Spawns a gateway with default settings and fast task streaming
    pub async fn spawn() -> Self {
        Self::spawn_with(GatewaySettings::default()).await
    }

    /// Spawns a gateway with custom settings
    ///
    /// The stream chunk delay is always shortened so streaming tests do not
    /// sleep for real.
    pub async fn spawn_with(settings: GatewaySettings) -> Self {
        let settings = GatewaySettings {
            executor: ExecutorConfig {
                stream_chunk_delay: FAST_CHUNK_DELAY,
            },
            ..settings
        };
        Self {
            gateway: Gateway::new(settings),
        }
    }

    /// Opens a server session for `owner_id` and starts its dispatch loop
    pub async fn connect(&self, owner_id: &str) -> TestClient {
        self.connect_with(owner_id, SessionParams::default()).await
    }

    /// Opens a server session carrying the given transport headers
    pub async fn connect_with_headers(
        &self,
        owner_id: &str,
        headers: HashMap<String, String>,
    ) -> TestClient {
        let params = SessionParams {
            context: headers,
            ..Default::default()
        };
        self.connect_with(owner_id, params).await
    }

    /// Opens a server session with explicit session parameters
    pub async fn connect_with(&self, owner_id: &str, params: SessionParams) -> TestClient {
        let (session, outbound) = self
            .gateway
            .open_session(owner_id, SessionKind::Server, params)
            .await;
        let (inbound_tx, inbound_rx) = mpsc::channel(CLIENT_CHANNEL_SIZE);
        let loop_handle = self.gateway.spawn_session_loop(session.id(), inbound_rx);

        TestClient::new(session, inbound_tx, outbound, loop_handle)
    }

    pub async fn session_count(&self) -> usize {
        self.gateway.sessions().session_count().await
    }
}
