//! Gateway dispatch layer.
//!
//! Ties the session registry, the validator pipeline, the tool registry and
//! the task executor together. Transports hand inbound messages to
//! [`Gateway::handle_message`] (or feed a per-session loop started with
//! [`Gateway::spawn_session_loop`]) and drain the outbound receiver they got
//! from [`Gateway::open_session`].

mod handler;
pub mod registry;
pub mod sweeper;
pub mod tools;

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::protocol::{methods, Message};
use crate::session::{
    ClientSettings, RequestCorrelator, Session, SessionKind, SessionManager, SessionParams,
};
use crate::task::{ExecutorConfig, TaskExecutor, TaskStore};
use crate::validation::{ValidationSettings, ValidatorPipeline};

pub use registry::{RegisteredTool, ToolBuilder, ToolContext, ToolRegistry, ToolResult};
pub use sweeper::SessionSweeper;

/// Default number of tools per `tools/list` page
pub const DEFAULT_TOOLS_PAGE_SIZE: usize = 50;

/// Settings the gateway consumes, fixed at construction.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub validation: ValidationSettings,
    pub outbound_buffer: usize,
    pub tools_page_size: usize,
    pub tools_enabled: bool,
    pub tasks_enabled: bool,
    pub executor: ExecutorConfig,
    pub max_task_history: usize,
    pub client: ClientSettings,
    pub server_name: String,
    pub server_version: String,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            validation: ValidationSettings::default(),
            outbound_buffer: crate::session::DEFAULT_OUTBOUND_BUFFER,
            tools_page_size: DEFAULT_TOOLS_PAGE_SIZE,
            tools_enabled: true,
            tasks_enabled: true,
            executor: ExecutorConfig::default(),
            max_task_history: crate::task::store::DEFAULT_MAX_HISTORY,
            client: ClientSettings::default(),
            server_name: "pezzottify-gateway".to_string(),
            server_version: format!("{}-{}", env!("APP_VERSION"), env!("GIT_HASH")),
        }
    }
}

#[derive(Clone)]
pub struct Gateway {
    sessions: Arc<SessionManager>,
    pipeline: Arc<ValidatorPipeline>,
    tools: Arc<ToolRegistry>,
    tasks: Arc<TaskStore>,
    executor: Arc<TaskExecutor>,
    settings: Arc<GatewaySettings>,
    start_time: Instant,
}

impl Gateway {
    /// Gateway serving the built-in tools.
    pub fn new(settings: GatewaySettings) -> Self {
        let mut tools = ToolRegistry::new();
        tools::register_builtin_tools(&mut tools);
        Self::with_tools(settings, tools)
    }

    pub fn with_tools(settings: GatewaySettings, tools: ToolRegistry) -> Self {
        let pipeline = ValidatorPipeline::standard(&settings.validation);
        info!(
            "Gateway initialized with {} tools, validators {:?}",
            tools.tool_count(),
            pipeline.validator_names()
        );

        Self {
            sessions: Arc::new(SessionManager::new(settings.outbound_buffer)),
            pipeline: Arc::new(pipeline),
            tools: Arc::new(tools),
            tasks: Arc::new(TaskStore::new(settings.max_task_history)),
            executor: Arc::new(TaskExecutor::new(settings.executor.clone())),
            settings: Arc::new(settings),
            start_time: Instant::now(),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn tasks(&self) -> &Arc<TaskStore> {
        &self.tasks
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    /// Register a session for a new connection.
    pub async fn open_session(
        &self,
        owner_id: &str,
        kind: SessionKind,
        params: SessionParams,
    ) -> (Arc<Session>, mpsc::Receiver<Message>) {
        self.sessions.create_session(owner_id, kind, params).await
    }

    pub async fn close_session(&self, session_id: &str) -> bool {
        self.sessions.close_session(session_id).await
    }

    /// Correlator for requests the gateway initiates over a client session.
    pub fn correlator(&self, session_id: &str) -> RequestCorrelator {
        RequestCorrelator::new(self.sessions.clone(), session_id, self.settings.client.clone())
    }

    /// Close every session.
    pub async fn shutdown(&self) -> usize {
        self.sessions.close_all_sessions().await
    }

    /// Dispatch inbound messages for one session until `inbound` closes or
    /// the session goes away.
    ///
    /// Replies are written to the session's outbound channel. `tasks/send`
    /// runs on its own task so the loop keeps serving `tasks/cancel` and
    /// friends while an invocation is in progress.
    pub fn spawn_session_loop(
        &self,
        session_id: impl Into<String>,
        mut inbound: mpsc::Receiver<Message>,
    ) -> JoinHandle<()> {
        let gateway = self.clone();
        let session_id = session_id.into();

        tokio::spawn(async move {
            debug!("Session loop started for {}", session_id);
            while let Some(message) = inbound.recv().await {
                if message.method_name() == methods::TASKS_SEND {
                    let gateway = gateway.clone();
                    let session_id = session_id.clone();
                    tokio::spawn(async move {
                        gateway.reply(&session_id, message).await;
                    });
                    continue;
                }
                if !gateway.reply(&session_id, message).await {
                    break;
                }
            }
            debug!("Session loop finished for {}", session_id);
        })
    }

    /// Handle one message and queue its reply. Returns `false` once the
    /// session can no longer be written to.
    async fn reply(&self, session_id: &str, message: Message) -> bool {
        let Some(response) = self.handle_message(session_id, message).await else {
            return true;
        };
        let session = match self.sessions.get_session(session_id).await {
            Ok(session) => session,
            Err(_) => return false,
        };
        match session.send(response).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Dropping reply for session {}: {}", session_id, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = GatewaySettings::default();
        assert_eq!(settings.tools_page_size, 50);
        assert!(settings.tools_enabled);
        assert!(settings.tasks_enabled);
        assert_eq!(settings.validation.max_params_bytes, 100 * 1024);
        assert!(settings.server_version.starts_with(env!("APP_VERSION")));
    }

    #[tokio::test]
    async fn test_new_gateway_registers_builtins() {
        let gateway = Gateway::new(GatewaySettings::default());
        assert_eq!(gateway.tools().tool_count(), 2);
        assert_eq!(gateway.sessions().session_count().await, 0);
        assert!(gateway.tasks().is_empty());
    }

    #[tokio::test]
    async fn test_correlator_uses_client_settings() {
        let gateway = Gateway::new(GatewaySettings {
            client: ClientSettings {
                request_timeout: std::time::Duration::from_secs(7),
                max_skipped_pages: 5,
            },
            ..GatewaySettings::default()
        });
        let (session, _rx) = gateway
            .open_session("upstream", SessionKind::Client, SessionParams::default())
            .await;

        let correlator = gateway.correlator(session.id());
        assert_eq!(correlator.session_id(), session.id());
        assert_eq!(correlator.settings().request_timeout.as_secs(), 7);
        assert_eq!(correlator.settings().max_skipped_pages, 5);
    }
}
