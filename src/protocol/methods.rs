//! Method names and the inbound allow-list.

use std::collections::HashSet;

// Lifecycle
pub const INITIALIZE: &str = "initialize";
pub const INITIALIZED: &str = "notifications/initialized";
pub const PING: &str = "ping";

// Tools
pub const TOOLS_LIST: &str = "tools/list";
pub const TOOLS_CALL: &str = "tools/call";

// Prompts
pub const PROMPTS_LIST: &str = "prompts/list";
pub const PROMPTS_GET: &str = "prompts/get";

// Resources
pub const RESOURCES_LIST: &str = "resources/list";
pub const RESOURCES_TEMPLATES_LIST: &str = "resources/templates/list";
pub const RESOURCES_READ: &str = "resources/read";
pub const RESOURCES_SUBSCRIBE: &str = "resources/subscribe";
pub const RESOURCES_UNSUBSCRIBE: &str = "resources/unsubscribe";

// Misc MCP
pub const COMPLETION_COMPLETE: &str = "completion/complete";
pub const LOGGING_SET_LEVEL: &str = "logging/setLevel";
pub const ROOTS_LIST_CHANGED: &str = "notifications/roots/list_changed";

// Agent tasks
pub const TASKS_SEND: &str = "tasks/send";
pub const TASKS_SEND_SUBSCRIBE: &str = "tasks/sendSubscribe";
pub const TASKS_GET: &str = "tasks/get";
pub const TASKS_CANCEL: &str = "tasks/cancel";

const TOOL_PROTOCOL_METHODS: &[&str] = &[
    INITIALIZE,
    PING,
    TOOLS_LIST,
    TOOLS_CALL,
    PROMPTS_LIST,
    PROMPTS_GET,
    RESOURCES_LIST,
    RESOURCES_TEMPLATES_LIST,
    RESOURCES_READ,
    RESOURCES_SUBSCRIBE,
    RESOURCES_UNSUBSCRIBE,
    COMPLETION_COMPLETE,
    LOGGING_SET_LEVEL,
];

const TASK_PROTOCOL_METHODS: &[&str] = &[TASKS_SEND, TASKS_SEND_SUBSCRIBE, TASKS_GET, TASKS_CANCEL];

const NOTIFICATIONS: &[&str] = &[INITIALIZED, ROOTS_LIST_CHANGED];

/// Immutable set of method names accepted from peers.
///
/// Built once at startup and shared by reference with the validator
/// pipeline.
#[derive(Debug, Clone)]
pub struct MethodAllowList {
    methods: HashSet<String>,
}

impl MethodAllowList {
    /// Both protocol families plus their notifications.
    pub fn standard() -> Self {
        Self::from_methods(
            TOOL_PROTOCOL_METHODS
                .iter()
                .chain(TASK_PROTOCOL_METHODS)
                .chain(NOTIFICATIONS)
                .copied(),
        )
    }

    pub fn from_methods<'a>(methods: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            methods: methods.into_iter().map(str::to_string).collect(),
        }
    }

    pub fn contains(&self, method: &str) -> bool {
        self.methods.contains(method)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl Default for MethodAllowList {
    fn default() -> Self {
        Self::standard()
    }
}

/// Whether a method belongs to the agent-task family.
pub fn is_task_method(method: &str) -> bool {
    TASK_PROTOCOL_METHODS.contains(&method)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_allow_list_covers_both_families() {
        let allow = MethodAllowList::standard();
        assert_eq!(allow.len(), 19);
        assert!(allow.contains("tools/call"));
        assert!(allow.contains("resources/templates/list"));
        assert!(allow.contains("tasks/sendSubscribe"));
        assert!(allow.contains("notifications/roots/list_changed"));
        assert!(!allow.contains("shutdown"));
        assert!(!allow.contains("tasks/resubscribe"));
    }

    #[test]
    fn test_task_method_detection() {
        assert!(is_task_method(TASKS_GET));
        assert!(!is_task_method(TOOLS_LIST));
    }
}
