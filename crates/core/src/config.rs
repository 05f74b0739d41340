// Engine Configuration

use crate::domain::scope::Scope;

/// Engine limits and switches.
///
/// `normalized()` enforces the floors the engine relies on; the builder
/// applies it, so a hand-rolled config cannot produce a zero-slot gate or a
/// maximum request time below the default.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Name reported by `rpc.status`.
    pub app_name: String,
    /// Upper bound on concurrently executing request tasks.
    pub max_parallel_tasks: usize,
    /// Relative timeout applied when the client sends no deadline header (s).
    pub default_request_time: i64,
    /// Hard ceiling for any client-supplied deadline or timeout (s).
    pub max_request_time: i64,
    /// Permission checks in the preparer. Disabling is for trusted wiring only.
    pub enable_permissions: bool,
    /// Emit accepted/finished logs. Errors are always logged.
    pub request_logs: bool,
    /// Log request params and results instead of redacting them.
    pub full_request_logs: bool,
    /// Debug posture: implies full request logs and attaches fault detail
    /// to InternalError replies.
    pub debug: bool,
    /// Glob patterns for routes that must not be registered.
    pub blacklist_routes: Vec<String>,
    /// Routes whose permission level is at or below this value are skipped
    /// at registration. The default admits every level.
    pub blacklist_scope: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            app_name: "relay".to_string(),
            max_parallel_tasks: 64,
            default_request_time: 120,
            max_request_time: 600,
            enable_permissions: true,
            request_logs: true,
            full_request_logs: false,
            debug: false,
            blacklist_routes: Vec::new(),
            blacklist_scope: Scope::System.level() - 1,
        }
    }
}

impl ServerConfig {
    pub fn normalized(mut self) -> Self {
        self.max_parallel_tasks = self.max_parallel_tasks.max(1);
        self.default_request_time = self.default_request_time.max(1);
        self.max_request_time = self.max_request_time.max(self.default_request_time);
        if self.debug {
            self.full_request_logs = true;
        }
        self
    }
}
