// Session Ports
//
// The engine references a session, never owns one: a session belongs to
// exactly one call or batch and is handed back to the store only when it
// was actually mutated.

use crate::domain::scope::Scope;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Client session as seen by the engine.
pub trait Session: Send + Sync {
    fn id(&self) -> &str;
    /// Scope the session authenticates the caller at.
    fn scope(&self) -> Scope;
    /// Explicit grant for a route (`"svc.route"`) or a whole service (`"svc"`).
    fn grants(&self, name: &str) -> bool;
    /// Backed by the persistence collaborator.
    fn stored(&self) -> bool;
    /// Mutated since load; the only state worth saving.
    fn changed(&self) -> bool;
    /// Freshly loaded for this call.
    fn loaded(&self) -> bool;
}

/// Persistence collaborator. Called once per request, after execution and
/// before response headers are composed, and only for a changed, stored
/// session.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save(&self, session: Arc<dyn Session>) -> Result<()>;
}

pub mod mocks {
    use super::{Session, SessionStore};
    use crate::domain::scope::Scope;
    use crate::error::{EngineError, Result};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    /// Configurable in-memory session for engine tests.
    pub struct MockSession {
        id: String,
        scope: Scope,
        grants: HashSet<String>,
        stored: bool,
        loaded: bool,
        changed: AtomicBool,
    }

    impl MockSession {
        pub fn new(scope: Scope) -> Self {
            Self {
                id: Uuid::new_v4().to_string(),
                scope,
                grants: HashSet::new(),
                stored: true,
                loaded: false,
                changed: AtomicBool::new(false),
            }
        }

        pub fn with_grant(mut self, name: &str) -> Self {
            self.grants.insert(name.to_string());
            self
        }

        pub fn loaded(mut self) -> Self {
            self.loaded = true;
            self
        }

        pub fn unstored(mut self) -> Self {
            self.stored = false;
            self
        }

        /// What a handler does when it touches session state.
        pub fn mark_changed(&self) {
            self.changed.store(true, Ordering::SeqCst);
        }
    }

    impl Session for MockSession {
        fn id(&self) -> &str {
            &self.id
        }

        fn scope(&self) -> Scope {
            self.scope
        }

        fn grants(&self, name: &str) -> bool {
            self.grants.contains(name)
        }

        fn stored(&self) -> bool {
            self.stored
        }

        fn changed(&self) -> bool {
            self.changed.load(Ordering::SeqCst)
        }

        fn loaded(&self) -> bool {
            self.loaded
        }
    }

    /// Records which sessions were handed over for persistence.
    #[derive(Default)]
    pub struct RecordingSessionStore {
        saved: Mutex<Vec<String>>,
        fail: bool,
    }

    impl RecordingSessionStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing() -> Self {
            Self {
                saved: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        pub fn saved_ids(&self) -> Vec<String> {
            self.saved.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SessionStore for RecordingSessionStore {
        async fn save(&self, session: Arc<dyn Session>) -> Result<()> {
            if self.fail {
                return Err(EngineError::SessionStore("backend unavailable".into()));
            }
            self.saved.lock().unwrap().push(session.id().to_string());
            Ok(())
        }
    }
}
