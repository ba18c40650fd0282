//! Session construction.

use std::sync::Arc;
use uuid::Uuid;

use crate::executor::{ExecutionContext, SerialExecutor};
use crate::session::Session;
use crate::store::NodeStore;

/// Version reported by `server_version()` and the `stat` command.
pub const DEFAULT_SERVER_VERSION: (u32, u32, u32) = (3, 4, 0);

/// Builder for a [`Session`].
///
/// Everything is optional: by default a session gets an empty store, its own
/// [`SerialExecutor`] and a random id.
#[must_use]
pub struct SessionBuilder {
    store: Option<NodeStore>,
    executor: Option<Arc<dyn ExecutionContext>>,
    server_version: (u32, u32, u32),
    session_id: Option<i64>,
}

impl SessionBuilder {
    /// A builder with every part defaulted.
    pub fn new() -> Self {
        Self {
            store: None,
            executor: None,
            server_version: DEFAULT_SERVER_VERSION,
            session_id: None,
        }
    }

    /// Start from a pre-populated store.
    pub fn store(mut self, store: NodeStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Run callbacks on the given execution context.
    pub fn executor(mut self, executor: Arc<dyn ExecutionContext>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Override the version reported as `(major, minor, patch)`.
    pub fn server_version(mut self, version: (u32, u32, u32)) -> Self {
        self.server_version = version;
        self
    }

    /// Fix the session id. Must be non-zero, since 0 marks persistent nodes.
    pub fn session_id(mut self, id: i64) -> Self {
        self.session_id = Some(id);
        self
    }

    /// Build a session in the `Connecting` state.
    pub fn build(self) -> Session {
        let id = self
            .session_id
            .filter(|id| *id != 0)
            .unwrap_or_else(random_session_id);
        let executor = self
            .executor
            .unwrap_or_else(|| Arc::new(SerialExecutor::new()));
        Session::from_parts(
            id,
            self.server_version,
            self.store.unwrap_or_default(),
            executor,
        )
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn random_session_id() -> i64 {
    let id = (Uuid::new_v4().as_u128() >> 65) as i64;
    id.max(1)
}
