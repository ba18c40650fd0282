//! Per-address session sharing without process-wide state.
//!
//! Whoever wires up the system owns a [`SessionFactory`] and asks it for
//! sessions by connection string. Two factories never share sessions, so
//! tests that each build their own factory are isolated.

use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

use crate::config::SessionBuilder;
use crate::session::Session;

type BuilderFn = Box<dyn Fn() -> SessionBuilder + Send + Sync>;

/// Hands out one shared [`Session`] per connection string.
pub struct SessionFactory {
    sessions: Mutex<HashMap<String, Session>>,
    make_builder: BuilderFn,
}

impl SessionFactory {
    /// Sessions are built with default settings.
    pub fn new() -> Self {
        Self::with_builder(SessionBuilder::new)
    }

    /// Sessions are built from whatever `make_builder` returns.
    pub fn with_builder<F>(make_builder: F) -> Self
    where
        F: Fn() -> SessionBuilder + Send + Sync + 'static,
    {
        Self {
            sessions: Mutex::new(HashMap::new()),
            make_builder: Box::new(make_builder),
        }
    }

    /// The session for `hosts`, created on first request.
    pub fn session(&self, hosts: &str) -> Session {
        let mut sessions = self.sessions.lock();
        sessions
            .entry(hosts.to_string())
            .or_insert_with(|| {
                debug!(hosts, "creating session");
                (self.make_builder)().build()
            })
            .clone()
    }

    /// Forget the session for `hosts` without stopping it.
    pub fn remove(&self, hosts: &str) -> Option<Session> {
        self.sessions.lock().remove(hosts)
    }

    /// Stop and forget every session.
    pub fn close_all(&self) {
        let sessions: Vec<Session> = self.sessions.lock().drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.stop();
        }
    }

    /// Number of cached sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// True when no session is cached.
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

impl Default for SessionFactory {
    fn default() -> Self {
        Self::new()
    }
}
