//! Session lifecycle and the client-facing operation surface.
//!
//! A [`Session`] owns one [`NodeStore`], one [`WatchRegistry`] and an
//! execution context. Every data operation takes the store lock, checks the
//! session is connected, applies the mutation and hands any fired watches to
//! the execution context before releasing the lock.
//!
//! Lock order is store, then session state, then watch registry. Lifecycle
//! transitions flip the state and start or stop the execution context inside
//! one critical section, so a concurrent `start` can never observe a stopped
//! state while a stale executor shutdown is still pending. Listener callbacks
//! always run with no lock held.

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::async_result::AsyncResult;
use crate::config::SessionBuilder;
use crate::error::{CoordError, Result};
use crate::executor::ExecutionContext;
use crate::node::Stat;
use crate::path;
use crate::store::NodeStore;
use crate::transaction::Transaction;
use crate::watch::{Trigger, WatchKind, WatchRegistry, WatcherRef};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Constructed but not yet started.
    Connecting,
    Connected,
    /// Stopped gracefully; may be started again.
    Lost,
    /// Forcibly expired; terminal for this session object.
    Expired,
}

/// Callback invoked synchronously on every session state transition.
pub type StateListener = Arc<dyn Fn(SessionState) + Send + Sync>;

/// Handle returned by [`Session::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Flags for node creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreateMode {
    /// Record the session as the node's owner.
    pub ephemeral: bool,
    /// Append a monotonic suffix to the name. Not supported.
    pub sequence: bool,
}

impl CreateMode {
    /// A plain node that outlives the session.
    pub const PERSISTENT: CreateMode = CreateMode {
        ephemeral: false,
        sequence: false,
    };
    /// A node owned by the creating session.
    pub const EPHEMERAL: CreateMode = CreateMode {
        ephemeral: true,
        sequence: false,
    };

    /// The same mode with the sequence flag set.
    #[must_use]
    pub const fn sequential(mut self) -> Self {
        self.sequence = true;
        self
    }
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: HashMap<ListenerId, StateListener>,
}

struct SessionInner {
    id: i64,
    server_version: (u32, u32, u32),
    store: NodeStore,
    watches: Mutex<WatchRegistry>,
    executor: Arc<dyn ExecutionContext>,
    state: Mutex<SessionState>,
    listeners: Mutex<Listeners>,
}

/// A connection-scoped handle to an in-memory coordination store.
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// A session with an empty store and a [`SerialExecutor`](crate::SerialExecutor).
    pub fn new() -> Self {
        SessionBuilder::new().build()
    }

    /// A builder for a session with non-default parts.
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    pub(crate) fn from_parts(
        id: i64,
        server_version: (u32, u32, u32),
        store: NodeStore,
        executor: Arc<dyn ExecutionContext>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id,
                server_version,
                store,
                watches: Mutex::new(WatchRegistry::new()),
                executor,
                state: Mutex::new(SessionState::Connecting),
                listeners: Mutex::new(Listeners::default()),
            }),
        }
    }

    /// Non-zero id recorded as the owner of ephemeral nodes.
    pub fn session_id(&self) -> i64 {
        self.inner.id
    }

    /// Version reported to clients as `(major, minor, patch)`.
    pub fn server_version(&self) -> (u32, u32, u32) {
        self.inner.server_version
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.inner.state.lock()
    }

    /// True only in [`SessionState::Connected`].
    pub fn connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    // ----- lifecycle -----

    /// Register a state listener. Each registration gets a distinct id.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(SessionState) + Send + Sync + 'static,
    {
        let mut listeners = self.inner.listeners.lock();
        listeners.next_id += 1;
        let id = ListenerId(listeners.next_id);
        listeners.entries.insert(id, Arc::new(listener));
        id
    }

    /// Returns false if the listener was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.lock().entries.remove(&id).is_some()
    }

    /// Number of registered state listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().entries.len()
    }

    /// Connect the session and notify listeners.
    ///
    /// No-op when already connected. Fails with `SessionExpired` once the
    /// session has been expired.
    pub fn start(&self) -> Result<()> {
        let listeners = {
            let _store = self.inner.store.lock();
            let mut state = self.inner.state.lock();
            match *state {
                SessionState::Connected => return Ok(()),
                SessionState::Expired => return Err(CoordError::SessionExpired),
                SessionState::Connecting | SessionState::Lost => {}
            }
            self.inner.executor.start();
            *state = SessionState::Connected;
            self.listeners(false)
        };
        info!(session_id = self.inner.id, "session connected");
        notify(listeners, SessionState::Connected);
        Ok(())
    }

    /// Disconnect gracefully.
    ///
    /// Pending watches are dropped and the execution context is stopped.
    /// Then the listeners registered so far hear `Lost` and are removed. A
    /// listener may call [`start`](Self::start) to reconnect. No-op unless
    /// connected.
    pub fn stop(&self) {
        self.shut_down(SessionState::Lost);
    }

    /// Same as [`stop`](Self::stop).
    pub fn close(&self) {
        self.stop();
    }

    /// Simulate the service revoking this session.
    ///
    /// Every later operation, including `start`, fails with `SessionExpired`.
    pub fn expire(&self) {
        self.shut_down(SessionState::Expired);
    }

    fn shut_down(&self, target: SessionState) {
        let listeners = {
            let _store = self.inner.store.lock();
            let mut state = self.inner.state.lock();
            if *state != SessionState::Connected {
                return;
            }
            *state = target;
            self.inner.watches.lock().clear();
            self.inner.executor.stop();
            self.listeners(true)
        };
        info!(session_id = self.inner.id, state = ?target, "session disconnected");
        notify(listeners, target);
    }

    fn listeners(&self, drain: bool) -> Vec<StateListener> {
        let mut guard = self.inner.listeners.lock();
        if drain {
            guard.entries.drain().map(|(_, l)| l).collect()
        } else {
            guard.entries.values().cloned().collect()
        }
    }

    pub(crate) fn ensure_connected(&self) -> Result<()> {
        match *self.inner.state.lock() {
            SessionState::Connected => Ok(()),
            SessionState::Expired => Err(CoordError::SessionExpired),
            SessionState::Connecting | SessionState::Lost => Err(CoordError::ConnectionClosed),
        }
    }

    pub(crate) fn store(&self) -> &NodeStore {
        &self.inner.store
    }

    fn fire(&self, triggers: &[Trigger]) {
        self.inner
            .watches
            .lock()
            .fire(triggers, self.inner.executor.as_ref());
    }

    fn register(&self, path: &str, kind: WatchKind, watch: Option<WatcherRef>) {
        if let Some(w) = watch {
            self.inner.watches.lock().register(path, kind, w);
        }
    }

    /// Pending watch registrations on `path` in the given category.
    pub fn pending_watches(&self, path: &str, kind: WatchKind) -> usize {
        match path::normalize(path) {
            Ok(p) => self.inner.watches.lock().pending(&p, kind),
            Err(_) => 0,
        }
    }

    // ----- node operations -----

    /// Create a persistent node. Returns the normalized path.
    pub fn create(&self, path: &str, data: impl Into<Vec<u8>>) -> Result<String> {
        self.create_with(path, data, CreateMode::PERSISTENT)
    }

    /// Create a node with explicit flags.
    ///
    /// Sequence nodes fail with `NotImplemented`.
    pub fn create_with(
        &self,
        path: &str,
        data: impl Into<Vec<u8>>,
        mode: CreateMode,
    ) -> Result<String> {
        let store = self.inner.store.lock();
        self.ensure_connected()?;
        let path = path::normalize(path)?;
        if mode.sequence {
            return Err(CoordError::NotImplemented("sequence nodes"));
        }
        let owner = mode.ephemeral.then_some(self.inner.id);
        let triggers = store.create(&path, data.into(), owner)?;
        self.fire(&triggers);
        Ok(path)
    }

    /// Create every missing node along `path` with empty data.
    pub fn ensure_path(&self, path: &str) -> Result<()> {
        let store = self.inner.store.lock();
        self.ensure_connected()?;
        let path = path::normalize(path)?;

        let mut chain = path::ancestors(&path);
        chain.reverse();
        chain.push(&path);
        for p in chain {
            if store.contains(p) {
                continue;
            }
            let triggers = store.create(p, Vec::new(), None)?;
            self.fire(&triggers);
        }
        Ok(())
    }

    /// Read a node.
    ///
    /// A supplied watch is registered as a combined watch: it sits in both
    /// the data and the child category of `path`.
    pub fn get(&self, path: &str, watch: Option<WatcherRef>) -> Result<(Vec<u8>, Stat)> {
        let store = self.inner.store.lock();
        self.ensure_connected()?;
        let path = path::normalize(path)?;
        let found = store.get(&path)?;
        self.register(&path, WatchKind::Combined, watch);
        Ok(found)
    }

    /// Replace a node's data. `version` of [`ANY_VERSION`](crate::ANY_VERSION)
    /// skips the check.
    pub fn set(&self, path: &str, data: impl Into<Vec<u8>>, version: i32) -> Result<Stat> {
        let store = self.inner.store.lock();
        self.ensure_connected()?;
        let path = path::normalize(path)?;
        let (stat, triggers) = store.set(&path, data.into(), version)?;
        self.fire(&triggers);
        Ok(stat)
    }

    /// Delete a node, and everything under it when `recursive`.
    pub fn delete(&self, path: &str, recursive: bool) -> Result<bool> {
        let store = self.inner.store.lock();
        self.ensure_connected()?;
        let path = path::normalize(path)?;
        let triggers = store.delete(&path, recursive)?;
        self.fire(&triggers);
        Ok(true)
    }

    /// Stat of a node, or `None` if absent.
    ///
    /// A supplied watch is registered as a data watch whether or not the
    /// node exists, so it also fires when the node is created.
    pub fn exists(&self, path: &str, watch: Option<WatcherRef>) -> Result<Option<Stat>> {
        let store = self.inner.store.lock();
        self.ensure_connected()?;
        let path = path::normalize(path)?;
        let stat = store.exists(&path);
        self.register(&path, WatchKind::Data, watch);
        Ok(stat)
    }

    /// Immediate child names. A supplied watch is registered as a child watch.
    pub fn children(&self, path: &str, watch: Option<WatcherRef>) -> Result<Vec<String>> {
        self.children_with_stat(path, watch).map(|(names, _)| names)
    }

    /// Immediate child names together with the parent's stat.
    pub fn children_with_stat(
        &self,
        path: &str,
        watch: Option<WatcherRef>,
    ) -> Result<(Vec<String>, Stat)> {
        let store = self.inner.store.lock();
        self.ensure_connected()?;
        let path = path::normalize(path)?;
        let names = store.children(&path)?;
        let stat = store.exists(&path).ok_or_else(|| CoordError::NoNode(path.clone()))?;
        self.register(&path, WatchKind::Child, watch);
        Ok((names, stat))
    }

    /// There is a single replica, so syncing only validates the path.
    pub fn sync(&self, path: &str) -> Result<String> {
        self.ensure_connected()?;
        path::normalize(path)
    }

    /// Answer a four-letter diagnostic command.
    pub fn command(&self, cmd: &str) -> Result<String> {
        let store = self.inner.store.lock();
        self.ensure_connected()?;
        let (major, minor, patch) = self.inner.server_version;
        match cmd.trim() {
            "ruok" => Ok("imok".to_string()),
            "stat" => Ok(format!(
                "Version: {major}.{minor}.{patch}-univrs-coord\n\
                 Mode: standalone\n\
                 Node count: {}\n",
                store.len()
            )),
            "envi" => Ok(format!(
                "Environment:\nsession.id={:#x}\n",
                self.inner.id
            )),
            _ => Err(CoordError::NotImplemented("diagnostic command")),
        }
    }

    /// Block until every callback scheduled before this call has run.
    ///
    /// Returns at once if the context is stopped. Called from a callback
    /// running on this session's execution context it also returns at once,
    /// since every job queued ahead of that callback has already run.
    pub fn flush(&self) {
        if self.inner.executor.is_worker_thread() {
            debug!("flush called from the execution context, not waiting");
            return;
        }
        let (completer, done) = AsyncResult::<()>::pair();
        self.inner
            .executor
            .schedule(Box::new(move || completer.set(())));
        if done.wait().is_err() {
            debug!("flush sentinel dropped by stopped executor");
        }
    }

    /// Start building a transaction.
    pub fn transaction(&self) -> Transaction {
        Transaction::new(self.clone())
    }

    // ----- JSON helpers -----

    /// Create a node holding `value` encoded as JSON.
    pub fn create_json<T: Serialize>(&self, path: &str, value: &T) -> Result<String> {
        let bytes = serde_json::to_vec(value)?;
        self.create(path, bytes)
    }

    /// Read a node and decode its data as JSON.
    pub fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let (data, _) = self.get(path, None)?;
        serde_json::from_slice(&data).map_err(Into::into)
    }

    /// Replace a node's data with `value` encoded as JSON.
    pub fn set_json<T: Serialize>(&self, path: &str, value: &T, version: i32) -> Result<Stat> {
        let bytes = serde_json::to_vec(value)?;
        self.set(path, bytes, version)
    }

    // ----- async variants -----

    pub(crate) fn spawn<T, F>(&self, op: F) -> AsyncResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        if let Err(e) = self.ensure_connected() {
            return AsyncResult::ready(Err(e));
        }
        let (completer, result) = AsyncResult::pair();
        self.inner
            .executor
            .schedule(Box::new(move || completer.complete(op())));
        result
    }

    /// [`create_with`](Self::create_with) on the execution context.
    pub fn create_async(
        &self,
        path: &str,
        data: impl Into<Vec<u8>>,
        mode: CreateMode,
    ) -> AsyncResult<String> {
        let (session, path, data) = (self.clone(), path.to_string(), data.into());
        self.spawn(move || session.create_with(&path, data, mode))
    }

    /// [`ensure_path`](Self::ensure_path) on the execution context.
    pub fn ensure_path_async(&self, path: &str) -> AsyncResult<()> {
        let (session, path) = (self.clone(), path.to_string());
        self.spawn(move || session.ensure_path(&path))
    }

    /// [`get`](Self::get) on the execution context.
    pub fn get_async(
        &self,
        path: &str,
        watch: Option<WatcherRef>,
    ) -> AsyncResult<(Vec<u8>, Stat)> {
        let (session, path) = (self.clone(), path.to_string());
        self.spawn(move || session.get(&path, watch))
    }

    /// [`set`](Self::set) on the execution context.
    pub fn set_async(
        &self,
        path: &str,
        data: impl Into<Vec<u8>>,
        version: i32,
    ) -> AsyncResult<Stat> {
        let (session, path, data) = (self.clone(), path.to_string(), data.into());
        self.spawn(move || session.set(&path, data, version))
    }

    /// [`delete`](Self::delete) on the execution context.
    pub fn delete_async(&self, path: &str, recursive: bool) -> AsyncResult<bool> {
        let (session, path) = (self.clone(), path.to_string());
        self.spawn(move || session.delete(&path, recursive))
    }

    /// [`exists`](Self::exists) on the execution context.
    pub fn exists_async(
        &self,
        path: &str,
        watch: Option<WatcherRef>,
    ) -> AsyncResult<Option<Stat>> {
        let (session, path) = (self.clone(), path.to_string());
        self.spawn(move || session.exists(&path, watch))
    }

    /// [`children`](Self::children) on the execution context.
    pub fn children_async(
        &self,
        path: &str,
        watch: Option<WatcherRef>,
    ) -> AsyncResult<Vec<String>> {
        let (session, path) = (self.clone(), path.to_string());
        self.spawn(move || session.children(&path, watch))
    }

    /// [`sync`](Self::sync) on the execution context.
    pub fn sync_async(&self, path: &str) -> AsyncResult<String> {
        let (session, path) = (self.clone(), path.to_string());
        self.spawn(move || session.sync(&path))
    }
}

fn notify(listeners: Vec<StateListener>, state: SessionState) {
    for listener in listeners {
        listener(state);
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ANY_VERSION;
    use crate::watch::{watcher, EventType, WatchedEvent};

    fn connected() -> Session {
        let session = Session::new();
        session.start().unwrap();
        session
    }

    fn recorder() -> (WatcherRef, Arc<Mutex<Vec<WatchedEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (watcher(move |e| sink.lock().push(e)), seen)
    }

    #[test]
    fn test_initial_state() {
        let session = Session::new();
        assert_eq!(session.state(), SessionState::Connecting);
        assert!(!session.connected());
    }

    #[test]
    fn test_operations_before_start_fail() {
        let session = Session::new();
        assert_eq!(
            session.create("/a", "x").unwrap_err(),
            CoordError::ConnectionClosed
        );
        assert_eq!(
            session.get("/", None).unwrap_err(),
            CoordError::ConnectionClosed
        );
        assert_eq!(
            session.command("ruok").unwrap_err(),
            CoordError::ConnectionClosed
        );
        assert_eq!(session.store().len(), 1);
    }

    #[test]
    fn test_start_notifies_listeners() {
        let session = Session::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        session.add_listener(move |s| sink.lock().push(s));

        session.start().unwrap();
        session.start().unwrap();
        assert_eq!(*seen.lock(), vec![SessionState::Connected]);
        session.stop();
    }

    #[test]
    fn test_stop_notifies_and_clears() {
        let session = connected();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        session.add_listener(move |s| sink.lock().push(s));
        let (w, _) = recorder();
        session.exists("/a", Some(w)).unwrap();
        assert_eq!(session.pending_watches("/a", WatchKind::Data), 1);

        session.stop();
        session.stop();

        assert_eq!(*seen.lock(), vec![SessionState::Lost]);
        assert_eq!(session.state(), SessionState::Lost);
        assert_eq!(session.listener_count(), 0);
        assert_eq!(session.pending_watches("/a", WatchKind::Data), 0);
        assert_eq!(
            session.create("/a", "x").unwrap_err(),
            CoordError::ConnectionClosed
        );
    }

    #[test]
    fn test_restart_after_stop() {
        let session = connected();
        session.create("/a", "x").unwrap();
        session.stop();
        session.start().unwrap();
        assert!(session.exists("/a", None).unwrap().is_some());
        session.stop();
    }

    #[test]
    fn test_listener_reconnects_on_lost() {
        let session = connected();
        let again = session.clone();
        session.add_listener(move |s| {
            if s == SessionState::Lost {
                again.start().unwrap();
            }
        });

        session.stop();
        assert_eq!(session.state(), SessionState::Connected);

        // The executor must be running again: watches and async calls deliver.
        session.create("/a", "0").unwrap();
        let (w, seen) = recorder();
        session.exists("/a", Some(w)).unwrap();
        session.set("/a", "1", ANY_VERSION).unwrap();
        session.flush();
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(session.get_async("/a", None).wait().unwrap().0, b"1");
        session.stop();
    }

    #[test]
    fn test_concurrent_start_stop_leaves_executor_consistent() {
        let session = connected();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let s = session.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        if i % 2 == 0 {
                            s.stop();
                        } else {
                            s.start().unwrap();
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        session.start().unwrap();
        assert_eq!(session.get_async("/", None).wait().unwrap().0, b"");
        session.stop();
    }

    #[test]
    fn test_expire_is_terminal() {
        let session = connected();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        session.add_listener(move |s| sink.lock().push(s));

        session.expire();
        assert_eq!(*seen.lock(), vec![SessionState::Expired]);
        assert_eq!(session.state(), SessionState::Expired);
        assert_eq!(session.start().unwrap_err(), CoordError::SessionExpired);
        assert_eq!(
            session.create("/a", "x").unwrap_err(),
            CoordError::SessionExpired
        );
        assert_eq!(
            session.exists("/", None).unwrap_err(),
            CoordError::SessionExpired
        );
        session.stop();
        assert_eq!(session.state(), SessionState::Expired);
    }

    #[test]
    fn test_remove_listener() {
        let session = Session::new();
        let seen = Arc::new(Mutex::new(0));
        let sink = seen.clone();
        let id = session.add_listener(move |_| *sink.lock() += 1);
        assert!(session.remove_listener(id));
        assert!(!session.remove_listener(id));
        session.start().unwrap();
        assert_eq!(*seen.lock(), 0);
        session.stop();
    }

    #[test]
    fn test_every_listener_notified_once() {
        let session = Session::new();
        let count = Arc::new(Mutex::new(0));
        for _ in 0..3 {
            let c = count.clone();
            session.add_listener(move |_| *c.lock() += 1);
        }
        session.start().unwrap();
        assert_eq!(*count.lock(), 3);
        session.stop();
        assert_eq!(*count.lock(), 6);
    }

    #[test]
    fn test_end_to_end_scenario() {
        let session = connected();
        assert_eq!(session.create("/svc", b"v1".to_vec()).unwrap(), "/svc");

        let (data, stat) = session.get("/svc", None).unwrap();
        assert_eq!(data, b"v1");
        assert_eq!(stat.version, 0);

        let stat = session.set("/svc", b"v2".to_vec(), 0).unwrap();
        assert_eq!(stat.version, 1);

        assert!(matches!(
            session.set("/svc", b"v3".to_vec(), 0),
            Err(CoordError::BadVersion { expected: 0, found: 1, .. })
        ));
        assert_eq!(session.get("/svc", None).unwrap().0, b"v2");

        assert!(session.delete("/svc", false).unwrap());
        assert_eq!(
            session.get("/svc", None).unwrap_err(),
            CoordError::NoNode("/svc".to_string())
        );
        session.stop();
    }

    #[test]
    fn test_session_gate_checked_before_path() {
        let session = Session::new();
        assert_eq!(
            session.create("relative", "").unwrap_err(),
            CoordError::ConnectionClosed
        );
        assert_eq!(
            session.sync("").unwrap_err(),
            CoordError::ConnectionClosed
        );
        session.start().unwrap();
        session.expire();
        assert_eq!(
            session.get("no/slash", None).unwrap_err(),
            CoordError::SessionExpired
        );
    }

    #[test]
    fn test_create_normalizes_path() {
        let session = connected();
        session.create("/a", "").unwrap();
        assert_eq!(session.create("/a/./b/", "").unwrap(), "/a/b");
        assert!(matches!(
            session.create("a", ""),
            Err(CoordError::BadArguments(_))
        ));
        session.stop();
    }

    #[test]
    fn test_parent_before_child() {
        let session = connected();
        assert_eq!(
            session.create("/a/b", "").unwrap_err(),
            CoordError::NoNode("/a".to_string())
        );
        session.create("/a", "").unwrap();
        session.create("/a/b", "").unwrap();
        session.stop();
    }

    #[test]
    fn test_sequence_not_implemented() {
        let session = connected();
        assert_eq!(
            session
                .create_with("/q", "", CreateMode::PERSISTENT.sequential())
                .unwrap_err(),
            CoordError::NotImplemented("sequence nodes")
        );
        assert!(session.exists("/q", None).unwrap().is_none());
        session.stop();
    }

    #[test]
    fn test_ephemeral_owner() {
        let session = connected();
        session.create_with("/e", "", CreateMode::EPHEMERAL).unwrap();
        session.create("/p", "").unwrap();
        let e = session.exists("/e", None).unwrap().unwrap();
        let p = session.exists("/p", None).unwrap().unwrap();
        assert_eq!(e.ephemeral_owner, session.session_id());
        assert_eq!(p.ephemeral_owner, 0);
        session.stop();
    }

    #[test]
    fn test_ensure_path() {
        let session = connected();
        let (w, seen) = recorder();
        session.exists("/a/b", Some(w)).unwrap();

        session.ensure_path("/a/b/c").unwrap();
        session.ensure_path("/a/b/c").unwrap();
        assert_eq!(session.children("/a/b", None).unwrap(), vec!["c"]);

        session.flush();
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].event_type, EventType::Created);
        drop(seen);
        session.stop();
    }

    #[test]
    fn test_children_with_stat() {
        let session = connected();
        session.create("/p", "data").unwrap();
        session.create("/p/b", "").unwrap();
        session.create("/p/a", "").unwrap();
        let (names, stat) = session.children_with_stat("/p", None).unwrap();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(stat.num_children, 2);
        assert_eq!(stat.data_length, 4);
        assert!(matches!(
            session.children("/nope", None),
            Err(CoordError::NoNode(_))
        ));
        session.stop();
    }

    #[test]
    fn test_data_watch_fires_once() {
        let session = connected();
        session.create("/cfg", "v0").unwrap();
        let (w, seen) = recorder();
        session.exists("/cfg", Some(w)).unwrap();

        session.set("/cfg", "v1", ANY_VERSION).unwrap();
        session.set("/cfg", "v2", ANY_VERSION).unwrap();
        session.flush();

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].event_type, EventType::DataChanged);
        assert_eq!(seen[0].path, "/cfg");
        drop(seen);
        session.stop();
    }

    #[test]
    fn test_watch_not_fired_for_earlier_mutation() {
        let session = connected();
        session.create("/cfg", "v0").unwrap();
        session.set("/cfg", "v1", ANY_VERSION).unwrap();
        let (w, seen) = recorder();
        session.exists("/cfg", Some(w)).unwrap();
        session.flush();
        assert!(seen.lock().is_empty());
        session.stop();
    }

    #[test]
    fn test_exists_watch_fires_on_create() {
        let session = connected();
        let (w, seen) = recorder();
        assert!(session.exists("/leader", Some(w)).unwrap().is_none());
        session.create("/leader", "me").unwrap();
        session.flush();
        assert_eq!(seen.lock()[0].event_type, EventType::Created);
        session.stop();
    }

    #[test]
    fn test_child_watch_on_create() {
        let session = connected();
        session.create("/workers", "").unwrap();
        let (w, seen) = recorder();
        session.children("/workers", Some(w)).unwrap();
        session.create("/workers/w1", "").unwrap();
        session.create("/workers/w2", "").unwrap();
        session.flush();

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].event_type, EventType::ChildrenChanged);
        assert_eq!(seen[0].path, "/workers");
        drop(seen);
        session.stop();
    }

    #[test]
    fn test_set_fires_child_watches_on_ancestors() {
        let session = connected();
        session.create("/a", "").unwrap();
        session.create("/a/b", "").unwrap();
        let (w, seen) = recorder();
        session.children("/a", Some(w)).unwrap();
        session.set("/a/b", "x", ANY_VERSION).unwrap();
        session.flush();
        assert_eq!(seen.lock()[0].event_type, EventType::ChildrenChanged);
        session.stop();
    }

    #[test]
    fn test_get_registers_combined_watch() {
        let session = connected();
        session.create("/a", "").unwrap();
        let (w, seen) = recorder();
        session.get("/a", Some(w)).unwrap();
        assert_eq!(session.pending_watches("/a", WatchKind::Data), 1);
        assert_eq!(session.pending_watches("/a", WatchKind::Child), 1);

        session.set("/a", "x", ANY_VERSION).unwrap();
        // Child half is still armed and fires on the next child change.
        assert_eq!(session.pending_watches("/a", WatchKind::Child), 1);
        session.create("/a/b", "").unwrap();
        session.flush();

        let kinds: Vec<EventType> = seen.lock().iter().map(|e| e.event_type).collect();
        assert_eq!(kinds, vec![EventType::DataChanged, EventType::ChildrenChanged]);
        session.stop();
    }

    #[test]
    fn test_get_without_node_registers_nothing() {
        let session = connected();
        let (w, _) = recorder();
        assert!(session.get("/missing", Some(w)).is_err());
        assert_eq!(session.pending_watches("/missing", WatchKind::Combined), 0);
        session.stop();
    }

    #[test]
    fn test_recursive_delete_fires_each_once_deepest_first() {
        let session = connected();
        session.ensure_path("/a/b/c").unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));
        for p in ["/a", "/a/b", "/a/b/c"] {
            let sink = order.clone();
            session
                .get(p, Some(watcher(move |e: WatchedEvent| sink.lock().push(e))))
                .unwrap();
        }

        session.delete("/a", true).unwrap();
        session.flush();

        for p in ["/a", "/a/b", "/a/b/c"] {
            assert!(session.exists(p, None).unwrap().is_none());
        }
        let order = order.lock();
        let paths: Vec<&str> = order.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["/a/b/c", "/a/b", "/a"]);
        assert!(order.iter().all(|e| e.event_type == EventType::Deleted));
        drop(order);
        session.stop();
    }

    #[test]
    fn test_watch_callbacks_run_off_thread() {
        let session = connected();
        let caller = std::thread::current().id();
        let ran_on = Arc::new(Mutex::new(None));
        let sink = ran_on.clone();
        session
            .exists(
                "/t",
                Some(watcher(move |_| *sink.lock() = Some(std::thread::current().id()))),
            )
            .unwrap();
        session.create("/t", "").unwrap();
        session.flush();
        assert_ne!(ran_on.lock().unwrap(), caller);
        session.stop();
    }

    #[test]
    fn test_watcher_may_reenter_session() {
        let session = connected();
        session.create("/a", "").unwrap();
        let observed = Arc::new(Mutex::new(None));
        let (sink, inner) = (observed.clone(), session.clone());
        session
            .exists(
                "/a",
                Some(watcher(move |e: WatchedEvent| {
                    *sink.lock() = inner.get(&e.path, None).ok().map(|(d, _)| d);
                })),
            )
            .unwrap();
        session.set("/a", "new", ANY_VERSION).unwrap();
        session.flush();
        assert_eq!(observed.lock().as_deref(), Some(&b"new"[..]));
        session.stop();
    }

    #[test]
    fn test_command() {
        let session = connected();
        assert_eq!(session.command("ruok").unwrap(), "imok");
        let stat = session.command("stat").unwrap();
        assert!(stat.contains("Mode: standalone"));
        assert!(stat.contains("Node count: 1"));
        assert!(session.command("envi").unwrap().contains("session.id"));
        assert_eq!(
            session.command("wchs").unwrap_err(),
            CoordError::NotImplemented("diagnostic command")
        );
        session.stop();
    }

    #[test]
    fn test_sync() {
        let session = connected();
        assert_eq!(session.sync("/a/../b/").unwrap(), "/b");
        session.stop();
        assert_eq!(
            session.sync("/b").unwrap_err(),
            CoordError::ConnectionClosed
        );
    }

    #[test]
    fn test_json_helpers() {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct Endpoint {
            host: String,
            port: u16,
        }

        let session = connected();
        let ep = Endpoint {
            host: "10.0.0.1".to_string(),
            port: 8080,
        };
        session.create_json("/ep", &ep).unwrap();
        let loaded: Endpoint = session.get_json("/ep").unwrap();
        assert_eq!(loaded, ep);

        session.create("/raw", "not json").unwrap();
        assert!(matches!(
            session.get_json::<Endpoint>("/raw"),
            Err(CoordError::Serialization(_))
        ));
        session.stop();
    }

    #[test]
    fn test_async_variants() {
        let session = connected();
        assert_eq!(
            session
                .create_async("/x", "1", CreateMode::PERSISTENT)
                .wait()
                .unwrap(),
            "/x"
        );
        assert_eq!(session.get_async("/x", None).wait().unwrap().0, b"1");
        assert_eq!(
            session.set_async("/x", "2", 0).wait().unwrap().version,
            1
        );
        assert_eq!(session.children_async("/", None).wait().unwrap(), vec!["x"]);
        assert!(session.delete_async("/x", false).wait().unwrap());
        assert!(session.exists_async("/x", None).wait().unwrap().is_none());
        assert!(matches!(
            session.get_async("/x", None).wait(),
            Err(CoordError::NoNode(_))
        ));
        session.ensure_path_async("/y/z").wait().unwrap();
        assert_eq!(session.sync_async("/y/z").wait().unwrap(), "/y/z");
        session.stop();
    }

    #[test]
    fn test_async_on_disconnected_session() {
        let session = Session::new();
        let result = session.get_async("/", None);
        assert!(result.is_ready());
        assert_eq!(result.wait().unwrap_err(), CoordError::ConnectionClosed);
    }

    #[test]
    fn test_flush_from_callback_returns() {
        let session = connected();
        let (tx, rx) = std::sync::mpsc::channel();
        let inner = session.clone();
        session
            .exists(
                "/f",
                Some(watcher(move |_| {
                    inner.flush();
                    tx.send(()).unwrap();
                })),
            )
            .unwrap();
        session.create("/f", "").unwrap();
        assert!(rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .is_ok());
        session.stop();
    }

    #[test]
    fn test_flush_on_stopped_session_returns() {
        let session = Session::new();
        session.flush();
    }

    #[test]
    fn test_sessions_are_isolated() {
        let a = connected();
        let b = connected();
        a.create("/only-a", "").unwrap();
        assert!(b.exists("/only-a", None).unwrap().is_none());
        assert_ne!(a.session_id(), b.session_id());
        a.stop();
        b.stop();
    }
}
