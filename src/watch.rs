//! One-shot watches and their delivery.
//!
//! A watch is registered against a path in one of two categories (data or
//! child). When a mutation triggers that category, every registration for
//! the path is removed from the registry and handed to the execution
//! context. Nothing is re-armed.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tracing::debug;

use crate::executor::ExecutionContext;
use crate::session::SessionState;

/// What happened to the watched path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// The node was created.
    Created,
    /// The node was deleted.
    Deleted,
    /// The node's data was replaced.
    DataChanged,
    /// Something below the node changed.
    ChildrenChanged,
}

/// Event handed to a watcher when it fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedEvent {
    pub event_type: EventType,
    pub state: SessionState,
    pub path: String,
}

impl WatchedEvent {
    /// Create an event observed while connected.
    pub fn new(event_type: EventType, path: impl Into<String>) -> Self {
        Self {
            event_type,
            state: SessionState::Connected,
            path: path.into(),
        }
    }
}

/// Capability implemented by anything that wants watch events.
pub trait Watcher: Send + Sync {
    fn handle(&self, event: WatchedEvent);
}

impl<F> Watcher for F
where
    F: Fn(WatchedEvent) + Send + Sync,
{
    fn handle(&self, event: WatchedEvent) {
        self(event)
    }
}

/// Shared handle to a watcher. Registering the same handle twice fires it twice.
pub type WatcherRef = Arc<dyn Watcher>;

/// Wrap a closure as a watcher handle.
pub fn watcher<F>(f: F) -> WatcherRef
where
    F: Fn(WatchedEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Which registration category a watch lives in, or which categories a
/// trigger consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WatchKind {
    /// Node data and existence.
    Data,
    /// Node children.
    Child,
    /// Both categories under one registration. Registered by `get`.
    Combined,
}

impl WatchKind {
    fn includes_data(self) -> bool {
        matches!(self, WatchKind::Data | WatchKind::Combined)
    }

    fn includes_child(self) -> bool {
        matches!(self, WatchKind::Child | WatchKind::Combined)
    }
}

/// A path whose watches must fire as the result of a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub path: String,
    pub event_type: EventType,
    pub kind: WatchKind,
}

impl Trigger {
    /// Create a trigger for one category of watches on `path`.
    pub fn new(path: impl Into<String>, event_type: EventType, kind: WatchKind) -> Self {
        Self {
            path: path.into(),
            event_type,
            kind,
        }
    }
}

/// Sort triggers so the lexically greatest path fires first.
pub(crate) fn order_triggers(triggers: &mut [Trigger]) {
    triggers.sort_by(|a, b| b.path.cmp(&a.path));
}

#[derive(Clone)]
struct Registration {
    id: u64,
    watcher: WatcherRef,
}

/// Per-path registry of pending one-shot watches.
#[derive(Default)]
pub struct WatchRegistry {
    data: HashMap<String, Vec<Registration>>,
    child: HashMap<String, Vec<Registration>>,
    next_id: u64,
}

impl WatchRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a registration. Duplicates are kept.
    pub fn register(&mut self, path: &str, kind: WatchKind, watcher: WatcherRef) {
        self.next_id += 1;
        let registration = Registration {
            id: self.next_id,
            watcher,
        };
        if kind.includes_data() {
            self.data
                .entry(path.to_string())
                .or_default()
                .push(registration.clone());
        }
        if kind.includes_child() {
            self.child
                .entry(path.to_string())
                .or_default()
                .push(registration);
        }
    }

    /// Remove and return every watcher for `path` in the given categories.
    ///
    /// A combined registration appears once even when both categories are
    /// taken.
    pub fn take(&mut self, path: &str, kind: WatchKind) -> Vec<WatcherRef> {
        let mut taken: Vec<Registration> = Vec::new();
        if kind.includes_data() {
            if let Some(regs) = self.data.remove(path) {
                taken.extend(regs);
            }
        }
        if kind.includes_child() {
            if let Some(regs) = self.child.remove(path) {
                for reg in regs {
                    if !taken.iter().any(|t| t.id == reg.id) {
                        taken.push(reg);
                    }
                }
            }
        }
        taken.into_iter().map(|r| r.watcher).collect()
    }

    /// Pop the watches named by each trigger, in order, and schedule them.
    ///
    /// Returns the number of callbacks scheduled.
    pub fn fire(&mut self, triggers: &[Trigger], ctx: &dyn ExecutionContext) -> usize {
        let mut scheduled = 0;
        for trigger in triggers {
            let watchers = self.take(&trigger.path, trigger.kind);
            if watchers.is_empty() {
                continue;
            }
            debug!(
                path = %trigger.path,
                event = ?trigger.event_type,
                count = watchers.len(),
                "firing watches"
            );
            for w in watchers {
                let event = WatchedEvent::new(trigger.event_type, trigger.path.clone());
                ctx.schedule(Box::new(move || w.handle(event)));
                scheduled += 1;
            }
        }
        scheduled
    }

    /// Number of pending registrations for `path` in the given category.
    pub fn pending(&self, path: &str, kind: WatchKind) -> usize {
        let data = self.data.get(path).map(Vec::len).unwrap_or(0);
        let child = self.child.get(path).map(Vec::len).unwrap_or(0);
        match kind {
            WatchKind::Data => data,
            WatchKind::Child => child,
            WatchKind::Combined => {
                let ids: std::collections::HashSet<u64> = self
                    .data
                    .get(path)
                    .into_iter()
                    .chain(self.child.get(path))
                    .flatten()
                    .map(|r| r.id)
                    .collect();
                ids.len()
            }
        }
    }

    /// Total pending registrations across both categories.
    pub fn len(&self) -> usize {
        self.data.values().map(Vec::len).sum::<usize>()
            + self.child.values().map(Vec::len).sum::<usize>()
    }

    /// True when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.child.is_empty()
    }

    /// Drop every pending registration without firing.
    pub fn clear(&mut self) {
        self.data.clear();
        self.child.clear();
    }
}

/// A stream of events delivered to one watcher handle.
pub struct WatchStream {
    receiver: mpsc::UnboundedReceiver<WatchedEvent>,
}

impl WatchStream {
    /// Take the next event if one is already buffered.
    pub fn try_next(&mut self) -> Option<WatchedEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Stream for WatchStream {
    type Item = WatchedEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// Create a watcher that forwards every event it receives into a stream.
///
/// The stream ends once every clone of the watcher handle is dropped.
pub fn channel() -> (WatcherRef, WatchStream) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let forward = watcher(move |event| {
        // Receiver gone means nobody is listening any more.
        let _ = sender.send(event);
    });
    (forward, WatchStream { receiver })
}
