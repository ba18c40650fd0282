//! # univrs-coord
//!
//! In-process emulator of a hierarchical, versioned coordination store.
//!
//! Client code written against a coordination service (service discovery,
//! leader election, configuration distribution) can run against this crate
//! deterministically, without a network or a cluster:
//!
//! - **Path hierarchy**: absolute keys (`/services/api/leader`) whose parent
//!   must exist before a child is created
//! - **Versioned nodes**: every write bumps a per-node version used for
//!   compare-and-set
//! - **One-shot watches**: data and child watches fire exactly once, off the
//!   caller's thread, deepest path first
//! - **Session lifecycle**: `Connecting → Connected → Lost | Expired` with
//!   state listeners
//! - **Transactions**: queued operations replayed under one lock, serialized
//!   but not rolled back
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use univrs_coord::{Session, ANY_VERSION};
//!
//! fn main() -> univrs_coord::Result<()> {
//!     let session = Session::new();
//!     session.start()?;
//!
//!     session.create("/svc", b"v1".to_vec())?;
//!     let (data, stat) = session.get("/svc", None)?;
//!     assert_eq!(data, b"v1");
//!
//!     session.set("/svc", b"v2".to_vec(), stat.version)?;
//!     session.set("/svc", b"v3".to_vec(), ANY_VERSION)?;
//!
//!     session.stop();
//!     Ok(())
//! }
//! ```
//!
//! ## Watches
//!
//! ```rust,no_run
//! use univrs_coord::{watcher, Session, WatchedEvent};
//!
//! fn main() -> univrs_coord::Result<()> {
//!     let session = Session::new();
//!     session.start()?;
//!
//!     session.exists(
//!         "/leader",
//!         Some(watcher(|event: WatchedEvent| {
//!             println!("{:?} on {}", event.event_type, event.path);
//!         })),
//!     )?;
//!     session.create("/leader", b"node-1".to_vec())?;
//!
//!     // Wait for the callback to run.
//!     session.flush();
//!     session.stop();
//!     Ok(())
//! }
//! ```
//!
//! ## Transactions
//!
//! ```rust,no_run
//! use univrs_coord::{Session, ANY_VERSION};
//!
//! fn main() -> univrs_coord::Result<()> {
//!     let session = Session::new();
//!     session.start()?;
//!
//!     let mut txn = session.transaction();
//!     txn.create("/workers", b"".to_vec())
//!         .create("/workers/w1", b"idle".to_vec())
//!         .set_data("/workers", b"1".to_vec(), ANY_VERSION);
//!
//!     // One entry per operation; failures do not undo earlier entries.
//!     for result in txn.commit()? {
//!         println!("{:?}", result);
//!     }
//!     Ok(())
//! }
//! ```

pub mod async_result;
pub mod config;
pub mod error;
pub mod executor;
pub mod factory;
pub mod node;
pub mod path;
pub mod session;
pub mod store;
pub mod transaction;
pub mod watch;

// Re-export main types
pub use async_result::{AsyncResult, Completer};
pub use config::{SessionBuilder, DEFAULT_SERVER_VERSION};
pub use error::{CoordError, Result};
pub use executor::{ExecutionContext, Job, SerialExecutor, TokioExecutor};
pub use factory::SessionFactory;
pub use node::{Node, Stat};
pub use session::{CreateMode, ListenerId, Session, SessionState, StateListener};
pub use store::{NodeStore, StoreGuard, ANY_VERSION};
pub use transaction::{OpOutcome, OpResult, Transaction, TransactionOp};
pub use watch::{
    watcher, EventType, WatchKind, WatchRegistry, WatchStream, WatchedEvent, Watcher, WatcherRef,
};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::error::{CoordError, Result};
    pub use crate::session::{CreateMode, Session, SessionState};
    pub use crate::store::{NodeStore, ANY_VERSION};
    pub use crate::transaction::{OpOutcome, Transaction, TransactionOp};
    pub use crate::watch::{watcher, EventType, WatchKind, WatchedEvent, WatcherRef};
}
