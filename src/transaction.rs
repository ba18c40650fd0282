//! Batched operations replayed under one store lock acquisition.
//!
//! A committed transaction is serialized against every other operation on
//! the session, but it is not rolled back on failure: each queued operation
//! is applied in order and reports its own outcome, and an operation that
//! fails leaves earlier ones committed and later ones still attempted.

use crate::async_result::AsyncResult;
use crate::error::{CoordError, Result};
use crate::node::Stat;
use crate::session::{CreateMode, Session};

/// An operation queued in a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionOp {
    Create {
        path: String,
        data: Vec<u8>,
        mode: CreateMode,
    },
    SetData {
        path: String,
        data: Vec<u8>,
        version: i32,
    },
    Delete {
        path: String,
    },
    /// Accepted when queued; reports `NotImplemented` when committed.
    Check {
        path: String,
        version: i32,
    },
}

impl TransactionOp {
    /// A persistent create.
    pub fn create(path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self::Create {
            path: path.into(),
            data: data.into(),
            mode: CreateMode::PERSISTENT,
        }
    }

    /// A data replacement guarded by `version`.
    pub fn set_data(path: impl Into<String>, data: impl Into<Vec<u8>>, version: i32) -> Self {
        Self::SetData {
            path: path.into(),
            data: data.into(),
            version,
        }
    }

    /// A non-recursive delete.
    pub fn delete(path: impl Into<String>) -> Self {
        Self::Delete { path: path.into() }
    }

    /// A version check.
    pub fn check(path: impl Into<String>, version: i32) -> Self {
        Self::Check {
            path: path.into(),
            version,
        }
    }
}

/// Successful outcome of one transaction operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpOutcome {
    Created(String),
    DataSet(Stat),
    Deleted(bool),
}

/// Per-operation result, in submission order.
pub type OpResult = Result<OpOutcome>;

/// Single-use builder of queued operations.
pub struct Transaction {
    session: Session,
    ops: Vec<TransactionOp>,
    committed: bool,
}

impl Transaction {
    pub(crate) fn new(session: Session) -> Self {
        Self {
            session,
            ops: Vec::new(),
            committed: false,
        }
    }

    /// Queue an already built operation.
    pub fn push(&mut self, op: TransactionOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    /// Queue a persistent node creation.
    pub fn create(&mut self, path: &str, data: impl Into<Vec<u8>>) -> &mut Self {
        self.push(TransactionOp::create(path, data))
    }

    /// Queue a node creation with explicit flags.
    pub fn create_with(
        &mut self,
        path: &str,
        data: impl Into<Vec<u8>>,
        mode: CreateMode,
    ) -> &mut Self {
        self.push(TransactionOp::Create {
            path: path.to_string(),
            data: data.into(),
            mode,
        })
    }

    /// Queue a versioned data replacement.
    pub fn set_data(&mut self, path: &str, data: impl Into<Vec<u8>>, version: i32) -> &mut Self {
        self.push(TransactionOp::set_data(path, data, version))
    }

    /// Queue a non-recursive delete.
    pub fn delete(&mut self, path: &str) -> &mut Self {
        self.push(TransactionOp::delete(path))
    }

    /// Queue a version check. Reported as `NotImplemented` on commit.
    pub fn check(&mut self, path: &str, version: i32) -> &mut Self {
        self.push(TransactionOp::check(path, version))
    }

    /// Operations queued so far.
    pub fn ops(&self) -> &[TransactionOp] {
        &self.ops
    }

    /// Number of queued operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Whether `commit` has already run.
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Replay every queued operation in order under one store lock.
    ///
    /// Fails as a whole only if the transaction was already committed or
    /// the session is not connected; in both cases the store is untouched.
    /// Otherwise returns one entry per operation.
    pub fn commit(&mut self) -> Result<Vec<OpResult>> {
        if self.committed {
            return Err(CoordError::AlreadyCommitted);
        }
        let _lock = self.session.store().lock();
        self.session.ensure_connected()?;
        self.committed = true;

        let ops = std::mem::take(&mut self.ops);
        tracing::debug!(ops = ops.len(), "committing transaction");
        Ok(ops.into_iter().map(|op| apply(&self.session, op)).collect())
    }

    /// Commit on the session's execution context.
    pub fn commit_async(mut self) -> AsyncResult<Vec<OpResult>> {
        let session = self.session.clone();
        session.spawn(move || self.commit())
    }
}

fn apply(session: &Session, op: TransactionOp) -> OpResult {
    match op {
        TransactionOp::Create { path, data, mode } => {
            session.create_with(&path, data, mode).map(OpOutcome::Created)
        }
        TransactionOp::SetData {
            path,
            data,
            version,
        } => session.set(&path, data, version).map(OpOutcome::DataSet),
        TransactionOp::Delete { path } => session.delete(&path, false).map(OpOutcome::Deleted),
        TransactionOp::Check { .. } => {
            Err(CoordError::NotImplemented("transaction version checks"))
        }
    }
}
