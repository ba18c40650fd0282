//! Node records and their metadata snapshot.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Placeholder reported for transaction ids and the unimplemented
/// child/ACL version counters.
pub const UNTRACKED: i64 = -1;

/// A stored node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Opaque payload.
    pub data: Vec<u8>,
    /// Starts at 0, incremented on every successful set.
    pub version: i32,
    /// Creation time in milliseconds since the Unix epoch.
    pub created_at: i64,
    /// Last modification time in milliseconds since the Unix epoch.
    pub updated_at: i64,
    /// Owning session id for ephemeral nodes, 0 otherwise.
    pub ephemeral_owner: i64,
}

impl Node {
    /// A fresh node at version 0.
    pub fn new(data: Vec<u8>, ephemeral_owner: Option<i64>) -> Self {
        let now = now_millis();
        Self {
            data,
            version: 0,
            created_at: now,
            updated_at: now,
            ephemeral_owner: ephemeral_owner.unwrap_or(0),
        }
    }

    /// Replace the payload and bump the version.
    pub(crate) fn update(&mut self, data: Vec<u8>) {
        self.data = data;
        self.version += 1;
        self.updated_at = now_millis();
    }

    /// Build the reported metadata for this node.
    pub fn stat(&self, num_children: usize) -> Stat {
        Stat {
            czxid: UNTRACKED,
            mzxid: UNTRACKED,
            pzxid: UNTRACKED,
            ctime: self.created_at,
            mtime: self.updated_at,
            version: self.version,
            cversion: UNTRACKED as i32,
            aversion: UNTRACKED as i32,
            ephemeral_owner: self.ephemeral_owner,
            data_length: self.data.len() as i32,
            num_children: num_children as i32,
        }
    }

    /// Whether a session owns this node.
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral_owner != 0
    }
}

/// Metadata returned alongside node reads and writes.
///
/// Field layout follows the real service's stat structure. The zxid and
/// `cversion`/`aversion` fields are fixed placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    pub czxid: i64,
    pub mzxid: i64,
    pub pzxid: i64,
    pub ctime: i64,
    pub mtime: i64,
    pub version: i32,
    pub cversion: i32,
    pub aversion: i32,
    pub ephemeral_owner: i64,
    pub data_length: i32,
    pub num_children: i32,
}

pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
