//! Type-safe handles for peers, tasks, functions and channels.
//!
//! Everything that crosses the wire is an integer, but a task id is not a peer
//! id. Wrapping each in its own type lets the compiler catch the mix-ups.

/// Identifies a connected peer.
///
/// Servers hand out ids from a counter starting at the configured base. A client
/// only ever talks to its server, which it knows as `PeerId::SERVER`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(pub u64);

impl PeerId {
    pub const SERVER: PeerId = PeerId(0);
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// Names one reservation of a slot in the local task pool.
///
/// Only meaningful to the side that reserved it; the remote just echoes it back.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u32);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Stable 64-bit identifier of a remotely callable function.
///
/// Derived from the dotted path `scope.name`, so both ends agree on it without
/// ever exchanging a table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FunctionId(pub i64);

impl FunctionId {
    /// Hashes `scope` and `name` as if joined by a dot.
    pub fn of(scope: &str, name: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(scope.as_bytes());
        hasher.update(b".");
        hasher.update(name.as_bytes());
        Self::from_digest(hasher.finalize())
    }

    /// Hashes an already-joined path such as `"math.add"`.
    pub fn from_path(path: &str) -> Self {
        Self::from_digest(blake3::hash(path.as_bytes()))
    }

    fn from_digest(digest: blake3::Hash) -> Self {
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest.as_bytes()[..8]);
        FunctionId(i64::from_le_bytes(head))
    }
}

impl std::fmt::Display for FunctionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fn-{:016x}", self.0 as u64)
    }
}

/// Transport channel index.
pub type ChannelId = u8;
