//! Selecting which connected peers receive a server-side `Exec`.

use crate::handles::PeerId;

/// Who a server `exec` goes to.
///
/// Anything that does not name peers explicitly broadcasts.
#[derive(Default)]
pub enum Target {
    /// Every connected peer.
    #[default]
    All,
    Peer(PeerId),
    /// Each listed peer, in list order. Unknown ids are skipped.
    Peers(Vec<PeerId>),
    /// Every connected peer the predicate accepts.
    Filter(Box<dyn Fn(PeerId) -> bool + Send + Sync>),
}

impl Target {
    pub fn filter(predicate: impl Fn(PeerId) -> bool + Send + Sync + 'static) -> Self {
        Target::Filter(Box::new(predicate))
    }

    /// Resolves the target against the connected peers, which must be sorted.
    pub fn select(&self, connected: &[PeerId]) -> Vec<PeerId> {
        let is_connected = |peer: &PeerId| connected.binary_search(peer).is_ok();
        match self {
            Target::All => connected.to_vec(),
            Target::Peer(peer) => Some(*peer).filter(is_connected).into_iter().collect(),
            Target::Peers(peers) => peers.iter().copied().filter(is_connected).collect(),
            Target::Filter(predicate) => connected.iter().copied().filter(|&p| predicate(p)).collect(),
        }
    }
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::All => write!(f, "All"),
            Target::Peer(peer) => f.debug_tuple("Peer").field(peer).finish(),
            Target::Peers(peers) => f.debug_tuple("Peers").field(peers).finish(),
            Target::Filter(_) => write!(f, "Filter(..)"),
        }
    }
}

impl From<PeerId> for Target {
    fn from(peer: PeerId) -> Self {
        Target::Peer(peer)
    }
}

impl From<Vec<PeerId>> for Target {
    fn from(peers: Vec<PeerId>) -> Self {
        Target::Peers(peers)
    }
}

impl From<&[PeerId]> for Target {
    fn from(peers: &[PeerId]) -> Self {
        Target::Peers(peers.to_vec())
    }
}

impl<const N: usize> From<[PeerId; N]> for Target {
    fn from(peers: [PeerId; N]) -> Self {
        Target::Peers(peers.to_vec())
    }
}

impl<T: Into<Target>> From<Option<T>> for Target {
    fn from(target: Option<T>) -> Self {
        target.map_or(Target::All, Into::into)
    }
}

impl From<()> for Target {
    fn from(_: ()) -> Self {
        Target::All
    }
}
