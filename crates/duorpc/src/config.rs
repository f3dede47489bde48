//! Role configuration.

/// Pending invocations a single role can have in flight.
pub const DEFAULT_MAX_TASKS: usize = 2048;
pub const DEFAULT_MAX_CHANNELS: usize = 8;
pub const DEFAULT_MAX_PEERS: usize = 32;
/// First id handed to a connecting peer.
///
/// Any base works, zero included: server-side ids never meet a client's
/// `PeerId::SERVER`, which lives on the other end of the link.
pub const DEFAULT_PEER_ID_BASE: u64 = 1;

/// Settings shared by `Client` and `Server`.
///
/// Sizes of zero are clamped to one. The peer id base is taken as given.
///
/// ```rust,no_run
/// # use duorpc::Config;
/// let config = Config::default().with_max_tasks(64).with_max_channels(2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub max_tasks: usize,
    pub max_channels: usize,
    pub max_peers: usize,
    pub peer_id_base: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_tasks: DEFAULT_MAX_TASKS,
            max_channels: DEFAULT_MAX_CHANNELS,
            max_peers: DEFAULT_MAX_PEERS,
            peer_id_base: DEFAULT_PEER_ID_BASE,
        }
    }
}

impl Config {
    pub fn with_max_tasks(mut self, max_tasks: usize) -> Self {
        self.max_tasks = max_tasks.max(1);
        self
    }

    pub fn with_max_channels(mut self, max_channels: usize) -> Self {
        self.max_channels = max_channels.clamp(1, usize::from(u8::MAX) + 1);
        self
    }

    pub fn with_max_peers(mut self, max_peers: usize) -> Self {
        self.max_peers = max_peers.max(1);
        self
    }

    pub fn with_peer_id_base(mut self, base: u64) -> Self {
        self.peer_id_base = base;
        self
    }
}
