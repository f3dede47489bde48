//! # Transport Abstraction
//!
//! The RPC layer only needs a connection-oriented, multi-channel packet pipe with
//! reliable ordered delivery per channel. This module pins that down as two traits.
//!
//! ## Philosophy
//!
//! - **Poll, Don't Push**: Endpoints never call back into the RPC layer. The owner
//!   drains one event at a time with `service()`, which keeps every handler on the
//!   caller's thread.
//! - **Byte-Oriented**: Packets are opaque `[u8]`. Framing is the envelope's job.
//! - **Tagged Handles**: The RPC layer stores its own peer id on the transport's
//!   handle, so later events can be mapped back without a reverse lookup table.

use crate::handles::ChannelId;

/// Transport-level failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Nobody is listening at the address, or the listener is full.
    ConnectionRefused(String),
    /// Another endpoint is already bound to the address.
    AddressInUse(String),
    /// The link is gone.
    ConnectionLost(String),
    /// Channel index outside what the endpoint was opened with.
    InvalidChannel { channel: ChannelId, max: usize },
    /// The endpoint has been shut down.
    Closed,
    Io(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionRefused(msg) => write!(f, "Connection refused: {}", msg),
            Self::AddressInUse(addr) => write!(f, "Address in use: {}", addr),
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::InvalidChannel { channel, max } => {
                write!(f, "Invalid channel {} (endpoint has {})", channel, max)
            }
            Self::Closed => write!(f, "Endpoint closed"),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// A transport's handle to one remote peer.
///
/// Clones must share the same tag.
pub trait PeerHandle: Clone {
    fn set_tag(&self, tag: Option<u64>);
    fn tag(&self) -> Option<u64>;
}

/// One transport event, as drained by `Endpoint::service`.
#[derive(Debug)]
pub enum Event<P> {
    Connect(P),
    Disconnect(P),
    Receive { peer: P, channel: ChannelId, packet: Vec<u8> },
    Error(TransportError),
}

/// A local transport endpoint: a bound server host or an unbound client host.
///
/// Dropping the endpoint destroys it and drops every link it holds.
pub trait Endpoint {
    type Peer: PeerHandle;

    /// Starts connecting to a remote endpoint. The handle is usable for `send`
    /// immediately; a `Connect` event follows once the link is up.
    fn connect(&mut self, address: &str, port: u16) -> Result<Self::Peer>;

    /// Drains at most one pending event.
    fn service(&mut self) -> Option<Event<Self::Peer>>;

    fn send(&mut self, peer: &Self::Peer, channel: ChannelId, packet: &[u8]) -> Result<()>;

    /// Requests a graceful disconnect. Both sides see a `Disconnect` event later.
    fn disconnect(&mut self, peer: &Self::Peer);

    /// Pushes queued outbound packets onto the wire.
    fn flush(&mut self);
}

/// Factory for endpoints.
pub trait Network {
    type Endpoint: Endpoint;

    /// Opens an endpoint. `bind` makes it a listener; `None` makes it a client host.
    fn open(
        &self,
        bind: Option<(&str, u16)>,
        max_peers: usize,
        max_channels: usize,
    ) -> Result<Self::Endpoint>;
}

/// The peer handle type of a network's endpoints.
pub type PeerOf<N> = <<N as Network>::Endpoint as Endpoint>::Peer;
