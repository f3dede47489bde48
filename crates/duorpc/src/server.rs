//! # Server Role
//!
//! Listens for peers, gives each one a `PeerId`, and routes calls to and from
//! any subset of them.
//!
//! ## Invariants
//!
//! - **Monotonic Ids**: Peer ids count up from the configured base and are never
//!   reused while the server lives, even across `shutdown` and `listen`.
//! - **Tagged Handles**: The id is stored on the transport handle at connect time.
//!   Events for untagged or unrecorded handles are ignored.
//! - **Departures Settle**: When a peer leaves, every call waiting on it fails
//!   with `Error::Abandoned`.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use dashmap::DashMap;
use duopack::Value;

use crate::config::Config;
use crate::dispatch::Core;
use crate::dispatch::Courier;
use crate::distribution::Target;
use crate::envelope::Envelope;
use crate::error::Error;
use crate::error::Result;
use crate::handles::ChannelId;
use crate::handles::FunctionId;
use crate::handles::PeerId;
use crate::registry;
use crate::registry::Method;
use crate::registry::Registry;
use crate::tasks::PendingCall;
use crate::transport::Endpoint;
use crate::transport::Event;
use crate::transport::Network;
use crate::transport::PeerHandle;
use crate::transport::PeerOf;
use crate::transport::TransportError;

/// Notifications returned from `Server::poll_once`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    PeerConnected(PeerId),
    PeerDisconnected(PeerId),
    NetworkError(TransportError),
}

/// Resolves peer ids to handles for the core.
struct PeerLinks<'a, E: Endpoint> {
    endpoint: &'a mut E,
    peers: &'a DashMap<PeerId, E::Peer>,
}

impl<E: Endpoint> Courier for PeerLinks<'_, E> {
    fn send(&mut self, peer: PeerId, channel: ChannelId, packet: &[u8]) -> Result<()> {
        let handle = self.peers.get(&peer).map(|h| h.value().clone()).ok_or(Error::UnknownPeer(peer))?;
        self.endpoint.send(&handle, channel, packet)?;
        Ok(())
    }
}

pub struct Server<N: Network> {
    network: N,
    config: Config,
    core: Core,
    endpoint: Option<N::Endpoint>,
    peers: DashMap<PeerId, PeerOf<N>>,
    next_peer_id: AtomicU64,
}

impl<N: Network> Server<N> {
    pub fn new(network: N, config: Config) -> Self {
        let core = Core::new(&config);
        let next_peer_id = AtomicU64::new(config.peer_id_base);
        Self {
            network,
            config,
            core,
            endpoint: None,
            peers: DashMap::new(),
            next_peer_id,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ========================================================================
    //  REGISTRY
    // ========================================================================

    pub fn register(&mut self, scope: &str, methods: impl IntoIterator<Item = Method>) -> Vec<registry::Error> {
        self.core.registry_mut().register(scope, methods)
    }

    pub fn unregister<S: AsRef<str>>(&mut self, scope: &str, names: impl IntoIterator<Item = S>) -> usize {
        self.core.registry_mut().unregister(scope, names)
    }

    pub fn unregister_scope(&mut self, scope: &str) -> usize {
        self.core.registry_mut().unregister_scope(scope)
    }

    pub fn registry(&self) -> &Registry {
        self.core.registry()
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        self.core.registry_mut()
    }

    // ========================================================================
    //  LIFECYCLE
    // ========================================================================

    pub fn listen(&mut self, address: &str, port: u16) -> Result<()> {
        if self.endpoint.is_some() {
            return Err(Error::AlreadyListening);
        }
        let endpoint = self
            .network
            .open(Some((address, port)), self.config.max_peers, self.config.max_channels)
            .inspect_err(|e| tracing::warn!(address, port, error = %e, "listen failed"))?;
        self.endpoint = Some(endpoint);
        tracing::info!(address, port, max_peers = self.config.max_peers, "listening");
        Ok(())
    }

    /// Drops the endpoint. Peers see a disconnect; their waiting calls are abandoned.
    pub fn shutdown(&mut self) {
        let Some(mut endpoint) = self.endpoint.take() else {
            return;
        };
        endpoint.flush();
        drop(endpoint);

        let dropped = self.peers.len();
        self.peers.clear();
        self.core.forget_all();
        tracing::info!(peers = dropped, "shut down");
    }

    pub fn is_listening(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Connected peers, ascending.
    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.peers.iter().map(|entry| *entry.key()).collect();
        peers.sort_unstable();
        peers
    }

    pub fn is_connected(&self, peer: PeerId) -> bool {
        self.peers.contains_key(&peer)
    }

    /// Asks the transport to drop `peer`. `PeerDisconnected` follows from a later poll.
    pub fn kick(&mut self, peer: PeerId) {
        let Some(endpoint) = self.endpoint.as_mut() else { return };
        let Some(handle) = self.peers.get(&peer).map(|h| h.value().clone()) else { return };
        tracing::debug!(%peer, "kicking peer");
        endpoint.disconnect(&handle);
    }

    /// Calls currently holding a task slot.
    pub fn calls_in_flight(&self) -> usize {
        crate::lock(self.core.tasks()).pending()
    }

    // ========================================================================
    //  POLLING
    // ========================================================================

    /// Sends ready deferred replies, then drains at most one transport event.
    pub fn poll_once(&mut self) -> Option<ServerEvent> {
        let endpoint = self.endpoint.as_mut()?;
        let mut links = PeerLinks { endpoint, peers: &self.peers };
        self.core.flush_deferred(&mut links);

        match links.endpoint.service()? {
            Event::Connect(handle) => {
                let peer = PeerId(self.next_peer_id.fetch_add(1, Ordering::Relaxed));
                handle.set_tag(Some(peer.0));
                self.peers.insert(peer, handle);
                tracing::debug!(%peer, "peer connected");
                Some(ServerEvent::PeerConnected(peer))
            }
            Event::Disconnect(handle) => {
                let Some(tag) = handle.tag() else {
                    tracing::trace!("ignoring disconnect of untagged handle");
                    return None;
                };
                let peer = PeerId(tag);
                self.peers.remove(&peer)?;
                self.core.forget_peer(peer);
                tracing::debug!(%peer, "peer disconnected");
                Some(ServerEvent::PeerDisconnected(peer))
            }
            Event::Receive { peer: handle, channel, packet } => {
                let Some(peer) = handle.tag().map(PeerId).filter(|p| self.peers.contains_key(p)) else {
                    tracing::trace!(len = packet.len(), "ignoring packet from unknown handle");
                    return None;
                };
                // Handlers learn the sender from `Caller::sender`.
                self.core.process_inbound(&mut links, peer, &packet, channel);
                None
            }
            Event::Error(e) => {
                tracing::warn!(error = %e, "transport error");
                Some(ServerEvent::NetworkError(e))
            }
        }
    }

    /// Polls until `budget` has elapsed, collecting notifications.
    pub fn poll_for(&mut self, budget: Duration) -> Vec<ServerEvent> {
        let started = Instant::now();
        let mut events = Vec::new();
        loop {
            events.extend(self.poll_once());
            if started.elapsed() > budget {
                return events;
            }
        }
    }

    // ========================================================================
    //  CALLS
    // ========================================================================

    /// Fire-and-forget call of `path` on every peer `target` selects.
    ///
    /// Returns how many peers it was sent to.
    pub fn exec(
        &mut self,
        target: impl Into<Target>,
        path: &str,
        args: Vec<Value>,
        channel: ChannelId,
    ) -> Result<usize> {
        let endpoint = self.endpoint.as_mut().ok_or(Error::NotListening)?;
        let mut connected: Vec<PeerId> = self.peers.iter().map(|entry| *entry.key()).collect();
        connected.sort_unstable();
        let recipients = target.into().select(&connected);

        let envelope = Envelope::Exec { function: FunctionId::from_path(path), args };
        let mut links = PeerLinks { endpoint, peers: &self.peers };
        let sent = self.core.broadcast(&mut links, &recipients, &envelope, channel)?;
        tracing::debug!(path, sent, "exec sent");
        Ok(sent)
    }

    /// Calls `path` on `peer` and returns a handle to its result.
    pub fn invoke(&mut self, peer: PeerId, path: &str, args: Vec<Value>, channel: ChannelId) -> Result<PendingCall> {
        let endpoint = self.endpoint.as_mut().ok_or(Error::NotListening)?;
        if !self.peers.contains_key(&peer) {
            return Err(Error::UnknownPeer(peer));
        }
        let call = self.core.reserve(peer)?;
        let envelope = Envelope::Invoke { function: FunctionId::from_path(path), args, task: call.task() };
        let mut links = PeerLinks { endpoint, peers: &self.peers };
        // Dropping `call` on error hands the slot back.
        self.core.send_envelope(&mut links, peer, &envelope, channel)?;
        tracing::debug!(%peer, path, task = %call.task(), "invoke sent");
        Ok(call)
    }
}

impl<N: Network> Drop for Server<N> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
