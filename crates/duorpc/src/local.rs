//! # In-Process Transport
//!
//! A `Network` whose endpoints live in the same process and trade packets through
//! shared inboxes. Delivery is immediate, reliable and ordered, which makes it the
//! transport of choice for tests and for wiring two roles together in one binary.
//!
//! ## Invariants
//!
//! - **Links**: Every connection gets a process-unique link id. Both ends keep a
//!   handle under that id, and each end's handle carries its own tag.
//! - **Exactly One Disconnect**: A link produces one `Disconnect` per side no
//!   matter how many times it is closed.
//! - **No Cycles**: Handles point at the remote inbox weakly, so a dropped
//!   endpoint is really gone and sends to it fail with `ConnectionLost`.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use crate::handles::ChannelId;
use crate::lock;
use crate::transport::Endpoint;
use crate::transport::Event;
use crate::transport::Network;
use crate::transport::PeerHandle;
use crate::transport::Result;
use crate::transport::TransportError;

type Address = (String, u16);

enum Wire {
    Opened(LocalPeer),
    Closed(u64),
    Packet { link: u64, channel: ChannelId, packet: Vec<u8> },
}

/// The receiving half of an endpoint.
struct Station {
    inbox: Mutex<VecDeque<Wire>>,
    /// Live links, counted only for listeners.
    active: AtomicUsize,
    max_peers: usize,
}

impl Station {
    fn push(&self, wire: Wire) {
        lock(&self.inbox).push_back(wire);
    }

    fn pop(&self) -> Option<Wire> {
        lock(&self.inbox).pop_front()
    }
}

/// One end's handle to a link.
#[derive(Clone)]
pub struct LocalPeer {
    link: u64,
    remote: Weak<Station>,
    tag: Arc<Mutex<Option<u64>>>,
}

impl LocalPeer {
    fn new(link: u64, remote: &Arc<Station>) -> Self {
        Self { link, remote: Arc::downgrade(remote), tag: Arc::default() }
    }

    pub fn link(&self) -> u64 {
        self.link
    }
}

impl PeerHandle for LocalPeer {
    fn set_tag(&self, tag: Option<u64>) {
        *lock(&self.tag) = tag;
    }

    fn tag(&self) -> Option<u64> {
        *lock(&self.tag)
    }
}

impl std::fmt::Debug for LocalPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalPeer")
            .field("link", &self.link)
            .field("tag", &self.tag())
            .finish()
    }
}

#[derive(Default)]
struct Listeners {
    bound: HashMap<Address, Weak<Station>>,
    next_link: u64,
}

/// Shared namespace of in-process listeners. Clones see the same listeners.
#[derive(Clone, Default)]
pub struct LocalNetwork {
    listeners: Arc<Mutex<Listeners>>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Network for LocalNetwork {
    type Endpoint = LocalEndpoint;

    fn open(&self, bind: Option<(&str, u16)>, max_peers: usize, max_channels: usize) -> Result<LocalEndpoint> {
        let station = Arc::new(Station {
            inbox: Mutex::new(VecDeque::new()),
            active: AtomicUsize::new(0),
            max_peers: max_peers.max(1),
        });

        let bound = match bind {
            Some((address, port)) => {
                let key = (address.to_owned(), port);
                let mut listeners = lock(&self.listeners);
                if listeners.bound.get(&key).is_some_and(|w| w.strong_count() > 0) {
                    return Err(TransportError::AddressInUse(format!("{}:{}", address, port)));
                }
                listeners.bound.insert(key.clone(), Arc::downgrade(&station));
                Some(key)
            }
            None => None,
        };

        Ok(LocalEndpoint {
            network: self.clone(),
            station,
            bound,
            links: HashMap::new(),
            max_channels: max_channels.max(1),
        })
    }
}

pub struct LocalEndpoint {
    network: LocalNetwork,
    station: Arc<Station>,
    bound: Option<Address>,
    links: HashMap<u64, LocalPeer>,
    max_channels: usize,
}

impl LocalEndpoint {
    /// Links currently open on this endpoint.
    pub fn link_count(&self) -> usize {
        self.links.len()
    }
}

impl Endpoint for LocalEndpoint {
    type Peer = LocalPeer;

    fn connect(&mut self, address: &str, port: u16) -> Result<LocalPeer> {
        let (remote, link) = {
            let mut listeners = lock(&self.network.listeners);
            let remote = listeners
                .bound
                .get(&(address.to_owned(), port))
                .and_then(Weak::upgrade)
                .ok_or_else(|| TransportError::ConnectionRefused(format!("nothing listening on {}:{}", address, port)))?;
            listeners.next_link += 1;
            (remote, listeners.next_link)
        };

        let taken = remote.active.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
            (n < remote.max_peers).then_some(n + 1)
        });
        if taken.is_err() {
            return Err(TransportError::ConnectionRefused(format!("{}:{} is full", address, port)));
        }

        let local = LocalPeer::new(link, &remote);
        remote.push(Wire::Opened(LocalPeer::new(link, &self.station)));
        self.station.push(Wire::Opened(local.clone()));
        self.links.insert(link, local.clone());
        Ok(local)
    }

    fn service(&mut self) -> Option<Event<LocalPeer>> {
        loop {
            match self.station.pop()? {
                Wire::Opened(peer) => {
                    let peer = self.links.entry(peer.link).or_insert(peer).clone();
                    return Some(Event::Connect(peer));
                }
                Wire::Closed(link) => {
                    if let Some(peer) = self.links.remove(&link) {
                        if self.bound.is_some() {
                            self.station.active.fetch_sub(1, Ordering::AcqRel);
                        }
                        return Some(Event::Disconnect(peer));
                    }
                }
                Wire::Packet { link, channel, packet } => {
                    if let Some(peer) = self.links.get(&link) {
                        return Some(Event::Receive { peer: peer.clone(), channel, packet });
                    }
                }
            }
        }
    }

    fn send(&mut self, peer: &LocalPeer, channel: ChannelId, packet: &[u8]) -> Result<()> {
        if usize::from(channel) >= self.max_channels {
            return Err(TransportError::InvalidChannel { channel, max: self.max_channels });
        }
        if !self.links.contains_key(&peer.link) {
            return Err(TransportError::ConnectionLost(format!("link {} is closed", peer.link)));
        }
        let remote = peer
            .remote
            .upgrade()
            .ok_or_else(|| TransportError::ConnectionLost(format!("link {} has no remote", peer.link)))?;
        remote.push(Wire::Packet { link: peer.link, channel, packet: packet.to_vec() });
        Ok(())
    }

    fn disconnect(&mut self, peer: &LocalPeer) {
        if !self.links.contains_key(&peer.link) {
            return;
        }
        if let Some(remote) = peer.remote.upgrade() {
            remote.push(Wire::Closed(peer.link));
        }
        self.station.push(Wire::Closed(peer.link));
    }

    fn flush(&mut self) {
        // Delivery already happened in `send`.
    }
}

impl Drop for LocalEndpoint {
    fn drop(&mut self) {
        for (link, peer) in self.links.drain() {
            if let Some(remote) = peer.remote.upgrade() {
                remote.push(Wire::Closed(link));
            }
        }
        if let Some(key) = self.bound.take() {
            let mut listeners = lock(&self.network.listeners);
            let ours = listeners.bound.get(&key).is_some_and(|w| w.as_ptr() == Arc::as_ptr(&self.station));
            if ours {
                listeners.bound.remove(&key);
            }
        }
    }
}
