//! # Client Role
//!
//! Wraps one outbound connection. Every call goes to the server, and everything
//! inbound is dispatched as coming from `PeerId::SERVER`.

use std::time::Duration;
use std::time::Instant;

use duopack::Value;

use crate::config::Config;
use crate::dispatch::Core;
use crate::dispatch::Courier;
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
use crate::transport::PeerOf;
use crate::transport::TransportError;

/// Notifications returned from `Client::poll_once`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Connected,
    Disconnected,
    NetworkError(TransportError),
}

/// Sends everything to the one server link.
struct ServerLink<'a, E: Endpoint> {
    endpoint: &'a mut E,
    server: &'a E::Peer,
}

impl<E: Endpoint> Courier for ServerLink<'_, E> {
    fn send(&mut self, _peer: PeerId, channel: ChannelId, packet: &[u8]) -> Result<()> {
        self.endpoint.send(self.server, channel, packet)?;
        Ok(())
    }
}

/// A live connection: the endpoint and its handle to the server.
struct Connection<N: Network> {
    endpoint: N::Endpoint,
    server: PeerOf<N>,
}

pub struct Client<N: Network> {
    network: N,
    config: Config,
    core: Core,
    connection: Option<Connection<N>>,
    connected: bool,
}

impl<N: Network> Client<N> {
    pub fn new(network: N, config: Config) -> Self {
        let core = Core::new(&config);
        Self { network, config, core, connection: None, connected: false }
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
    //  CONNECTION
    // ========================================================================

    /// Opens an endpoint and starts connecting. `ClientEvent::Connected` follows
    /// from a later poll.
    pub fn connect(&mut self, address: &str, port: u16) -> Result<()> {
        if self.connection.is_some() {
            return Err(Error::AlreadyConnected);
        }

        // On failure the endpoint is dropped here, before the error is returned.
        let mut endpoint = self.network.open(None, 1, self.config.max_channels)?;
        let server = endpoint.connect(address, port).inspect_err(|e| {
            tracing::warn!(address, port, error = %e, "connect failed");
        })?;

        tracing::info!(address, port, "connecting");
        self.connection = Some(Connection { endpoint, server });
        Ok(())
    }

    /// Closes the connection gracefully and abandons every waiting call.
    pub fn disconnect(&mut self) {
        let Some(mut connection) = self.connection.take() else {
            return;
        };
        connection.endpoint.disconnect(&connection.server);
        connection.endpoint.flush();
        drop(connection);

        self.connected = false;
        self.core.forget_all();
        tracing::info!("disconnected");
    }

    /// True once the transport reported the link up, until it goes down.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Calls currently holding a task slot.
    pub fn calls_in_flight(&self) -> usize {
        crate::lock(self.core.tasks()).pending()
    }

    // ========================================================================
    //  POLLING
    // ========================================================================

    /// Sends ready deferred replies, then drains at most one transport event.
    pub fn poll_once(&mut self) -> Option<ClientEvent> {
        let connection = self.connection.as_mut()?;
        let mut link = ServerLink { endpoint: &mut connection.endpoint, server: &connection.server };
        self.core.flush_deferred(&mut link);

        match link.endpoint.service()? {
            Event::Connect(_) => {
                tracing::debug!("link up");
                self.connected = true;
                Some(ClientEvent::Connected)
            }
            Event::Disconnect(_) => {
                tracing::debug!("link down");
                self.connection = None;
                self.connected = false;
                self.core.forget_all();
                Some(ClientEvent::Disconnected)
            }
            Event::Receive { channel, packet, .. } => {
                self.core.process_inbound(&mut link, PeerId::SERVER, &packet, channel);
                None
            }
            Event::Error(e) => {
                tracing::warn!(error = %e, "transport error");
                Some(ClientEvent::NetworkError(e))
            }
        }
    }

    /// Polls until `budget` has elapsed, collecting notifications.
    pub fn poll_for(&mut self, budget: Duration) -> Vec<ClientEvent> {
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

    /// Fire-and-forget call of `path` on the server.
    pub fn exec(&mut self, path: &str, args: Vec<Value>, channel: ChannelId) -> Result<()> {
        let envelope = Envelope::Exec { function: FunctionId::from_path(path), args };
        self.send(&envelope, channel)
    }

    /// Calls `path` on the server and returns a handle to its result.
    pub fn invoke(&mut self, path: &str, args: Vec<Value>, channel: ChannelId) -> Result<PendingCall> {
        if self.connection.is_none() {
            return Err(Error::NotConnected);
        }
        let call = self.core.reserve(PeerId::SERVER)?;
        let envelope = Envelope::Invoke { function: FunctionId::from_path(path), args, task: call.task() };
        // Dropping `call` on error hands the slot back.
        self.send(&envelope, channel)?;
        tracing::debug!(path, task = %call.task(), "invoke sent");
        Ok(call)
    }

    fn send(&mut self, envelope: &Envelope, channel: ChannelId) -> Result<()> {
        let connection = self.connection.as_mut().ok_or(Error::NotConnected)?;
        let mut link = ServerLink { endpoint: &mut connection.endpoint, server: &connection.server };
        self.core.send_envelope(&mut link, PeerId::SERVER, envelope, channel)
    }
}

impl<N: Network> Drop for Client<N> {
    fn drop(&mut self) {
        self.disconnect();
    }
}
