//! # Dispatch
//!
//! The role-independent half of the protocol: decode an inbound packet, route it
//! to a registered handler or to a waiting task, and put replies back on the wire
//! through whatever `Courier` the role provides.
//!
//! ## Invariants
//!
//! - **Never Trust The Wire**: Malformed packets, unknown functions, bad
//!   arguments and stray results are dropped. Nothing a peer sends can make
//!   dispatch fail.
//! - **Exact Signatures**: A handler only runs when the argument count and every
//!   argument's type tag match its signature.
//! - **Replies Follow The Call**: A `Result` goes back to the invoking peer on the
//!   channel the `Invoke` arrived on.

use std::sync::Arc;
use std::sync::Mutex;

use duopack::Value;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use crate::config::Config;
use crate::envelope::Envelope;
use crate::error::Result;
use crate::handler::CallKind;
use crate::handler::Caller;
use crate::handler::Reply;
use crate::handles::ChannelId;
use crate::handles::PeerId;
use crate::handles::TaskId;
use crate::lock;
use crate::registry::ArgTypes;
use crate::registry::Registry;
use crate::tasks::PendingCall;
use crate::tasks::TaskPool;

/// The role's send primitive.
pub trait Courier {
    fn send(&mut self, peer: PeerId, channel: ChannelId, packet: &[u8]) -> Result<()>;
}

/// A handler answer still being computed.
struct Deferred {
    peer: PeerId,
    channel: ChannelId,
    task: TaskId,
    rx: oneshot::Receiver<Value>,
}

pub struct Core {
    registry: Registry,
    tasks: Arc<Mutex<TaskPool>>,
    deferred: Vec<Deferred>,
}

impl Core {
    pub fn new(config: &Config) -> Self {
        Self {
            registry: Registry::new(),
            tasks: Arc::new(Mutex::new(TaskPool::new(config.max_tasks))),
            deferred: Vec::new(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn tasks(&self) -> &Arc<Mutex<TaskPool>> {
        &self.tasks
    }

    /// Reserves a task slot for a call to `peer`.
    pub fn reserve(&self, peer: PeerId) -> Result<PendingCall> {
        PendingCall::reserve(&self.tasks, peer)
    }

    pub fn send_envelope(
        &self,
        courier: &mut impl Courier,
        peer: PeerId,
        envelope: &Envelope,
        channel: ChannelId,
    ) -> Result<()> {
        let packet = envelope.encode()?;
        courier.send(peer, channel, &packet)
    }

    /// Encodes once and sends to each of `peers` in order.
    ///
    /// A failed send is logged and skipped. Returns how many sends succeeded.
    pub fn broadcast(
        &self,
        courier: &mut impl Courier,
        peers: &[PeerId],
        envelope: &Envelope,
        channel: ChannelId,
    ) -> Result<usize> {
        let packet = envelope.encode()?;
        let mut sent = 0;
        for &peer in peers {
            match courier.send(peer, channel, &packet) {
                Ok(()) => sent += 1,
                Err(e) => tracing::warn!(%peer, error = %e, "send failed"),
            }
        }
        Ok(sent)
    }

    /// Decodes and dispatches one inbound packet from `sender`.
    pub fn process_inbound(
        &mut self,
        courier: &mut impl Courier,
        sender: PeerId,
        raw: &[u8],
        channel: ChannelId,
    ) {
        let envelope = match Envelope::decode(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::trace!(peer = %sender, error = %e, len = raw.len(), "discarding malformed packet");
                return;
            }
        };

        match envelope {
            Envelope::Exec { function, args } => {
                let Some(entry) = self.registry.get(function) else {
                    tracing::error!(peer = %sender, %function, "exec of unregistered function");
                    return;
                };
                if !entry.signature().accepts(&args) {
                    tracing::error!(
                        peer = %sender,
                        path = entry.path(),
                        expected = %entry.signature(),
                        found = %ArgTypes(&args),
                        "exec arguments rejected"
                    );
                    return;
                }
                let caller = Caller { sender, channel, kind: CallKind::Exec };
                if entry.call(&caller, args).is_none() {
                    tracing::error!(peer = %sender, path = entry.path(), "exec arguments could not be bound");
                }
            }

            Envelope::Invoke { function, args, task } => {
                let Some(entry) = self.registry.get(function) else {
                    tracing::warn!(peer = %sender, %function, %task, "invoke of unregistered function");
                    return;
                };
                if !entry.signature().accepts(&args) {
                    tracing::warn!(
                        peer = %sender,
                        path = entry.path(),
                        %task,
                        expected = %entry.signature(),
                        found = %ArgTypes(&args),
                        "invoke arguments rejected"
                    );
                    return;
                }
                let caller = Caller { sender, channel, kind: CallKind::Invoke };
                match entry.call(&caller, args) {
                    Some(Reply::Now(value)) => {
                        let reply = Envelope::Result { value, task };
                        if let Err(e) = self.send_envelope(courier, sender, &reply, channel) {
                            tracing::warn!(peer = %sender, %task, error = %e, "failed to send result");
                        }
                    }
                    Some(Reply::Later(rx)) => {
                        self.deferred.push(Deferred { peer: sender, channel, task, rx });
                    }
                    None => {
                        tracing::warn!(peer = %sender, path = entry.path(), %task, "invoke arguments could not be bound");
                    }
                }
            }

            Envelope::Result { value, task } => {
                if !lock(&self.tasks).resolve(task, sender, value) {
                    tracing::trace!(peer = %sender, %task, "discarding result for a task that is not pending");
                }
            }
        }
    }

    /// Sends every deferred reply whose responder has answered.
    pub fn flush_deferred(&mut self, courier: &mut impl Courier) -> usize {
        if self.deferred.is_empty() {
            return 0;
        }

        let mut ready = Vec::new();
        self.deferred.retain_mut(|d| match d.rx.try_recv() {
            Ok(value) => {
                ready.push((d.peer, d.channel, Envelope::Result { value, task: d.task }));
                false
            }
            Err(TryRecvError::Empty) => true,
            Err(TryRecvError::Closed) => {
                tracing::warn!(peer = %d.peer, task = %d.task, "deferred reply abandoned by its handler");
                false
            }
        });

        let mut sent = 0;
        for (peer, channel, reply) in ready {
            match self.send_envelope(courier, peer, &reply, channel) {
                Ok(()) => sent += 1,
                Err(e) => tracing::warn!(%peer, error = %e, "failed to send deferred result"),
            }
        }
        sent
    }

    /// Abandons everything tied to a departed peer.
    pub fn forget_peer(&mut self, peer: PeerId) {
        let settled = lock(&self.tasks).settle_peer(peer);
        self.deferred.retain(|d| d.peer != peer);
        if settled > 0 {
            tracing::debug!(%peer, settled, "settled calls of departed peer");
        }
    }

    /// Abandons every waiting call and deferred reply.
    pub fn forget_all(&mut self) {
        let settled = lock(&self.tasks).settle_all();
        self.deferred.clear();
        if settled > 0 {
            tracing::debug!(settled, "settled all calls");
        }
    }

    /// Deferred replies not yet sent.
    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }
}
