//! # Duorpc
//!
//! A symmetric peer-to-peer RPC layer over a multi-channel packet transport.
//!
//! ## Philosophy
//!
//! - **Explicit Exposure**: Only methods the host registers under a scope are
//!   reachable. There are no wildcards.
//! - **Host-Driven**: No background threads. All network work happens inside
//!   `poll_once` / `poll_for`, on the caller's thread.
//! - **Hostile Input Is Normal**: Anything a peer sends is validated before it
//!   touches a handler or a task slot, and dropped if it does not fit.
//!
//! ## Architecture
//!
//! ```text
//! inbound packet ──► Envelope::decode ──► Core::process_inbound
//!                                            ├─ Exec/Invoke ──► Registry ──► handler
//!                                            └─ Result ───────► TaskPool ──► PendingCall
//!
//! Client::invoke / Server::exec ──► Envelope::encode ──► Courier ──► Endpoint::send
//! ```
//!
//! `Client` and `Server` are the two roles. Both own a `Core` and implement the
//! transport side of `Courier` for it. Transports plug in through the
//! `transport::Network` trait; `local::LocalNetwork` is an in-process one.
//!
//! ## Example
//!
//! ```rust,no_run
//! use duorpc::{args, Client, Config, Method, Server, local::LocalNetwork};
//!
//! let network = LocalNetwork::new();
//! let mut server = Server::new(network.clone(), Config::default());
//! server.register("math", [Method::typed("add", |a: i64, b: i64| a + b)]);
//! server.listen("localhost", 4000)?;
//!
//! let mut client = Client::new(network, Config::default());
//! client.connect("localhost", 4000)?;
//! let mut call = client.invoke("math.add", args![2, 3], 0)?;
//! let sum = loop {
//!     server.poll_once();
//!     client.poll_once();
//!     if let Some(result) = call.try_result() {
//!         break result?;
//!     }
//! };
//! # Ok::<(), duorpc::Error>(())
//! ```

use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

/// Builds a `Vec<Value>` argument list.
///
/// ```rust,no_run
/// # use duorpc::args;
/// let args = args![2, "three", 4.0];
/// ```
#[macro_export]
macro_rules! args {
    ($($arg:expr),* $(,)?) => {
        vec![$($crate::Value::from($arg)),*]
    };
}

pub mod client;
pub mod config;
pub mod dispatch;
pub mod distribution;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod handles;
pub mod local;
pub mod registry;
pub mod server;
pub mod tasks;
pub mod transport;


pub use client::Client;
pub use client::ClientEvent;
pub use config::Config;
pub use dispatch::Core;
pub use dispatch::Courier;
pub use distribution::Target;
pub use duopack::TypeTag;
pub use duopack::Value;
pub use error::Error;
pub use error::Result;
pub use handler::CallKind;
pub use handler::Caller;
pub use handler::Reply;
pub use handler::Responder;
pub use handles::ChannelId;
pub use handles::FunctionId;
pub use handles::PeerId;
pub use handles::TaskId;
pub use registry::Method;
pub use registry::Signature;
pub use server::Server;
pub use server::ServerEvent;
pub use tasks::PendingCall;

/// Locks a std mutex, tolerating poison. Nothing guarded here is left
/// half-updated by a panic.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
