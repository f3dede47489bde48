//! # Handlers
//!
//! A handler is any closure the host exposes under a scope. The registry stores
//! them type-erased as `Handler`; this module holds the adapters that get a typed
//! Rust closure into that shape and its result back out as a `Reply`.
//!
//! ## Philosophy
//!
//! - **Signatures Are Static**: A typed closure's parameter types fix its
//!   signature when it is registered. Nothing is inferred from the wire.
//! - **Replies Can Wait**: A handler that cannot answer immediately returns
//!   `Reply::Later` and answers through its `Responder` on a later poll.

use std::sync::Arc;

use duopack::TypeTag;
use duopack::Value;
use tokio::sync::oneshot;

use crate::handles::ChannelId;
use crate::handles::PeerId;
use crate::registry::Signature;

/// How a handler was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Exec,
    Invoke,
}

/// Context passed to every handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    /// The peer that sent the call. On a client this is always `PeerId::SERVER`.
    pub sender: PeerId,
    pub channel: ChannelId,
    pub kind: CallKind,
}

/// A handler's answer.
///
/// Exec calls discard it either way.
#[derive(Debug)]
pub enum Reply {
    Now(Value),
    Later(oneshot::Receiver<Value>),
}

impl Reply {
    /// Creates a deferred reply and the responder that completes it.
    pub fn deferred() -> (Responder, Reply) {
        let (tx, rx) = oneshot::channel();
        (Responder { tx }, Reply::Later(rx))
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Reply::Now(value)
    }
}

/// Completes a deferred reply. Dropping it unanswered abandons the reply.
#[derive(Debug)]
pub struct Responder {
    tx: oneshot::Sender<Value>,
}

impl Responder {
    /// Returns `false` if the reply was already given up on.
    pub fn send(self, value: impl Into<Value>) -> bool {
        self.tx.send(value.into()).is_ok()
    }
}

/// Type-erased handler. `None` means the arguments could not be bound.
pub type Handler = Arc<dyn Fn(&Caller, Vec<Value>) -> Option<Reply> + Send + Sync>;

/// Values a handler may return.
pub trait IntoReply {
    fn into_reply(self) -> Reply;
}

impl IntoReply for Reply {
    fn into_reply(self) -> Reply {
        self
    }
}

impl IntoReply for Value {
    fn into_reply(self) -> Reply {
        Reply::Now(self)
    }
}

macro_rules! impl_into_reply {
    ($($ty:ty),*) => {
        $(
            impl IntoReply for $ty {
                fn into_reply(self) -> Reply {
                    Reply::Now(Value::from(self))
                }
            }
        )*
    };
}

impl_into_reply!((), bool, i64, i32, u32, f64, String, &'static str, Vec<u8>, Vec<Value>);

/// Rust types a typed handler can take as a parameter.
///
/// Each maps to exactly one `TypeTag`, so a call that passed validation always binds.
pub trait Param: Sized {
    const TAG: TypeTag;
    fn from_value(value: Value) -> Option<Self>;
}

macro_rules! impl_param {
    ($($ty:ty => $tag:ident),*) => {
        $(
            impl Param for $ty {
                const TAG: TypeTag = TypeTag::$tag;
                fn from_value(value: Value) -> Option<Self> {
                    <$ty>::try_from(value).ok()
                }
            }
        )*
    };
}

impl_param!(
    bool => Bool,
    i64 => Int,
    f64 => Float,
    String => Str,
    Vec<u8> => Bytes,
    Vec<Value> => List,
    Vec<(String, Value)> => Map
);

/// Closures that can be registered with `Method::typed`.
///
/// Implemented for `Fn(A, B, ..) -> R` with up to four `Param` arguments.
pub trait IntoHandler<Args>: Send + Sync + 'static {
    fn signature() -> Signature;
    fn into_handler(self) -> Handler;
}

macro_rules! impl_into_handler {
    ($($ty:ident $var:ident),*) => {
        impl<F, R, $($ty,)*> IntoHandler<($($ty,)*)> for F
        where
            F: Fn($($ty),*) -> R + Send + Sync + 'static,
            R: IntoReply,
            $($ty: Param,)*
        {
            fn signature() -> Signature {
                Signature::new(vec![$($ty::TAG),*])
            }

            #[allow(unused_mut, unused_variables)]
            fn into_handler(self) -> Handler {
                Arc::new(move |_caller: &Caller, args: Vec<Value>| {
                    let mut args = args.into_iter();
                    $(let $var = $ty::from_value(args.next()?)?;)*
                    Some(self($($var),*).into_reply())
                })
            }
        }
    };
}

impl_into_handler!();
impl_into_handler!(A a);
impl_into_handler!(A a, B b);
impl_into_handler!(A a, B b, C c);
impl_into_handler!(A a, B b, C c, D d);
