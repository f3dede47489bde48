use crate::envelope;
use crate::handles::PeerId;
use crate::transport::TransportError;

/// Errors surfaced to the host by `Client` and `Server` calls.
///
/// Dispatch-time problems (unknown functions, bad arguments, stray results) never
/// show up here; they are logged and dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    Transport(TransportError),
    Envelope(envelope::Error),
    /// The client has no live endpoint.
    NotConnected,
    AlreadyConnected,
    /// The server has no live endpoint.
    NotListening,
    AlreadyListening,
    UnknownPeer(PeerId),
    /// Every task slot is in use.
    CapacityExhausted { capacity: usize },
    /// The call will never complete: its peer went away or the role shut down.
    Abandoned,
    Timeout,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Envelope(e) => write!(f, "Envelope error: {}", e),
            Self::NotConnected => write!(f, "Not connected"),
            Self::AlreadyConnected => write!(f, "Already connected"),
            Self::NotListening => write!(f, "Not listening"),
            Self::AlreadyListening => write!(f, "Already listening"),
            Self::UnknownPeer(peer) => write!(f, "Unknown peer: {}", peer),
            Self::CapacityExhausted { capacity } => {
                write!(f, "All {} task slots are in use", capacity)
            }
            Self::Abandoned => write!(f, "Call abandoned before a result arrived"),
            Self::Timeout => write!(f, "Call timed out"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Envelope(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<envelope::Error> for Error {
    fn from(e: envelope::Error) -> Self {
        Self::Envelope(e)
    }
}

impl From<duopack::Error> for Error {
    fn from(e: duopack::Error) -> Self {
        Self::Envelope(envelope::Error::Codec(e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
