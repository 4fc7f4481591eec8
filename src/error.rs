//! Error taxonomy used throughout the crate.

use std::error;
use std::fmt;
use std::io;
use std::result;

/// Extension of the standard library's `Result` type,
/// used to wrap its error in a `tempest::Error`.
pub trait ResultWrappedExt {
    type T;

    fn wrapped_msg(self, kind: ErrorKind, msg: &str) -> Result<Self::T>;
    fn wrapped(self, kind: ErrorKind) -> Result<Self::T>;
}

/// Extension of the standard library's `Result` type.
///
/// Different from `ResultWrappedExt`, this trait is used in cases where we
/// want to drop the underlying error type, e.g. because it doesn't
/// implement `Send`.
pub trait ResultSimpleExt {
    type T;

    fn simple(self, kind: ErrorKind) -> Result<Self::T>;
    fn simple_msg(self, kind: ErrorKind, msg: &str) -> Result<Self::T>;
}

impl<T, E> ResultWrappedExt for result::Result<T, E>
where
    E: Into<Box<dyn error::Error + Send + Sync>>,
{
    type T = T;

    fn wrapped(self, kind: ErrorKind) -> Result<Self::T> {
        self.map_err(|e| Error::wrapped(kind, e))
    }

    fn wrapped_msg(self, kind: ErrorKind, msg: &str) -> Result<Self::T> {
        self.map_err(|e| Error::wrapped(kind, format!("{}: {}", msg, e.into())))
    }
}

impl<T, E> ResultSimpleExt for result::Result<T, E> {
    type T = T;

    fn simple(self, kind: ErrorKind) -> Result<Self::T> {
        self.map_err(|_| Error::simple(kind))
    }

    fn simple_msg(self, kind: ErrorKind, msg: &str) -> Result<Self::T> {
        self.map_err(|_| Error::wrapped(kind, msg.to_owned()))
    }
}

/// Wrapper result type for `std::result::Result`.
pub type Result<T> = result::Result<T, Error>;

/// The error taxonomy for the wire/connection/handshake layers (spec §7).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorKind {
    /// Decode failure: short read, bad length word, truncated type table/IV/tag.
    MalformedFrame,
    /// `messageLength` exceeded `Config::max_message_length`.
    MessageTooLarge,
    /// HMAC verification failed.
    MessageAuthenticationFailed,
    /// A transport-level error with no more specific classification.
    ConnectionFailedUnknown,
    /// Local or peer-initiated close.
    Disconnected,
    /// A retriable socket error (e.g. sending on an already-closing socket).
    TransientSocketError,
    /// A C1 primitive read ran past the end of its backing slice.
    ShortBuffer,
    /// An operation was invalid given the message/connection state, e.g.
    /// `send_for` on a message that isn't reliable.
    InvalidOperation,
    /// The C9 handshake capability failed to negotiate symmetric keys.
    HandshakeFailed,
    /// Miscellaneous I/O or setup error with no dedicated variant.
    Error,
}

pub struct Error {
    inner: ErrorInner,
}

enum ErrorInner {
    Simple(ErrorKind),
    Wrapped(ErrorKind, Box<dyn error::Error + Send + Sync>),
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            ErrorInner::Simple(k) => f.debug_tuple("Error").field(k).finish(),
            ErrorInner::Wrapped(k, e) => f.debug_tuple("Error").field(k).field(e).finish(),
        }
    }
}

impl Error {
    /// Returns an error not wrapping another error implementation.
    pub fn simple(kind: ErrorKind) -> Self {
        Error { inner: ErrorInner::Simple(kind) }
    }

    /// Wraps an arbitrary error, tagging it with `kind`.
    pub fn wrapped<E>(kind: ErrorKind, e: E) -> Self
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        Error { inner: ErrorInner::Wrapped(kind, e.into()) }
    }

    /// Returns the `ErrorKind` of this `Error`.
    pub fn kind(&self) -> ErrorKind {
        match &self.inner {
            ErrorInner::Simple(k) => *k,
            ErrorInner::Wrapped(k, _) => *k,
        }
    }

    /// Swaps the `ErrorKind` of this `Error`, keeping any wrapped cause.
    pub fn swap_kind(self, k: ErrorKind) -> Self {
        let inner = match self.inner {
            ErrorInner::Simple(_) => ErrorInner::Simple(k),
            ErrorInner::Wrapped(_, e) => ErrorInner::Wrapped(k, e),
        };
        Error { inner }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            ErrorInner::Simple(k) => write!(f, "{:?}", k),
            ErrorInner::Wrapped(k, e) => write!(f, "{:?}: {}", k, e),
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::wrapped(ErrorKind::ConnectionFailedUnknown, e)
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.inner {
            ErrorInner::Simple(_) => None,
            ErrorInner::Wrapped(_, e) => Some(e.as_ref()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapped_io_error_keeps_kind() {
        let io_err = io::Error::new(io::ErrorKind::Other, "boom");
        let e: Error = io_err.into();
        assert_eq!(e.kind(), ErrorKind::ConnectionFailedUnknown);
    }

    #[test]
    fn swap_kind_preserves_cause() {
        let e = Error::wrapped(ErrorKind::Error, "cause").swap_kind(ErrorKind::MalformedFrame);
        assert_eq!(e.kind(), ErrorKind::MalformedFrame);
        assert!(e.to_string().contains("cause"));
    }

    #[test]
    fn result_wrapped_ext_maps_err() {
        let r: result::Result<(), &str> = Err("nope");
        let e = r.wrapped(ErrorKind::ShortBuffer).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::ShortBuffer);
    }
}
