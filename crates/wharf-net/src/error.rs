use std::io;

use thiserror::Error;

use crate::handle::Handle;

/// Failure detail behind the boolean socket surface. Logged at the call
/// site; the caller only ever sees `false` or a missing handle.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("invalid socket handle {0}")]
    InvalidHandle(Handle),
    #[error("handle table full")]
    TableFull,
    #[error("socket slot pool exhausted")]
    OutOfSlots,
    #[error("socket is bound to a different address family")]
    FamilyMismatch,
    #[error("socket is already connected or connecting")]
    AlreadyConnected,
    #[error("socket has no open descriptor")]
    NotOpen,
    #[error("{0}")]
    InvalidState(&'static str),
    #[error("unable to open socket: {0}")]
    Open(#[source] io::Error),
    #[error("unable to bind socket: {0}")]
    Bind(#[source] io::Error),
    #[error("unable to listen: {0}")]
    Listen(#[source] io::Error),
    #[error("unable to accept connection: {0}")]
    Accept(#[source] io::Error),
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error("multicast membership change failed: {0}")]
    Multicast(#[source] io::Error),
}

/// Why a connect attempt failed.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("connect timed out")]
    Timeout,
    #[error("connection refused")]
    Refused,
    #[error("select failed while connecting: {0}")]
    Select(#[source] io::Error),
    #[error("connect failed: {0}")]
    Other(#[source] io::Error),
}
