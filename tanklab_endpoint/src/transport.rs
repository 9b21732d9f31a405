//! Transport seam between the endpoint and the remote process server.
//!
//! The concrete protocol stack (OPC UA in production) lives behind
//! [`PvTransport`]; the endpoint, scheduler, and tests all program against
//! this trait. [`sim::SimTransport`](crate::sim::SimTransport) is the
//! in-process implementation shipped with this workspace.
//!
//! Notification contract: a transport delivers change notifications by
//! invoking the [`NotificationSink`] handed to [`PvTransport::open`] from a
//! dedicated thread that is never the caller's. Delivery is at-least-once
//! per remote value change; very rapid changes may be coalesced by the
//! server.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Remote address of one resolved process variable.
///
/// Opaque to everything above the transport; assigned by `resolve`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RemoteAddr(pub u64);

/// Identifier of one active change subscription on the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubId(pub u64);

/// Callback invoked on the transport's notification thread for each
/// delivered value change.
pub type NotificationSink = Arc<dyn Fn(SubId, f64) + Send + Sync>;

/// Errors surfaced by a transport implementation
#[derive(Error, Debug)]
pub enum TransportError {
    /// Remote endpoint could not be reached
    #[error("remote endpoint unreachable: {0}")]
    Unreachable(String),

    /// In-flight I/O exceeded the configured timeout
    #[error("I/O timed out after {0:?}")]
    Timeout(Duration),

    /// Browse path does not exist on the remote server
    #[error("unknown remote path: {0}")]
    UnknownPath(String),

    /// Session is not open
    #[error("transport session not open")]
    SessionClosed,

    /// Any other transport-level failure
    #[error("transport failure: {0}")]
    Io(String),
}

/// Abstract process-variable transport: connect, resolve, read, write,
/// subscribe.
///
/// Implementations own honoring `io_timeout` for every blocking call; a
/// timed-out call fails with [`TransportError::Timeout`] and must not wedge
/// the session (a subsequent `close` still completes).
pub trait PvTransport: Send + 'static {
    /// Open a session to `url`. The `sink` receives change notifications
    /// for all subscriptions created on this session.
    fn open(
        &mut self,
        url: &str,
        io_timeout: Duration,
        sink: NotificationSink,
    ) -> Result<(), TransportError>;

    /// Close the session. Idempotent; any remaining subscriptions are dead
    /// after this returns.
    fn close(&mut self) -> Result<(), TransportError>;

    /// Resolve a browse path to a remote address.
    fn resolve(&mut self, path: &str) -> Result<RemoteAddr, TransportError>;

    /// Read the current value of a resolved variable.
    fn read(&mut self, addr: RemoteAddr) -> Result<f64, TransportError>;

    /// Write a value to a resolved variable. Synchronous: on `Ok` the remote
    /// value is updated, no write buffering.
    fn write(&mut self, addr: RemoteAddr, value: f64) -> Result<(), TransportError>;

    /// Create a change subscription sampled at `period`.
    fn subscribe(&mut self, addr: RemoteAddr, period: Duration) -> Result<SubId, TransportError>;

    /// Tear down a subscription's remote resources.
    fn unsubscribe(&mut self, sub: SubId) -> Result<(), TransportError>;
}
