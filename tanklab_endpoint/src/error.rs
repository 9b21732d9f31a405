//! Error types for endpoint operations

use crate::tag::ProcessVar;
use crate::transport::TransportError;
use thiserror::Error;

/// Errors that can occur during endpoint operations
#[derive(Error, Debug)]
pub enum EndpointError {
    /// Operation requires a connected session
    #[error("endpoint not connected")]
    NotConnected,

    /// Session establishment failed
    #[error("connect to {url} failed: {source}")]
    ConnectFailed {
        /// Remote endpoint URL
        url: String,
        /// Underlying transport failure
        source: TransportError,
    },

    /// Tag was never bound to a remote address
    #[error("tag not resolved on remote server: {path}")]
    TagUnresolved {
        /// Remote path of the unresolved tag
        path: String,
    },

    /// Process variable outside the rig's fixed ranges
    #[error("invalid process variable: {var:?}")]
    InvalidVariable {
        /// The rejected variable
        var: ProcessVar,
    },

    /// Subscription handle does not refer to a live subscription
    #[error("unknown subscription handle: {id}")]
    UnknownSubscription {
        /// Raw subscription id
        id: u64,
    },

    /// Remote I/O failure (transport error or timeout)
    #[error("remote I/O failed: {source}")]
    Remote {
        /// Underlying transport failure
        #[from]
        source: TransportError,
    },
}

/// Result type for endpoint operations
pub type EndpointResult<T> = Result<T, EndpointError>;
