//! # TankLab Process Variable Endpoint
//!
//! Connection, tag, and subscription layer between the supervisory control
//! unit and the remote quadruple-tank process server.
//!
//! The remote protocol stack itself is out of scope here: everything the
//! control unit needs is the abstract "process variable endpoint" capability
//! expressed by [`transport::PvTransport`]. The endpoint adds on top of that
//! seam:
//!
//! - **Tag registry** ([`tag`]): logical process variables mapped to the
//!   fixed remote path convention (`Process/Tanks/Tank{n}/Level`, ...),
//!   resolved to remote addresses once, at connect time.
//! - **Connection lifecycle** ([`endpoint`]): serialized
//!   `Disconnected → Connecting → Connected / Failed` transitions, idempotent
//!   connect, and a disconnect that tears down live subscriptions before the
//!   session closes.
//! - **Change subscriptions** ([`endpoint`]): callbacks dispatched on the
//!   transport's notification thread, at-least-once per remote value change.
//!   Callbacks must hand off work and return immediately; see
//!   [`endpoint::PvEndpoint::subscribe`].
//! - **Simulated plant** ([`sim`]): an in-process quadruple-tank model behind
//!   the same transport seam, used by the binary and the integration tests.
//!
//! ## Locking discipline
//!
//! Connection state lives behind one internal lock and every operation
//! re-checks it there before touching the transport. No state lock is ever
//! held across transport I/O; a slow remote read can therefore never block a
//! caller that only wants to know whether the endpoint is connected.

pub mod endpoint;
pub mod error;
pub mod sim;
pub mod tag;
pub mod transport;

pub use endpoint::{ConnectionState, EndpointConfig, PvEndpoint, SubscriptionHandle};
pub use error::{EndpointError, EndpointResult};
pub use tag::{ProcessVar, Tag, RATIO_COUNT, TANK_COUNT, VALVE_COUNT};
pub use transport::{NotificationSink, PvTransport, RemoteAddr, SubId, TransportError};
