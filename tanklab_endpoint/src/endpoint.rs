//! Process variable endpoint: connection lifecycle, typed read/write, and
//! change subscriptions over registered tags.
//!
//! ## State machine
//!
//! `Disconnected | Failed → Connecting → Connected` on success, `→ Failed`
//! on error. Transitions are serialized by the internal state lock;
//! `connect` while already `Connected` is a no-op returning success.
//! `disconnect` always leaves the endpoint `Disconnected`, even when the
//! transport teardown reports errors, so a caller can reconnect.
//!
//! ## Locking
//!
//! Three internal locks: connection state, tag table, transport. The state
//! and tag locks are only ever held for field access; transport I/O runs
//! under the transport lock alone. `read`/`write` re-check the state under
//! the state lock before issuing any I/O, which is what makes a
//! `Disconnected` read fail without touching the network.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{EndpointError, EndpointResult};
use crate::tag::{ProcessVar, Tag, TagTable};
use crate::transport::{NotificationSink, PvTransport, RemoteAddr, SubId, TransportError};

/// Connection lifecycle state of a [`PvEndpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session; initial state, and the state after every `disconnect`.
    Disconnected,
    /// Session establishment in progress.
    Connecting,
    /// Session open, tags resolved, I/O possible.
    Connected,
    /// Last connect attempt failed; `connect` may be retried.
    Failed,
}

/// Endpoint configuration.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Remote server URL.
    pub url: String,
    /// Upper bound for any single blocking transport call.
    pub io_timeout: Duration,
    /// Sampling period for change subscriptions.
    pub subscription_period: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: "opc.tcp://192.168.1.115:4840/freeopcua/server/".to_string(),
            io_timeout: Duration::from_millis(500),
            subscription_period: Duration::from_millis(100),
        }
    }
}

/// Owned handle to one active change subscription.
///
/// Must be given back to [`PvEndpoint::unsubscribe`] to release the remote
/// resources; handles still live at `disconnect` time are released there.
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: SubId,
}

type ChangeCallback = Arc<dyn Fn(f64) + Send + Sync>;

/// Routing table from transport subscription ids to caller callbacks.
///
/// Shared with the transport's notification thread through the sink closure
/// installed at `open`.
#[derive(Default)]
struct SubscriptionRoutes {
    callbacks: Mutex<HashMap<u64, ChangeCallback>>,
}

impl SubscriptionRoutes {
    /// Invoke the callback for `sub`, if still routed.
    ///
    /// The callback is cloned out under the lock and invoked outside it, so
    /// a slow callback cannot block `subscribe`/`unsubscribe` on other tags.
    fn dispatch(&self, sub: SubId, value: f64) {
        let cb = self.callbacks.lock().get(&sub.0).cloned();
        match cb {
            Some(cb) => cb(value),
            None => debug!(sub = sub.0, "notification for released subscription dropped"),
        }
    }
}

/// Endpoint over an abstract process-variable transport.
///
/// All methods take `&self`; the endpoint is meant to be shared behind an
/// `Arc` between the scheduler, the alarm path, and the display consumer.
/// `connect`/`disconnect` themselves must not be called concurrently with
/// each other (callers serialize); everything else is safe against them.
pub struct PvEndpoint<T: PvTransport> {
    config: EndpointConfig,
    state: Mutex<ConnectionState>,
    transport: Mutex<T>,
    tags: Mutex<TagTable>,
    routes: Arc<SubscriptionRoutes>,
}

impl<T: PvTransport> PvEndpoint<T> {
    /// Create an endpoint over `transport`. No I/O happens until `connect`.
    pub fn new(transport: T, config: EndpointConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ConnectionState::Disconnected),
            transport: Mutex::new(transport),
            tags: Mutex::new(TagTable::new()),
            routes: Arc::new(SubscriptionRoutes::default()),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Whether the endpoint currently holds an open session.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Number of live subscriptions.
    pub fn active_subscriptions(&self) -> usize {
        self.routes.callbacks.lock().len()
    }

    /// Register a process variable, returning its tag handle.
    ///
    /// Idempotent per variable. Tags registered after `connect` stay
    /// unresolved until the next session is established.
    pub fn register(&self, var: ProcessVar) -> EndpointResult<Tag> {
        if !var.in_range() {
            return Err(EndpointError::InvalidVariable { var });
        }
        Ok(self.tags.lock().register(var))
    }

    /// Establish the session and resolve every registered tag.
    ///
    /// Idempotent: returns `Ok` immediately when already connected. On any
    /// failure the state is left `Failed` and the transport session is
    /// closed best-effort.
    pub fn connect(&self) -> EndpointResult<()> {
        {
            let mut st = self.state.lock();
            if *st == ConnectionState::Connected {
                return Ok(());
            }
            *st = ConnectionState::Connecting;
        }

        let routes = Arc::clone(&self.routes);
        let sink: NotificationSink = Arc::new(move |sub, value| routes.dispatch(sub, value));

        match self.establish(sink) {
            Ok(()) => {
                *self.state.lock() = ConnectionState::Connected;
                debug!(url = %self.config.url, "endpoint connected");
                Ok(())
            }
            Err(e) => {
                *self.state.lock() = ConnectionState::Failed;
                Err(e)
            }
        }
    }

    /// Open the transport session and bind all registered tags.
    fn establish(&self, sink: NotificationSink) -> EndpointResult<()> {
        let mut transport = self.transport.lock();
        transport
            .open(&self.config.url, self.config.io_timeout, sink)
            .map_err(|source| EndpointError::ConnectFailed {
                url: self.config.url.clone(),
                source,
            })?;

        // Resolution happens exactly once per session, here.
        let mut tags = self.tags.lock();
        let mut failure: Option<EndpointError> = None;
        for entry in tags.entries_mut() {
            match transport.resolve(&entry.path) {
                Ok(addr) => entry.addr = Some(addr),
                Err(TransportError::UnknownPath(path)) => {
                    // Fatal misconfiguration: the tag set does not match the
                    // server's address space. Not retried by the scheduler.
                    failure = Some(EndpointError::TagUnresolved { path });
                    break;
                }
                Err(source) => {
                    failure = Some(EndpointError::ConnectFailed {
                        url: self.config.url.clone(),
                        source,
                    });
                    break;
                }
            }
        }
        if let Some(err) = failure {
            let _ = transport.close();
            tags.clear_resolution();
            return Err(err);
        }
        Ok(())
    }

    /// Close the session.
    ///
    /// Every live subscription is released before the session closes (the
    /// remote server leaks monitored-item resources otherwise). Teardown
    /// errors are reported but never prevent the transition to
    /// `Disconnected`.
    pub fn disconnect(&self) -> EndpointResult<()> {
        let ids: Vec<u64> = {
            let mut callbacks = self.routes.callbacks.lock();
            callbacks.drain().map(|(id, _)| id).collect()
        };

        let mut first_err: Option<TransportError> = None;
        {
            let mut transport = self.transport.lock();
            for id in ids {
                if let Err(e) = transport.unsubscribe(SubId(id)) {
                    warn!(sub = id, error = %e, "failed to release subscription during disconnect");
                    first_err.get_or_insert(e);
                }
            }
            if let Err(e) = transport.close() {
                warn!(error = %e, "transport close failed");
                first_err.get_or_insert(e);
            }
        }

        self.tags.lock().clear_resolution();
        *self.state.lock() = ConnectionState::Disconnected;

        match first_err {
            None => Ok(()),
            Some(source) => Err(source.into()),
        }
    }

    /// Read the current value of `tag`.
    pub fn read(&self, tag: Tag) -> EndpointResult<f64> {
        self.ensure_connected()?;
        let addr = self.bound_addr(tag)?;
        let value = self.transport.lock().read(addr)?;
        Ok(value)
    }

    /// Write `value` to `tag`. Synchronous: on `Ok` the remote value is
    /// updated.
    pub fn write(&self, tag: Tag, value: f64) -> EndpointResult<()> {
        self.ensure_connected()?;
        let addr = self.bound_addr(tag)?;
        self.transport.lock().write(addr, value)?;
        Ok(())
    }

    /// Subscribe to value changes of `tag`.
    ///
    /// `on_change` runs on the transport's notification thread, at-least-once
    /// per remote change (rapid changes may be coalesced). It MUST NOT block
    /// or do long-running work inline: hand the value off (for example via a
    /// bounded channel to a worker) and return, or subsequent change events
    /// for every subscription on this session will be starved.
    pub fn subscribe<F>(&self, tag: Tag, on_change: F) -> EndpointResult<SubscriptionHandle>
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        self.ensure_connected()?;
        let addr = self.bound_addr(tag)?;
        let sub = self
            .transport
            .lock()
            .subscribe(addr, self.config.subscription_period)?;
        // A notification racing this insert finds no route and is dropped;
        // the at-least-once contract starts when subscribe returns.
        self.routes.callbacks.lock().insert(sub.0, Arc::new(on_change));
        Ok(SubscriptionHandle { id: sub })
    }

    /// Release a subscription. After this returns, no further callbacks fire
    /// for `handle`.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> EndpointResult<()> {
        // Remove the route first: the notification thread can no longer
        // reach the callback even if an event is already in flight.
        if self.routes.callbacks.lock().remove(&handle.id.0).is_none() {
            return Err(EndpointError::UnknownSubscription { id: handle.id.0 });
        }
        self.transport.lock().unsubscribe(handle.id)?;
        Ok(())
    }

    /// Fail with `NotConnected` unless the state is `Connected`.
    ///
    /// Checked under the state lock, before any transport access.
    fn ensure_connected(&self) -> EndpointResult<()> {
        if *self.state.lock() != ConnectionState::Connected {
            return Err(EndpointError::NotConnected);
        }
        Ok(())
    }

    /// Resolved remote address of `tag`.
    fn bound_addr(&self, tag: Tag) -> EndpointResult<RemoteAddr> {
        let tags = self.tags.lock();
        let entry = tags.entry(tag).ok_or_else(|| EndpointError::TagUnresolved {
            path: format!("<unregistered tag {}>", tag.0),
        })?;
        entry.addr.ok_or_else(|| EndpointError::TagUnresolved {
            path: entry.path.clone(),
        })
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
