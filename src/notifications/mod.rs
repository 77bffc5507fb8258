//! Notification streams and listener fan-out.
//!
//! The manager owns the stream registry and the listener registry.
//! Producers publish events onto named streams; the manager fans each
//! event out to the listeners subscribed to that stream, in
//! registration order. Stream-observers see a `stream_registered`
//! event exactly once for every live stream (including streams that
//! pre-existed their registration) and a `stream_unregistered` exactly
//! once when the stream, or the whole manager, is torn down.
//!
//! The well-known base stream exists for the manager's whole lifetime;
//! removing it is only possible by closing the manager.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{NetconfError, Result};
use crate::protocol::Notification;

/// Name of the well-known base stream
pub const BASE_STREAM_NAME: &str = "NETCONF";
/// Description of the well-known base stream
pub const BASE_STREAM_DESCRIPTION: &str = "Default NETCONF event stream";

/// A named channel of notification events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    /// Stream name, unique within the manager
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// Whether replay of past events is supported
    pub replay_support: bool,
}

impl StreamInfo {
    /// Describe a stream without replay support.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            replay_support: false,
        }
    }

    fn base() -> Self {
        Self::new(BASE_STREAM_NAME, BASE_STREAM_DESCRIPTION)
    }
}

/// Receiver of events published on a subscribed stream.
pub trait NotificationListener: Send + Sync {
    /// Called once per event published on the subscribed stream.
    fn on_notification(&self, stream: &str, notification: &Notification);
}

/// Observer of stream add/remove lifecycle.
pub trait StreamListener: Send + Sync {
    /// A stream became live (or was already live at registration time).
    fn stream_registered(&self, stream: &StreamInfo);
    /// A stream was torn down (or the whole manager closed).
    fn stream_unregistered(&self, stream: &StreamInfo);
}

struct ListenerEntry {
    id: Uuid,
    stream: String,
    listener: Arc<dyn NotificationListener>,
}

struct Inner {
    streams: Vec<StreamInfo>,
    listeners: Vec<ListenerEntry>,
    stream_listeners: Vec<Arc<dyn StreamListener>>,
    closed: bool,
}

/// Stream registry plus listener registry.
///
/// Internally synchronized; safe for concurrent use from arbitrarily
/// many session pipelines and producers without caller-side locking.
/// Constructed at startup and closed exactly once at shutdown — never
/// implicit static state.
pub struct NotificationManager {
    inner: RwLock<Inner>,
}

impl NotificationManager {
    /// Create a manager with the base stream already registered.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(Inner {
                streams: vec![StreamInfo::base()],
                listeners: Vec::new(),
                stream_listeners: Vec::new(),
                closed: false,
            }),
        })
    }

    /// Register an additional stream and announce it to every
    /// stream-observer.
    pub fn register_stream(&self, stream: StreamInfo) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(NetconfError::NotificationManagerClosed);
        }
        if inner.streams.iter().any(|s| s.name == stream.name) {
            return Err(NetconfError::Protocol(format!(
                "stream already registered: {}",
                stream.name
            )));
        }
        inner.streams.push(stream.clone());
        for observer in &inner.stream_listeners {
            observer.stream_registered(&stream);
        }
        Ok(())
    }

    /// Remove a vendor stream, announcing its removal. The base stream
    /// cannot be removed except by closing the manager.
    pub fn unregister_stream(&self, name: &str) -> Result<()> {
        if name == BASE_STREAM_NAME {
            return Err(NetconfError::Protocol(
                "base stream cannot be removed".to_string(),
            ));
        }
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(NetconfError::NotificationManagerClosed);
        }
        let Some(pos) = inner.streams.iter().position(|s| s.name == name) else {
            return Err(NetconfError::UnknownStream(name.to_string()));
        };
        let stream = inner.streams.remove(pos);
        inner.listeners.retain(|entry| entry.stream != name);
        for observer in &inner.stream_listeners {
            observer.stream_unregistered(&stream);
        }
        Ok(())
    }

    /// Register a stream-observer. Every currently-live stream is
    /// announced to it immediately, exactly once.
    pub fn register_stream_listener(&self, listener: Arc<dyn StreamListener>) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(NetconfError::NotificationManagerClosed);
        }
        for stream in &inner.streams {
            listener.stream_registered(stream);
        }
        inner.stream_listeners.push(listener);
        Ok(())
    }

    /// Subscribe a listener to a stream. The returned registration's
    /// `close()` is idempotent.
    pub fn register_notification_listener(
        self: &Arc<Self>,
        stream: &str,
        listener: Arc<dyn NotificationListener>,
    ) -> Result<ListenerRegistration> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(NetconfError::NotificationManagerClosed);
        }
        if !inner.streams.iter().any(|s| s.name == stream) {
            return Err(NetconfError::UnknownStream(stream.to_string()));
        }

        let id = Uuid::new_v4();
        inner.listeners.push(ListenerEntry {
            id,
            stream: stream.to_string(),
            listener,
        });

        Ok(ListenerRegistration {
            id,
            manager: Arc::downgrade(self),
            closed: AtomicBool::new(false),
        })
    }

    /// Handle for producers feeding the base stream.
    pub fn base_publisher(self: &Arc<Self>) -> BaseStreamPublisher {
        BaseStreamPublisher {
            manager: Arc::clone(self),
        }
    }

    /// Publish an event to every listener of the stream, in
    /// registration order.
    ///
    /// Publishing to an unknown stream drops the event and reports the
    /// offending name. Publishing after `close()` is a producer bug and
    /// is rejected loudly.
    pub fn publish(&self, stream: &str, notification: &Notification) -> Result<()> {
        let inner = self.inner.read();
        if inner.closed {
            tracing::error!(stream, "publish after notification manager close");
            return Err(NetconfError::NotificationManagerClosed);
        }
        if !inner.streams.iter().any(|s| s.name == stream) {
            tracing::warn!(stream, "publish to unknown stream, event dropped");
            return Err(NetconfError::UnknownStream(stream.to_string()));
        }

        for entry in inner.listeners.iter().filter(|e| e.stream == stream) {
            entry.listener.on_notification(stream, notification);
        }
        Ok(())
    }

    /// Tear the manager down: unregister every listener, announce every
    /// stream's removal to the stream-observers, then mark closed.
    /// Idempotent, and atomic with respect to concurrent publishers.
    pub fn close(&self) {
        let mut inner = self.inner.write();
        if inner.closed {
            return;
        }
        inner.listeners.clear();
        let streams = std::mem::take(&mut inner.streams);
        for stream in &streams {
            for observer in &inner.stream_listeners {
                observer.stream_unregistered(stream);
            }
        }
        inner.stream_listeners.clear();
        inner.closed = true;
    }

    /// Whether `close()` has completed
    pub fn is_closed(&self) -> bool {
        self.inner.read().closed
    }

    /// Currently registered streams
    pub fn streams(&self) -> Vec<StreamInfo> {
        self.inner.read().streams.clone()
    }

    fn remove_listener(&self, id: Uuid) {
        let mut inner = self.inner.write();
        inner.listeners.retain(|entry| entry.id != id);
    }
}

/// Active subscription of one listener to one stream.
pub struct ListenerRegistration {
    id: Uuid,
    manager: Weak<NotificationManager>,
    closed: AtomicBool,
}

impl ListenerRegistration {
    /// Cancel the subscription. Safe to call any number of times.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(manager) = self.manager.upgrade() {
            manager.remove_listener(self.id);
        }
    }

    /// Whether this registration has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Producer handle bound to the base stream.
#[derive(Clone)]
pub struct BaseStreamPublisher {
    manager: Arc<NotificationManager>,
}

impl BaseStreamPublisher {
    /// Publish onto the base stream.
    pub fn publish(&self, notification: &Notification) -> Result<()> {
        self.manager.publish(BASE_STREAM_NAME, notification)
    }
}
