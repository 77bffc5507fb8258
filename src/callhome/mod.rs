//! Call-home session registry.
//!
//! In the call-home variant the managed device dials in, so an inbound
//! connection must be correlated with a previously expected logical
//! session identity. The registry maps device ids to contexts created
//! ahead of time; the acceptor identifies the peer (e.g. by its public
//! key), looks its id up here and binds the new transport to the
//! waiting context.
//!
//! At most one live session exists per device id. A context's
//! completion is a single-assignment, cancellable value: `remove`
//! cancels a still-pending completion so a waiter blocked on "session
//! established for id X" observes cancellation rather than hanging.

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{NetconfError, Result};
use crate::protocol::SessionHandle;

struct ContextInner {
    completion: Option<oneshot::Sender<SessionHandle>>,
    session: Option<SessionHandle>,
    remote_addr: Option<SocketAddr>,
    closed: bool,
}

/// Expected (or established) call-home session for one device id.
#[derive(Clone)]
pub struct CallHomeSessionContext {
    id: String,
    inner: Arc<Mutex<ContextInner>>,
}

impl CallHomeSessionContext {
    /// Create a context and the promise its waiter blocks on.
    pub fn new(id: impl Into<String>) -> (Self, SessionPromise) {
        let (tx, rx) = oneshot::channel();
        let id = id.into();
        let context = Self {
            id: id.clone(),
            inner: Arc::new(Mutex::new(ContextInner {
                completion: Some(tx),
                session: None,
                remote_addr: None,
                closed: false,
            })),
        };
        (context, SessionPromise { id, rx })
    }

    /// Device/session id this context was registered under
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Record the transport the acceptor bound to this context.
    pub fn bind_connection(&self, remote_addr: SocketAddr) {
        self.inner.lock().remote_addr = remote_addr.into();
    }

    /// Remote address of the bound transport, if any
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.lock().remote_addr
    }

    /// Resolve the completion with an established session.
    ///
    /// On a context that was already closed the session is refused and
    /// killed, so a racing accept path cannot resurrect a removed id.
    pub fn activate(&self, handle: SessionHandle) {
        let mut inner = self.inner.lock();
        if inner.closed {
            handle.control.kill();
            return;
        }
        inner.session = Some(handle.clone());
        if let Some(tx) = inner.completion.take() {
            // A dropped promise just means nobody is waiting
            let _ = tx.send(handle);
        }
    }

    /// Established session handle, if activation happened
    pub fn session(&self) -> Option<SessionHandle> {
        self.inner.lock().session.clone()
    }

    /// Close the context: close its session (if any) and cancel a
    /// still-pending completion. Idempotent.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        inner.closed = true;
        inner.completion = None; // dropping the sender cancels the promise
        if let Some(session) = inner.session.take() {
            session.control.close();
        }
    }

    /// Whether this context has been closed
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

/// Waiter side of a call-home context's completion.
pub struct SessionPromise {
    id: String,
    rx: oneshot::Receiver<SessionHandle>,
}

impl SessionPromise {
    /// Wait for the device to connect and the session to establish.
    ///
    /// Resolves to an error when the context is removed first: the
    /// device will not connect.
    pub async fn wait(self) -> Result<SessionHandle> {
        self.rx
            .await
            .map_err(|_| NetconfError::CallHomeCancelled(self.id))
    }
}

/// Keyed map from device id to call-home context.
///
/// Shared between accept-path tasks and connection-matching lookups;
/// internally synchronized, no caller-side locking.
#[derive(Default)]
pub struct CallHomeRegistry {
    contexts: DashMap<String, CallHomeSessionContext>,
}

impl CallHomeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a context under its id.
    ///
    /// An existing mapping is replaced and returned; the displaced
    /// context is NOT closed implicitly — its owner still holds the
    /// close capability.
    pub fn register(&self, context: CallHomeSessionContext) -> Option<CallHomeSessionContext> {
        let displaced = self.contexts.insert(context.id().to_string(), context);
        if let Some(old) = &displaced {
            tracing::warn!(id = %old.id(), "replacing registered call-home context");
        }
        displaced
    }

    /// Whether a context is registered under the id.
    pub fn exists(&self, id: &str) -> bool {
        self.contexts.contains_key(id)
    }

    /// Look a context up by the remote address its transport was bound
    /// to.
    pub fn find_by_connection(&self, remote_addr: SocketAddr) -> Option<CallHomeSessionContext> {
        self.contexts
            .iter()
            .find(|entry| entry.value().remote_addr() == Some(remote_addr))
            .map(|entry| entry.value().clone())
    }

    /// Remove and close the context registered under the id. A
    /// still-pending waiter observes cancellation.
    pub fn remove(&self, id: &str) -> Option<CallHomeSessionContext> {
        let removed = self.contexts.remove(id).map(|(_, context)| context);
        if let Some(context) = &removed {
            context.close();
        }
        removed
    }

    /// Number of registered contexts
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// Whether no contexts are registered
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{SessionCommand, SessionControl};

    fn handle(id: u32) -> (SessionHandle, tokio::sync::mpsc::UnboundedReceiver<SessionCommand>) {
        let (control, rx) = SessionControl::new(id);
        (SessionHandle::new(control), rx)
    }

    #[tokio::test]
    async fn test_remove_cancels_pending_waiter() {
        let registry = CallHomeRegistry::new();
        let (context, promise) = CallHomeSessionContext::new("dev-1");
        registry.register(context);
        assert!(registry.exists("dev-1"));

        registry.remove("dev-1");
        assert!(!registry.exists("dev-1"));

        assert!(matches!(
            promise.wait().await,
            Err(NetconfError::CallHomeCancelled(id)) if id == "dev-1"
        ));
    }

    #[tokio::test]
    async fn test_activation_resolves_waiter() {
        let registry = CallHomeRegistry::new();
        let (context, promise) = CallHomeSessionContext::new("dev-2");
        registry.register(context.clone());

        let (session, _rx) = handle(11);
        context.activate(session);

        let resolved = promise.wait().await.unwrap();
        assert_eq!(resolved.id, 11);
        assert_eq!(context.session().unwrap().id, 11);
    }

    #[tokio::test]
    async fn test_remove_closes_established_session() {
        let registry = CallHomeRegistry::new();
        let (context, _promise) = CallHomeSessionContext::new("dev-3");
        registry.register(context.clone());

        let (session, mut rx) = handle(12);
        context.activate(session);

        registry.remove("dev-3");
        assert!(matches!(
            rx.try_recv().unwrap(),
            SessionCommand::CloseAfterReply
        ));
    }

    #[tokio::test]
    async fn test_reregister_replaces_without_closing() {
        let registry = CallHomeRegistry::new();
        let (old, old_promise) = CallHomeSessionContext::new("dev-4");
        let (new, _new_promise) = CallHomeSessionContext::new("dev-4");

        registry.register(old.clone());
        let displaced = registry.register(new);
        assert!(displaced.is_some());
        assert_eq!(registry.len(), 1);

        // The displaced context is still open: its waiter is not
        // cancelled and it can still be activated by its owner.
        assert!(!old.is_closed());
        let (session, _rx) = handle(13);
        old.activate(session);
        assert_eq!(old_promise.wait().await.unwrap().id, 13);
    }

    #[tokio::test]
    async fn test_activate_after_close_kills_session() {
        let (context, _promise) = CallHomeSessionContext::new("dev-5");
        context.close();

        let (session, mut rx) = handle(14);
        context.activate(session);

        assert!(matches!(rx.try_recv().unwrap(), SessionCommand::Kill));
        assert!(context.session().is_none());
    }

    #[tokio::test]
    async fn test_find_by_connection() {
        let registry = CallHomeRegistry::new();
        let (context, _promise) = CallHomeSessionContext::new("dev-6");
        let addr: SocketAddr = "192.0.2.1:4334".parse().unwrap();
        context.bind_connection(addr);
        registry.register(context);

        let found = registry.find_by_connection(addr).unwrap();
        assert_eq!(found.id(), "dev-6");

        let other: SocketAddr = "192.0.2.2:4334".parse().unwrap();
        assert!(registry.find_by_connection(other).is_none());
    }

    #[test]
    fn test_context_close_is_idempotent() {
        let (context, _promise) = CallHomeSessionContext::new("dev-7");
        context.close();
        context.close();
        assert!(context.is_closed());
    }
}
