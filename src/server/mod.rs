//! TCP accept loop and per-session processing pipeline.
//!
//! Each accepted connection gets one tokio task owning the whole
//! pipeline: decode → route → encode run strictly in order for that
//! session, so replies keep request order and codec switches (framing,
//! EXI) never race with in-flight decoding. Sessions run fully in
//! parallel; the only cross-session shared structures are the session
//! manager (for `kill-session`), the call-home registry and the
//! notification manager, all internally synchronized.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::{FutureExt, SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};
use tokio::time::timeout;
use tokio_util::codec::Framed;

use crate::callhome::CallHomeRegistry;
use crate::codec::{ExiParameters, NetconfCodec};
use crate::config::Config;
use crate::error::{NetconfError, Result};
use crate::notifications::{ListenerRegistration, NotificationManager};
use crate::protocol::{
    negotiate, Capability, CapabilitySet, Message, Notification, RpcError, Session,
    SessionCommand, SessionControl, SessionHandle, CAP_BASE_1_0, CAP_BASE_1_1, CAP_EXI_1_0,
    CAP_NOTIFICATION_1_0,
};
use crate::router::{
    CloseSessionHandler, CreateSubscriptionHandler, DatastoreFacade, EmptyDatastore,
    GetConfigHandler, GetHandler, KillSessionHandler, OperationHandler, OperationRouter,
    StartExiHandler, StopExiHandler,
};

/// Active sessions by numeric id, the lookup path for `kill-session`.
#[derive(Default)]
pub struct SessionManager {
    sessions: RwLock<HashMap<u32, SessionHandle>>,
}

impl SessionManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session handle under its id.
    pub async fn register(&self, handle: SessionHandle) {
        self.sessions.write().await.insert(handle.id, handle);
    }

    /// Get a session handle by id.
    pub async fn get(&self, id: u32) -> Option<SessionHandle> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// Remove a session handle.
    pub async fn remove(&self, id: u32) {
        self.sessions.write().await.remove(&id);
    }

    /// Number of live sessions
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

/// NETCONF server: owns the shared registries and spawns one pipeline
/// task per accepted connection.
pub struct NetconfServer {
    config: Config,
    local_capabilities: CapabilitySet,
    sessions: Arc<SessionManager>,
    notifications: Arc<NotificationManager>,
    callhome: Arc<CallHomeRegistry>,
    datastore: Arc<dyn DatastoreFacade>,
    external_handlers: Vec<Arc<dyn OperationHandler>>,
}

impl NetconfServer {
    /// Create a server from configuration, with an empty datastore.
    pub fn new(config: Config) -> Result<Self> {
        let local_capabilities = build_capabilities(&config)?;
        Ok(Self {
            config,
            local_capabilities,
            sessions: Arc::new(SessionManager::new()),
            notifications: NotificationManager::new(),
            callhome: Arc::new(CallHomeRegistry::new()),
            datastore: Arc::new(EmptyDatastore),
            external_handlers: Vec::new(),
        })
    }

    /// Use a real datastore facade for the `get`/`get-config` defaults.
    pub fn with_datastore(mut self, datastore: Arc<dyn DatastoreFacade>) -> Self {
        self.datastore = datastore;
        self
    }

    /// Register an external operation handler, available to every
    /// session created afterwards.
    pub fn register_handler(&mut self, handler: Arc<dyn OperationHandler>) {
        self.external_handlers.push(handler);
    }

    /// Locally advertised capability set
    pub fn local_capabilities(&self) -> &CapabilitySet {
        &self.local_capabilities
    }

    /// Shared notification manager
    pub fn notifications(&self) -> Arc<NotificationManager> {
        Arc::clone(&self.notifications)
    }

    /// Shared call-home registry
    pub fn callhome(&self) -> Arc<CallHomeRegistry> {
        Arc::clone(&self.callhome)
    }

    /// Shared session manager
    pub fn sessions(&self) -> Arc<SessionManager> {
        Arc::clone(&self.sessions)
    }

    /// Bind the configured address and accept connections until the
    /// task is dropped. The notification manager is closed by the
    /// caller at shutdown, not here.
    pub async fn serve(self: Arc<Self>) -> Result<()> {
        let addr = self.config.server.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| NetconfError::Transport(format!("failed to bind {addr}: {e}")))?;
        tracing::info!(%addr, "NETCONF server listening");

        loop {
            let (stream, remote) = listener.accept().await?;
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                tracing::debug!(%remote, "accepted connection");
                if let Err(error) = server.handle_connection(stream, Some(remote)).await {
                    tracing::error!(%remote, %error, "session ended with error");
                }
            });
        }
    }

    /// Run one session pipeline over an already-open byte stream.
    ///
    /// Transport security is the caller's concern; the stream must be
    /// authenticated and encrypted already (or be a test harness).
    pub async fn handle_connection<S>(
        self: Arc<Self>,
        stream: S,
        remote: Option<SocketAddr>,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut session = Session::new();
        let (control, mut commands) = SessionControl::new(session.id());

        let codec = NetconfCodec::with_max_chunk_size(self.config.server.max_chunk_size);
        let mut framed = Framed::new(stream, codec);

        // Both sides open with hello in EOM framing; ours carries the
        // session id.
        framed
            .send(Message::hello_with_session_id(
                session.id(),
                self.local_capabilities.clone(),
            ))
            .await?;

        let exi_params = match self.negotiate_session(&mut session, &mut framed).await {
            Ok(params) => params,
            Err(error) => {
                // Tear down without Established; there is no peer
                // context to reply to
                session.fail_negotiation().ok();
                session.finish_close();
                tracing::warn!(id = session.id(), %error, "negotiation failed");
                return Err(error);
            },
        };

        let handle = SessionHandle::new(control.clone());
        self.sessions.register(handle.clone()).await;

        // Call-home: bind this transport to a waiting context, if one
        // expects this peer
        if let Some(addr) = remote {
            if let Some(context) = self.callhome.find_by_connection(addr) {
                tracing::debug!(id = session.id(), device = context.id(), "call-home bound");
                context.activate(handle.clone());
            }
        }

        let (notif_tx, mut notif_rx) = mpsc::unbounded_channel::<Notification>();
        let registrations: Arc<Mutex<Vec<ListenerRegistration>>> =
            Arc::new(Mutex::new(Vec::new()));
        let router = self.build_router(
            session.id(),
            &control,
            exi_params,
            notif_tx,
            Arc::clone(&registrations),
        );

        tracing::debug!(id = session.id(), "session established");
        let result = serve_established(
            &mut session,
            &mut framed,
            &mut commands,
            &mut notif_rx,
            &router,
        )
        .await;

        // Release per-session resources exactly once
        for registration in registrations.lock().drain(..) {
            registration.close();
        }
        self.sessions.remove(session.id()).await;
        session.finish_close();
        tracing::debug!(id = session.id(), "session closed");
        result
    }

    /// Await and validate the peer's hello, then negotiate.
    async fn negotiate_session<S>(
        &self,
        session: &mut Session,
        framed: &mut Framed<S, NetconfCodec>,
    ) -> Result<Option<ExiParameters>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let hello = match timeout(self.config.server.hello_timeout(), framed.next()).await {
            Err(_) => return Err(NetconfError::NegotiationTimeout),
            Ok(None) => {
                return Err(NetconfError::Transport(
                    "peer closed during hello exchange".to_string(),
                ))
            },
            Ok(Some(Err(error))) => return Err(error),
            Ok(Some(Ok(Message::Hello(hello)))) => hello,
            Ok(Some(Ok(_))) => {
                return Err(NetconfError::NegotiationFailed(
                    "first message was not hello".to_string(),
                ))
            },
        };

        if hello.session_id.is_some() {
            return Err(NetconfError::NegotiationFailed(
                "client hello carried a session-id".to_string(),
            ));
        }

        let negotiated = negotiate(&self.local_capabilities, &hello.capabilities)?;
        framed.codec_mut().set_framing(negotiated.framing);
        let exi = negotiated.exi;
        session.establish(negotiated)?;
        Ok(exi)
    }

    /// Assemble the per-session router: built-in session-control
    /// handlers at singleton priority, datastore defaults, then the
    /// externally contributed handlers.
    fn build_router(
        &self,
        session_id: u32,
        control: &SessionControl,
        exi_params: Option<ExiParameters>,
        notif_tx: mpsc::UnboundedSender<Notification>,
        registrations: Arc<Mutex<Vec<ListenerRegistration>>>,
    ) -> OperationRouter {
        let mut router = OperationRouter::new();
        router.register(Arc::new(CloseSessionHandler::new(control.clone())));
        router.register(Arc::new(KillSessionHandler::new(
            session_id,
            Arc::clone(&self.sessions),
        )));
        router.register(Arc::new(StartExiHandler::new(control.clone(), exi_params)));
        router.register(Arc::new(StopExiHandler::new(control.clone())));
        router.register(Arc::new(CreateSubscriptionHandler::new(
            Arc::clone(&self.notifications),
            notif_tx,
            registrations,
        )));
        router.register(Arc::new(GetHandler::new(Arc::clone(&self.datastore))));
        router.register(Arc::new(GetConfigHandler::new(Arc::clone(&self.datastore))));
        for handler in &self.external_handlers {
            router.register(Arc::clone(handler));
        }
        router
    }
}

/// The established-state loop: ordered RPC round-trips, notification
/// pushes, and command application at message boundaries.
async fn serve_established<S>(
    session: &mut Session,
    framed: &mut Framed<S, NetconfCodec>,
    commands: &mut mpsc::UnboundedReceiver<SessionCommand>,
    notifications: &mut mpsc::UnboundedReceiver<Notification>,
    router: &OperationRouter,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    loop {
        tokio::select! {
            biased;

            command = commands.recv() => match command {
                Some(SessionCommand::Kill) | None => {
                    tracing::debug!(id = session.id(), "session killed");
                    return Ok(());
                },
                Some(SessionCommand::CloseAfterReply) => {
                    // Close requested outside an RPC round-trip (e.g.
                    // call-home registry removal): nothing is pending,
                    // answer buffered RPCs and release the transport
                    session.begin_close()?;
                    return finish_closing(framed).await;
                },
                Some(SessionCommand::StartExi(params)) => {
                    framed.codec_mut().set_exi(Some(params));
                    session.set_exi_active(true)?;
                },
                Some(SessionCommand::StopExi) => {
                    framed.codec_mut().set_exi(None);
                    session.set_exi_active(false)?;
                },
            },

            notification = notifications.recv() => {
                if let Some(notification) = notification {
                    framed.send(Message::Notification(notification)).await?;
                }
            },

            incoming = framed.next() => match incoming {
                None => {
                    tracing::debug!(id = session.id(), "peer closed transport");
                    return Ok(());
                },
                Some(Err(error)) => {
                    // Framing-level failures are fatal, never retried
                    tracing::error!(id = session.id(), %error, "fatal decode error");
                    return Err(error);
                },
                Some(Ok(Message::Rpc(rpc))) => {
                    // Singleton-priority conflicts propagate as fatal
                    let reply = router.route(&rpc).await?;
                    framed.send(reply).await?;

                    if apply_pending_commands(session, framed, commands)? {
                        return finish_closing(framed).await;
                    }
                    if session.state() == crate::protocol::SessionState::Closed {
                        return Ok(());
                    }
                },
                Some(Ok(Message::Hello(_))) => {
                    return Err(NetconfError::Protocol(
                        "unexpected hello on established session".to_string(),
                    ));
                },
                Some(Ok(_)) => {
                    tracing::warn!(id = session.id(), "ignoring unexpected message from peer");
                },
            },
        }
    }
}

/// Apply commands queued by the just-executed handler, in order, now
/// that its reply has been flushed. Returns whether a graceful close
/// was requested; a kill marks the session Closed directly.
fn apply_pending_commands<S>(
    session: &mut Session,
    framed: &mut Framed<S, NetconfCodec>,
    commands: &mut mpsc::UnboundedReceiver<SessionCommand>,
) -> Result<bool>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut close_requested = false;
    while let Ok(command) = commands.try_recv() {
        match command {
            SessionCommand::Kill => {
                session.finish_close();
                return Ok(false);
            },
            SessionCommand::CloseAfterReply => {
                session.begin_close()?;
                close_requested = true;
            },
            SessionCommand::StartExi(params) => {
                framed.codec_mut().set_exi(Some(params));
                session.set_exi_active(true)?;
            },
            SessionCommand::StopExi => {
                framed.codec_mut().set_exi(None);
                session.set_exi_active(false)?;
            },
        }
    }
    Ok(close_requested)
}

/// Finish a graceful close: RPCs that already arrived are answered
/// with a terminal "session is closing" error, never silently dropped,
/// then the transport is flushed and released. The pending reply was
/// flushed before this runs (reply-before-teardown).
async fn finish_closing<S>(framed: &mut Framed<S, NetconfCodec>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    while let Some(Some(buffered)) = framed.next().now_or_never() {
        match buffered {
            Ok(Message::Rpc(rpc)) => {
                framed
                    .send(Message::reply_error(
                        &rpc.message_id,
                        RpcError::session_closing(),
                    ))
                    .await?;
            },
            Ok(_) => {},
            Err(_) => break,
        }
    }
    framed.close().await?;
    Ok(())
}

/// Build the advertised capability set from configuration.
fn build_capabilities(config: &Config) -> Result<CapabilitySet> {
    let mut capabilities = CapabilitySet::new();
    capabilities.add(Capability::plain(CAP_BASE_1_0));
    if config.capabilities.chunked_framing {
        capabilities.add(Capability::plain(CAP_BASE_1_1));
    }
    capabilities.add(Capability::plain(CAP_NOTIFICATION_1_0));
    if config.capabilities.exi {
        let uri = format!(
            "{CAP_EXI_1_0}?compression={}",
            config.capabilities.exi_compression
        );
        capabilities.add(Capability::parse(&uri)?);
    }
    for extra in &config.capabilities.extra {
        capabilities.add(Capability::parse(extra)?);
    }
    Ok(capabilities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SessionControl;

    #[tokio::test]
    async fn test_session_manager_register_and_get() {
        let manager = SessionManager::new();
        let (control, _rx) = SessionControl::new(3);
        manager.register(SessionHandle::new(control)).await;

        assert!(manager.get(3).await.is_some());
        assert!(manager.get(4).await.is_none());
        assert_eq!(manager.count().await, 1);
    }

    #[tokio::test]
    async fn test_session_manager_remove() {
        let manager = SessionManager::new();
        let (control, _rx) = SessionControl::new(5);
        manager.register(SessionHandle::new(control)).await;

        manager.remove(5).await;
        assert!(manager.get(5).await.is_none());
        assert_eq!(manager.count().await, 0);
    }

    #[test]
    fn test_capability_set_from_config() {
        let config = Config::default();
        let capabilities = build_capabilities(&config).unwrap();

        assert!(capabilities.contains(CAP_BASE_1_0));
        assert!(capabilities.contains(CAP_BASE_1_1));
        assert!(capabilities.contains(CAP_NOTIFICATION_1_0));
        let exi = capabilities.get(CAP_EXI_1_0).unwrap();
        assert_eq!(exi.exi_compression(), Some(6));
    }

    #[test]
    fn test_capability_set_without_optional_features() {
        let mut config = Config::default();
        config.capabilities.chunked_framing = false;
        config.capabilities.exi = false;

        let capabilities = build_capabilities(&config).unwrap();
        assert!(capabilities.contains(CAP_BASE_1_0));
        assert!(!capabilities.contains(CAP_BASE_1_1));
        assert!(!capabilities.contains(CAP_EXI_1_0));
    }
}
