//! Built-in operation handlers.
//!
//! The session-control operations — `close-session`, `kill-session`,
//! `start-exi`, `stop-exi`, `create-subscription` — register at
//! singleton priority so the built-in session lifecycle can never be
//! shadowed by operations contributed elsewhere. The `get`/`get-config`
//! defaults register at default priority and are meant to be wrapped or
//! replaced by device-specific handlers.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use quick_xml::events::Event;
use quick_xml::Reader;
use tokio::sync::mpsc;

use super::{ExecutionChain, HandlingPriority, OperationHandler};
use crate::codec::ExiParameters;
use crate::error::NetconfError;
use crate::notifications::{
    ListenerRegistration, NotificationListener, NotificationManager, BASE_STREAM_NAME,
};
use crate::protocol::{
    Notification, ReplyContent, Rpc, RpcError, SessionCommand, SessionControl,
};
use crate::server::SessionManager;

type HandlerResult = std::result::Result<ReplyContent, RpcError>;

/// Read the text content of the first `name` element in an RPC body
/// fragment.
fn child_text(body: &str, name: &str) -> Option<String> {
    let mut reader = Reader::from_str(body);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == name.as_bytes() => {
                let mut out = String::new();
                loop {
                    match reader.read_event() {
                        Ok(Event::Text(t)) => match t.unescape() {
                            Ok(text) => out.push_str(&text),
                            Err(_) => return None,
                        },
                        Ok(Event::End(_)) => return Some(out),
                        _ => return None,
                    }
                }
            },
            Ok(Event::Eof) | Err(_) => return None,
            _ => {},
        }
    }
}

/// Read the raw inner XML of the first `name` element in an RPC body
/// fragment.
fn child_raw(body: &str, name: &str) -> Option<String> {
    let mut reader = Reader::from_str(body);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == name.as_bytes() => {
                return reader.read_text(e.name()).ok().map(|t| t.into_owned());
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == name.as_bytes() => {
                return Some(String::new());
            },
            Ok(Event::Eof) | Err(_) => return None,
            _ => {},
        }
    }
}

/// Name of the datastore element inside `<source>` (e.g. `running`).
fn source_datastore(body: &str) -> Option<String> {
    let source = child_raw(body, "source")?;
    let mut reader = Reader::from_str(&source);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                return Some(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            },
            Ok(Event::Eof) | Err(_) => return None,
            _ => {},
        }
    }
}

/// `close-session`: graceful close with reply-before-teardown.
pub struct CloseSessionHandler {
    control: SessionControl,
}

impl CloseSessionHandler {
    /// Bind to the owning session's control channel.
    pub fn new(control: SessionControl) -> Self {
        Self { control }
    }
}

#[async_trait]
impl OperationHandler for CloseSessionHandler {
    fn operation(&self) -> &str {
        "close-session"
    }

    fn priority_for(&self, _rpc: &Rpc) -> Option<HandlingPriority> {
        Some(HandlingPriority::MAX)
    }

    async fn execute(&self, _rpc: &Rpc, _chain: ExecutionChain<'_>) -> HandlerResult {
        // The pipeline flushes the ok reply before acting on this
        self.control.close();
        Ok(ReplyContent::Ok)
    }
}

/// `kill-session`: forcibly close a *different* session by numeric id.
pub struct KillSessionHandler {
    own_id: u32,
    sessions: Arc<SessionManager>,
}

impl KillSessionHandler {
    /// Bind to the session registry, remembering our own id so a
    /// self-kill can be rejected.
    pub fn new(own_id: u32, sessions: Arc<SessionManager>) -> Self {
        Self { own_id, sessions }
    }
}

#[async_trait]
impl OperationHandler for KillSessionHandler {
    fn operation(&self) -> &str {
        "kill-session"
    }

    fn priority_for(&self, _rpc: &Rpc) -> Option<HandlingPriority> {
        Some(HandlingPriority::MAX)
    }

    async fn execute(&self, rpc: &Rpc, _chain: ExecutionChain<'_>) -> HandlerResult {
        let text = child_text(&rpc.body, "session-id")
            .ok_or_else(|| RpcError::missing_element("session-id"))?;
        let target: u32 = text
            .trim()
            .parse()
            .map_err(|_| RpcError::invalid_value(format!("invalid session-id: {text}")))?;

        if target == self.own_id {
            return Err(RpcError::invalid_value(
                "attempt to kill the current session",
            ));
        }

        match self.sessions.get(target).await {
            Some(victim) => {
                // A victim already in Closing just continues its
                // orderly close; the kill succeeds as a no-op.
                victim.control.kill();
                Ok(ReplyContent::Ok)
            },
            None => Err(RpcError::invalid_value(format!(
                "unknown session id: {target}"
            ))),
        }
    }
}

/// `start-exi`: switch the codec to the EXI transform after the reply.
pub struct StartExiHandler {
    control: SessionControl,
    /// Parameters from negotiation; `None` means not eligible
    params: Option<ExiParameters>,
}

impl StartExiHandler {
    /// Bind to the session's control channel with its negotiated EXI
    /// eligibility.
    pub fn new(control: SessionControl, params: Option<ExiParameters>) -> Self {
        Self { control, params }
    }
}

#[async_trait]
impl OperationHandler for StartExiHandler {
    fn operation(&self) -> &str {
        "start-exi"
    }

    fn priority_for(&self, _rpc: &Rpc) -> Option<HandlingPriority> {
        Some(HandlingPriority::MAX)
    }

    async fn execute(&self, _rpc: &Rpc, _chain: ExecutionChain<'_>) -> HandlerResult {
        match self.params {
            Some(params) => {
                // Applied by the pipeline after this reply is flushed
                // in plaintext
                self.control.send(SessionCommand::StartExi(params));
                Ok(ReplyContent::Ok)
            },
            None => Err(RpcError::operation_failed(
                "EXI was not negotiated for this session",
            )),
        }
    }
}

/// `stop-exi`: revert to plaintext XML after the reply.
pub struct StopExiHandler {
    control: SessionControl,
}

impl StopExiHandler {
    /// Bind to the owning session's control channel.
    pub fn new(control: SessionControl) -> Self {
        Self { control }
    }
}

#[async_trait]
impl OperationHandler for StopExiHandler {
    fn operation(&self) -> &str {
        "stop-exi"
    }

    fn priority_for(&self, _rpc: &Rpc) -> Option<HandlingPriority> {
        Some(HandlingPriority::MAX)
    }

    async fn execute(&self, _rpc: &Rpc, _chain: ExecutionChain<'_>) -> HandlerResult {
        self.control.send(SessionCommand::StopExi);
        Ok(ReplyContent::Ok)
    }
}

/// Forwards stream events into the owning session's outbound queue.
struct SessionNotificationListener {
    outbound: mpsc::UnboundedSender<Notification>,
}

impl NotificationListener for SessionNotificationListener {
    fn on_notification(&self, _stream: &str, notification: &Notification) {
        // A gone receiver means the session pipeline terminated
        let _ = self.outbound.send(notification.clone());
    }
}

/// `create-subscription`: subscribe the session to a stream.
///
/// The registration is parked with the session and closed on the
/// session-close path, so a dead session never leaks a listener.
pub struct CreateSubscriptionHandler {
    notifications: Arc<NotificationManager>,
    outbound: mpsc::UnboundedSender<Notification>,
    registrations: Arc<Mutex<Vec<ListenerRegistration>>>,
}

impl CreateSubscriptionHandler {
    /// Bind to the notification manager and the session's outbound
    /// notification queue.
    pub fn new(
        notifications: Arc<NotificationManager>,
        outbound: mpsc::UnboundedSender<Notification>,
        registrations: Arc<Mutex<Vec<ListenerRegistration>>>,
    ) -> Self {
        Self {
            notifications,
            outbound,
            registrations,
        }
    }
}

#[async_trait]
impl OperationHandler for CreateSubscriptionHandler {
    fn operation(&self) -> &str {
        "create-subscription"
    }

    fn priority_for(&self, _rpc: &Rpc) -> Option<HandlingPriority> {
        Some(HandlingPriority::MAX)
    }

    async fn execute(&self, rpc: &Rpc, _chain: ExecutionChain<'_>) -> HandlerResult {
        let stream = child_text(&rpc.body, "stream")
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| BASE_STREAM_NAME.to_string());

        let listener = Arc::new(SessionNotificationListener {
            outbound: self.outbound.clone(),
        });

        match self
            .notifications
            .register_notification_listener(&stream, listener)
        {
            Ok(registration) => {
                self.registrations.lock().push(registration);
                Ok(ReplyContent::Ok)
            },
            Err(NetconfError::UnknownStream(name)) => {
                Err(RpcError::invalid_value(format!("unknown stream: {name}")))
            },
            Err(_) => Err(RpcError::operation_failed(
                "notification service unavailable",
            )),
        }
    }
}

/// External collaborator answering `get`/`get-config` content queries.
///
/// The engine treats the returned document as opaque; an empty string
/// becomes an empty `<data/>` container.
#[async_trait]
pub trait DatastoreFacade: Send + Sync {
    /// Running config plus operational state.
    async fn get(&self, filter: Option<&str>) -> std::result::Result<String, RpcError>;

    /// Configuration of the named datastore.
    async fn get_config(
        &self,
        source: &str,
        filter: Option<&str>,
    ) -> std::result::Result<String, RpcError>;
}

/// Datastore with no content; answers every query with an empty
/// container.
pub struct EmptyDatastore;

#[async_trait]
impl DatastoreFacade for EmptyDatastore {
    async fn get(&self, _filter: Option<&str>) -> std::result::Result<String, RpcError> {
        Ok(String::new())
    }

    async fn get_config(
        &self,
        _source: &str,
        _filter: Option<&str>,
    ) -> std::result::Result<String, RpcError> {
        Ok(String::new())
    }
}

/// Default `get` handler over a [`DatastoreFacade`].
pub struct GetHandler {
    store: Arc<dyn DatastoreFacade>,
}

impl GetHandler {
    /// Bind to a datastore facade.
    pub fn new(store: Arc<dyn DatastoreFacade>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl OperationHandler for GetHandler {
    fn operation(&self) -> &str {
        "get"
    }

    async fn execute(&self, rpc: &Rpc, _chain: ExecutionChain<'_>) -> HandlerResult {
        let filter = child_raw(&rpc.body, "filter");
        let data = self.store.get(filter.as_deref()).await?;
        Ok(ReplyContent::Data(data))
    }
}

/// Default `get-config` handler over a [`DatastoreFacade`].
pub struct GetConfigHandler {
    store: Arc<dyn DatastoreFacade>,
}

impl GetConfigHandler {
    /// Bind to a datastore facade.
    pub fn new(store: Arc<dyn DatastoreFacade>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl OperationHandler for GetConfigHandler {
    fn operation(&self) -> &str {
        "get-config"
    }

    async fn execute(&self, rpc: &Rpc, _chain: ExecutionChain<'_>) -> HandlerResult {
        let source = source_datastore(&rpc.body)
            .ok_or_else(|| RpcError::missing_element("source"))?;
        let filter = child_raw(&rpc.body, "filter");
        let data = self.store.get_config(&source, filter.as_deref()).await?;
        Ok(ReplyContent::Data(data))
    }
}
