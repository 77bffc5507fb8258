//! Priority-ordered operation dispatch.
//!
//! Several independently supplied operation handlers cooperatively
//! service one incoming RPC. Each registered handler is asked for the
//! priority at which it claims the RPC; the highest claim wins and
//! executes with an [`ExecutionChain`] referencing the remaining
//! claimants, so a handler can explicitly delegate to the next one
//! (a generic wrapper forwarding to a more specific handler, say).
//!
//! The chain is an explicit ordered list plus cursor passed by value
//! into each invocation — its remaining state is inspectable, and an
//! exhausted chain terminates delegation with a domain error rather
//! than recursing blindly.

mod handlers;
mod priority;

use std::sync::Arc;

use async_trait::async_trait;

pub use handlers::{
    CloseSessionHandler, CreateSubscriptionHandler, DatastoreFacade, EmptyDatastore, GetConfigHandler,
    GetHandler, KillSessionHandler, StartExiHandler, StopExiHandler,
};
pub use priority::HandlingPriority;

use crate::error::{NetconfError, Result};
use crate::protocol::{Message, ReplyContent, Rpc, RpcError, RpcReply, BASE_NS};

/// Pluggable unit servicing one named RPC operation.
///
/// Handlers are registered per session at session-creation time. The
/// `namespace` is optional: `None` matches the operation in any
/// namespace, which is what most handlers want; extension operations
/// sharing a local name across namespaces declare theirs explicitly.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    /// Local name of the operation element this handler services
    fn operation(&self) -> &str;

    /// Namespace restriction; `None` matches any
    fn namespace(&self) -> Option<&str> {
        None
    }

    /// Priority at which this handler claims the RPC, or `None` if it
    /// cannot handle it at all.
    fn priority_for(&self, _rpc: &Rpc) -> Option<HandlingPriority> {
        Some(HandlingPriority::DEFAULT)
    }

    /// Execute the operation. Domain failures become structured
    /// rpc-error replies; the session stays up.
    async fn execute(
        &self,
        rpc: &Rpc,
        chain: ExecutionChain<'_>,
    ) -> std::result::Result<ReplyContent, RpcError>;
}

/// The remaining claimants for the current RPC, in priority order.
pub struct ExecutionChain<'a> {
    remaining: &'a [Arc<dyn OperationHandler>],
}

impl<'a> ExecutionChain<'a> {
    /// Whether any further handler remains
    pub fn is_exhausted(&self) -> bool {
        self.remaining.is_empty()
    }

    /// Number of handlers left in the chain
    pub fn len(&self) -> usize {
        self.remaining.len()
    }

    /// Whether the chain is empty
    pub fn is_empty(&self) -> bool {
        self.remaining.is_empty()
    }

    /// Delegate to the next handler in the chain.
    ///
    /// Delegating on an exhausted chain is the "no further operation"
    /// terminator and yields a domain error.
    pub async fn delegate(self, rpc: &Rpc) -> std::result::Result<ReplyContent, RpcError> {
        match self.remaining.split_first() {
            Some((next, rest)) => next.execute(rpc, ExecutionChain { remaining: rest }).await,
            None => Err(RpcError::operation_failed(format!(
                "no further handler in chain for operation: {}",
                rpc.operation
            ))),
        }
    }
}

/// Routes parsed RPCs to the registered operation handlers.
#[derive(Default)]
pub struct OperationRouter {
    handlers: Vec<Arc<dyn OperationHandler>>,
}

impl OperationRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Registration order breaks priority ties.
    pub fn register(&mut self, handler: Arc<dyn OperationHandler>) {
        self.handlers.push(handler);
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handlers are registered
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    fn matches(handler: &dyn OperationHandler, rpc: &Rpc) -> bool {
        if handler.operation() != rpc.operation {
            return false;
        }
        match handler.namespace() {
            None => true,
            // An absent namespace on the rpc means the base namespace
            // inherited from the envelope
            Some(ns) => match rpc.namespace.as_deref() {
                Some(rpc_ns) => rpc_ns == ns,
                None => ns == BASE_NS,
            },
        }
    }

    /// Route one RPC to its best handler and build the reply message.
    ///
    /// Only a singleton-priority tie is an `Err` here (fatal to the
    /// session); every other failure becomes a structured rpc-error
    /// reply correlated to the request's message-id.
    pub async fn route(&self, rpc: &Rpc) -> Result<Message> {
        let mut claimants: Vec<(HandlingPriority, Arc<dyn OperationHandler>)> = self
            .handlers
            .iter()
            .filter(|h| Self::matches(h.as_ref(), rpc))
            .filter_map(|h| h.priority_for(rpc).map(|p| (p, Arc::clone(h))))
            .collect();

        if claimants.is_empty() {
            tracing::debug!(operation = %rpc.operation, "no handler claimed operation");
            return Ok(Message::reply_error(
                &rpc.message_id,
                RpcError::operation_not_supported(&rpc.operation),
            ));
        }

        // Stable sort: ties keep registration order
        claimants.sort_by(|a, b| b.0.cmp(&a.0));

        if claimants.len() >= 2 && claimants[0].0.is_singleton() && claimants[1].0.is_singleton() {
            return Err(NetconfError::RouterConflict(rpc.operation.clone()));
        }

        let ordered: Vec<Arc<dyn OperationHandler>> =
            claimants.into_iter().map(|(_, h)| h).collect();
        let Some((selected, rest)) = ordered.split_first() else {
            return Ok(Message::reply_error(
                &rpc.message_id,
                RpcError::operation_not_supported(&rpc.operation),
            ));
        };

        let chain = ExecutionChain { remaining: rest };
        match selected.execute(rpc, chain).await {
            Ok(content) => Ok(Message::RpcReply(RpcReply {
                message_id: rpc.message_id.clone(),
                content,
            })),
            Err(error) => {
                tracing::debug!(
                    operation = %rpc.operation,
                    tag = ?error.tag,
                    "handler reported domain error"
                );
                Ok(Message::reply_error(&rpc.message_id, error))
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct TestHandler {
        name: &'static str,
        priority: HandlingPriority,
        calls: AtomicUsize,
        delegate: bool,
    }

    impl TestHandler {
        fn new(name: &'static str, priority: HandlingPriority) -> Arc<Self> {
            Arc::new(Self {
                name,
                priority,
                calls: AtomicUsize::new(0),
                delegate: false,
            })
        }

        fn delegating(name: &'static str, priority: HandlingPriority) -> Arc<Self> {
            Arc::new(Self {
                name,
                priority,
                calls: AtomicUsize::new(0),
                delegate: true,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl OperationHandler for TestHandler {
        fn operation(&self) -> &str {
            "foo"
        }

        fn priority_for(&self, _rpc: &Rpc) -> Option<HandlingPriority> {
            Some(self.priority)
        }

        async fn execute(
            &self,
            rpc: &Rpc,
            chain: ExecutionChain<'_>,
        ) -> std::result::Result<ReplyContent, RpcError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.delegate && !chain.is_exhausted() {
                return chain.delegate(rpc).await;
            }
            Ok(ReplyContent::Data(format!("<by>{}</by>", self.name)))
        }
    }

    fn rpc() -> Rpc {
        Rpc {
            message_id: "1".to_string(),
            operation: "foo".to_string(),
            namespace: None,
            body: String::new(),
        }
    }

    fn reply_data(message: &Message) -> &str {
        match message {
            Message::RpcReply(RpcReply {
                content: ReplyContent::Data(data),
                ..
            }) => data,
            other => panic!("expected data reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_singleton_wins_regardless_of_registration_order() {
        for singleton_first in [true, false] {
            let default = TestHandler::new("default", HandlingPriority::DEFAULT);
            let singleton = TestHandler::new("singleton", HandlingPriority::MAX);

            let mut router = OperationRouter::new();
            if singleton_first {
                router.register(singleton.clone());
                router.register(default.clone());
            } else {
                router.register(default.clone());
                router.register(singleton.clone());
            }

            let reply = router.route(&rpc()).await.unwrap();
            assert_eq!(reply_data(&reply), "<by>singleton</by>");
            assert_eq!(singleton.calls(), 1);
            assert_eq!(default.calls(), 0);
        }
    }

    #[tokio::test]
    async fn test_default_tie_resolves_to_first_registered() {
        let first = TestHandler::new("first", HandlingPriority::DEFAULT);
        let second = TestHandler::new("second", HandlingPriority::DEFAULT);

        let mut router = OperationRouter::new();
        router.register(first.clone());
        router.register(second.clone());

        let reply = router.route(&rpc()).await.unwrap();
        assert_eq!(reply_data(&reply), "<by>first</by>");
    }

    #[tokio::test]
    async fn test_chain_delegation_reaches_next_exactly_once() {
        let wrapper = TestHandler::delegating("wrapper", HandlingPriority::DEFAULT.increase());
        let inner = TestHandler::new("inner", HandlingPriority::DEFAULT);

        let mut router = OperationRouter::new();
        router.register(inner.clone());
        router.register(wrapper.clone());

        let reply = router.route(&rpc()).await.unwrap();
        assert_eq!(reply_data(&reply), "<by>inner</by>");
        assert_eq!(wrapper.calls(), 1);
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_chain_terminates_with_domain_error() {
        let lone = TestHandler::delegating("lone", HandlingPriority::DEFAULT);

        let mut router = OperationRouter::new();
        router.register(lone);

        // delegate=true but the chain is empty, so the handler answers
        // itself rather than delegating
        let reply = router.route(&rpc()).await.unwrap();
        assert_eq!(reply_data(&reply), "<by>lone</by>");
    }

    #[tokio::test]
    async fn test_no_claimant_is_operation_not_supported() {
        let router = OperationRouter::new();
        let reply = router.route(&rpc()).await.unwrap();

        match reply {
            Message::RpcReply(RpcReply {
                message_id,
                content: ReplyContent::Errors(errors),
            }) => {
                assert_eq!(message_id, "1");
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].tag, crate::protocol::ErrorTag::OperationNotSupported);
            },
            other => panic!("expected error reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_singleton_tie_is_fatal() {
        let a = TestHandler::new("a", HandlingPriority::MAX);
        let b = TestHandler::new("b", HandlingPriority::MAX);

        let mut router = OperationRouter::new();
        router.register(a);
        router.register(b);

        assert!(matches!(
            router.route(&rpc()).await,
            Err(NetconfError::RouterConflict(op)) if op == "foo"
        ));
    }

    #[tokio::test]
    async fn test_namespace_restriction() {
        struct NsHandler;

        #[async_trait]
        impl OperationHandler for NsHandler {
            fn operation(&self) -> &str {
                "foo"
            }

            fn namespace(&self) -> Option<&str> {
                Some("urn:vendor:ops")
            }

            async fn execute(
                &self,
                _rpc: &Rpc,
                _chain: ExecutionChain<'_>,
            ) -> std::result::Result<ReplyContent, RpcError> {
                Ok(ReplyContent::Ok)
            }
        }

        let mut router = OperationRouter::new();
        router.register(Arc::new(NsHandler));

        // Wrong namespace: not claimed
        let miss = router.route(&rpc()).await.unwrap();
        assert!(matches!(
            miss,
            Message::RpcReply(RpcReply {
                content: ReplyContent::Errors(_),
                ..
            })
        ));

        // Matching namespace: claimed
        let mut hit = rpc();
        hit.namespace = Some("urn:vendor:ops".to_string());
        let reply = router.route(&hit).await.unwrap();
        assert!(matches!(
            reply,
            Message::RpcReply(RpcReply {
                content: ReplyContent::Ok,
                ..
            })
        ));
    }
}
