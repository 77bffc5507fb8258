//! # NETCONF Core - Session and Message-Exchange Engine
//!
//! Implementation of the NETCONF network-management protocol session
//! engine (RFC 6241/6242 plus an EXI binary-encoding extension): a
//! server accepts connections from managed devices or manager clients,
//! negotiates protocol capabilities, exchanges XML-encoded RPC
//! messages, and asynchronously publishes notifications to subscribed
//! listeners. The call-home variant — where the managed device dials
//! in — is supported through a registry correlating inbound
//! connections with expected session identities.
//!
//! ## Architecture
//!
//! ```text
//! bytes ──> Message Codec ──> Session ──> Operation Router ──> handler(s)
//!             (framing,        (state       (priority-ordered      │
//!              EXI switch)      machine)     dispatch, chain)      │
//! bytes <── Message Codec <────────────── reply message <──────────┘
//!
//! producers ──> Notification Manager ──> subscribed listeners
//! acceptor  ──> Call-Home Registry   ──> waiting session contexts
//! ```
//!
//! ## Session State Machine
//!
//! | State               | Description                         | Transitions              |
//! |---------------------|-------------------------------------|--------------------------|
//! | `Connecting`        | Hello exchange in progress          | → Established, NegotiationFailed |
//! | `Established`       | RPCs flow; EXI may toggle           | → Established, Closing   |
//! | `Closing`           | Reply being flushed before teardown | → Closed                 |
//! | `NegotiationFailed` | Malformed/incompatible hello        | → Closed                 |
//! | `Closed`            | Transport released                  | (terminal)               |
//!
//! ## Framing
//!
//! | Discipline | Wire form                         | Selected when          |
//! |------------|-----------------------------------|------------------------|
//! | EOM        | `<doc>]]>]]>`                     | base:1.0 only          |
//! | Chunked    | `\n#<len>\n<bytes>…\n##\n`        | both sides base:1.1    |
//! | EXI        | binary envelope inside the framing | after `start-exi` ok  |
//!
//! The `start-exi`/`stop-exi` switch is message-boundary-atomic: the
//! reply to the control RPC travels in the old encoding, everything
//! after it in the new one.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use netconf::{Config, NetconfServer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = Arc::new(NetconfServer::new(Config::default())?);
//!     let notifications = server.notifications();
//!     tokio::spawn(server.serve());
//!     // ... publish events, register call-home contexts ...
//!     notifications.close();
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`codec`]: EOM/chunked framing and the EXI binary transform
//! - [`protocol`]: capabilities, messages, session lifecycle
//! - [`router`]: priority-ordered operation dispatch
//! - [`callhome`]: call-home session registry
//! - [`notifications`]: notification streams and listener fan-out
//! - [`server`]: accept loop and per-session pipeline
//! - [`config`]: configuration management
//! - [`error`]: error types and result alias

pub mod callhome;
pub mod codec;
pub mod config;
pub mod error;
pub mod notifications;
pub mod protocol;
pub mod router;
pub mod server;

// Re-exports for convenience
pub use callhome::{CallHomeRegistry, CallHomeSessionContext, SessionPromise};
pub use codec::{ExiParameters, FramingMode, NetconfCodec};
pub use config::Config;
pub use error::{NetconfError, Result};
pub use notifications::{
    BaseStreamPublisher, NotificationListener, NotificationManager, StreamInfo, StreamListener,
    BASE_STREAM_NAME,
};
pub use protocol::{
    Capability, CapabilitySet, Message, Notification, ReplyContent, Rpc, RpcError, RpcReply,
    Session, SessionState,
};
pub use router::{
    DatastoreFacade, ExecutionChain, HandlingPriority, OperationHandler, OperationRouter,
};
pub use server::{NetconfServer, SessionManager};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
