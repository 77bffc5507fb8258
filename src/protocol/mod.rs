//! NETCONF protocol model: capabilities, messages, session lifecycle.
//!
//! # Message Flow
//!
//! ```text
//! Client                            Server
//!    |                                |
//!    |<------- hello (caps, sid) ----|  Both sides advertise
//!    |-------- hello (caps) -------->|  capabilities
//!    |                                |
//!    |======== rpc (message-id) ====>|  Ordered request/reply
//!    |<======= rpc-reply ============|  exchange
//!    |                                |
//!    |<------- notification ---------|  Async events after
//!    |                                |  create-subscription
//!    |-------- close-session ------->|
//!    |<------- ok -------------------|  Reply flushed before
//!    |            (transport closed)  |  teardown
//! ```
//!
//! Capability negotiation decides the framing discipline (end-of-message
//! vs RFC 6242 chunked) and EXI eligibility for the whole session; a
//! `start-exi`/`stop-exi` RPC pair toggles the binary transform at
//! message boundaries.

mod capability;
mod message;
mod session;

pub use capability::{
    negotiate, Capability, CapabilitySet, Negotiated, CAP_BASE_1_0, CAP_BASE_1_1, CAP_EXI_1_0,
    CAP_NOTIFICATION_1_0,
};
pub use message::{
    ErrorSeverity, ErrorTag, ErrorType, Hello, Message, Notification, ReplyContent, Rpc, RpcError,
    RpcReply, BASE_NS, NOTIFICATION_NS,
};
pub use session::{
    next_session_id, Session, SessionCommand, SessionControl, SessionHandle, SessionState,
};
