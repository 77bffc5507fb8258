//! Session lifecycle.
//!
//! A session owns one connection's state machine and binds the message
//! codec, the negotiated capability set and the operation router. The
//! state machine is an explicit enum with a checked transition function:
//!
//! | State               | Valid transitions                      |
//! |---------------------|----------------------------------------|
//! | `Connecting`        | → Established, NegotiationFailed       |
//! | `Established`       | → Established (EXI toggles), Closing   |
//! | `Closing`           | → Closed                               |
//! | `NegotiationFailed` | → Closed                               |
//! | `Closed`            | (terminal)                             |
//!
//! Session ids are process-unique, assigned once from a monotonic
//! counter and never reused while the process lives.

use std::sync::atomic::{AtomicU32, Ordering};

use tokio::sync::mpsc;

use super::capability::Negotiated;
use crate::codec::ExiParameters;
use crate::error::{NetconfError, Result};

static NEXT_SESSION_ID: AtomicU32 = AtomicU32::new(1);

/// Allocate the next process-unique session id.
pub fn next_session_id() -> u32 {
    NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport accepted, hello exchange in progress
    Connecting,
    /// Capability negotiation succeeded, RPCs flow
    Established,
    /// Close requested, pending reply being flushed
    Closing,
    /// Transport released
    Closed,
    /// Malformed or incompatible hello; terminal before Established
    NegotiationFailed,
}

impl SessionState {
    /// Validate and perform a transition.
    pub fn transition(self, next: SessionState) -> Result<SessionState> {
        use SessionState::{Closed, Closing, Connecting, Established, NegotiationFailed};

        let valid = matches!(
            (self, next),
            (Connecting, Established)
                | (Connecting, NegotiationFailed)
                | (Established, Established)
                | (Established, Closing)
                | (Closing, Closed)
                | (NegotiationFailed, Closed)
        );

        if valid {
            Ok(next)
        } else {
            Err(NetconfError::Protocol(format!(
                "invalid session transition {self:?} -> {next:?}"
            )))
        }
    }
}

/// Commands a handler (or another session) issues against a session's
/// pipeline. Applied at message boundaries, after the in-flight reply
/// has been flushed.
#[derive(Debug)]
pub enum SessionCommand {
    /// Graceful close: flush the pending reply, then release the transport
    CloseAfterReply,
    /// Forced close from `kill-session` or shutdown; no reply obligation
    Kill,
    /// Activate the EXI transform for subsequent messages
    StartExi(ExiParameters),
    /// Revert to plaintext XML for subsequent messages
    StopExi,
}

/// Cloneable handle for issuing [`SessionCommand`]s to a session pipeline.
#[derive(Debug, Clone)]
pub struct SessionControl {
    id: u32,
    tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionControl {
    /// Create a control handle and the receiving end for the pipeline.
    pub fn new(id: u32) -> (Self, mpsc::UnboundedReceiver<SessionCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { id, tx }, rx)
    }

    /// Session id this handle controls
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Send a command. Errors are ignored: a gone receiver means the
    /// pipeline already terminated, which satisfies any command's intent.
    pub fn send(&self, command: SessionCommand) {
        let _ = self.tx.send(command);
    }

    /// Request a graceful close (reply-before-teardown).
    pub fn close(&self) {
        self.send(SessionCommand::CloseAfterReply);
    }

    /// Force the session down.
    pub fn kill(&self) {
        self.send(SessionCommand::Kill);
    }
}

/// Per-connection session state, owned by the pipeline task.
#[derive(Debug)]
pub struct Session {
    id: u32,
    state: SessionState,
    negotiated: Option<Negotiated>,
    exi_active: bool,
}

impl Session {
    /// Create a session in `Connecting`, allocating its id.
    pub fn new() -> Self {
        Self {
            id: next_session_id(),
            state: SessionState::Connecting,
            negotiated: None,
            exi_active: false,
        }
    }

    /// Numeric session id
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the session reached Established
    pub fn is_established(&self) -> bool {
        self.state == SessionState::Established
    }

    /// Negotiation outcome, present from Established onward
    pub fn negotiated(&self) -> Option<&Negotiated> {
        self.negotiated.as_ref()
    }

    /// Whether the EXI transform is currently active
    pub fn exi_active(&self) -> bool {
        self.exi_active
    }

    /// Record a successful negotiation and enter Established.
    pub fn establish(&mut self, negotiated: Negotiated) -> Result<()> {
        self.state = self.state.transition(SessionState::Established)?;
        self.negotiated = Some(negotiated);
        Ok(())
    }

    /// Record a failed negotiation.
    pub fn fail_negotiation(&mut self) -> Result<()> {
        self.state = self.state.transition(SessionState::NegotiationFailed)?;
        Ok(())
    }

    /// EXI parameters if negotiation made the session eligible
    pub fn exi_parameters(&self) -> Option<ExiParameters> {
        self.negotiated.as_ref().and_then(|n| n.exi)
    }

    /// Toggle the EXI flag. Valid only while Established.
    pub fn set_exi_active(&mut self, active: bool) -> Result<()> {
        self.state = self.state.transition(SessionState::Established)?;
        self.exi_active = active;
        Ok(())
    }

    /// Enter Closing.
    pub fn begin_close(&mut self) -> Result<()> {
        self.state = self.state.transition(SessionState::Closing)?;
        Ok(())
    }

    /// Enter Closed. Idempotent: closing an already-closed session is a
    /// no-op so concurrent close requests release resources exactly once.
    pub fn finish_close(&mut self) -> bool {
        if self.state == SessionState::Closed {
            return false;
        }
        // From Established, pass through Closing first
        if self.state == SessionState::Established {
            self.state = SessionState::Closing;
        }
        if self.state == SessionState::Connecting {
            self.state = SessionState::NegotiationFailed;
        }
        self.state = SessionState::Closed;
        true
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Shareable handle to a live session, registered with the session
/// manager so `kill-session` can target it by numeric id.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    /// Numeric session id
    pub id: u32,
    /// Command channel into the session pipeline
    pub control: SessionControl,
}

impl SessionHandle {
    /// Build a handle from a control handle.
    pub fn new(control: SessionControl) -> Self {
        Self {
            id: control.id(),
            control,
        }
    }
}
