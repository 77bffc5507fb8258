//! Protocol messages and their XML wire form.
//!
//! Defines the four message kinds exchanged on a session — `hello`,
//! `rpc`, `rpc-reply` and `notification` — plus the structured
//! `rpc-error` vocabulary of RFC 6241. Messages are immutable once
//! constructed. Payload bodies (the content of an operation element, a
//! `data` reply, or a notification event) stay opaque XML strings; the
//! engine only interprets the envelope and the root element name and
//! namespace needed for routing.

use chrono::{DateTime, Utc};
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::capability::{Capability, CapabilitySet};
use crate::error::{NetconfError, Result};

/// NETCONF base namespace
pub const BASE_NS: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";
/// NETCONF notification namespace
pub const NOTIFICATION_NS: &str = "urn:ietf:params:xml:ns:netconf:notification:1.0";

/// A complete protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Capability advertisement, first message in both directions
    Hello(Hello),
    /// RPC request
    Rpc(Rpc),
    /// RPC reply correlated by message-id
    RpcReply(RpcReply),
    /// Asynchronous event on a subscribed stream
    Notification(Notification),
}

/// `hello` message: session-id (server to client only) plus capabilities.
#[derive(Debug, Clone, PartialEq)]
pub struct Hello {
    /// Session id; present only in the server's hello
    pub session_id: Option<u32>,
    /// Advertised capability set
    pub capabilities: CapabilitySet,
}

/// `rpc` request.
#[derive(Debug, Clone, PartialEq)]
pub struct Rpc {
    /// Caller-supplied correlation id
    pub message_id: String,
    /// Local name of the operation element
    pub operation: String,
    /// Explicit namespace of the operation element; `None` means the
    /// base namespace inherited from the `rpc` envelope
    pub namespace: Option<String>,
    /// Inner XML of the operation element, opaque to the engine
    pub body: String,
}

/// `rpc-reply` response.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcReply {
    /// Correlation id copied from the request
    pub message_id: String,
    /// Reply payload
    pub content: ReplyContent,
}

/// Payload of an `rpc-reply`.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyContent {
    /// `<ok/>`
    Ok,
    /// `<data>` with opaque inner XML (possibly empty)
    Data(String),
    /// One or more structured errors
    Errors(Vec<RpcError>),
}

/// `notification` event message.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Event timestamp
    pub event_time: DateTime<Utc>,
    /// Opaque event payload XML
    pub body: String,
}

impl Notification {
    /// Create a notification stamped with the current time.
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            event_time: Utc::now(),
            body: body.into(),
        }
    }

    /// Create a notification with an explicit timestamp.
    pub fn at(event_time: DateTime<Utc>, body: impl Into<String>) -> Self {
        Self {
            event_time,
            body: body.into(),
        }
    }
}

/// Error classes of RFC 6241.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    /// Secure-transport layer
    Transport,
    /// RPC envelope layer
    Rpc,
    /// Protocol operation layer
    Protocol,
    /// Server content layer
    Application,
}

impl ErrorType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Rpc => "rpc",
            Self::Protocol => "protocol",
            Self::Application => "application",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "transport" => Some(Self::Transport),
            "rpc" => Some(Self::Rpc),
            "protocol" => Some(Self::Protocol),
            "application" => Some(Self::Application),
            _ => None,
        }
    }
}

/// Error tags of RFC 6241 Appendix A.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ErrorTag {
    InUse,
    InvalidValue,
    TooBig,
    MissingElement,
    BadElement,
    UnknownElement,
    UnknownNamespace,
    AccessDenied,
    LockDenied,
    ResourceDenied,
    DataExists,
    DataMissing,
    OperationNotSupported,
    OperationFailed,
    MalformedMessage,
}

impl ErrorTag {
    fn as_str(self) -> &'static str {
        match self {
            Self::InUse => "in-use",
            Self::InvalidValue => "invalid-value",
            Self::TooBig => "too-big",
            Self::MissingElement => "missing-element",
            Self::BadElement => "bad-element",
            Self::UnknownElement => "unknown-element",
            Self::UnknownNamespace => "unknown-namespace",
            Self::AccessDenied => "access-denied",
            Self::LockDenied => "lock-denied",
            Self::ResourceDenied => "resource-denied",
            Self::DataExists => "data-exists",
            Self::DataMissing => "data-missing",
            Self::OperationNotSupported => "operation-not-supported",
            Self::OperationFailed => "operation-failed",
            Self::MalformedMessage => "malformed-message",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "in-use" => Some(Self::InUse),
            "invalid-value" => Some(Self::InvalidValue),
            "too-big" => Some(Self::TooBig),
            "missing-element" => Some(Self::MissingElement),
            "bad-element" => Some(Self::BadElement),
            "unknown-element" => Some(Self::UnknownElement),
            "unknown-namespace" => Some(Self::UnknownNamespace),
            "access-denied" => Some(Self::AccessDenied),
            "lock-denied" => Some(Self::LockDenied),
            "resource-denied" => Some(Self::ResourceDenied),
            "data-exists" => Some(Self::DataExists),
            "data-missing" => Some(Self::DataMissing),
            "operation-not-supported" => Some(Self::OperationNotSupported),
            "operation-failed" => Some(Self::OperationFailed),
            "malformed-message" => Some(Self::MalformedMessage),
            _ => None,
        }
    }
}

/// Error severities of RFC 6241.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Hard failure
    Error,
    /// Advisory
    Warning,
}

impl ErrorSeverity {
    fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "error" => Some(Self::Error),
            "warning" => Some(Self::Warning),
            _ => None,
        }
    }
}

/// Structured `rpc-error` content.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcError {
    /// Layer the error occurred at
    pub error_type: ErrorType,
    /// RFC 6241 error tag
    pub tag: ErrorTag,
    /// Severity
    pub severity: ErrorSeverity,
    /// Optional path to the offending element
    pub path: Option<String>,
    /// Human-readable description
    pub message: String,
    /// Optional structured detail (opaque XML)
    pub info: Option<String>,
}

impl RpcError {
    /// Generic application-layer error with the given tag.
    pub fn new(tag: ErrorTag, message: impl Into<String>) -> Self {
        Self {
            error_type: ErrorType::Application,
            tag,
            severity: ErrorSeverity::Error,
            path: None,
            message: message.into(),
            info: None,
        }
    }

    /// The RPC named an operation no handler claims.
    pub fn operation_not_supported(operation: &str) -> Self {
        Self {
            error_type: ErrorType::Protocol,
            tag: ErrorTag::OperationNotSupported,
            severity: ErrorSeverity::Error,
            path: None,
            message: format!("operation not supported: {operation}"),
            info: None,
        }
    }

    /// Handler-level failure.
    pub fn operation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorTag::OperationFailed, message)
    }

    /// Invalid value in the RPC input.
    pub fn invalid_value(message: impl Into<String>) -> Self {
        Self::new(ErrorTag::InvalidValue, message)
    }

    /// Required element missing from the RPC input.
    pub fn missing_element(element: &str) -> Self {
        Self {
            error_type: ErrorType::Protocol,
            tag: ErrorTag::MissingElement,
            severity: ErrorSeverity::Error,
            path: None,
            message: format!("missing required element: {element}"),
            info: Some(format!("<bad-element>{}</bad-element>", escape(element))),
        }
    }

    /// Terminal error for RPCs arriving while the session closes.
    pub fn session_closing() -> Self {
        Self {
            error_type: ErrorType::Protocol,
            tag: ErrorTag::OperationFailed,
            severity: ErrorSeverity::Error,
            path: None,
            message: "session is closing".to_string(),
            info: None,
        }
    }

    /// Attach an error path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl Message {
    /// Client-side `hello` (no session-id).
    pub fn hello(capabilities: CapabilitySet) -> Self {
        Self::Hello(Hello {
            session_id: None,
            capabilities,
        })
    }

    /// Server-side `hello` carrying the assigned session-id.
    pub fn hello_with_session_id(session_id: u32, capabilities: CapabilitySet) -> Self {
        Self::Hello(Hello {
            session_id: Some(session_id),
            capabilities,
        })
    }

    /// RPC request in the base namespace.
    pub fn rpc(message_id: &str, operation: &str, body: &str) -> Self {
        Self::Rpc(Rpc {
            message_id: message_id.to_string(),
            operation: operation.to_string(),
            namespace: None,
            body: body.to_string(),
        })
    }

    /// `<ok/>` reply.
    pub fn reply_ok(message_id: &str) -> Self {
        Self::RpcReply(RpcReply {
            message_id: message_id.to_string(),
            content: ReplyContent::Ok,
        })
    }

    /// `<data>` reply.
    pub fn reply_data(message_id: &str, data: impl Into<String>) -> Self {
        Self::RpcReply(RpcReply {
            message_id: message_id.to_string(),
            content: ReplyContent::Data(data.into()),
        })
    }

    /// Single-error reply.
    pub fn reply_error(message_id: &str, error: RpcError) -> Self {
        Self::RpcReply(RpcReply {
            message_id: message_id.to_string(),
            content: ReplyContent::Errors(vec![error]),
        })
    }

    /// Serialize to the XML wire form (before framing and EXI).
    pub fn to_xml(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
        match self {
            Self::Hello(hello) => {
                out.push_str(&format!("<hello xmlns=\"{BASE_NS}\"><capabilities>"));
                for cap in hello.capabilities.iter() {
                    out.push_str(&format!(
                        "<capability>{}</capability>",
                        escape(cap.uri())
                    ));
                }
                out.push_str("</capabilities>");
                if let Some(id) = hello.session_id {
                    out.push_str(&format!("<session-id>{id}</session-id>"));
                }
                out.push_str("</hello>");
            },
            Self::Rpc(rpc) => {
                out.push_str(&format!(
                    "<rpc message-id=\"{}\" xmlns=\"{BASE_NS}\">",
                    escape(&rpc.message_id)
                ));
                let ns_attr = rpc
                    .namespace
                    .as_ref()
                    .map(|ns| format!(" xmlns=\"{}\"", escape(ns)))
                    .unwrap_or_default();
                if rpc.body.is_empty() {
                    out.push_str(&format!("<{}{}/>", rpc.operation, ns_attr));
                } else {
                    out.push_str(&format!(
                        "<{op}{ns_attr}>{body}</{op}>",
                        op = rpc.operation,
                        body = rpc.body
                    ));
                }
                out.push_str("</rpc>");
            },
            Self::RpcReply(reply) => {
                out.push_str(&format!(
                    "<rpc-reply message-id=\"{}\" xmlns=\"{BASE_NS}\">",
                    escape(&reply.message_id)
                ));
                match &reply.content {
                    ReplyContent::Ok => out.push_str("<ok/>"),
                    ReplyContent::Data(data) => {
                        if data.is_empty() {
                            out.push_str("<data/>");
                        } else {
                            out.push_str(&format!("<data>{data}</data>"));
                        }
                    },
                    ReplyContent::Errors(errors) => {
                        for error in errors {
                            out.push_str("<rpc-error>");
                            out.push_str(&format!(
                                "<error-type>{}</error-type>",
                                error.error_type.as_str()
                            ));
                            out.push_str(&format!(
                                "<error-tag>{}</error-tag>",
                                error.tag.as_str()
                            ));
                            out.push_str(&format!(
                                "<error-severity>{}</error-severity>",
                                error.severity.as_str()
                            ));
                            if let Some(path) = &error.path {
                                out.push_str(&format!(
                                    "<error-path>{}</error-path>",
                                    escape(path)
                                ));
                            }
                            out.push_str(&format!(
                                "<error-message>{}</error-message>",
                                escape(&error.message)
                            ));
                            if let Some(info) = &error.info {
                                out.push_str(&format!("<error-info>{info}</error-info>"));
                            }
                            out.push_str("</rpc-error>");
                        }
                    },
                }
                out.push_str("</rpc-reply>");
            },
            Self::Notification(notification) => {
                out.push_str(&format!("<notification xmlns=\"{NOTIFICATION_NS}\">"));
                out.push_str(&format!(
                    "<eventTime>{}</eventTime>",
                    notification.event_time.to_rfc3339()
                ));
                out.push_str(&notification.body);
                out.push_str("</notification>");
            },
        }
        out
    }

    /// Parse a message from its XML wire form.
    pub fn from_xml(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);

        loop {
            match reader.read_event()? {
                Event::Decl(_) | Event::Comment(_) | Event::PI(_) | Event::Text(_) => {},
                Event::Start(e) => {
                    return match e.local_name().as_ref() {
                        b"hello" => parse_hello(&mut reader),
                        b"rpc" => parse_rpc(&mut reader, &e),
                        b"rpc-reply" => parse_rpc_reply(&mut reader, &e),
                        b"notification" => parse_notification(&mut reader),
                        other => Err(NetconfError::InvalidMessage(format!(
                            "unknown message element: {}",
                            String::from_utf8_lossy(other)
                        ))),
                    };
                },
                Event::Empty(e) => {
                    return Err(NetconfError::InvalidMessage(format!(
                        "empty message element: {}",
                        String::from_utf8_lossy(e.local_name().as_ref())
                    )));
                },
                Event::Eof => {
                    return Err(NetconfError::InvalidMessage("empty document".to_string()));
                },
                _ => {
                    return Err(NetconfError::InvalidMessage(
                        "unexpected markup before message element".to_string(),
                    ));
                },
            }
        }
    }
}

/// Read the text content of a leaf element, unescaping entities.
/// The reader must be positioned just past the element's start tag.
fn read_leaf_text(reader: &mut Reader<&[u8]>) -> Result<String> {
    let mut out = String::new();
    loop {
        match reader.read_event()? {
            Event::Text(t) => out.push_str(&t.unescape()?),
            Event::CData(c) => {
                out.push_str(&String::from_utf8_lossy(c.into_inner().as_ref()));
            },
            Event::End(_) => return Ok(out),
            Event::Eof => {
                return Err(NetconfError::InvalidMessage(
                    "unexpected end of document".to_string(),
                ))
            },
            _ => {
                return Err(NetconfError::InvalidMessage(
                    "unexpected markup in leaf element".to_string(),
                ))
            },
        }
    }
}

/// Rebuild a start tag (name plus attributes) as it appeared on the wire.
fn start_tag_to_string(e: &BytesStart) -> Result<String> {
    let mut out = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| NetconfError::InvalidMessage(err.to_string()))?;
        out.push(' ');
        out.push_str(&String::from_utf8_lossy(attr.key.as_ref()));
        out.push_str("=\"");
        out.push_str(&String::from_utf8_lossy(&attr.value));
        out.push('"');
    }
    Ok(out)
}

fn attribute(e: &BytesStart, name: &str) -> Result<Option<String>> {
    let attr = e
        .try_get_attribute(name)
        .map_err(|err| NetconfError::InvalidMessage(err.to_string()))?;
    match attr {
        Some(attr) => {
            let value = attr
                .unescape_value()
                .map_err(|err| NetconfError::InvalidMessage(err.to_string()))?;
            Ok(Some(value.into_owned()))
        },
        None => Ok(None),
    }
}

fn parse_hello(reader: &mut Reader<&[u8]>) -> Result<Message> {
    let mut session_id = None;
    let mut capabilities = CapabilitySet::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"capabilities" => loop {
                    match reader.read_event()? {
                        Event::Start(c) if c.local_name().as_ref() == b"capability" => {
                            let uri = read_leaf_text(reader)?;
                            capabilities.add(Capability::parse(&uri)?);
                        },
                        Event::Empty(c) if c.local_name().as_ref() == b"capability" => {
                            return Err(NetconfError::NegotiationFailed(
                                "empty capability element".to_string(),
                            ));
                        },
                        Event::End(c) if c.local_name().as_ref() == b"capabilities" => break,
                        Event::Eof => {
                            return Err(NetconfError::InvalidMessage(
                                "unterminated capabilities".to_string(),
                            ))
                        },
                        _ => {},
                    }
                },
                b"session-id" => {
                    let text = read_leaf_text(reader)?;
                    let id = text.trim().parse::<u32>().map_err(|_| {
                        NetconfError::InvalidMessage(format!("invalid session-id: {text}"))
                    })?;
                    session_id = Some(id);
                },
                other => {
                    let name = other.to_vec();
                    reader.read_to_end(quick_xml::name::QName(&name))?;
                },
            },
            Event::End(_) => {
                return Ok(Message::Hello(Hello {
                    session_id,
                    capabilities,
                }));
            },
            Event::Eof => {
                return Err(NetconfError::InvalidMessage("unterminated hello".to_string()))
            },
            _ => {},
        }
    }
}

fn parse_rpc(reader: &mut Reader<&[u8]>, rpc_start: &BytesStart) -> Result<Message> {
    let message_id = attribute(rpc_start, "message-id")?
        .ok_or_else(|| NetconfError::InvalidMessage("rpc missing message-id".to_string()))?;

    let mut operation = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) if operation.is_none() => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                let namespace = attribute(&e, "xmlns")?;
                let body = reader.read_text(e.name())?.into_owned();
                operation = Some((name, namespace, body));
            },
            Event::Empty(e) if operation.is_none() => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                let namespace = attribute(&e, "xmlns")?;
                operation = Some((name, namespace, String::new()));
            },
            Event::Start(e) => {
                // trailing elements after the operation are skipped
                let name = e.name().as_ref().to_vec();
                reader.read_to_end(quick_xml::name::QName(&name))?;
            },
            Event::End(_) => {
                let (operation, namespace, body) = operation.ok_or_else(|| {
                    NetconfError::InvalidMessage("rpc missing operation element".to_string())
                })?;
                return Ok(Message::Rpc(Rpc {
                    message_id,
                    operation,
                    namespace,
                    body,
                }));
            },
            Event::Eof => {
                return Err(NetconfError::InvalidMessage("unterminated rpc".to_string()))
            },
            _ => {},
        }
    }
}

fn parse_rpc_reply(reader: &mut Reader<&[u8]>, reply_start: &BytesStart) -> Result<Message> {
    let message_id = attribute(reply_start, "message-id")?
        .ok_or_else(|| NetconfError::InvalidMessage("rpc-reply missing message-id".to_string()))?;

    let mut content: Option<ReplyContent> = None;
    let mut errors: Vec<RpcError> = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Empty(e) => match e.local_name().as_ref() {
                b"ok" => content = Some(ReplyContent::Ok),
                b"data" => content = Some(ReplyContent::Data(String::new())),
                _ => {},
            },
            Event::Start(e) => match e.local_name().as_ref() {
                b"data" => {
                    let data = reader.read_text(e.name())?.into_owned();
                    content = Some(ReplyContent::Data(data));
                },
                b"rpc-error" => errors.push(parse_rpc_error(reader)?),
                b"ok" => {
                    reader.read_to_end(e.name())?;
                    content = Some(ReplyContent::Ok);
                },
                other => {
                    let name = other.to_vec();
                    reader.read_to_end(quick_xml::name::QName(&name))?;
                },
            },
            Event::End(_) => {
                let content = if errors.is_empty() {
                    content.ok_or_else(|| {
                        NetconfError::InvalidMessage("rpc-reply without content".to_string())
                    })?
                } else {
                    ReplyContent::Errors(errors)
                };
                return Ok(Message::RpcReply(RpcReply {
                    message_id,
                    content,
                }));
            },
            Event::Eof => {
                return Err(NetconfError::InvalidMessage(
                    "unterminated rpc-reply".to_string(),
                ))
            },
            _ => {},
        }
    }
}

fn parse_rpc_error(reader: &mut Reader<&[u8]>) -> Result<RpcError> {
    let mut error = RpcError::operation_failed("");

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"error-type" => {
                    let text = read_leaf_text(reader)?;
                    error.error_type = ErrorType::parse(text.trim()).ok_or_else(|| {
                        NetconfError::InvalidMessage(format!("unknown error-type: {text}"))
                    })?;
                },
                b"error-tag" => {
                    let text = read_leaf_text(reader)?;
                    error.tag = ErrorTag::parse(text.trim()).ok_or_else(|| {
                        NetconfError::InvalidMessage(format!("unknown error-tag: {text}"))
                    })?;
                },
                b"error-severity" => {
                    let text = read_leaf_text(reader)?;
                    error.severity = ErrorSeverity::parse(text.trim()).ok_or_else(|| {
                        NetconfError::InvalidMessage(format!("unknown error-severity: {text}"))
                    })?;
                },
                b"error-path" => error.path = Some(read_leaf_text(reader)?),
                b"error-message" => error.message = read_leaf_text(reader)?,
                b"error-info" => {
                    error.info = Some(reader.read_text(e.name())?.into_owned());
                },
                other => {
                    let name = other.to_vec();
                    reader.read_to_end(quick_xml::name::QName(&name))?;
                },
            },
            Event::End(_) => return Ok(error),
            Event::Eof => {
                return Err(NetconfError::InvalidMessage(
                    "unterminated rpc-error".to_string(),
                ))
            },
            _ => {},
        }
    }
}

fn parse_notification(reader: &mut Reader<&[u8]>) -> Result<Message> {
    let mut event_time = None;
    let mut body = String::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"eventTime" => {
                let text = read_leaf_text(reader)?;
                let parsed = DateTime::parse_from_rfc3339(text.trim()).map_err(|_| {
                    NetconfError::InvalidMessage(format!("invalid eventTime: {text}"))
                })?;
                event_time = Some(parsed.with_timezone(&Utc));
            },
            Event::Start(e) => {
                let start = start_tag_to_string(&e)?;
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let inner = reader.read_text(e.name())?;
                body.push_str(&format!("<{start}>{inner}</{name}>"));
            },
            Event::Empty(e) => {
                let start = start_tag_to_string(&e)?;
                body.push_str(&format!("<{start}/>"));
            },
            Event::End(_) => {
                let event_time = event_time.ok_or_else(|| {
                    NetconfError::InvalidMessage("notification missing eventTime".to_string())
                })?;
                return Ok(Message::Notification(Notification { event_time, body }));
            },
            Event::Eof => {
                return Err(NetconfError::InvalidMessage(
                    "unterminated notification".to_string(),
                ))
            },
            _ => {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::capability::CAP_BASE_1_0;
    use super::*;

    #[test]
    fn test_hello_roundtrip() {
        let caps = CapabilitySet::parse_all([
            CAP_BASE_1_0,
            "urn:example:yang:widgets?module=widgets&revision=2024-01-15",
        ])
        .unwrap();
        let message = Message::hello_with_session_id(42, caps);

        let xml = message.to_xml();
        assert!(xml.contains("<session-id>42</session-id>"));
        // The & in the parameter suffix must be escaped on the wire
        assert!(xml.contains("&amp;revision"));

        let parsed = Message::from_xml(&xml).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn test_rpc_roundtrip() {
        let message = Message::rpc("101", "get-config", "<source><running/></source>");
        let xml = message.to_xml();

        let parsed = Message::from_xml(&xml).unwrap();
        assert_eq!(parsed, message);

        match parsed {
            Message::Rpc(rpc) => {
                assert_eq!(rpc.message_id, "101");
                assert_eq!(rpc.operation, "get-config");
                assert_eq!(rpc.body, "<source><running/></source>");
                assert!(rpc.namespace.is_none());
            },
            other => panic!("expected rpc, got {other:?}"),
        }
    }

    #[test]
    fn test_rpc_with_namespace() {
        let message = Message::Rpc(Rpc {
            message_id: "7".to_string(),
            operation: "reboot".to_string(),
            namespace: Some("urn:vendor:ops".to_string()),
            body: String::new(),
        });
        let xml = message.to_xml();
        assert!(xml.contains("<reboot xmlns=\"urn:vendor:ops\"/>"));

        let parsed = Message::from_xml(&xml).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn test_rpc_missing_message_id_rejected() {
        let xml = format!("<rpc xmlns=\"{BASE_NS}\"><get/></rpc>");
        assert!(matches!(
            Message::from_xml(&xml),
            Err(NetconfError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_reply_ok_roundtrip() {
        let message = Message::reply_ok("2");
        let parsed = Message::from_xml(&message.to_xml()).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn test_reply_data_roundtrip() {
        let message = Message::reply_data("3", "<interfaces><interface/></interfaces>");
        let parsed = Message::from_xml(&message.to_xml()).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn test_reply_empty_data() {
        let message = Message::reply_data("4", "");
        let xml = message.to_xml();
        assert!(xml.contains("<data/>"));
        assert_eq!(Message::from_xml(&xml).unwrap(), message);
    }

    #[test]
    fn test_reply_error_roundtrip() {
        let error = RpcError::operation_not_supported("frobnicate").with_path("/rpc/frobnicate");
        let message = Message::reply_error("9", error);

        let xml = message.to_xml();
        assert!(xml.contains("<error-tag>operation-not-supported</error-tag>"));

        let parsed = Message::from_xml(&xml).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn test_notification_roundtrip() {
        let message = Message::Notification(Notification::new(
            "<config-change><session-id>5</session-id></config-change>",
        ));
        let parsed = Message::from_xml(&message.to_xml()).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn test_notification_missing_event_time_rejected() {
        let xml = format!("<notification xmlns=\"{NOTIFICATION_NS}\"><thing/></notification>");
        assert!(Message::from_xml(&xml).is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(Message::from_xml("").is_err());
        assert!(Message::from_xml("<unknown/>").is_err());
        assert!(Message::from_xml("not xml at all").is_err());
    }
}
