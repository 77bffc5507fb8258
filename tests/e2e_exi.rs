//! End-to-end EXI switch-over scenario.
//!
//! After the hello exchange a client sends `start-exi`; the server's
//! ok reply travels in plaintext XML, and every message after it on
//! both sides is EXI-encoded until a `stop-exi` is processed. The
//! reply to `stop-exi` still travels under the EXI transform (the
//! switch is message-boundary-atomic in both directions); traffic
//! after it reverts to plaintext.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use netconf::protocol::{CAP_BASE_1_0, CAP_BASE_1_1, CAP_EXI_1_0};
use netconf::{
    Config, ExiParameters, FramingMode, Message, NetconfCodec, NetconfServer, ReplyContent,
    RpcReply,
};
use tokio::io::DuplexStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

async fn recv(framed: &mut Framed<DuplexStream, NetconfCodec>) -> Option<Message> {
    match timeout(RECV_TIMEOUT, framed.next()).await {
        Ok(Some(Ok(message))) => Some(message),
        Ok(Some(Err(error))) => panic!("client decode error: {error}"),
        Ok(None) => None,
        Err(_) => panic!("timed out waiting for a message"),
    }
}

fn reply(message: Message) -> RpcReply {
    match message {
        Message::RpcReply(reply) => reply,
        other => panic!("expected rpc-reply, got {other:?}"),
    }
}

#[tokio::test]
async fn test_exi_switch_over_scenario() {
    let server = Arc::new(NetconfServer::new(Config::default()).unwrap());
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let task = tokio::spawn(server.handle_connection(server_io, None));

    let mut client = Framed::new(client_io, NetconfCodec::new());

    // Hello exchange: both sides advertise base:1.1 and EXI
    let server_hello = match recv(&mut client).await {
        Some(Message::Hello(hello)) => hello,
        other => panic!("expected hello, got {other:?}"),
    };
    assert!(server_hello.capabilities.contains(CAP_EXI_1_0));

    let caps = netconf::CapabilitySet::parse_all([
        CAP_BASE_1_0,
        CAP_BASE_1_1,
        CAP_EXI_1_0,
    ])
    .unwrap();
    client.send(Message::hello(caps)).await.unwrap();
    client.codec_mut().set_framing(FramingMode::Chunked);

    // start-exi: the ok reply is still plaintext XML — the client
    // codec has not switched yet and decodes it fine
    client.send(Message::rpc("1", "start-exi", "")).await.unwrap();
    let start_reply = reply(recv(&mut client).await.unwrap());
    assert_eq!(start_reply.message_id, "1");
    assert!(matches!(start_reply.content, ReplyContent::Ok));

    // Everything from here on is EXI in both directions. The server
    // negotiated compression=6 from its own advertisement.
    let params = ExiParameters::default();
    client.codec_mut().set_exi(Some(params));

    client
        .send(Message::rpc("2", "get-config", "<source><running/></source>"))
        .await
        .unwrap();
    let exi_reply = reply(recv(&mut client).await.unwrap());
    assert_eq!(exi_reply.message_id, "2");
    assert!(matches!(exi_reply.content, ReplyContent::Data(ref d) if d.is_empty()));

    // stop-exi: the reply still travels under the EXI transform; the
    // revert takes effect after it, in both directions
    client.send(Message::rpc("3", "stop-exi", "")).await.unwrap();
    let stop_reply = reply(recv(&mut client).await.unwrap());
    assert_eq!(stop_reply.message_id, "3");
    assert!(matches!(stop_reply.content, ReplyContent::Ok));

    client.codec_mut().set_exi(None);

    // Plaintext again
    client.send(Message::rpc("4", "get", "")).await.unwrap();
    let plain_reply = reply(recv(&mut client).await.unwrap());
    assert_eq!(plain_reply.message_id, "4");

    client.send(Message::rpc("5", "close-session", "")).await.unwrap();
    assert!(matches!(
        reply(recv(&mut client).await.unwrap()).content,
        ReplyContent::Ok
    ));
    assert!(recv(&mut client).await.is_none());
    task.await.unwrap().unwrap();
}

/// EXI toggles any number of times within one session.
#[tokio::test]
async fn test_repeated_exi_toggle() {
    let server = Arc::new(NetconfServer::new(Config::default()).unwrap());
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let task = tokio::spawn(server.handle_connection(server_io, None));

    let mut client = Framed::new(client_io, NetconfCodec::new());
    match recv(&mut client).await {
        Some(Message::Hello(_)) => {},
        other => panic!("expected hello, got {other:?}"),
    }
    let caps = netconf::CapabilitySet::parse_all([
        CAP_BASE_1_0,
        CAP_BASE_1_1,
        CAP_EXI_1_0,
    ])
    .unwrap();
    client.send(Message::hello(caps)).await.unwrap();
    client.codec_mut().set_framing(FramingMode::Chunked);

    let params = ExiParameters::default();
    let mut message_id = 0u32;

    for _ in 0..3 {
        message_id += 1;
        client
            .send(Message::rpc(&message_id.to_string(), "start-exi", ""))
            .await
            .unwrap();
        assert!(matches!(
            reply(recv(&mut client).await.unwrap()).content,
            ReplyContent::Ok
        ));
        client.codec_mut().set_exi(Some(params));

        message_id += 1;
        client
            .send(Message::rpc(&message_id.to_string(), "get", ""))
            .await
            .unwrap();
        assert_eq!(
            reply(recv(&mut client).await.unwrap()).message_id,
            message_id.to_string()
        );

        message_id += 1;
        client
            .send(Message::rpc(&message_id.to_string(), "stop-exi", ""))
            .await
            .unwrap();
        assert!(matches!(
            reply(recv(&mut client).await.unwrap()).content,
            ReplyContent::Ok
        ));
        client.codec_mut().set_exi(None);
    }

    client
        .send(Message::rpc("99", "close-session", ""))
        .await
        .unwrap();
    recv(&mut client).await;
    task.await.unwrap().unwrap();
}

/// start-exi on a session that did not negotiate EXI is a domain
/// error, not a session-ending one.
#[tokio::test]
async fn test_start_exi_without_negotiation_is_domain_error() {
    let mut config = Config::default();
    config.capabilities.exi = false;
    let server = Arc::new(NetconfServer::new(config).unwrap());

    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let task = tokio::spawn(server.handle_connection(server_io, None));

    let mut client = Framed::new(client_io, NetconfCodec::new());
    match recv(&mut client).await {
        Some(Message::Hello(_)) => {},
        other => panic!("expected hello, got {other:?}"),
    }
    let caps = netconf::CapabilitySet::parse_all([
        CAP_BASE_1_0,
        CAP_BASE_1_1,
        CAP_EXI_1_0,
    ])
    .unwrap();
    client.send(Message::hello(caps)).await.unwrap();
    client.codec_mut().set_framing(FramingMode::Chunked);

    client.send(Message::rpc("1", "start-exi", "")).await.unwrap();
    let rejected = reply(recv(&mut client).await.unwrap());
    assert!(matches!(rejected.content, ReplyContent::Errors(_)));

    // Session still alive
    client.send(Message::rpc("2", "get", "")).await.unwrap();
    assert_eq!(reply(recv(&mut client).await.unwrap()).message_id, "2");

    client.send(Message::rpc("3", "close-session", "")).await.unwrap();
    recv(&mut client).await;
    task.await.unwrap().unwrap();
}
