//! Integration tests for dapwire.
//!
//! These tests verify the integration between the protocol, sync, transport
//! and remoting modules.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dapwire::codec::MsgPackCodec;
use dapwire::protocol::header_names;
use dapwire::{
    AsyncQueue, ContentType, DapwireError, DebuggerHost, Header, LazyAsyncValue, Packet,
    PacketBuilder, ProtocolMessage, RemoteClient, RemotingConfig, RequestService, ResponseCode,
    StreamParser,
};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

fn json_request(route: &str, invoke_id: &str, body: serde_json::Value) -> Packet {
    PacketBuilder::request(route)
        .content_type(ContentType::Json)
        .invoke_id(invoke_id)
        .body(&body)
        .build()
        .unwrap()
}

/// Read packets from `socket` until `count` have arrived.
async fn read_packets(socket: &mut TcpStream, parser: &mut StreamParser, count: usize) -> Vec<Packet> {
    let mut packets = Vec::new();
    let mut buf = [0u8; 4096];
    while packets.len() < count {
        let n = socket.read(&mut buf).await.unwrap();
        assert!(n > 0, "peer closed before {count} packets arrived");
        packets.extend(parser.push(&buf[..n]).unwrap());
    }
    packets
}

async fn loopback() -> (TcpListener, RemotingConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, RemotingConfig::new(format!("tcp://127.0.0.1:{port}")))
}

/// Built packets survive serialization and parsing intact.
#[test]
fn test_framing_round_trip() {
    let mut built = PacketBuilder::request("/debug/evaluate")
        .headers(vec![
            Header::new(header_names::CONTENT_TYPE, ContentType::JSON),
            Header::new(header_names::INVOKE_ID, "42"),
            Header::new(header_names::INVOKE_CONTRACT, "scripting"),
        ])
        .body(&json!({"expression": "a + b", "frameId": 3}))
        .build()
        .unwrap();
    let bytes = built.to_bytes();

    let mut parser = StreamParser::new();
    let parsed = parser.push(&bytes).unwrap();
    assert_eq!(parsed.len(), 1);
    let parsed = &parsed[0];

    assert_eq!(parsed.start_line(), built.start_line());
    let mut expected: Vec<_> = built.headers().to_vec();
    let mut actual: Vec<_> = parsed.headers().to_vec();
    expected.sort_by(|a, b| a.name.cmp(&b.name));
    actual.sort_by(|a, b| a.name.cmp(&b.name));
    assert_eq!(actual, expected);
    assert_eq!(parsed.content_length().unwrap(), parsed.content().len());
    assert_eq!(parsed.body().unwrap(), built.body().unwrap());
    assert!(!parsed.is_response());
}

/// Response round trip keeps the status line and a text body.
#[test]
fn test_response_round_trip_text_body() {
    let mut response = PacketBuilder::response(ResponseCode::InternalError)
        .content_type(ContentType::Text)
        .invoke_id(9)
        .body("script crashed")
        .build()
        .unwrap();

    let mut parser = StreamParser::new();
    let parsed = parser.push(&response.to_bytes()).unwrap().remove(0);

    assert!(parsed.is_response());
    assert_eq!(parsed.code(), Some(500));
    assert_eq!(parsed.response_line().unwrap().reason, "Internal Error");
    assert_eq!(parsed.body().unwrap().as_text(), Some("script crashed"));
}

/// MsgPack bodies decode through the packet model.
#[test]
fn test_packet_with_msgpack_body() {
    #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
    struct Breakpoint {
        line: u32,
        source: String,
    }

    let payload = Breakpoint {
        line: 42,
        source: "main.lua".to_string(),
    };

    let mut packet = Packet::new(
        "POST /debug/breakpoint HTTP/1.1",
        vec![Header::new(header_names::CONTENT_TYPE, ContentType::MSGPACK)],
        MsgPackCodec::encode(&payload).unwrap(),
    );

    let mut parser = StreamParser::new();
    let parsed = parser.push(&packet.to_bytes()).unwrap().remove(0);

    assert_eq!(parsed.content_type().unwrap(), ContentType::MsgPack);
    assert_eq!(parsed.body_as::<Breakpoint>().unwrap(), payload);
}

/// Any split of the bytes yields exactly one identical packet.
#[test]
fn test_chunk_independence() {
    let mut packet = json_request("/dap", "1", json!({"command": "launch", "arguments": {"noDebug": false}}));
    let bytes = packet.to_bytes();

    // Chunk sizes 1, 2, 3, ... until the bytes run out
    let mut parser = StreamParser::new();
    let mut decoded = Vec::new();
    let mut offset = 0;
    let mut size = 1;
    while offset < bytes.len() {
        let end = (offset + size).min(bytes.len());
        decoded.extend(parser.push(&bytes[offset..end]).unwrap());
        offset = end;
        size += 1;
    }
    assert_eq!(decoded.len(), 1);
    assert_eq!(decoded[0].content(), packet.content());

    // Every single split point
    for split in 0..=bytes.len() {
        let mut parser = StreamParser::new();
        let mut decoded = parser.push(&bytes[..split]).unwrap();
        decoded.extend(parser.push(&bytes[split..]).unwrap());
        assert_eq!(decoded.len(), 1, "split at {split}");
        assert_eq!(decoded[0], packet, "split at {split}");
    }
}

/// Two packets in one chunk come out in order.
#[test]
fn test_multi_frame_batching() {
    let mut first = json_request("/first", "1", json!({"n": 1}));
    let mut second = json_request("/second", "2", json!({"n": 2}));

    let mut data = first.to_bytes().to_vec();
    data.extend_from_slice(&second.to_bytes());

    let mut parser = StreamParser::new();
    let packets: Vec<_> = parser
        .packets(Some(&data[..]))
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(packets.len(), 2);
    assert_eq!(packets[0].route(), Some("/first"));
    assert_eq!(packets[1].route(), Some("/second"));
    assert!(parser.is_empty());
}

/// A header block without Content-Length fails and keeps failing.
#[test]
fn test_missing_content_length_is_framing_error() {
    let mut parser = StreamParser::new();
    let err = parser
        .push(b"POST /dap HTTP/1.1\r\nContent-Type: application/json\r\n\r\n")
        .unwrap_err();
    assert!(matches!(err, DapwireError::ContentLengthMissing));
    assert!(err.is_framing());

    let err = parser.push(b"{\"late\":\"body\"}").unwrap_err();
    assert!(matches!(err, DapwireError::ContentLengthMissing));
}

/// Ten concurrent waiters share one factory call.
#[tokio::test]
async fn test_lazy_value_single_flight() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let value = LazyAsyncValue::new(move || {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok::<_, DapwireError>(String::from("connected"))
        }
    });

    let waiters: Vec<_> = (0..10)
        .map(|_| {
            let value = value.clone();
            tokio::spawn(async move { value.wait_value().await })
        })
        .collect();

    for waiter in waiters {
        assert_eq!(waiter.await.unwrap().unwrap(), "connected");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// Ten concurrent waiters all see the one factory failure.
#[tokio::test]
async fn test_lazy_value_shared_failure() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let value = LazyAsyncValue::new(move || {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Err::<String, _>(DapwireError::InvalidAddress("tcp://unreachable:1".into()))
        }
    });

    let waiters: Vec<_> = (0..10)
        .map(|_| {
            let value = value.clone();
            tokio::spawn(async move { value.wait_value().await })
        })
        .collect();

    for waiter in waiters {
        let err = waiter.await.unwrap().unwrap_err();
        assert!(
            matches!(err, DapwireError::InvalidAddress(ref a) if a == "tcp://unreachable:1"),
            "{err:?}"
        );
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// Three pending calls are all broken when the backend hangs up.
#[tokio::test]
async fn test_bulk_invalidation_on_stream_closure() {
    let (listener, config) = loopback().await;
    let service = Arc::new(RequestService::from_config(&config).unwrap());
    let client = Arc::new(RemoteClient::new(service));

    let backend = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut parser = StreamParser::new();
        read_packets(&mut socket, &mut parser, 3).await;
        // Hang up without answering
    });

    let calls: Vec<_> = ["1", "2", "3"]
        .into_iter()
        .map(|id| {
            let client = client.clone();
            tokio::spawn(async move { client.send(json_request("/slow", id, json!({}))).await })
        })
        .collect();

    backend.await.unwrap();

    for call in calls {
        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, DapwireError::InvocationBroken), "{err:?}");
    }
    assert_eq!(client.pending_count(), 0);
}

/// Close keeps the backlog drainable and refuses new items.
#[tokio::test]
async fn test_queue_close_semantics() {
    let queue = AsyncQueue::new();
    queue.enqueue("a").unwrap();
    queue.enqueue("b").unwrap();
    queue.close();

    assert_eq!(queue.dequeue().await.unwrap(), "a");
    assert_eq!(queue.dequeue().await.unwrap(), "b");
    assert!(matches!(queue.dequeue().await, Err(DapwireError::Closed)));
    assert!(matches!(queue.enqueue("c"), Err(DapwireError::Closed)));
}

/// A launch call is answered by the backend with the same Invoke-Id.
#[tokio::test]
async fn test_end_to_end_launch_call() {
    let (listener, config) = loopback().await;

    let backend = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut parser = StreamParser::new();
        let request = read_packets(&mut socket, &mut parser, 1).await.remove(0);

        assert_eq!(request.route(), Some("/dap"));
        assert_eq!(request.content_type().unwrap(), ContentType::Json);
        assert_eq!(
            request.body_as::<serde_json::Value>().unwrap(),
            json!({"command": "launch"})
        );

        let mut response = PacketBuilder::response(ResponseCode::Ok)
            .content_type(ContentType::Json)
            .invoke_id(request.invoke_id().unwrap())
            .body(&json!({"success": true}))
            .build()
            .unwrap();
        socket.write_all(&response.to_bytes()).await.unwrap();
        socket
    });

    let service = Arc::new(RequestService::from_config(&config).unwrap());
    let client = RemoteClient::new(service);

    let response = client
        .send(json_request("/dap", "7", json!({"command": "launch"})))
        .await
        .unwrap();

    assert!(response.is_response());
    assert_eq!(response.code(), Some(200));
    assert_eq!(response.invoke_id(), Some("7"));
    assert_eq!(
        response.body().unwrap().as_json().unwrap(),
        &json!({"success": true})
    );

    drop(backend.await.unwrap());
}

/// A session created through the host exchanges debug-adapter messages
/// until the backend reports termination.
#[tokio::test]
async fn test_debugger_host_session() {
    let (listener, config) = loopback().await;
    let config = config.instance_id("integration");

    let backend = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut parser = StreamParser::new();

        let handshake = read_packets(&mut socket, &mut parser, 1).await.remove(0);
        assert_eq!(handshake.route(), Some("/debug/create/level-1"));
        assert_eq!(handshake.header_value(header_names::INSTANCE_ID), Some("integration"));

        let mut ack = PacketBuilder::response(ResponseCode::Ok)
            .content_type(ContentType::Json)
            .invoke_id(handshake.invoke_id().unwrap())
            .build()
            .unwrap();
        socket.write_all(&ack.to_bytes()).await.unwrap();

        let initialize = read_packets(&mut socket, &mut parser, 1).await.remove(0);
        let request = match initialize.body_as::<ProtocolMessage>().unwrap() {
            ProtocolMessage::Request(request) => request,
            other => panic!("unexpected message {other:?}"),
        };
        assert_eq!(request.command, "initialize");

        for message in [
            ProtocolMessage::success(1, &request, Some(json!({"supportsConfigurationDoneRequest": true}))),
            ProtocolMessage::event(2, "terminated", None),
        ] {
            let mut frame = PacketBuilder::request("/dap")
                .content_type(ContentType::Json)
                .body(&message)
                .build()
                .unwrap();
            socket.write_all(&frame.to_bytes()).await.unwrap();
        }
        socket
    });

    let host = DebuggerHost::from_config(&config).unwrap();
    let session = host.open_session("level-1").await.unwrap();

    session
        .send_message(&ProtocolMessage::request(1, "initialize", None))
        .await
        .unwrap();

    let response = session.get_message().await.unwrap();
    assert!(matches!(response, ProtocolMessage::Response(ref r) if r.success && r.request_seq == 1));

    let terminated = session.get_message().await.unwrap();
    assert!(terminated.ends_session());
    assert!(matches!(session.get_message().await, Err(DapwireError::Closed)));

    drop(backend.await.unwrap());
}

/// Refused connections fail the call; the next call retries from scratch.
#[tokio::test]
async fn test_connect_failure_then_retry() {
    let (listener, config) = loopback().await;
    let address = listener.local_addr().unwrap();
    drop(listener);

    let host = DebuggerHost::from_config(&config).unwrap();
    let err = host.invoke::<()>("/ping", None).await.unwrap_err();
    assert!(matches!(err, DapwireError::Io(_)), "{err:?}");

    let listener = TcpListener::bind(address).await.unwrap();
    let backend = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut parser = StreamParser::new();
        let request = read_packets(&mut socket, &mut parser, 1).await.remove(0);
        let mut pong = PacketBuilder::response(ResponseCode::Ok)
            .content_type(ContentType::Text)
            .invoke_id(request.invoke_id().unwrap())
            .body("pong")
            .build()
            .unwrap();
        socket.write_all(&pong.to_bytes()).await.unwrap();
        socket
    });

    // The failed read loop resets the connection shortly after the error
    let response = loop {
        match host.invoke::<()>("/ping", None).await {
            Ok(response) => break response,
            // A late failure notice from the first attempt may break the retry
            Err(DapwireError::Io(_) | DapwireError::InvocationBroken) => {
                tokio::time::sleep(Duration::from_millis(5)).await
            }
            Err(other) => panic!("unexpected error {other:?}"),
        }
    };
    assert_eq!(response.body().unwrap().as_text(), Some("pong"));

    drop(backend.await.unwrap());
}
