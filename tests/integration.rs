//! Integration tests for gatewire.
//!
//! These tests drive a full `Connection` over the in-memory transport, with
//! tokio's clock paused so heartbeat timing is deterministic.

use std::time::Duration;

use bytes::Bytes;
use gatewire::codec::EnvelopeCodec;
use gatewire::protocol::{opcode, DEFAULT_GATEWAY_URL};
use gatewire::transport::{memory_transport, MemoryPeer, MemoryTransport, Transport, TransportEvent};
use gatewire::{Connection, ConnectionBuilder, ConnectionState, DispatchReceiver, GatewayError};

const WINDOW: Duration = Duration::from_millis(10);
const HELLO: &str = r#"{"op":10,"d":{"heartbeat_interval":41250,"_trace":["[\"gateway-prd\",{\"micros\":0}]"]}}"#;
const RESUME_URL: &str = "wss://resume.example.gg";
const RESUME_ENDPOINT: &str = "wss://resume.example.gg/?v=10&encoding=json";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn ready(sequence: u64) -> String {
    format!(
        r#"{{"t":"READY","s":{},"op":0,"d":{{"v":10,"user":{{"id":"1","username":"bot"}},"session_id":"session-1","resume_gateway_url":"{}"}}}}"#,
        sequence, RESUME_URL
    )
}

fn dispatch(event: &str, sequence: u64) -> String {
    format!(
        r#"{{"t":"{}","s":{},"op":0,"d":{{"content":"hello \"world\" {{}}"}}}}"#,
        event, sequence
    )
}

fn setup() -> (Connection<MemoryTransport>, DispatchReceiver, MemoryPeer) {
    init_tracing();
    let (transport, peer) = memory_transport();
    let (connection, events) = ConnectionBuilder::new("TOKEN")
        .heartbeat_jitter(0.0)
        .build(transport)
        .unwrap();
    (connection, events, peer)
}

/// Connect, receive hello and READY. Drains everything sent so far.
async fn establish_ready(connection: &mut Connection<MemoryTransport>, peer: &mut MemoryPeer) {
    connection.connect().await.unwrap();
    peer.push_text(HELLO);
    peer.push_text(ready(1));

    assert!(connection.poll(WINDOW).await.unwrap().is_hello());
    assert!(connection.poll(WINDOW).await.unwrap().is_event("READY"));
    assert_eq!(connection.state(), ConnectionState::Ready);

    peer.sent_envelopes();
    peer.connect_endpoints();
}

/// Test identify sent on connect, with token, intents and properties.
#[tokio::test(start_paused = true)]
async fn test_identify_on_connect() {
    let (mut connection, _events, mut peer) = setup();

    connection.connect().await.unwrap();

    assert_eq!(connection.state(), ConnectionState::Identifying);
    assert_eq!(peer.connect_endpoints(), vec![DEFAULT_GATEWAY_URL]);

    let sent = peer.sent_envelopes();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].op, opcode::IDENTIFY);

    let payload = sent[0].payload_value().unwrap();
    assert_eq!(payload.get("token").unwrap().unwrap().as_str(), Some("TOKEN"));
    assert_eq!(payload.get("intents").unwrap().unwrap().as_u64(), Some(513));
    let properties = payload.get("properties").unwrap().unwrap();
    assert_eq!(properties.get("browser").unwrap().unwrap().as_str(), Some("gatewire"));
}

/// Test hello, first heartbeat and READY.
#[tokio::test(start_paused = true)]
async fn test_handshake_to_ready() {
    let (mut connection, mut events, mut peer) = setup();
    connection.connect().await.unwrap();
    peer.sent_envelopes();

    peer.push_text(HELLO);
    peer.push_text(ready(1));

    let hello = connection.poll(WINDOW).await.unwrap();
    assert_eq!(EnvelopeCodec::hello_interval(&hello).unwrap(), 41250);
    assert_eq!(connection.state(), ConnectionState::Identifying);

    let envelope = connection.poll(WINDOW).await.unwrap();
    assert!(envelope.is_event("READY"));

    // Zero jitter: the first heartbeat went out before READY was read.
    let sent = peer.sent_envelopes();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].is_heartbeat());
    assert_eq!(sent[0].payload(), b"null");

    assert_eq!(connection.state(), ConnectionState::Ready);
    assert_eq!(connection.session().session_id(), Some("session-1"));
    assert_eq!(connection.session().resume_url(), Some(RESUME_URL));
    assert_eq!(connection.sequence(), Some(1));

    let queued = events.try_recv().unwrap();
    assert!(queued.is_event("READY"));
}

/// Test dispatch events are queued in order and the sequence never goes back.
#[tokio::test(start_paused = true)]
async fn test_dispatch_delivery_and_sequence() {
    let (mut connection, mut events, mut peer) = setup();
    establish_ready(&mut connection, &mut peer).await;
    assert!(events.try_recv().unwrap().is_event("READY"));

    peer.push_text(dispatch("MESSAGE_CREATE", 5));
    peer.push_text(dispatch("MESSAGE_UPDATE", 3));

    let first = connection.poll(WINDOW).await.unwrap();
    assert_eq!(first.payload(), br#"{"content":"hello \"world\" {}"}"#);
    connection.poll(WINDOW).await.unwrap();

    assert_eq!(connection.sequence(), Some(5));

    let first = events.recv().await.unwrap();
    let second = events.recv().await.unwrap();
    assert!(first.is_event("MESSAGE_CREATE"));
    assert!(second.is_event("MESSAGE_UPDATE"));
    assert!(events.try_recv().is_none());
}

/// Test a full dispatch queue drops events without stalling the connection.
#[tokio::test(start_paused = true)]
async fn test_full_dispatch_queue_drops() {
    init_tracing();
    let (transport, mut peer) = memory_transport();
    let (mut connection, mut events) = ConnectionBuilder::new("TOKEN")
        .heartbeat_jitter(0.0)
        .dispatch_capacity(1)
        .build(transport)
        .unwrap();
    establish_ready(&mut connection, &mut peer).await;

    peer.push_text(dispatch("MESSAGE_CREATE", 2));
    let envelope = connection.poll(WINDOW).await.unwrap();

    assert_eq!(envelope.sequence, Some(2));
    assert_eq!(connection.dropped_events(), 1);
    assert_eq!(events.dropped(), 1);
    assert!(events.try_recv().unwrap().is_event("READY"));
}

/// Test fragmented messages, including a message split across polls.
#[tokio::test(start_paused = true)]
async fn test_fragmented_messages() {
    let (mut connection, _events, peer) = setup();
    connection.connect().await.unwrap();

    peer.push_fragment(r#"{"op":10,"d":{"heartbeat_"#, false);
    let result = connection.poll(WINDOW).await;
    assert!(matches!(result, Err(GatewayError::Timeout)));

    peer.push_fragment("interval\":", false);
    peer.push_fragment("41250}}", true);
    let envelope = connection.poll(WINDOW).await.unwrap();

    assert!(envelope.is_hello());
    assert_eq!(connection.heartbeat().interval_ms(), 41250);
}

/// Test a malformed message is dropped and the connection carries on.
#[tokio::test(start_paused = true)]
async fn test_malformed_message_dropped() {
    let (mut connection, _events, peer) = setup();
    connection.connect().await.unwrap();

    peer.push_text("{invalid}");
    peer.push_text(r#"{"d":{},"s":null}"#);
    peer.push_text(HELLO);

    assert!(matches!(connection.poll(WINDOW).await, Err(GatewayError::Malformed(_))));
    assert!(matches!(connection.poll(WINDOW).await, Err(GatewayError::Malformed(_))));
    assert_eq!(connection.state(), ConnectionState::Identifying);
    assert!(connection.poll(WINDOW).await.unwrap().is_hello());
}

/// Test heartbeats follow the interval and echo the last sequence.
#[tokio::test(start_paused = true)]
async fn test_heartbeat_cadence() {
    let (mut connection, _events, mut peer) = setup();
    establish_ready(&mut connection, &mut peer).await;

    peer.push_text(r#"{"op":11}"#);
    assert!(connection.poll(WINDOW).await.unwrap().is_heartbeat_ack());

    // Nothing is due for almost a full interval.
    let result = connection.poll(Duration::from_secs(41)).await;
    assert!(matches!(result, Err(GatewayError::Timeout)));
    assert!(peer.sent_envelopes().is_empty());

    let result = connection.poll(Duration::from_secs(1)).await;
    assert!(matches!(result, Err(GatewayError::Timeout)));

    let sent = peer.sent_envelopes();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].is_heartbeat());
    assert_eq!(sent[0].payload(), b"1");
    assert_eq!(connection.state(), ConnectionState::Ready);
}

/// Test heartbeat latency is measured from send to acknowledgement.
#[tokio::test(start_paused = true)]
async fn test_heartbeat_latency() {
    let (mut connection, _events, mut peer) = setup();
    establish_ready(&mut connection, &mut peer).await;

    tokio::time::advance(Duration::from_millis(30)).await;
    peer.push_text(r#"{"op":11}"#);
    connection.poll(WINDOW).await.unwrap();

    assert_eq!(connection.latency(), Some(Duration::from_millis(30)));
}

/// Test a server heartbeat request is answered immediately.
#[tokio::test(start_paused = true)]
async fn test_server_heartbeat_request() {
    let (mut connection, _events, mut peer) = setup();
    establish_ready(&mut connection, &mut peer).await;

    peer.push_text(r#"{"op":11}"#);
    peer.push_text(r#"{"op":1,"d":null}"#);
    connection.poll(WINDOW).await.unwrap();
    let request = connection.poll(WINDOW).await.unwrap();

    assert!(request.is_heartbeat());
    let sent = peer.sent_envelopes();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].is_heartbeat());
    assert_eq!(sent[0].payload(), b"1");
}

/// Test a missed acknowledgement forces a reconnect and keeps the session.
#[tokio::test(start_paused = true)]
async fn test_missed_ack_reconnects() {
    let (mut connection, _events, mut peer) = setup();
    establish_ready(&mut connection, &mut peer).await;

    // The first heartbeat is never acknowledged: interval 41.25s + 5s grace.
    let result = connection.poll(Duration::from_secs(60)).await;

    assert!(matches!(result, Err(GatewayError::Network(_))));
    assert_eq!(connection.state(), ConnectionState::Reconnecting);
    assert_eq!(connection.session().session_id(), Some("session-1"));
    assert!(peer.sent_envelopes().is_empty());
}

/// Test op 7 moves to Reconnecting, then resumes on the resume endpoint.
#[tokio::test(start_paused = true)]
async fn test_reconnect_request_resumes() {
    let (mut connection, _events, mut peer) = setup();
    establish_ready(&mut connection, &mut peer).await;

    peer.push_text(r#"{"op":7,"d":null}"#);
    let envelope = connection.poll(WINDOW).await.unwrap();

    assert_eq!(envelope.op, opcode::RECONNECT);
    assert_eq!(connection.state(), ConnectionState::Reconnecting);
    assert_eq!(connection.session().session_id(), Some("session-1"));
    assert!(connection.is_reconnecting());

    // Next poll re-establishes the transport.
    let result = connection.poll(WINDOW).await;
    assert!(matches!(result, Err(GatewayError::Timeout)));
    assert_eq!(connection.state(), ConnectionState::Identifying);
    assert_eq!(peer.connect_endpoints(), vec![RESUME_ENDPOINT]);

    let sent = peer.sent_envelopes();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].op, opcode::RESUME);
    let payload = sent[0].payload_value().unwrap();
    assert_eq!(payload.get("session_id").unwrap().unwrap().as_str(), Some("session-1"));
    assert_eq!(payload.get("seq").unwrap().unwrap().as_u64(), Some(1));
    assert_eq!(payload.get("token").unwrap().unwrap().as_str(), Some("TOKEN"));

    peer.push_text(r#"{"op":0,"s":2,"t":"RESUMED","d":null}"#);
    connection.poll(WINDOW).await.unwrap();

    assert_eq!(connection.state(), ConnectionState::Ready);
    assert_eq!(connection.sequence(), Some(2));
    assert!(!connection.is_reconnecting());
}

/// Test a non-resumable invalid session clears the session and identifies again.
#[tokio::test(start_paused = true)]
async fn test_invalid_session_not_resumable() {
    let (mut connection, _events, mut peer) = setup();
    establish_ready(&mut connection, &mut peer).await;

    peer.push_text(r#"{"op":9,"d":false}"#);
    connection.poll(WINDOW).await.unwrap();

    assert_eq!(connection.state(), ConnectionState::Connecting);
    assert_eq!(connection.session().session_id(), None);
    assert_eq!(connection.sequence(), None);

    let _ = connection.poll(WINDOW).await;
    assert_eq!(peer.connect_endpoints(), vec![DEFAULT_GATEWAY_URL]);
    let sent = peer.sent_envelopes();
    assert_eq!(sent[0].op, opcode::IDENTIFY);
}

/// Test a fresh identify does not inherit the previous session's sequence.
#[tokio::test(start_paused = true)]
async fn test_identify_resets_sequence() {
    let (mut connection, _events, mut peer) = setup();
    connection.connect().await.unwrap();

    peer.push_text(HELLO);
    peer.push_text(
        r#"{"t":"READY","s":1,"op":0,"d":{"session_id":"session-1","resume_gateway_url":"https://bad"}}"#,
    );
    connection.poll(WINDOW).await.unwrap();
    connection.poll(WINDOW).await.unwrap();
    assert_eq!(connection.state(), ConnectionState::Ready);
    assert_eq!(connection.session().session_id(), None);

    peer.push_text(dispatch("MESSAGE_CREATE", 50));
    connection.poll(WINDOW).await.unwrap();
    assert_eq!(connection.sequence(), Some(50));
    peer.sent_envelopes();
    peer.connect_endpoints();

    peer.push_close(Some(1000));
    assert!(connection.poll(WINDOW).await.is_err());
    assert_eq!(connection.state(), ConnectionState::Reconnecting);

    let _ = connection.poll(WINDOW).await;
    assert_eq!(peer.connect_endpoints(), vec![DEFAULT_GATEWAY_URL]);
    assert_eq!(peer.sent_envelopes()[0].op, opcode::IDENTIFY);
    assert_eq!(connection.sequence(), None);

    peer.push_text(HELLO);
    connection.poll(WINDOW).await.unwrap();
    peer.push_text(ready(1));
    peer.push_text(dispatch("MESSAGE_CREATE", 2));
    assert!(connection.poll(WINDOW).await.unwrap().is_event("READY"));
    connection.poll(WINDOW).await.unwrap();

    assert_eq!(connection.sequence(), Some(2));
    assert_eq!(connection.heartbeat().sequence(), Some(2));

    let heartbeat = peer
        .sent_envelopes()
        .into_iter()
        .find(|envelope| envelope.op == opcode::HEARTBEAT)
        .unwrap();
    assert_eq!(heartbeat.payload(), b"null");
}

/// Test a resumable invalid session keeps the session.
#[tokio::test(start_paused = true)]
async fn test_invalid_session_resumable() {
    let (mut connection, _events, mut peer) = setup();
    establish_ready(&mut connection, &mut peer).await;

    peer.push_text(r#"{"op":9,"d":true}"#);
    connection.poll(WINDOW).await.unwrap();

    assert_eq!(connection.state(), ConnectionState::Reconnecting);
    assert_eq!(connection.session().session_id(), Some("session-1"));

    let _ = connection.poll(WINDOW).await;
    assert_eq!(peer.sent_envelopes()[0].op, opcode::RESUME);
}

/// Test close code 4004 is terminal and reported exactly once.
#[tokio::test(start_paused = true)]
async fn test_authentication_failure_is_terminal() {
    let (mut connection, _events, mut peer) = setup();
    establish_ready(&mut connection, &mut peer).await;

    peer.push_close(Some(4004));
    let result = connection.poll(WINDOW).await;

    assert!(matches!(result, Err(GatewayError::Authentication { code: 4004 })));
    assert_eq!(connection.state(), ConnectionState::Error);
    assert_eq!(connection.last_close_code(), Some(4004));
    assert_eq!(connection.session().session_id(), None);

    let again = connection.poll(WINDOW).await;
    assert!(matches!(again, Err(GatewayError::InvalidParam(_))));
    assert!(peer.connect_endpoints().is_empty());
}

/// Test rejected intents are terminal.
#[tokio::test(start_paused = true)]
async fn test_disallowed_intents_are_terminal() {
    let (mut connection, _events, peer) = setup();
    connection.connect().await.unwrap();

    peer.push_close(Some(4014));
    let result = connection.poll(WINDOW).await;

    let error = result.unwrap_err();
    assert!(matches!(error, GatewayError::Rejected { code: 4014 }));
    assert!(error.is_terminal());
    assert_eq!(connection.state(), ConnectionState::Error);
}

/// Test a session timeout close clears the session and identifies again.
#[tokio::test(start_paused = true)]
async fn test_session_timeout_close_identifies() {
    let (mut connection, _events, mut peer) = setup();
    establish_ready(&mut connection, &mut peer).await;

    peer.push_close(Some(4009));
    let result = connection.poll(WINDOW).await;

    assert!(matches!(result, Err(GatewayError::Network(_))));
    assert_eq!(connection.state(), ConnectionState::Reconnecting);
    assert_eq!(connection.session().session_id(), None);

    let _ = connection.poll(WINDOW).await;
    assert_eq!(peer.connect_endpoints(), vec![DEFAULT_GATEWAY_URL]);
    assert_eq!(peer.sent_envelopes()[0].op, opcode::IDENTIFY);
}

/// Test an ordinary close reconnects and resumes.
#[tokio::test(start_paused = true)]
async fn test_normal_close_resumes() {
    let (mut connection, _events, mut peer) = setup();
    establish_ready(&mut connection, &mut peer).await;

    peer.push_close(None);
    let result = connection.poll(WINDOW).await;

    assert!(matches!(result, Err(GatewayError::Network(_))));
    assert!(result.unwrap_err().is_retriable());
    assert_eq!(connection.state(), ConnectionState::Reconnecting);

    let _ = connection.poll(WINDOW).await;
    assert_eq!(peer.connect_endpoints(), vec![RESUME_ENDPOINT]);
    assert_eq!(peer.sent_envelopes()[0].op, opcode::RESUME);
}

/// Test a transport error moves to Reconnecting.
#[tokio::test(start_paused = true)]
async fn test_transport_error_reconnects() {
    let (mut connection, _events, mut peer) = setup();
    establish_ready(&mut connection, &mut peer).await;

    peer.push_error(GatewayError::Network("connection reset".into()));
    let result = connection.poll(WINDOW).await;

    assert!(matches!(result, Err(GatewayError::Network(_))));
    assert_eq!(connection.state(), ConnectionState::Reconnecting);
    assert_eq!(connection.session().session_id(), Some("session-1"));
}

/// Test a failed connect is retried by the next poll.
#[tokio::test(start_paused = true)]
async fn test_connect_failure_retried() {
    let (mut connection, _events, mut peer) = setup();
    peer.fail_next_connect(GatewayError::Network("refused".into()));

    let result = connection.connect().await;
    assert!(matches!(result, Err(GatewayError::Network(_))));
    assert_eq!(connection.state(), ConnectionState::Reconnecting);
    assert!(peer.sent_envelopes().is_empty());

    let result = connection.poll(WINDOW).await;
    assert!(matches!(result, Err(GatewayError::Timeout)));
    assert_eq!(connection.state(), ConnectionState::Identifying);
    assert_eq!(
        peer.connect_endpoints(),
        vec![DEFAULT_GATEWAY_URL, DEFAULT_GATEWAY_URL]
    );
    assert_eq!(peer.sent_envelopes()[0].op, opcode::IDENTIFY);
}

/// Test close releases everything and the connection can be reused.
#[tokio::test(start_paused = true)]
async fn test_close_and_reconnect() {
    let (mut connection, _events, mut peer) = setup();
    establish_ready(&mut connection, &mut peer).await;

    connection.close().await.unwrap();

    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert_eq!(connection.session().session_id(), None);
    assert_eq!(connection.sequence(), None);
    assert!(!connection.heartbeat().is_armed());
    assert!(matches!(
        connection.poll(WINDOW).await,
        Err(GatewayError::InvalidParam(_))
    ));

    connection.connect().await.unwrap();
    assert_eq!(connection.state(), ConnectionState::Identifying);
    assert_eq!(peer.sent_envelopes()[0].op, opcode::IDENTIFY);
}

/// Test independent connections do not share state.
#[tokio::test(start_paused = true)]
async fn test_independent_connections() {
    let (mut first, _first_events, mut first_peer) = setup();
    let (mut second, _second_events, _second_peer) = setup();

    establish_ready(&mut first, &mut first_peer).await;
    second.connect().await.unwrap();

    assert_eq!(first.state(), ConnectionState::Ready);
    assert_eq!(second.state(), ConnectionState::Identifying);
    assert_eq!(second.session().session_id(), None);
}

/// Transport whose peer goes silent once connected.
struct SilentTransport;

impl Transport for SilentTransport {
    async fn connect(&mut self, _endpoint: &str) -> gatewire::Result<()> {
        Ok(())
    }

    async fn send(&mut self, _data: Bytes) -> gatewire::Result<()> {
        Ok(())
    }

    async fn poll(&mut self, _timeout: Duration) -> gatewire::Result<TransportEvent> {
        std::future::pending().await
    }

    async fn close(&mut self) -> gatewire::Result<()> {
        std::future::pending().await
    }
}

/// Test close is bounded when the peer never answers.
#[tokio::test(start_paused = true)]
async fn test_close_bounded_with_silent_peer() {
    init_tracing();
    let (mut connection, _events) = ConnectionBuilder::new("TOKEN")
        .close_iterations(4)
        .close_poll_interval(Duration::from_millis(25))
        .build(SilentTransport)
        .unwrap();

    connection.connect().await.unwrap();
    assert_eq!(connection.state(), ConnectionState::Identifying);

    let started = tokio::time::Instant::now();
    connection.close().await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert!(elapsed <= Duration::from_millis(2 * 4 * 25), "close took {:?}", elapsed);
    assert!(!connection.heartbeat().is_armed());
}
