use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use greeter_slack::api::SlackWebClient;
use greeter_slack::events::{AckRequest, InboundEvent};
use greeter_slack::shutdown::shutdown_channel;
use greeter_slack::socket::{
    Acknowledger, ReconnectPolicy, SocketModeRunner, WebSocketTransport,
};
use secrecy::SecretString;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const HELLO: &str = r#"{"type":"hello","num_connections":1}"#;

const SLASH_HELLO: &str = r#"{
    "envelope_id": "e1",
    "type": "slash_commands",
    "payload": { "command": "/hello", "channel_id": "C1", "user_id": "U1" }
}"#;

/// Accepts one WebSocket client, sends `frames`, then reports every message
/// it reads until the client goes away.
async fn serve_once(
    listener: TcpListener,
    frames: Vec<Message>,
) -> mpsc::UnboundedReceiver<Message> {
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.expect("accept tcp");
        let mut ws = accept_async(tcp).await.expect("websocket handshake");
        for frame in frames {
            ws.send(frame).await.expect("server send");
        }
        while let Some(Ok(message)) = ws.next().await {
            let closing = matches!(message, Message::Close(_));
            if seen_tx.send(message).is_err() || closing {
                break;
            }
        }
    });
    seen_rx
}

async fn next_seen(seen: &mut mpsc::UnboundedReceiver<Message>) -> Message {
    tokio::time::timeout(Duration::from_secs(5), seen.recv())
        .await
        .expect("server should see a message in time")
        .expect("server should stay up")
}

async fn next_event(events: &mut mpsc::Receiver<InboundEvent>) -> InboundEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("event should arrive in time")
        .expect("event stream should stay open")
}

#[tokio::test]
async fn websocket_session_answers_pings_writes_acks_and_closes_on_shutdown() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();

    let api = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/apps.connections.open"))
        .and(header("Authorization", "Bearer xapp-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "url": format!("ws://127.0.0.1:{port}/")
        })))
        .expect(1)
        .mount(&api)
        .await;

    let mut seen = serve_once(
        listener,
        vec![
            Message::text(HELLO),
            Message::Ping(vec![1, 2, 3].into()),
            Message::text(SLASH_HELLO),
        ],
    )
    .await;

    let web = SlackWebClient::new(SecretString::from("xoxb-test".to_owned()), api.uri())
        .expect("web client");
    let transport =
        Arc::new(WebSocketTransport::new(web, SecretString::from("xapp-test".to_owned())));
    let policy = ReconnectPolicy { max_retries: 0, base_delay_ms: 0, max_delay_ms: 0 };
    let (runner, mut channels) = SocketModeRunner::new(transport, policy, 8);
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let handle = tokio::spawn(runner.run(shutdown_rx));

    assert_eq!(next_event(&mut channels.events).await, InboundEvent::Connecting { attempt: 0 });
    assert_eq!(next_event(&mut channels.events).await, InboundEvent::Connected { attempt: 0 });
    assert_eq!(next_event(&mut channels.events).await.kind(), "slash_commands");

    channels.acknowledger.acknowledge(&AckRequest::new("e1")).expect("session alive");

    let mut pong_seen = false;
    let mut ack_seen = false;
    while !(pong_seen && ack_seen) {
        match next_seen(&mut seen).await {
            Message::Pong(payload) => {
                assert_eq!(&payload[..], &[1u8, 2, 3][..]);
                pong_seen = true;
            }
            Message::Text(text) => {
                assert_eq!(text.as_str(), r#"{"envelope_id":"e1"}"#);
                ack_seen = true;
            }
            other => panic!("unexpected client message before shutdown: {other:?}"),
        }
    }

    shutdown_tx.send(true).expect("runner alive");
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("runner should stop in time")
        .expect("join")
        .expect("runner should stop cleanly");

    loop {
        match next_seen(&mut seen).await {
            Message::Close(_) => break,
            Message::Pong(_) => {}
            other => panic!("unexpected client message during shutdown: {other:?}"),
        }
    }
}

#[tokio::test]
async fn server_close_frame_ends_the_session() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();

    let api = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/apps.connections.open"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "url": format!("ws://127.0.0.1:{port}/")
        })))
        .mount(&api)
        .await;

    let _seen = serve_once(listener, vec![Message::text(HELLO), Message::Close(None)]).await;

    let web = SlackWebClient::new(SecretString::from("xoxb-test".to_owned()), api.uri())
        .expect("web client");
    let transport =
        Arc::new(WebSocketTransport::new(web, SecretString::from("xapp-test".to_owned())));
    let policy = ReconnectPolicy { max_retries: 0, base_delay_ms: 0, max_delay_ms: 0 };
    let (runner, mut channels) = SocketModeRunner::new(transport, policy, 8);
    let (_shutdown_tx, shutdown_rx) = shutdown_channel();
    let handle = tokio::spawn(runner.run(shutdown_rx));

    assert_eq!(next_event(&mut channels.events).await, InboundEvent::Connecting { attempt: 0 });
    assert_eq!(next_event(&mut channels.events).await, InboundEvent::Connected { attempt: 0 });
    assert!(matches!(
        next_event(&mut channels.events).await,
        InboundEvent::ConnectionError { attempt: 0, .. }
    ));

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("runner should stop in time")
        .expect("join");
    assert!(result.is_err(), "a closed session with no retries left is fatal");
}
