use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use greeter_slack::api::{ApiError, MessagePoster, OutboundReply, PostedMessage};
use greeter_slack::dispatch::{DispatchLoop, EventDispatcher, LoopExit};
use greeter_slack::events::AckRequest;
use greeter_slack::shutdown::shutdown_channel;
use greeter_slack::socket::{
    AckError, AckHandle, Acknowledger, ReconnectPolicy, SocketModeRunner, SocketTransport,
    TransportError,
};
use tokio::sync::Mutex;

/// Ordered record of acknowledgments and reply attempts.
type Journal = Arc<std::sync::Mutex<Vec<String>>>;

const HELLO: &str = r#"{"type":"hello","num_connections":1}"#;

const SLASH_HELLO: &str = r#"{
    "envelope_id": "env-slash",
    "type": "slash_commands",
    "accepts_response_payload": true,
    "payload": {
        "command": "/hello",
        "text": "",
        "channel_id": "C100",
        "user_id": "U100",
        "user_name": "sam",
        "trigger_id": "t-1"
    }
}"#;

const APP_MENTION: &str = r#"{
    "envelope_id": "env-mention",
    "type": "events_api",
    "payload": {
        "type": "event_callback",
        "team_id": "T1",
        "event_id": "Ev1",
        "event": {
            "type": "app_mention",
            "user": "U200",
            "channel": "C200",
            "text": "<@B1> hi there",
            "ts": "1730000000.000100"
        }
    }
}"#;

const REACTION: &str = r#"{
    "envelope_id": "env-reaction",
    "type": "events_api",
    "payload": {
        "type": "event_callback",
        "event": { "type": "reaction_added", "user": "U300", "reaction": "wave" }
    }
}"#;

const UNKNOWN_COMMAND: &str = r#"{
    "envelope_id": "env-unknown",
    "type": "slash_commands",
    "payload": {
        "command": "/goodbye",
        "channel_id": "C400",
        "user_id": "U400"
    }
}"#;

const MALFORMED: &str = r#"{
    "envelope_id": "env-malformed",
    "type": "slash_commands",
    "payload": { "command": "/hello" }
}"#;

#[derive(Default)]
struct ScriptedTransport {
    state: Mutex<ScriptState>,
}

#[derive(Default)]
struct ScriptState {
    frames: VecDeque<String>,
    sent: Vec<String>,
    connects: usize,
}

impl ScriptedTransport {
    fn with_frames(frames: &[&str]) -> Self {
        Self {
            state: Mutex::new(ScriptState {
                frames: frames.iter().map(|frame| (*frame).to_owned()).collect(),
                ..ScriptState::default()
            }),
        }
    }

    async fn sent(&self) -> Vec<String> {
        self.state.lock().await.sent.clone()
    }
}

#[async_trait]
impl SocketTransport for ScriptedTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        self.state.lock().await.connects += 1;
        Ok(())
    }

    async fn next_frame(&self) -> Result<Option<String>, TransportError> {
        let next = self.state.lock().await.frames.pop_front();
        match next {
            Some(frame) => Ok(Some(frame)),
            None => std::future::pending().await,
        }
    }

    async fn send_frame(&self, frame: String) -> Result<(), TransportError> {
        self.state.lock().await.sent.push(frame);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[derive(Default)]
struct RecordingPoster {
    replies: Mutex<Vec<OutboundReply>>,
    journal: Journal,
}

#[async_trait]
impl MessagePoster for RecordingPoster {
    async fn post_reply(&self, reply: &OutboundReply) -> Result<PostedMessage, ApiError> {
        self.journal.lock().expect("journal lock").push(format!("post:{}", reply.channel));
        self.replies.lock().await.push(reply.clone());
        Ok(PostedMessage { channel: reply.channel.clone(), ts: "1.0".to_owned() })
    }
}

/// Forwards to the runner's ack queue and records the call.
struct JournaledAcks {
    inner: AckHandle,
    journal: Journal,
}

impl Acknowledger for JournaledAcks {
    fn acknowledge(&self, request: &AckRequest) -> Result<(), AckError> {
        self.journal.lock().expect("journal lock").push(format!("ack:{}", request.envelope_id));
        self.inner.acknowledge(request)
    }
}

async fn wait_for<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn greets_mentions_and_hello_commands_end_to_end() {
    let transport = Arc::new(ScriptedTransport::with_frames(&[
        HELLO,
        SLASH_HELLO,
        APP_MENTION,
        REACTION,
        UNKNOWN_COMMAND,
        MALFORMED,
    ]));
    let journal = Journal::default();
    let poster =
        Arc::new(RecordingPoster { journal: journal.clone(), ..RecordingPoster::default() });
    let policy = ReconnectPolicy { max_retries: 0, base_delay_ms: 0, max_delay_ms: 0 };

    let (runner, channels) = SocketModeRunner::new(transport.clone(), policy, 8);
    let acks = JournaledAcks { inner: channels.acknowledger, journal: journal.clone() };
    let dispatcher = EventDispatcher::new(poster.clone(), Arc::new(acks));
    let dispatch_loop = DispatchLoop::new(channels.events, dispatcher);
    let (shutdown_tx, shutdown_rx) = shutdown_channel();

    let dispatch_handle = tokio::spawn(dispatch_loop.run(shutdown_rx.clone()));
    let runner_handle = tokio::spawn(runner.run(shutdown_rx));

    wait_for(|| {
        let transport = transport.clone();
        async move { transport.sent().await.len() >= 4 }
    })
    .await;

    shutdown_tx.send(true).expect("tasks alive");
    runner_handle.await.expect("runner join").expect("runner should stop cleanly");
    let summary = dispatch_handle.await.expect("dispatch join");

    assert_eq!(summary.exit, LoopExit::Cancelled);
    assert_eq!(summary.replies, 2);
    assert_eq!(summary.failures, 0);

    let replies = poster.replies.lock().await.clone();
    assert_eq!(
        replies,
        vec![
            OutboundReply::new("C100", "Hello <@U100>!"),
            OutboundReply::new("C200", "Hello <@U200>!"),
        ]
    );

    assert_eq!(
        *journal.lock().expect("journal lock"),
        vec![
            "ack:env-slash",
            "post:C100",
            "ack:env-mention",
            "post:C200",
            "ack:env-reaction",
            "ack:env-unknown",
        ]
    );

    let sent = transport.sent().await;
    assert_eq!(
        sent,
        vec![
            r#"{"envelope_id":"env-slash"}"#.to_owned(),
            r#"{"envelope_id":"env-mention"}"#.to_owned(),
            r#"{"envelope_id":"env-reaction"}"#.to_owned(),
            r#"{"envelope_id":"env-unknown"}"#.to_owned(),
        ]
    );
    assert_eq!(transport.state.lock().await.connects, 1);
}

#[tokio::test]
async fn stops_promptly_when_idle() {
    let transport = Arc::new(ScriptedTransport::with_frames(&[HELLO]));
    let poster = Arc::new(RecordingPoster::default());

    let (runner, channels) = SocketModeRunner::new(transport, ReconnectPolicy::default(), 8);
    let dispatcher = EventDispatcher::new(poster, Arc::new(channels.acknowledger));
    let (shutdown_tx, shutdown_rx) = shutdown_channel();

    let dispatch_handle =
        tokio::spawn(DispatchLoop::new(channels.events, dispatcher).run(shutdown_rx.clone()));
    let runner_handle = tokio::spawn(runner.run(shutdown_rx));

    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown_tx.send(true).expect("tasks alive");

    let stopped = tokio::time::timeout(Duration::from_secs(1), async {
        let runner = runner_handle.await.expect("runner join");
        let summary = dispatch_handle.await.expect("dispatch join");
        (runner, summary)
    })
    .await
    .expect("both tasks should stop in time");

    assert!(stopped.0.is_ok());
    assert_eq!(stopped.1.exit, LoopExit::Cancelled);
    assert_eq!(stopped.1.replies, 0);
}
