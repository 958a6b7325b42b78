use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Envelope id that must be echoed back to Slack to acknowledge delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AckRequest {
    pub envelope_id: String,
}

impl AckRequest {
    pub fn new(envelope_id: impl Into<String>) -> Self {
        Self { envelope_id: envelope_id.into() }
    }
}

/// Everything the event source hands to the dispatcher: connection lifecycle
/// notices and decoded Socket Mode envelopes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundEvent {
    Connecting { attempt: u32 },
    Connected { attempt: u32 },
    ConnectionError { attempt: u32, error: String },
    Disconnecting { reason: String },
    EventsApi(EventsApiEvent),
    SlashCommand { request: AckRequest, command: SlashCommand },
    Interactive { request: AckRequest, interaction: Interaction },
    Malformed { envelope_type: String, envelope_id: Option<String>, reason: String },
    Unrecognized { envelope_type: String, envelope_id: Option<String> },
}

impl InboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connecting { .. } => "connecting",
            Self::Connected { .. } => "connected",
            Self::ConnectionError { .. } => "connection_error",
            Self::Disconnecting { .. } => "disconnecting",
            Self::EventsApi(_) => "events_api",
            Self::SlashCommand { .. } => "slash_commands",
            Self::Interactive { .. } => "interactive",
            Self::Malformed { .. } => "malformed",
            Self::Unrecognized { .. } => "unrecognized",
        }
    }

    pub fn envelope_id(&self) -> Option<&str> {
        match self {
            Self::EventsApi(event) => Some(&event.request.envelope_id),
            Self::SlashCommand { request, .. } | Self::Interactive { request, .. } => {
                Some(&request.envelope_id)
            }
            Self::Malformed { envelope_id, .. } | Self::Unrecognized { envelope_id, .. } => {
                envelope_id.as_deref()
            }
            Self::Connecting { .. }
            | Self::Connected { .. }
            | Self::ConnectionError { .. }
            | Self::Disconnecting { .. } => None,
        }
    }

    /// Decodes a Socket Mode envelope into a typed event. Payloads that do not
    /// match the shape their envelope type promises become `Malformed`.
    pub fn from_envelope(envelope: Envelope) -> Self {
        let Envelope { envelope_id, envelope_type, payload } = envelope;

        let known =
            matches!(envelope_type.as_str(), "events_api" | "slash_commands" | "interactive");
        if !known {
            return Self::Unrecognized { envelope_type, envelope_id };
        }

        let Some(envelope_id) = envelope_id else {
            return Self::Malformed {
                envelope_type,
                envelope_id: None,
                reason: "envelope is missing envelope_id".to_owned(),
            };
        };

        let malformed = |envelope_type: String, envelope_id: String, reason: String| {
            Self::Malformed { envelope_type, envelope_id: Some(envelope_id), reason }
        };
        let request = AckRequest::new(envelope_id.clone());

        match envelope_type.as_str() {
            "events_api" => match EventsApiPayload::decode(payload) {
                Ok(payload) => Self::EventsApi(EventsApiEvent { request, payload }),
                Err(reason) => malformed(envelope_type, envelope_id, reason),
            },
            "slash_commands" => match serde_json::from_value::<SlashCommand>(payload) {
                Ok(command) => Self::SlashCommand { request, command },
                Err(error) => malformed(envelope_type, envelope_id, error.to_string()),
            },
            _ => match serde_json::from_value::<InteractionWire>(payload) {
                Ok(wire) => Self::Interactive { request, interaction: wire.into() },
                Err(error) => malformed(envelope_type, envelope_id, error.to_string()),
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventsApiEvent {
    pub request: AckRequest,
    pub payload: EventsApiPayload,
}

/// Outer Events API payload. Only `event_callback` carries an inner event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventsApiPayload {
    Callback(CallbackEvent),
    Other { event_type: String },
}

impl EventsApiPayload {
    fn decode(payload: Value) -> Result<Self, String> {
        let wire: EventsApiWire = serde_json::from_value(payload).map_err(|e| e.to_string())?;
        if wire.event_type != "event_callback" {
            return Ok(Self::Other { event_type: wire.event_type });
        }

        let Some(inner) = wire.event else {
            return Err("event_callback payload is missing `event`".to_owned());
        };
        let inner_type = inner.get("type").and_then(Value::as_str).unwrap_or_default().to_owned();
        let inner = match inner_type.as_str() {
            "app_mention" => InnerEvent::AppMention(
                serde_json::from_value::<AppMentionEvent>(inner).map_err(|e| e.to_string())?,
            ),
            _ => InnerEvent::Other { event_type: inner_type },
        };

        Ok(Self::Callback(CallbackEvent {
            team_id: wire.team_id,
            event_id: wire.event_id,
            inner,
        }))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallbackEvent {
    pub team_id: Option<String>,
    pub event_id: Option<String>,
    pub inner: InnerEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InnerEvent {
    AppMention(AppMentionEvent),
    Other { event_type: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct AppMentionEvent {
    pub user: String,
    pub channel: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub ts: String,
    #[serde(default)]
    pub thread_ts: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SlashCommand {
    pub command: String,
    #[serde(default)]
    pub text: String,
    pub channel_id: String,
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub trigger_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Interaction {
    pub interaction_type: String,
    pub user_id: Option<String>,
    pub channel_id: Option<String>,
    pub action_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EventsApiWire {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    team_id: Option<String>,
    #[serde(default)]
    event_id: Option<String>,
    #[serde(default)]
    event: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct InteractionWire {
    #[serde(rename = "type", default)]
    interaction_type: String,
    #[serde(default)]
    user: Option<IdRef>,
    #[serde(default)]
    channel: Option<IdRef>,
    #[serde(default)]
    actions: Vec<ActionRef>,
}

#[derive(Debug, Deserialize)]
struct IdRef {
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ActionRef {
    #[serde(default)]
    action_id: String,
}

impl From<InteractionWire> for Interaction {
    fn from(wire: InteractionWire) -> Self {
        Self {
            interaction_type: wire.interaction_type,
            user_id: wire.user.and_then(|user| user.id),
            channel_id: wire.channel.and_then(|channel| channel.id),
            action_ids: wire.actions.into_iter().map(|action| action.action_id).collect(),
        }
    }
}

/// A Socket Mode envelope before its payload is decoded.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub envelope_id: Option<String>,
    pub envelope_type: String,
    pub payload: Value,
}

/// One text frame read off the Socket Mode WebSocket.
#[derive(Clone, Debug, PartialEq)]
pub enum SocketFrame {
    Hello { num_connections: Option<u32> },
    Disconnect { reason: String },
    Envelope(Envelope),
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("socket frame is not valid json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    frame_type: String,
    #[serde(default)]
    envelope_id: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    num_connections: Option<u32>,
}

impl SocketFrame {
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let raw: RawFrame = serde_json::from_str(text)?;
        Ok(match raw.frame_type.as_str() {
            "hello" => Self::Hello { num_connections: raw.num_connections },
            "disconnect" => {
                Self::Disconnect { reason: raw.reason.unwrap_or_else(|| "unspecified".to_owned()) }
            }
            _ => Self::Envelope(Envelope {
                envelope_id: raw.envelope_id,
                envelope_type: raw.frame_type,
                payload: raw.payload.unwrap_or(Value::Null),
            }),
        })
    }
}

/// Acknowledgment frame body for an envelope.
pub fn ack_frame(request: &AckRequest) -> String {
    serde_json::json!({ "envelope_id": request.envelope_id }).to_string()
}
