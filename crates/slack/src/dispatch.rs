//! Classifies inbound events and answers the ones that deserve a greeting.
//!
//! One event is handled at a time, in arrival order. A slow reply delays
//! every event behind it.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    api::{ApiError, MessagePoster, OutboundReply},
    commands::{command_reply, mention_reply},
    events::{AckRequest, EventsApiPayload, InboundEvent, InnerEvent},
    shutdown::{cancelled, ShutdownSignal},
    socket::Acknowledger,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Responded(OutboundReply),
    /// Acknowledged without a reply.
    Acknowledged,
    /// Connection lifecycle notice; logged only.
    Logged,
    /// Not acknowledged, not answered.
    Ignored,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("reply to channel `{channel}` failed: {source}")]
    Reply {
        channel: String,
        #[source]
        source: ApiError,
    },
}

pub struct EventDispatcher {
    poster: Arc<dyn MessagePoster>,
    acknowledger: Arc<dyn Acknowledger>,
}

impl EventDispatcher {
    pub fn new(poster: Arc<dyn MessagePoster>, acknowledger: Arc<dyn Acknowledger>) -> Self {
        Self { poster, acknowledger }
    }

    pub async fn dispatch(&self, event: &InboundEvent) -> Result<HandlerResult, DispatchError> {
        debug!(event_name = "dispatch.event", event = ?event, "event");

        match event {
            InboundEvent::Connecting { attempt } => {
                info!(
                    event_name = "dispatch.lifecycle.connecting",
                    attempt,
                    "connecting to slack with socket mode"
                );
                Ok(HandlerResult::Logged)
            }
            InboundEvent::Connected { attempt } => {
                info!(
                    event_name = "dispatch.lifecycle.connected",
                    attempt,
                    "connected to slack with socket mode"
                );
                Ok(HandlerResult::Logged)
            }
            InboundEvent::ConnectionError { attempt, error } => {
                warn!(
                    event_name = "dispatch.lifecycle.connection_error",
                    attempt,
                    error = %error,
                    "connection failed; retrying later"
                );
                Ok(HandlerResult::Logged)
            }
            InboundEvent::Disconnecting { reason } => {
                info!(
                    event_name = "dispatch.lifecycle.disconnecting",
                    reason = %reason,
                    "slack asked us to reconnect"
                );
                Ok(HandlerResult::Logged)
            }
            InboundEvent::EventsApi(events_api) => {
                self.acknowledge(&events_api.request);
                match &events_api.payload {
                    EventsApiPayload::Callback(callback) => match &callback.inner {
                        InnerEvent::AppMention(mention) => {
                            info!(
                                event_name = "dispatch.mention.received",
                                envelope_id = %events_api.request.envelope_id,
                                channel = %mention.channel,
                                user = %mention.user,
                                "app mention received"
                            );
                            self.reply(mention_reply(mention)).await
                        }
                        InnerEvent::Other { event_type } => {
                            info!(
                                event_name = "dispatch.callback.ignored",
                                envelope_id = %events_api.request.envelope_id,
                                event_type = %event_type,
                                "ignoring callback event"
                            );
                            Ok(HandlerResult::Acknowledged)
                        }
                    },
                    EventsApiPayload::Other { event_type } => {
                        info!(
                            event_name = "dispatch.events_api.unsupported",
                            envelope_id = %events_api.request.envelope_id,
                            event_type = %event_type,
                            "unsupported events api event received"
                        );
                        Ok(HandlerResult::Acknowledged)
                    }
                }
            }
            InboundEvent::SlashCommand { request, command } => {
                self.acknowledge(request);
                match command_reply(command) {
                    Some(reply) => {
                        info!(
                            event_name = "dispatch.command.matched",
                            envelope_id = %request.envelope_id,
                            command = %command.command,
                            channel = %command.channel_id,
                            user = %command.user_id,
                            "slash command matched"
                        );
                        self.reply(reply).await
                    }
                    None => {
                        info!(
                            event_name = "dispatch.command.unknown",
                            envelope_id = %request.envelope_id,
                            command = %command.command,
                            "unknown command"
                        );
                        Ok(HandlerResult::Acknowledged)
                    }
                }
            }
            InboundEvent::Interactive { request, interaction } => {
                // Acknowledge-only until interactive components get real handling.
                self.acknowledge(request);
                info!(
                    event_name = "dispatch.interactive.acknowledged",
                    envelope_id = %request.envelope_id,
                    interaction_type = %interaction.interaction_type,
                    actions = interaction.action_ids.len(),
                    "interactive action acknowledged"
                );
                Ok(HandlerResult::Acknowledged)
            }
            InboundEvent::Malformed { envelope_type, envelope_id, reason } => {
                warn!(
                    event_name = "dispatch.malformed",
                    envelope_type = %envelope_type,
                    envelope_id = envelope_id.as_deref().unwrap_or("unknown"),
                    reason = %reason,
                    "ignored malformed envelope"
                );
                Ok(HandlerResult::Ignored)
            }
            InboundEvent::Unrecognized { envelope_type, envelope_id } => {
                info!(
                    event_name = "dispatch.unrecognized",
                    envelope_type = %envelope_type,
                    envelope_id = envelope_id.as_deref().unwrap_or("unknown"),
                    "ignored unrecognized envelope"
                );
                Ok(HandlerResult::Ignored)
            }
        }
    }

    fn acknowledge(&self, request: &AckRequest) {
        if let Err(error) = self.acknowledger.acknowledge(request) {
            warn!(
                event_name = "dispatch.ack.failed",
                envelope_id = %request.envelope_id,
                error = %error,
                "failed to queue acknowledgment"
            );
        }
    }

    async fn reply(&self, reply: OutboundReply) -> Result<HandlerResult, DispatchError> {
        match self.poster.post_reply(&reply).await {
            Ok(posted) => {
                info!(
                    event_name = "dispatch.reply.posted",
                    channel = %posted.channel,
                    ts = %posted.ts,
                    "reply posted"
                );
                Ok(HandlerResult::Responded(reply))
            }
            Err(source) => Err(DispatchError::Reply { channel: reply.channel, source }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopExit {
    Cancelled,
    SourceClosed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoopSummary {
    pub exit: LoopExit,
    pub processed: u64,
    pub replies: u64,
    pub failures: u64,
}

/// Single consumer over the event source's channel.
pub struct DispatchLoop {
    events: mpsc::Receiver<InboundEvent>,
    dispatcher: EventDispatcher,
}

impl DispatchLoop {
    pub fn new(events: mpsc::Receiver<InboundEvent>, dispatcher: EventDispatcher) -> Self {
        Self { events, dispatcher }
    }

    /// Runs until cancellation or until the event source drops its sender.
    /// Cancellation wins over a ready event.
    pub async fn run(mut self, mut shutdown: ShutdownSignal) -> LoopSummary {
        let mut summary =
            LoopSummary { exit: LoopExit::Cancelled, processed: 0, replies: 0, failures: 0 };

        loop {
            let event = tokio::select! {
                biased;
                () = cancelled(&mut shutdown) => {
                    summary.exit = LoopExit::Cancelled;
                    break;
                }
                event = self.events.recv() => event,
            };

            let Some(event) = event else {
                summary.exit = LoopExit::SourceClosed;
                break;
            };

            summary.processed += 1;
            match self.dispatcher.dispatch(&event).await {
                Ok(HandlerResult::Responded(_)) => summary.replies += 1,
                Ok(_) => {}
                Err(error) => {
                    summary.failures += 1;
                    warn!(
                        event_name = "dispatch.reply.failed",
                        envelope_id = event.envelope_id().unwrap_or("unknown"),
                        error = %error,
                        "failed to post message; continuing dispatch loop"
                    );
                }
            }
        }

        info!(
            event_name = "dispatch.loop.stopped",
            exit = ?summary.exit,
            processed = summary.processed,
            replies = summary.replies,
            failures = summary.failures,
            "dispatch loop stopped"
        );
        summary
    }
}
