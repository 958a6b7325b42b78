//! Slack Integration - Socket Mode greeter bot
//!
//! This crate provides the Slack side of the greeter:
//! - **Socket Mode** (`socket`) - WebSocket session to Slack with reconnection (no public URL needed)
//! - **Events** (`events`) - Frame parsing and typed inbound events
//! - **Dispatch** (`dispatch`) - Ack, classify, reply
//! - **Commands** (`commands`) - `/hello` and the greeting text
//! - **Web API** (`api`) - `chat.postMessage` and `apps.connections.open`
//!
//! # Getting Started
//!
//! 1. Create a Slack app at https://api.slack.com/apps
//! 2. Enable Socket Mode and subscribe to the `app_mention` event
//! 3. Add the `/hello` slash command
//! 4. Set env vars: `SLACK_APP_TOKEN` (`xapp-…`), `SLACK_BOT_TOKEN` (`xoxb-…`)
//!
//! # Architecture
//!
//! ```text
//! Slack WSS → SocketModeRunner → mpsc → DispatchLoop → EventDispatcher → chat.postMessage
//!                    ↑                                      │
//!                    └──────────── ack (envelope_id) ───────┘
//! ```
//!
//! The runner is the only writer on the socket; acknowledgments travel back to
//! it through an [`socket::AckHandle`].

pub mod api;
pub mod commands;
pub mod dispatch;
pub mod events;
pub mod shutdown;
pub mod socket;
