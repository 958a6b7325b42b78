use std::sync::Arc;

use greeter_core::config::{AppConfig, ConfigError};
use greeter_slack::{
    api::{ApiError, SlackWebClient},
    dispatch::{DispatchLoop, EventDispatcher},
    socket::{ReconnectPolicy, SocketModeRunner, WebSocketTransport},
};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub slack_runner: SocketModeRunner,
    pub dispatch_loop: DispatchLoop,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("slack client setup failed: {0}")]
    SlackClient(#[from] ApiError),
}

/// Wires the socket runner and the dispatch loop. Performs no network I/O.
pub fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let web = SlackWebClient::new(config.slack.bot_token.clone(), &config.slack.api_base_url)?;
    let transport = Arc::new(WebSocketTransport::new(web.clone(), config.slack.app_token.clone()));

    let (slack_runner, channels) = SocketModeRunner::new(
        transport,
        ReconnectPolicy::from(&config.socket),
        config.socket.event_buffer,
    );
    let slack_runner = slack_runner.with_frame_logging(config.socket.debug);

    let dispatcher = EventDispatcher::new(Arc::new(web), Arc::new(channels.acknowledger));
    let dispatch_loop = DispatchLoop::new(channels.events, dispatcher);

    info!(
        event_name = "system.bootstrap.ready",
        api_base_url = %config.slack.api_base_url,
        max_retries = config.socket.max_retries,
        "slack socket mode wired"
    );

    Ok(Application { config, slack_runner, dispatch_loop })
}
