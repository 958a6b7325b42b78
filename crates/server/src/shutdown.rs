use greeter_slack::shutdown::{shutdown_channel, ShutdownSignal};
use tokio::sync::watch;
use tracing::{info, warn};

/// Raises the shutdown flag on SIGINT or SIGTERM.
pub fn spawn_signal_listener() -> ShutdownSignal {
    let (tx, rx) = shutdown_channel();
    tokio::spawn(async move {
        let signal = wait_for_signal().await;
        info!(event_name = "system.server.signal", signal, "shutting down");
        request_shutdown(&tx);
    });
    rx
}

fn request_shutdown(tx: &watch::Sender<bool>) {
    // Receivers may already be gone when both tasks finished on their own.
    let _ = tx.send(true);
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => tokio::select! {
            _ = tokio::signal::ctrl_c() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        },
        Err(error) => {
            warn!(
                event_name = "system.server.sigterm_unavailable",
                error = %error,
                "failed to register SIGTERM handler; listening for SIGINT only"
            );
            ctrl_c().await
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(
            event_name = "system.server.sigint_unavailable",
            error = %error,
            "failed to listen for SIGINT"
        );
        std::future::pending::<()>().await;
    }
    "SIGINT"
}
