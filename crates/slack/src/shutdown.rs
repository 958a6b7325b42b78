use tokio::sync::watch;

/// Cooperative cancellation flag shared by the socket runner and the
/// dispatch loop. `true` means stop.
pub type ShutdownSignal = watch::Receiver<bool>;

pub fn shutdown_channel() -> (watch::Sender<bool>, ShutdownSignal) {
    watch::channel(false)
}

/// Resolves once cancellation is requested. A dropped sender never cancels.
pub async fn cancelled(shutdown: &mut ShutdownSignal) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{cancelled, shutdown_channel};

    #[tokio::test]
    async fn resolves_after_flag_is_raised() {
        let (tx, mut rx) = shutdown_channel();
        let waiter = tokio::spawn(async move { cancelled(&mut rx).await });

        tx.send(true).expect("receiver alive");
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("cancellation should resolve")
            .expect("task should not panic");
    }

    #[tokio::test]
    async fn dropped_sender_does_not_cancel() {
        let (tx, mut rx) = shutdown_channel();
        drop(tx);

        let outcome = tokio::time::timeout(Duration::from_millis(50), cancelled(&mut rx)).await;
        assert!(outcome.is_err(), "dropping the sender must not look like a shutdown");
    }
}
