use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Cancel `token` on the first SIGINT or SIGTERM.
///
/// Handlers are registered before this returns, so a registration failure is a
/// startup error rather than a silently ignored signal.
#[cfg(unix)]
pub fn install_signal_handlers(token: CancellationToken) -> std::io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        let name = tokio::select! {
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
            _ = token.cancelled() => return,
        };

        info!(signal = name, "Got {}, exiting...", name);
        token.cancel();
    }))
}

#[cfg(not(unix))]
pub fn install_signal_handlers(token: CancellationToken) -> std::io::Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if result.is_ok() {
                    info!(signal = "SIGINT", "Got SIGINT, exiting...");
                }
            }
            _ = token.cancelled() => return,
        }
        token.cancel();
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_listener_does_not_cancel_without_signal() {
        let token = CancellationToken::new();
        let handle = install_signal_handlers(token.clone()).unwrap();

        let result = tokio::time::timeout(Duration::from_millis(100), token.cancelled()).await;
        assert!(result.is_err(), "token should not be cancelled without a signal");

        // Cancelling from elsewhere ends the listener
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
