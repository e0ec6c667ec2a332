use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Shutdown is broadcast as a change notification on a `watch` channel. A dropped
/// sender counts as shutdown too.
pub type ShutdownReceiver = watch::Receiver<()>;

/// Sleeps for `duration` unless shutdown is signalled first.
///
/// Returns `true` when the full duration elapsed and `false` when the wait was cut short.
pub async fn sleep_or_shutdown(duration: Duration, shutdown_rx: &mut ShutdownReceiver) -> bool {
    tokio::select! {
        biased;

        _ = shutdown_rx.changed() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Resolves when the process receives SIGINT, or SIGTERM on unix.
pub async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT."),
                    _ = sigterm.recv() => info!("Received SIGTERM."),
                }
                return;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler, listening for SIGINT only.");
            }
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for SIGINT.");
        std::future::pending::<()>().await;
    }
    info!("Received SIGINT.");
}

/// Spawns a task that broadcasts shutdown once a termination signal arrives.
pub fn spawn_signal_listener(shutdown_tx: watch::Sender<()>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received, stopping...");
        let _ = shutdown_tx.send(());
    })
}
