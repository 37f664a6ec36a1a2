use tokio_util::sync::CancellationToken;

/// Cancel `token` on SIGTERM or Ctrl-C.
///
/// The run observes the token at the top of every worker iteration, so
/// in-flight calls finish before the process exits.
pub fn install_shutdown_handler(token: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = wait_for_terminate() => {
                tracing::info!("Received SIGTERM, stopping run");
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
                    return;
                }
                tracing::info!("Received SIGINT, stopping run");
            }
            _ = token.cancelled() => return,
        }

        token.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_terminate() {
    std::future::pending::<()>().await;
}
