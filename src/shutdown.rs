//! Process signal handling for repeating mode.

use std::future::Future;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// Completes when the signal it was built from arrives.
pub type SignalFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Wait on whichever listeners were installed and name the one that fired.
///
/// Returns `None` immediately when neither listener is available.
pub async fn first_signal(
    sigterm: Option<SignalFuture>,
    sigint: Option<SignalFuture>,
) -> Option<&'static str> {
    match (sigterm, sigint) {
        (Some(term), Some(int)) => Some(tokio::select! {
            _ = term => "SIGTERM",
            _ = int => "SIGINT",
        }),
        (Some(term), None) => {
            term.await;
            Some("SIGTERM")
        }
        (None, Some(int)) => {
            int.await;
            Some("SIGINT")
        }
        (None, None) => None,
    }
}

#[cfg(unix)]
fn listen(kind: tokio::signal::unix::SignalKind, name: &str) -> Option<SignalFuture> {
    match tokio::signal::unix::signal(kind) {
        Ok(mut stream) => Some(Box::pin(async move {
            stream.recv().await;
        })),
        Err(e) => {
            tracing::warn!("Failed to install {} handler: {}", name, e);
            None
        }
    }
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
///
/// A handler that fails to install is skipped; if neither installs, Ctrl-C
/// is used instead.
#[cfg(unix)]
pub async fn cancel_on_signal(shutdown: CancellationToken) {
    use tokio::signal::unix::SignalKind;

    let sigterm = listen(SignalKind::terminate(), "SIGTERM");
    let sigint = listen(SignalKind::interrupt(), "SIGINT");

    match first_signal(sigterm, sigint).await {
        Some(name) => tracing::info!("Received {}, stopping", name),
        None => match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received Ctrl-C, stopping"),
            Err(e) => {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
                return;
            }
        },
    }

    shutdown.cancel();
}

/// Cancel `shutdown` on Ctrl-C.
#[cfg(not(unix))]
pub async fn cancel_on_signal(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl-C, stopping");
            shutdown.cancel();
        }
        Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
    }
}
