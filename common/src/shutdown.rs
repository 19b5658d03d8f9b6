//! Process shutdown signal handling.

/// Resolves when the process is asked to stop, logging which signal fired.
/// Suitable for `with_graceful_shutdown` and cancellation-token bridges.
pub async fn shutdown_signal() {
    let signal = wait_for_signal().await;
    tracing::info!(signal, "shutdown signal received");
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    // Both SIGINT (Ctrl+C) and SIGTERM (K8s) stop the process
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");

    tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    // Fallback: only Ctrl+C on non-Unix
    tokio::signal::ctrl_c()
        .await
        .expect("install Ctrl+C handler");
    "ctrl-c"
}
