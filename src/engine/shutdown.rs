use tokio::select;
use tokio_util::sync::CancellationToken;

/// Detects signals sent to the process. On Windows detached processes can't
/// detect signals sent to them, so the cli falls back to killing the daemon
/// process instead.
pub async fn detect_shutdown(cancelation: CancellationToken) {
    select! {
        _ = tokio::signal::ctrl_c() => {
            cancelation.cancel();
        },
    };
}
