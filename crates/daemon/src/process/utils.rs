use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Cancel `token` on the first SIGINT or SIGTERM.
///
/// Long running jobs poll the token between items, so the
///  current item finishes before the job stops.
pub fn cancel_on_shutdown_signal(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown_signal() => {
                tracing::warn!("shutdown signal received, cancelling after the current item");
                token.cancel();
            }
            _ = token.cancelled() => {}
        }
    })
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(mut sigint), Ok(mut sigterm)) => {
            tokio::select! {
                _ = sigint.recv() => tracing::debug!("received SIGINT"),
                _ = sigterm.recv() => tracing::debug!("received SIGTERM"),
            }
        }
        _ => {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("unable to listen for shutdown signals: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("unable to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Registers a panic hook that logs panics using the `tracing` crate
pub fn register_panic_logger() {
    std::panic::set_hook(Box::new(|panic| match panic.location() {
        Some(loc) => {
            tracing::error!(
                message = %panic,
                panic.file = loc.file(),
                panic.line = loc.line(),
                panic.column = loc.column(),
            );
        }
        None => tracing::error!(message = %panic),
    }));
}

pub fn report_build_info() {
    let build = crate::version::build_info();

    tracing::debug!(
        build_profile = build.build_profile,
        version = build.version,
        target = build.target,
        "depot starting up"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_watcher_exits_when_token_cancelled_elsewhere() {
        let token = CancellationToken::new();
        let handle = cancel_on_shutdown_signal(token.clone());
        token.cancel();
        handle.await.unwrap();
    }
}
