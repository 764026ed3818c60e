use futures::future::BoxFuture;
use tracing::{error, info, warn};

/// Resolves on SIGINT or SIGTERM, or on ctrl-c where unix signals are unavailable.
///
/// Unix handlers are installed when this is called, so a signal raised after it returns
/// is never lost.
pub(crate) fn terminate() -> BoxFuture<'static, ()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(mut interrupt), Ok(mut terminate)) => {
                return Box::pin(async move {
                    tokio::select! {
                        _ = interrupt.recv() => info!("received SIGINT"),
                        _ = terminate.recv() => info!("received SIGTERM"),
                    }
                });
            }
            (Err(e), _) | (_, Err(e)) => warn!(cause = %e, "failed to install signal handlers, falling back to ctrl-c"),
        }
    }

    Box::pin(async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received ctrl-c"),
            Err(e) => {
                error!(cause = %e, "failed to listen for ctrl-c, shutdown signals are ignored");
                std::future::pending::<()>().await;
            }
        }
    })
}
