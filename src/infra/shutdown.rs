use tracing::info;

use super::error::InfraError;

/// Resolve once the process is asked to stop (Ctrl-C, or SIGTERM on Unix).
pub async fn shutdown_signal() -> Result<(), InfraError> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate = signal(SignalKind::terminate())
            .map_err(|err| InfraError::signal(format!("SIGTERM: {err}")))?;

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.map_err(|err| InfraError::signal(format!("SIGINT: {err}")))?;
                info!(signal = "SIGINT", "shutdown signal received");
            }
            _ = terminate.recv() => {
                info!(signal = "SIGTERM", "shutdown signal received");
            }
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .map_err(|err| InfraError::signal(format!("Ctrl-C: {err}")))?;
        info!(signal = "ctrl_c", "shutdown signal received");
        Ok(())
    }
}

/// Drive `work` until it finishes or `signal` fires.
///
/// Returns `Ok(None)` when the signal wins; the unfinished work is dropped.
pub async fn or_shutdown<W, S>(work: W, signal: S) -> Result<Option<W::Output>, InfraError>
where
    W: Future,
    S: Future<Output = Result<(), InfraError>>,
{
    tokio::select! {
        output = work => Ok(Some(output)),
        result = signal => result.map(|()| None),
    }
}

#[cfg(test)]
mod tests {
    use std::future::{pending, ready};

    use super::*;

    #[tokio::test]
    async fn finished_work_is_returned() {
        let outcome = or_shutdown(ready(7), pending()).await.expect("no signal error");
        assert_eq!(outcome, Some(7));
    }

    #[tokio::test]
    async fn signal_interrupts_pending_work() {
        let outcome = or_shutdown(pending::<u32>(), ready(Ok(())))
            .await
            .expect("no signal error");
        assert_eq!(outcome, None);
    }

    #[tokio::test]
    async fn signal_installation_failure_is_reported() {
        let outcome = or_shutdown(
            pending::<u32>(),
            ready(Err(InfraError::signal("SIGTERM: unsupported"))),
        )
        .await;
        assert!(matches!(outcome, Err(InfraError::Signal { .. })));
    }
}
