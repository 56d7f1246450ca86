//! Process shutdown: cancel everything, then close every registered session
//! under its own time bound.
//!
//! The sweep is best-effort.  A session whose close fails or times out is
//! force-aborted and recorded; the remaining sessions are still closed.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;

use mr_domain::config::ShutdownConfig;

use crate::registry::SessionRegistry;
use crate::session_id::SessionId;
use crate::transport::{Transport, TransportError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShutdownFailure {
    #[error("close timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Outcome of a shutdown sweep.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub closed: Vec<SessionId>,
    pub failed: Vec<(SessionId, ShutdownFailure)>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// `0` when every close succeeded, `1` otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.is_clean() {
            0
        } else {
            1
        }
    }
}

pub struct LifecycleManager {
    registry: Arc<SessionRegistry>,
    root: CancellationToken,
    close_timeout: Duration,
}

impl LifecycleManager {
    pub fn new(registry: Arc<SessionRegistry>, root: CancellationToken, config: &ShutdownConfig) -> Self {
        Self {
            registry,
            root,
            close_timeout: Duration::from_millis(config.close_timeout_ms.max(1)),
        }
    }

    /// Root token; every transport holds a child of it.
    pub fn token(&self) -> &CancellationToken {
        &self.root
    }

    pub fn is_shutting_down(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Cancel the root token, seal the registry and close every session
    /// concurrently.  Safe to call more than once; later calls find an
    /// empty registry.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.root.cancel();
        let sessions = self.registry.drain();
        tracing::info!(
            sessions = sessions.len(),
            close_timeout_ms = self.close_timeout.as_millis() as u64,
            "shutdown: closing sessions"
        );

        let timeout = self.close_timeout;
        let outcomes = join_all(
            sessions
                .into_iter()
                .map(|(id, transport)| async move {
                    let result = close_bounded(&transport, timeout).await;
                    (id, result)
                }),
        )
        .await;

        let mut report = ShutdownReport::default();
        for (id, result) in outcomes {
            match result {
                Ok(()) => report.closed.push(id),
                Err(failure) => {
                    tracing::warn!(session_id = %id, error = %failure, "session did not close cleanly");
                    report.failed.push((id, failure));
                }
            }
        }

        tracing::info!(
            closed = report.closed.len(),
            failed = report.failed.len(),
            open_transports = self.registry.open_transports().count(),
            "shutdown sweep finished"
        );
        report
    }
}

async fn close_bounded(transport: &Transport, timeout: Duration) -> Result<(), ShutdownFailure> {
    let failure = match tokio::time::timeout(timeout, transport.close()).await {
        Ok(Ok(())) => return Ok(()),
        // Closed concurrently by a termination request.
        Ok(Err(TransportError::Closed)) => {
            transport.abort();
            return Ok(());
        }
        Ok(Err(e)) => ShutdownFailure::Transport(e),
        Err(_) => ShutdownFailure::Timeout(timeout),
    };
    transport.abort();
    Err(failure)
}
