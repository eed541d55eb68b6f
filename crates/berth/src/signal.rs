//! Termination signal sources.
//!
//! OS signal delivery is inherently process-global state. The lifecycle
//! depends on the [`SignalSource`] capability instead of listening for
//! signals itself, so tests can inject a synthetic source
//! ([`ManualTrigger`]) and drive teardown without touching the process.

use core::fmt;
use tokio_util::sync::CancellationToken;

/// Cause of a requested termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// SIGINT / Ctrl+C.
    Interrupt,
    /// SIGTERM.
    Terminate,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => f.write_str("SIGINT"),
            Self::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// A source of termination events.
#[tonic::async_trait]
pub trait SignalSource: Send {
    /// Resolves once termination has been requested.
    async fn recv(&mut self) -> Termination;
}

/// Terminates on SIGINT or SIGTERM, whichever arrives first.
///
/// SIGKILL cannot be intercepted; abrupt termination bypasses cleanup
/// entirely. On non-unix targets only Ctrl+C is handled.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsSignals;

#[tonic::async_trait]
impl SignalSource for OsSignals {
    async fn recv(&mut self) -> Termination {
        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        tokio::select! {
            () = ctrl_c => Termination::Interrupt,
            () = terminate => Termination::Terminate,
        }
    }
}

/// A hand-fired termination source for tests and embedding.
///
/// Clones share the same trigger: keep one clone, hand the other to the
/// lifecycle, and fire it with [`ManualTrigger::trigger`].
#[derive(Debug, Clone, Default)]
pub struct ManualTrigger {
    token: CancellationToken,
}

impl ManualTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests termination. Idempotent.
    pub fn trigger(&self) {
        self.token.cancel();
    }
}

#[tonic::async_trait]
impl SignalSource for ManualTrigger {
    async fn recv(&mut self) -> Termination {
        self.token.cancelled().await;
        Termination::Terminate
    }
}
