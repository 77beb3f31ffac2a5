//! Shutdown signalling for shard processors
//!
//! Backoff sleeps block only the owning shard's task. A [`ShutdownSignal`]
//! lets the worker owner cut those sleeps short when the process is going
//! away, instead of waiting out a full retry cycle.

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// How a backoff sleep ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// The full duration elapsed
    Elapsed,
    /// Shutdown was requested while waiting
    Interrupted,
}

/// Cancellation handle shared by a worker and the processors it owns
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    token: CancellationToken,
}

impl ShutdownSignal {
    /// Create a signal that has not fired
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown; idempotent
    pub fn trigger(&self) {
        if !self.token.is_cancelled() {
            info!("Shutdown requested");
        }
        self.token.cancel();
    }

    /// Whether shutdown was requested
    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Derived signal that fires with this one but can also be fired alone
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    /// Resolve once shutdown is requested
    pub async fn triggered(&self) {
        self.token.cancelled().await
    }

    /// Sleep for `duration` unless shutdown is requested first
    pub async fn backoff(&self, duration: Duration) -> Backoff {
        tokio::select! {
            _ = self.token.cancelled() => {
                debug!("Interrupted backoff after shutdown request");
                Backoff::Interrupted
            }
            _ = tokio::time::sleep(duration) => Backoff::Elapsed,
        }
    }

    /// Fire this signal on Ctrl-C
    pub fn trigger_on_ctrl_c(&self) -> tokio::task::JoinHandle<()> {
        let signal = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if result.is_ok() {
                        info!("Ctrl-C received, shutting down");
                        signal.trigger();
                    }
                }
                _ = signal.triggered() => {}
            }
        })
    }
}
