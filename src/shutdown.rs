//! Graceful shutdown flag.
//!
//! `ShutdownController` owns the only writer. The loop receives a read-only
//! `ShutdownHandle` and polls it at iteration boundaries and on every sleep
//! tick.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

/// Printed once, on the first termination signal.
pub const SHUTDOWN_NOTICE: &str = "Stopping bot gracefully... please wait for cleanup.";

/// Set-once shutdown flag.
#[derive(Debug, Clone, Default)]
pub struct ShutdownController {
    requested: Arc<AtomicBool>,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only view for the loop.
    pub fn handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            requested: Arc::clone(&self.requested),
        }
    }

    /// Request shutdown. Returns `true` only for the call that flipped the flag.
    pub fn request(&self) -> bool {
        let first = !self.requested.swap(true, Ordering::AcqRel);
        if first {
            info!("Graceful shutdown requested.");
        }
        first
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

/// Read-only side of the shutdown flag.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Sleep for `total` in `tick`-sized steps, returning early once shutdown
    /// is requested. Returns `true` if the sleep was cut short.
    pub async fn sleep(&self, total: Duration, tick: Duration) -> bool {
        let tick = if tick.is_zero() { total } else { tick };
        let mut remaining = total;
        while !remaining.is_zero() {
            if self.is_requested() {
                return true;
            }
            let step = remaining.min(tick);
            tokio::time::sleep(step).await;
            remaining = remaining.saturating_sub(step);
        }
        self.is_requested()
    }
}

/// Listen for SIGINT/SIGTERM and flip the flag. Later signals are absorbed.
pub fn spawn_signal_listener(controller: ShutdownController) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if wait_for_termination().await.is_err() {
                tracing::error!("Failed to listen for termination signals");
                return;
            }
            if controller.request() {
                eprintln!("\n{SHUTDOWN_NOTICE}");
            }
        }
    })
}

#[cfg(unix)]
async fn wait_for_termination() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        r = tokio::signal::ctrl_c() => r,
        _ = term.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
