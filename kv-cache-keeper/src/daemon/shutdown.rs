//! Two-stage shutdown for SIGINT, SIGTERM and SIGHUP.
//!
//! The first request starts draining: the control loop stops taking new work
//! and performs one final save. A second request forces an immediate stop and
//! abandons the final save.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Owns the shutdown tokens and hands out handles.
pub struct ShutdownCoordinator {
    handle: ShutdownHandle,
}

/// Cloneable view of the shutdown state
#[derive(Clone)]
pub struct ShutdownHandle {
    drain: CancellationToken,
    force: CancellationToken,
    requests: Arc<AtomicU32>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            handle: ShutdownHandle {
                drain: CancellationToken::new(),
                force: CancellationToken::new(),
                requests: Arc::new(AtomicU32::new(0)),
            },
        }
    }

    pub fn handle(&self) -> ShutdownHandle {
        self.handle.clone()
    }

    /// Spawn the signal listener. Every received signal counts as one request.
    pub fn listen(&self) -> tokio::task::JoinHandle<()> {
        let handle = self.handle.clone();
        tokio::spawn(async move {
            loop {
                let name = match wait_for_signal().await {
                    Some(name) => name,
                    None => return,
                };
                let first = handle.request();
                if first {
                    info!("Received {}, finishing current work and saving (repeat to force)", name);
                } else {
                    warn!("Received {} again, stopping without final save", name);
                    return;
                }
            }
        })
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    /// Register one cancellation request. Returns true for the first one.
    pub fn request(&self) -> bool {
        let previous = self.requests.fetch_add(1, Ordering::SeqCst);
        if previous == 0 {
            self.drain.cancel();
            true
        } else {
            self.drain.cancel();
            self.force.cancel();
            false
        }
    }

    pub fn is_draining(&self) -> bool {
        self.drain.is_cancelled()
    }

    pub fn is_forced(&self) -> bool {
        self.force.is_cancelled()
    }

    pub async fn drained(&self) {
        self.drain.cancelled().await
    }

    pub async fn forced(&self) {
        self.force.cancelled().await
    }
}

/// Wait for the next termination signal. `None` when no handler could be
/// installed at all.
async fn wait_for_signal() -> Option<&'static str> {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
                false
            }
        }
    };

    #[cfg(unix)]
    {
        use signal::unix::{signal as unix_signal, SignalKind};

        let mut terminate = unix_signal(SignalKind::terminate())
            .map_err(|e| error!("Failed to install SIGTERM handler: {}", e))
            .ok();
        let mut hangup = unix_signal(SignalKind::hangup())
            .map_err(|e| error!("Failed to install SIGHUP handler: {}", e))
            .ok();

        let terminate = async {
            match terminate.as_mut() {
                Some(s) => s.recv().await,
                None => std::future::pending().await,
            }
        };
        let hangup = async {
            match hangup.as_mut() {
                Some(s) => s.recv().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            installed = ctrl_c => installed.then_some("SIGINT (Ctrl+C)"),
            _ = terminate => Some("SIGTERM"),
            _ = hangup => Some("SIGHUP"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.then_some("Ctrl+C")
    }
}
