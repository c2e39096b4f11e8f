//! Cooperative shutdown.
//!
//! - [`ClosedFlag`] is the session-wide flag checked at every spin point.
//! - [`ShutdownCoordinator`] is built once by the process bootstrap. It
//!   collects teardown hooks with explicit priorities and runs them in
//!   order.
//!
//! # Example
//!
//! ```
//! use rendezvous_rpc::shutdown::{Order, ShutdownCoordinator};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let mut coordinator = ShutdownCoordinator::new();
//! coordinator.register("close server", 10, async { /* ... */ });
//! coordinator.register("close client", Order::HIGHEST, async { /* ... */ });
//! let ran = coordinator.run().await;
//! assert_eq!(ran, vec!["close client", "close server"]);
//! # });
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Default time each hook gets before it is abandoned.
pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_millis(500);

/// Shared closed flag. Set from any task; read at every spin point.
#[derive(Debug, Clone, Default)]
pub struct ClosedFlag {
    closed: Arc<AtomicBool>,
}

impl ClosedFlag {
    /// A flag that starts open.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. Idempotent.
    #[inline]
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Whether the flag has been raised.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Hook priorities: lower values run first.
pub struct Order;

impl Order {
    pub const HIGHEST: i32 = i32::MIN;
    pub const LOWEST: i32 = i32::MAX;
}

type Hook = Pin<Box<dyn Future<Output = ()> + Send>>;

struct NamedHook {
    name: String,
    order: i32,
    hook: Hook,
}

/// Ordered teardown hooks, run once at process exit.
pub struct ShutdownCoordinator {
    hooks: Vec<NamedHook>,
    hook_timeout: Duration,
    trigger_tx: watch::Sender<bool>,
    trigger_rx: watch::Receiver<bool>,
}

impl ShutdownCoordinator {
    /// Coordinator with no hooks and the default hook timeout.
    pub fn new() -> Self {
        let (trigger_tx, trigger_rx) = watch::channel(false);
        Self {
            hooks: Vec::new(),
            hook_timeout: DEFAULT_HOOK_TIMEOUT,
            trigger_tx,
            trigger_rx,
        }
    }

    /// Set the per-hook timeout.
    pub fn with_hook_timeout(mut self, timeout: Duration) -> Self {
        self.hook_timeout = timeout;
        self
    }

    /// Register a hook with an explicit priority. Ties keep registration order.
    pub fn register<F>(&mut self, name: impl Into<String>, order: i32, hook: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.hooks.push(NamedHook {
            name: name.into(),
            order,
            hook: Box::pin(hook),
        });
    }

    /// Register a hook that runs after every prioritized one.
    pub fn register_unordered<F>(&mut self, name: impl Into<String>, hook: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.register(name, Order::LOWEST, hook);
    }

    /// Number of registered hooks.
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Whether no hooks are registered.
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// A handle that can request shutdown programmatically.
    pub fn trigger(&self) -> ShutdownTrigger {
        ShutdownTrigger {
            tx: self.trigger_tx.clone(),
        }
    }

    /// Wait for Ctrl-C or a [`ShutdownTrigger::signal`].
    pub async fn wait_for_signal(&self) {
        let mut rx = self.trigger_rx.clone();
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("failed to listen for ctrl-c: {}", e);
                // only the programmatic trigger can end the wait now
                std::future::pending::<()>().await;
            }
        };
        tokio::select! {
            _ = ctrl_c => {}
            _ = rx.wait_for(|signalled| *signalled) => {}
        }
    }

    /// Run every hook in priority order.
    ///
    /// Returns the names of hooks that completed within the timeout.
    pub async fn run(self) -> Vec<String> {
        let mut hooks = self.hooks;
        // stable: equal priorities keep registration order
        hooks.sort_by_key(|h| h.order);

        let mut completed = Vec::with_capacity(hooks.len());
        for NamedHook { name, hook, .. } in hooks {
            match tokio::time::timeout(self.hook_timeout, hook).await {
                Ok(()) => {
                    tracing::debug!("shutdown hook finished: {}", name);
                    completed.push(name);
                }
                Err(_) => {
                    tracing::error!(
                        "shutdown hook [{}] did not finish within {:?}",
                        name,
                        self.hook_timeout
                    );
                }
            }
        }
        completed
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Requests shutdown from anywhere in the process.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Wake `wait_for_signal`. Idempotent.
    pub fn signal(&self) {
        let _ = self.tx.send(true);
    }
}
