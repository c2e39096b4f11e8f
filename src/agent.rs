//! Agent duty cycle.
//!
//! Client and server are both agents: a value with a non-blocking
//! `do_work` entry point that a runner calls repeatedly from one task.
//! Between calls the runner idles according to the work reported.
//!
//! ```text
//! on_start ─► loop { do_work ─► idle(work) } until closed ─► on_close
//! ```
//!
//! Errors escaping `do_work` go to an explicit [`ErrorHandler`] value
//! supplied by whoever starts the runner.

use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::error::{RendezvousError, Result};
use crate::idle::IdleStrategy;
use crate::shutdown::ClosedFlag;

/// A unit of cooperative work driven by an [`AgentRunner`].
pub trait Agent: Send + 'static {
    /// Name used in logs and error reports.
    fn role_name(&self) -> &str;

    /// Called once on the runner task before the first `do_work`.
    fn on_start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Perform one unit of work and report how much was done.
    fn do_work(&mut self) -> impl Future<Output = Result<usize>> + Send;

    /// Called once after the loop exits. Releases owned handles.
    fn on_close(&mut self);
}

/// Receives errors that escape an agent's duty cycle.
pub trait ErrorHandler: Send + Sync {
    fn on_error(&self, role: &str, error: &RendezvousError);
}

/// Logs every error at error level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingErrorHandler;

impl ErrorHandler for LoggingErrorHandler {
    fn on_error(&self, role: &str, error: &RendezvousError) {
        tracing::error!("[{}] error occurred: {}", role, error);
    }
}

/// Runs an agent on its own tokio task.
pub struct AgentRunner<A, I> {
    agent: A,
    idle: I,
    closed: ClosedFlag,
    error_handler: Arc<dyn ErrorHandler>,
}

impl<A, I> AgentRunner<A, I>
where
    A: Agent,
    I: IdleStrategy + 'static,
{
    /// `closed` must be the same flag the agent checks at its spin points.
    pub fn new(agent: A, idle: I, closed: ClosedFlag) -> Self {
        Self {
            agent,
            idle,
            closed,
            error_handler: Arc::new(LoggingErrorHandler),
        }
    }

    /// Replace the default logging error handler.
    pub fn with_error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = handler;
        self
    }

    /// Spawn the duty cycle. Must be called within a tokio runtime.
    pub fn start(self) -> AgentHandle<A> {
        let closed = self.closed.clone();
        let task = tokio::spawn(self.run());
        AgentHandle { closed, task }
    }

    /// Run the duty cycle on the current task until closed.
    pub async fn run(mut self) -> A {
        let role = self.agent.role_name().to_string();

        if let Err(e) = self.agent.on_start() {
            self.error_handler.on_error(&role, &e);
            self.closed.close();
        } else {
            tracing::debug!("[{}] agent started", role);
        }

        while !self.closed.is_closed() {
            match self.agent.do_work().await {
                Ok(work) => self.idle.idle(work).await,
                Err(RendezvousError::SessionClosed) => break,
                Err(e) => {
                    self.error_handler.on_error(&role, &e);
                    if e.is_terminal() {
                        self.closed.close();
                        break;
                    }
                    self.idle.idle(0).await;
                }
            }
        }

        self.agent.on_close();
        tracing::debug!("[{}] agent closed", role);
        self.agent
    }
}

/// Handle to a running agent.
pub struct AgentHandle<A> {
    closed: ClosedFlag,
    task: JoinHandle<A>,
}

impl<A> AgentHandle<A> {
    /// The flag that stops this agent.
    pub fn closed_flag(&self) -> &ClosedFlag {
        &self.closed
    }

    /// Whether the agent task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Raise the closed flag and wait for the agent to wind down.
    ///
    /// Returns the agent for inspection, or `None` if its task panicked.
    pub async fn close(self) -> Option<A> {
        self.closed.close();
        self.join().await
    }

    /// Wait for the agent to stop on its own.
    pub async fn join(self) -> Option<A> {
        match self.task.await {
            Ok(agent) => Some(agent),
            Err(e) => {
                tracing::error!("agent task failed: {}", e);
                None
            }
        }
    }
}
