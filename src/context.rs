//! Deadline and cancellation scope shared by every network operation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::QueryError;

/// A cloneable operation scope carrying an optional deadline and a
/// cancellation signal.
///
/// Clones made with [QueryContext::with_timeout] share the parent's
/// cancellation signal, so [QueryContext::cancel] on any of them aborts
/// every operation running under the whole tree.
#[derive(Debug, Clone)]
pub struct QueryContext {
    deadline: Option<Instant>,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
}

impl Default for QueryContext {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryContext {
    /// A context without a deadline.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        QueryContext {
            deadline: None,
            cancel_tx: Arc::new(tx),
            cancel_rx: rx,
        }
    }

    /// A fresh context that expires `timeout` from now.
    pub fn with_deadline_in(timeout: Duration) -> Self {
        Self::new().with_timeout(timeout)
    }

    /// Derive a context whose deadline is the earlier of ours and
    /// `timeout` from now.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate: Instant = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(current) if current < candidate => current,
            _ => candidate,
        };
        QueryContext {
            deadline: Some(deadline),
            cancel_tx: Arc::clone(&self.cancel_tx),
            cancel_rx: self.cancel_rx.clone(),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, if there is one.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Signal cancellation to this context and every context derived from
    /// the same root.
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    pub fn is_done(&self) -> bool {
        self.is_cancelled() || self.remaining() == Some(Duration::ZERO)
    }

    /// Resolves once the context has been cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel_rx.clone();
        // the sender lives as long as any context does, so this only errors
        // if the whole tree is gone
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Drive `fut` to completion unless the deadline passes or the context
    /// is cancelled first.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, QueryError>
    where
        F: Future<Output = T>,
    {
        if self.is_cancelled() {
            return Err(QueryError::Cancelled);
        }
        let bounded = async {
            match self.deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, fut)
                    .await
                    .map_err(|_| QueryError::Timeout),
                None => Ok(fut.await),
            }
        };
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(QueryError::Cancelled),
            result = bounded => result,
        }
    }

    /// Like [QueryContext::run] for fallible I/O, mapping the I/O error with
    /// `wrap`.
    pub async fn run_io<F, T>(
        &self,
        fut: F,
        wrap: fn(std::io::Error) -> QueryError,
    ) -> Result<T, QueryError>
    where
        F: Future<Output = std::io::Result<T>>,
    {
        self.run(fut).await?.map_err(wrap)
    }
}
