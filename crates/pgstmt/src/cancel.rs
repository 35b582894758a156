//! Cancellation context for statement execution.
//!
//! A [`CancelContext`] carries an optional deadline and an optional cancel
//! signal. Every driver call a [`Statement`](crate::Statement) makes runs under
//! its context. There is no implicit timeout: [`CancelContext::background`] never
//! expires and cannot be cancelled.
//!
//! # Example
//!
//! ```ignore
//! use pgstmt::{CancelContext, Statement};
//! use std::time::Duration;
//!
//! let (ctx, handle) = CancelContext::cancellable();
//! let ctx = ctx.timeout(Duration::from_secs(5));
//!
//! let mut stmt = Statement::direct_with_context(&client, ctx);
//! // elsewhere: handle.cancel();
//! stmt.text("SELECT pg_sleep(60)").execute().await?;
//! ```

use crate::error::{OrmError, OrmResult};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Deadline and cancel signal threaded through every driver call.
#[derive(Debug, Clone, Default)]
pub struct CancelContext {
    deadline: Option<(Instant, Duration)>,
    signal: Option<watch::Receiver<bool>>,
}

/// Fires the signal of the [`CancelContext`] it was created with.
///
/// Cancelling is idempotent and affects every clone of the context.
#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    /// Cancel every in-flight and future operation running under the paired context.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Whether [`cancel`](CancelHandle::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }
}

enum Interrupt {
    Deadline,
    Cancelled,
}

impl CancelContext {
    /// A context that never expires and cannot be cancelled.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().timeout(timeout)
    }

    /// A context that expires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        let budget = deadline.saturating_duration_since(Instant::now());
        Self {
            deadline: Some((deadline, budget)),
            signal: None,
        }
    }

    /// A context paired with a handle that cancels it.
    pub fn cancellable() -> (Self, CancelHandle) {
        let (sender, receiver) = watch::channel(false);
        let ctx = Self {
            deadline: None,
            signal: Some(receiver),
        };
        (ctx, CancelHandle { sender })
    }

    /// Add (or replace) a deadline `timeout` from now, keeping any cancel signal.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some((Instant::now() + timeout, timeout));
        self
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline.map(|(at, _)| at)
    }

    /// Whether the paired [`CancelHandle`] has fired.
    pub fn is_cancelled(&self) -> bool {
        self.signal.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Fail fast if the context is already cancelled or past its deadline.
    pub fn check(&self) -> OrmResult<()> {
        if self.is_cancelled() {
            return Err(OrmError::Cancelled);
        }
        if let Some((at, budget)) = self.deadline {
            if Instant::now() >= at {
                return Err(OrmError::Timeout(budget));
            }
        }
        Ok(())
    }

    /// Run `future` under this context.
    ///
    /// If the deadline passes or the context is cancelled first, the future is
    /// dropped, a best-effort server-side cancel is sent through `cancel_token`
    /// (when the driver provides one), and [`OrmError::Timeout`] or
    /// [`OrmError::Cancelled`] is returned.
    pub(crate) async fn run<T, F>(
        &self,
        cancel_token: Option<tokio_postgres::CancelToken>,
        future: F,
    ) -> OrmResult<T>
    where
        F: std::future::Future<Output = OrmResult<T>>,
    {
        self.check()?;
        if self.deadline.is_none() && self.signal.is_none() {
            return future.await;
        }

        tokio::pin!(future);
        let interrupt = tokio::select! {
            result = &mut future => return result,
            _ = deadline_elapsed(self.deadline()) => Interrupt::Deadline,
            _ = cancelled(self.signal.clone()) => Interrupt::Cancelled,
        };

        if let Some(token) = cancel_token {
            // Best effort: the server may already have finished the query.
            let _ = token.cancel_query(tokio_postgres::NoTls).await;
        }

        match interrupt {
            Interrupt::Deadline => {
                let budget = self.deadline.map(|(_, d)| d).unwrap_or_default();
                #[cfg(feature = "tracing")]
                tracing::debug!(target: "pgstmt.sql", timeout = ?budget, "statement timed out");
                Err(OrmError::Timeout(budget))
            }
            Interrupt::Cancelled => {
                #[cfg(feature = "tracing")]
                tracing::debug!(target: "pgstmt.sql", "statement cancelled");
                Err(OrmError::Cancelled)
            }
        }
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn cancelled(signal: Option<watch::Receiver<bool>>) {
    if let Some(mut rx) = signal {
        if rx.wait_for(|cancelled| *cancelled).await.is_ok() {
            return;
        }
    }
    // No signal, or the handle was dropped without cancelling.
    std::future::pending::<()>().await
}
