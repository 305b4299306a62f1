// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resource release and task supervision.
//!
//! Every connection the sidecar opens registers a closer here as soon as it
//! is established. [`Lifecycle::close`] runs them newest first, logging and
//! skipping failures, and leaves the stack empty.
//!
//! Background tasks are started through [`Lifecycle::spawn`] or
//! [`Lifecycle::spawn_fatal`]. Both catch errors and panics. Fatal tasks
//! additionally trip [`Lifecycle::failed`], which the runtime treats as a
//! reason to shut down with a failure.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Result;

type Closer = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// First fatal failure of the process, shared with supervised tasks.
#[derive(Clone, Default)]
struct FailureSignal {
    reason: Arc<Mutex<Option<String>>>,
    tripped: CancellationToken,
}

impl FailureSignal {
    fn trip(&self, reason: String) {
        let mut slot = lock(&self.reason);
        if slot.is_none() {
            *slot = Some(reason);
        }
        self.tripped.cancel();
    }

    fn reason(&self) -> Option<String> {
        lock(&self.reason).clone()
    }
}

/// Release stack plus supervised background tasks.
#[derive(Default)]
pub struct Lifecycle {
    closers: Mutex<Vec<(String, Closer)>>,
    tasks: Mutex<Vec<(String, JoinHandle<()>)>>,
    failure: FailureSignal,
}

impl Lifecycle {
    /// Create an empty lifecycle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a closer. It runs at [`close`](Self::close), before every
    /// closer registered earlier.
    pub fn push<F>(&self, resource: impl Into<String>, closer: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let resource = resource.into();
        debug!(resource = %resource, "registered closer");
        lock(&self.closers).push((resource, Box::pin(closer)));
    }

    /// Number of closers not yet run.
    pub fn pending_closers(&self) -> usize {
        lock(&self.closers).len()
    }

    /// Run all registered closers in reverse registration order.
    pub async fn close(&self) {
        let closers = std::mem::take(&mut *lock(&self.closers));
        for (resource, closer) in closers.into_iter().rev() {
            info!(resource = %resource, "closing");
            if let Err(e) = closer.await {
                error!(resource = %resource, error = %e, "failed to close resource");
            }
        }
    }

    /// Spawn a supervised background task. Errors and panics are logged.
    pub fn spawn<F>(&self, name: impl Into<String>, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        let handle = supervise(name.clone(), task, None);
        lock(&self.tasks).push((name, handle));
    }

    /// Spawn a task whose error or panic shuts the sidecar down.
    ///
    /// A fatal task returning `Ok` is a normal end and does not trip the
    /// failure signal.
    pub fn spawn_fatal<F>(&self, name: impl Into<String>, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        let handle = supervise(name.clone(), task, Some(self.failure.clone()));
        lock(&self.tasks).push((name, handle));
    }

    /// Resolves with the reason once a fatal failure has been recorded.
    pub async fn failed(&self) -> String {
        self.failure.tripped.cancelled().await;
        self.failure.reason().unwrap_or_default()
    }

    /// First fatal failure, if any.
    pub fn failure(&self) -> Option<String> {
        self.failure.reason()
    }

    /// Wait for supervised tasks to finish, up to `grace` in total.
    pub async fn join(&self, grace: Duration) {
        let tasks = std::mem::take(&mut *lock(&self.tasks));
        let deadline = tokio::time::Instant::now() + grace;
        for (name, handle) in tasks {
            if tokio::time::timeout_at(deadline, handle).await.is_err() {
                warn!(task = %name, "task did not stop in time");
            }
        }
    }
}

/// Spawn `task` in its own tokio task and log how it ended.
///
/// The returned handle completes once the outcome has been logged. It never
/// resolves to a panic, even when `task` panics.
pub fn supervised<F>(name: impl Into<String>, task: F) -> JoinHandle<()>
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    supervise(name.into(), task, None)
}

fn supervise<F>(name: String, task: F, fatal: Option<FailureSignal>) -> JoinHandle<()>
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    let inner = tokio::spawn(task);
    tokio::spawn(async move {
        let failure = match inner.await {
            Ok(Ok(())) => {
                debug!(task = %name, "task finished");
                None
            }
            Ok(Err(e)) => {
                error!(task = %name, error = %e, "task failed");
                Some(format!("{} failed: {}", name, e))
            }
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic());
                error!(task = %name, panic = %message, "task panicked");
                Some(format!("{} panicked: {}", name, message))
            }
            Err(_) => {
                debug!(task = %name, "task aborted");
                None
            }
        };
        if let (Some(signal), Some(reason)) = (fatal, failure) {
            signal.trip(reason);
        }
    })
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
