//! Two-phase model lifecycle
//!
//! Loading weights is slow and blocking. [`ModelCell::initialize`] starts the
//! load on a background thread and returns immediately; callers that need the
//! model wait on [`ModelCell::ready`], the readiness gate.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Model failed to load, or was not ready within the allowed wait
#[derive(Debug, Clone, Error)]
#[error("{name} unavailable: {message}")]
pub struct ModelLoadError {
    pub name: String,
    pub message: String,
}

enum Slot<T> {
    Loading,
    Ready(Arc<T>),
    Failed(String),
}

/// Shared handle to a model that is loading or loaded
pub struct ModelCell<T> {
    name: String,
    shared: Arc<(Mutex<Slot<T>>, Condvar)>,
}

impl<T> Clone for ModelCell<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + Sync + 'static> ModelCell<T> {
    /// Start loading on a background thread
    pub fn initialize<F>(name: impl Into<String>, loader: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        let name = name.into();
        let shared = Arc::new((Mutex::new(Slot::Loading), Condvar::new()));

        let worker_shared = Arc::clone(&shared);
        let worker_name = name.clone();
        let spawned = thread::Builder::new()
            .name(format!("load-{}", worker_name))
            .spawn(move || {
                tracing::info!("Loading {}...", worker_name);
                let slot = match panic::catch_unwind(AssertUnwindSafe(loader)) {
                    Ok(Ok(model)) => {
                        tracing::info!("{} ready", worker_name);
                        Slot::Ready(Arc::new(model))
                    }
                    Ok(Err(e)) => {
                        tracing::error!("{} failed to load: {:#}", worker_name, e);
                        Slot::Failed(format!("{:#}", e))
                    }
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        tracing::error!("{} loader panicked: {}", worker_name, message);
                        Slot::Failed(format!("loader panicked: {}", message))
                    }
                };
                let (lock, ready) = &*worker_shared;
                let mut guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                *guard = slot;
                drop(guard);
                ready.notify_all();
            });

        if let Err(e) = spawned {
            let (lock, _) = &*shared;
            if let Ok(mut guard) = lock.lock() {
                *guard = Slot::Failed(format!("failed to spawn loader thread: {}", e));
            }
        }

        Self { name, shared }
    }

    /// A cell that is ready from the start
    pub fn ready_now(name: impl Into<String>, model: T) -> Self {
        Self::from_arc(name, Arc::new(model))
    }

    pub fn from_arc(name: impl Into<String>, model: Arc<T>) -> Self {
        Self {
            name: name.into(),
            shared: Arc::new((Mutex::new(Slot::Ready(model)), Condvar::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block until the load finishes
    pub fn ready(&self) -> Result<Arc<T>, ModelLoadError> {
        self.wait(None)
    }

    /// Block for at most `timeout`
    pub fn ready_timeout(&self, timeout: Duration) -> Result<Arc<T>, ModelLoadError> {
        self.wait(Some(timeout))
    }

    /// Non-blocking readiness check
    pub fn is_ready(&self) -> bool {
        let (lock, _) = &*self.shared;
        matches!(lock.lock().as_deref(), Ok(Slot::Ready(_)))
    }

    fn wait(&self, timeout: Option<Duration>) -> Result<Arc<T>, ModelLoadError> {
        let deadline = timeout.map(|limit| Instant::now() + limit);
        let (lock, ready) = &*self.shared;
        let mut guard = lock.lock().map_err(|_| self.poisoned())?;
        loop {
            match &*guard {
                Slot::Ready(model) => return Ok(Arc::clone(model)),
                Slot::Failed(message) => return Err(self.error(message)),
                Slot::Loading => {}
            }
            guard = match deadline {
                None => ready.wait(guard).map_err(|_| self.poisoned())?,
                Some(deadline) => {
                    // Spurious wakeups must not restart the clock
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(self.error("still loading"));
                    }
                    let (next, _) = ready
                        .wait_timeout(guard, remaining)
                        .map_err(|_| self.poisoned())?;
                    next
                }
            };
        }
    }

    fn poisoned(&self) -> ModelLoadError {
        self.error("loader state poisoned")
    }

    fn error(&self, message: &str) -> ModelLoadError {
        ModelLoadError {
            name: self.name.clone(),
            message: message.to_string(),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
