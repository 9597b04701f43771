//! Generation model lifecycle
//!
//! ```text
//! initializing ──► downloading ──► loading ──► ready
//!       │               │             │
//!       └───────────────┴─────────────┴──────► failed(reason)
//! ```
//!
//! `downloading` is skipped when the loader reports the weights as cached. Each
//! `load_model()` starts a new attempt on a spawned task; state changes from an attempt
//! that has since been reset are discarded. Observers subscribe to a `watch` channel.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::llm_client::{ExclusiveGenerator, GenerationProvider};

/// How often `ensure_ready` re-checks the state
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Default wait for `ensure_loaded`; first-time downloads of a quantized model are slow
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(240);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelState {
    Initializing,
    Downloading,
    Loading,
    Ready,
    Failed(String),
}

impl ModelState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ModelState::Ready)
    }
}

impl fmt::Display for ModelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelState::Initializing => write!(f, "initializing"),
            ModelState::Downloading => write!(f, "downloading"),
            ModelState::Loading => write!(f, "loading"),
            ModelState::Ready => write!(f, "ready"),
            ModelState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// The model cannot serve requests
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("Model not ready after {waited:?} (state: {state})")]
    Timeout { waited: Duration, state: ModelState },

    #[error("Model failed to load: {0}")]
    Failed(String),

    #[error("Model not loaded (state: {0})")]
    NotReady(ModelState),
}

/// Brings a generation model from wherever it lives to a usable provider
#[async_trait]
pub trait ModelLoader: Send + Sync {
    /// Whether the weights are already local
    async fn is_cached(&self) -> bool;

    async fn download(&self) -> anyhow::Result<()>;

    async fn load(&self) -> anyhow::Result<Arc<dyn GenerationProvider>>;

    /// Human-readable model description for logs
    fn describe(&self) -> String;
}

/// State shared with the loading task. The generator and the published state change
/// together under `generator`'s lock so observers never see `Ready` without a handle.
struct Shared {
    state_tx: watch::Sender<ModelState>,
    generator: Mutex<Option<Arc<ExclusiveGenerator>>>,
    attempt: AtomicU64,
}

impl Shared {
    fn lock_generator(&self) -> MutexGuard<'_, Option<Arc<ExclusiveGenerator>>> {
        self.generator.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish `state` if `attempt` is still current
    fn publish(&self, attempt: u64, state: ModelState) -> bool {
        let _guard = self.lock_generator();
        if self.attempt.load(Ordering::SeqCst) != attempt {
            return false;
        }
        self.state_tx.send_replace(state);
        true
    }

    fn install(&self, attempt: u64, generator: ExclusiveGenerator) -> bool {
        let mut slot = self.lock_generator();
        if self.attempt.load(Ordering::SeqCst) != attempt {
            return false;
        }
        *slot = Some(Arc::new(generator));
        self.state_tx.send_replace(ModelState::Ready);
        true
    }
}

pub struct ModelLifecycle {
    loader: Arc<dyn ModelLoader>,
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
    poll_interval: Duration,
}

impl ModelLifecycle {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        let (state_tx, _) = watch::channel(ModelState::Initializing);
        Self {
            loader,
            shared: Arc::new(Shared {
                state_tx,
                generator: Mutex::new(None),
                attempt: AtomicU64::new(0),
            }),
            task: Mutex::new(None),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    fn lock_task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ModelState {
        self.shared.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ModelState> {
        self.shared.state_tx.subscribe()
    }

    pub fn is_loading(&self) -> bool {
        self.lock_task().as_ref().is_some_and(|h| !h.is_finished())
    }

    /// The generator, only while the state is `ready`
    pub fn generator(&self) -> Result<Arc<ExclusiveGenerator>, LifecycleError> {
        let slot = self.shared.lock_generator();
        match (&*slot, self.state()) {
            (Some(generator), ModelState::Ready) => Ok(generator.clone()),
            (_, state) => Err(LifecycleError::NotReady(state)),
        }
    }

    /// Start a load attempt on the current tokio runtime.
    ///
    /// Returns `false` without doing anything if an attempt is already in flight.
    pub fn load_model(&self) -> bool {
        let mut task = self.lock_task();
        if task.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("Model load already in flight, ignoring request");
            return false;
        }

        let attempt = {
            let mut slot = self.shared.lock_generator();
            let attempt = self.shared.attempt.fetch_add(1, Ordering::SeqCst) + 1;
            *slot = None;
            self.shared.state_tx.send_replace(ModelState::Initializing);
            attempt
        };

        let loader = self.loader.clone();
        let shared = self.shared.clone();
        *task = Some(tokio::spawn(async move {
            let outcome = AssertUnwindSafe(run_attempt(loader, shared.clone(), attempt))
                .catch_unwind()
                .await;
            if let Err(panic) = outcome {
                let reason = format!("model loader panicked: {}", panic_message(panic.as_ref()));
                error!(attempt, "{}", reason);
                shared.publish(attempt, ModelState::Failed(reason));
            }
        }));
        true
    }

    /// Abort any attempt, drop the generator and return to `initializing`
    pub fn reset_model(&self) {
        if let Some(handle) = self.lock_task().take() {
            handle.abort();
        }
        let mut slot = self.shared.lock_generator();
        self.shared.attempt.fetch_add(1, Ordering::SeqCst);
        *slot = None;
        self.shared.state_tx.send_replace(ModelState::Initializing);
        info!("Model reset");
    }

    /// Wait until `ready`, failing fast on `failed` and with a timeout at the deadline
    pub async fn ensure_ready(&self, timeout: Duration) -> Result<(), LifecycleError> {
        let started = Instant::now();
        let deadline = started + timeout;
        loop {
            let state = self.state();
            match state {
                ModelState::Ready => return Ok(()),
                ModelState::Failed(reason) => return Err(LifecycleError::Failed(reason)),
                _ => {}
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(state = %state, "Timed out waiting for model");
                return Err(LifecycleError::Timeout {
                    waited: now - started,
                    state,
                });
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Start loading if idle and not ready, then wait for `ready`
    pub async fn ensure_loaded(&self, timeout: Duration) -> Result<(), LifecycleError> {
        if !self.state().is_ready() && !self.is_loading() {
            self.load_model();
        }
        self.ensure_ready(timeout).await
    }
}

impl Drop for ModelLifecycle {
    fn drop(&mut self) {
        if let Some(handle) = self.lock_task().take() {
            handle.abort();
        }
    }
}

async fn run_attempt(loader: Arc<dyn ModelLoader>, shared: Arc<Shared>, attempt: u64) {
    let started = Instant::now();
    let model = loader.describe();
    info!(attempt, "Loading generation model: {}", model);

    if !loader.is_cached().await {
        if !shared.publish(attempt, ModelState::Downloading) {
            return;
        }
        if let Err(e) = loader.download().await {
            error!("Model download failed: {:#}", e);
            shared.publish(attempt, ModelState::Failed(format!("{:#}", e)));
            return;
        }
    }

    if !shared.publish(attempt, ModelState::Loading) {
        return;
    }

    match loader.load().await {
        Ok(provider) => {
            if shared.install(attempt, ExclusiveGenerator::new(provider)) {
                info!(
                    "Generation model ready in {:.2}s: {}",
                    started.elapsed().as_secs_f64(),
                    model
                );
            }
        }
        Err(e) => {
            error!("Model load failed: {:#}", e);
            shared.publish(attempt, ModelState::Failed(format!("{:#}", e)));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
