//! The owning update loop.
//!
//! [`CourierRuntime`] consumes a stream of [`Update`]s and hands them to the
//! [`Dispatcher`]. Each chat's updates are dispatched one at a time, in
//! arrival order; different chats run concurrently, bounded by
//! `dispatch.max_in_flight`. At most `dispatch.max_pending` updates are
//! pulled from the stream ahead of their completion.
//!
//! ```rust,ignore
//! use courier_runtime::CourierRuntime;
//!
//! let runtime = CourierRuntime::builder()
//!     .config_file("config/courier.toml")
//!     .profile("production")
//!     .build(dispatcher)?
//!     .before_start("warm-cache", || async { Ok(()) });
//!
//! // Runs until the stream ends or Ctrl+C / SIGTERM arrives.
//! runtime.run(updates).await?;
//! ```

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::BoxFuture;
use futures::{FutureExt, Stream, StreamExt};
use tokio::signal;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use courier_core::Update;
use courier_framework::Dispatcher;

use crate::config::{ConfigLoader, CourierConfig, validate_config};
use crate::error::{BoxError, RuntimeError, RuntimeResult};
use crate::logging;
use crate::scheduler::{Pending, Scheduler};

type HookFn = Box<dyn Fn() -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

struct Hook {
    name: String,
    run: HookFn,
}

impl Hook {
    fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            run: Box::new(move || f().boxed()),
        }
    }
}

/// Clears the running flag when `start` returns, however it returns.
struct RunningGuard(Arc<AtomicBool>);

impl RunningGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives a [`Dispatcher`] from an update stream.
pub struct CourierRuntime {
    config: CourierConfig,
    dispatcher: Arc<Dispatcher>,
    start_hooks: Vec<Hook>,
    shutdown_hooks: Vec<Hook>,
    running: Arc<AtomicBool>,
}

impl CourierRuntime {
    /// Creates a runtime with default settings.
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self::from_config(&CourierConfig::default(), dispatcher)
    }

    /// Creates a runtime builder that loads configuration from files and
    /// the environment.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from an already loaded configuration and installs
    /// the logging subscriber it describes.
    pub fn from_config(config: &CourierConfig, dispatcher: Dispatcher) -> Self {
        logging::init_from_config(&config.logging);

        info!(
            log_level = %config.logging.level,
            log_format = ?config.logging.format,
            max_in_flight = config.dispatch.max_in_flight,
            "Runtime initialized from configuration"
        );

        Self::assemble(config.clone(), dispatcher)
    }

    fn assemble(config: CourierConfig, dispatcher: Dispatcher) -> Self {
        Self {
            config,
            dispatcher: Arc::new(dispatcher),
            start_hooks: Vec::new(),
            shutdown_hooks: Vec::new(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Adds a hook run after setup, before the first update is pulled.
    ///
    /// Hooks run in registration order; the first failure aborts `start`.
    pub fn before_start<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.start_hooks.push(Hook::new(name, f));
        self
    }

    /// Adds a hook run after in-flight dispatches have drained.
    ///
    /// Failures are logged and the remaining hooks still run.
    pub fn before_shutdown<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.shutdown_hooks.push(Hook::new(name, f));
        self
    }

    pub fn config(&self) -> &CourierConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Publishes the registered commands and configured bot profiles.
    ///
    /// Transport failures are logged; they never stop the bot from starting.
    pub async fn setup(&self) {
        let transport = self.dispatcher.transport();
        let commands = self.dispatcher.commands();

        if self.config.dispatch.sync_commands && !commands.is_empty() {
            match transport.set_commands(commands, None).await {
                Ok(()) => info!(count = commands.len(), "Published bot commands"),
                Err(e) => warn!(error = %e, "Failed to publish bot commands"),
            }
        }

        for profile in self.config.profiles.iter().filter(|p| !p.is_empty()) {
            match transport.set_profile(profile).await {
                Ok(()) => debug!(language = %profile.language_code, "Published bot profile"),
                Err(e) => warn!(
                    language = %profile.language_code,
                    error = %e,
                    "Failed to publish bot profile"
                ),
            }
        }
    }

    /// Consumes `updates` until the stream ends or `token` is cancelled.
    ///
    /// Every dispatch receives a child of `token`. Once no more updates are
    /// pulled, in-flight and queued dispatches get
    /// `dispatch.shutdown_timeout_secs` to finish; after that, queued updates
    /// are discarded, `token` is cancelled and the shutdown hooks and
    /// `Transport::on_shutdown` run.
    pub async fn start<S>(&self, updates: S, token: CancellationToken) -> RuntimeResult<()>
    where
        S: Stream<Item = Update> + Send,
    {
        let Some(_guard) = RunningGuard::acquire(&self.running) else {
            warn!("Runtime is already running");
            return Err(RuntimeError::AlreadyRunning);
        };

        info!(transport = self.dispatcher.transport().id(), "Starting Courier runtime");

        self.setup().await;

        for hook in &self.start_hooks {
            debug!(hook = %hook.name, "Running start hook");
            (hook.run)().await.map_err(|source| RuntimeError::Hook {
                name: hook.name.clone(),
                source,
            })?;
        }

        let tracker = TaskTracker::new();
        let scheduler = Scheduler::new(
            Arc::clone(&self.dispatcher),
            self.config.dispatch.max_in_flight,
            token.clone(),
            tracker.clone(),
        );
        let backlog = Arc::new(Semaphore::new(self.config.dispatch.max_pending.max(1)));
        let mut updates = std::pin::pin!(updates);
        let mut received: u64 = 0;

        info!("Courier runtime is now running");

        loop {
            let slot = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                slot = Arc::clone(&backlog).acquire_owned() => match slot {
                    Ok(slot) => slot,
                    Err(_) => break,
                },
            };

            let update = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                next = updates.next() => match next {
                    Some(update) => update,
                    None => {
                        info!("Update stream ended");
                        break;
                    }
                },
            };

            received += 1;
            scheduler.schedule(Pending { update, slot });
        }

        if token.is_cancelled() {
            info!("Cancellation requested, no longer accepting updates");
        }

        tracker.close();
        let timeout = self.config.dispatch.shutdown_timeout();
        if tokio::time::timeout(timeout, tracker.wait()).await.is_err() {
            warn!(
                workers = tracker.len(),
                chats = scheduler.active_chats(),
                timeout_secs = timeout.as_secs(),
                "Timed out waiting for in-flight dispatches"
            );
            scheduler.abort();
            token.cancel();
        }

        for hook in &self.shutdown_hooks {
            debug!(hook = %hook.name, "Running shutdown hook");
            if let Err(e) = (hook.run)().await {
                error!(hook = %hook.name, error = %e, "Shutdown hook failed");
            }
        }

        self.dispatcher.transport().on_shutdown().await;

        info!(updates = received, "Runtime stopped");
        Ok(())
    }

    /// Runs until the stream ends or `shutdown` completes, whichever is first.
    pub async fn run_until<S, F>(&self, updates: S, shutdown: F) -> RuntimeResult<()>
    where
        S: Stream<Item = Update> + Send,
        F: Future<Output = ()>,
    {
        let token = CancellationToken::new();
        let mut start = std::pin::pin!(self.start(updates, token.clone()));

        tokio::select! {
            result = &mut start => result,
            _ = shutdown => {
                token.cancel();
                start.await
            }
        }
    }

    /// Runs until the stream ends or Ctrl+C / SIGTERM is received.
    pub async fn run<S>(&self, updates: S) -> RuntimeResult<()>
    where
        S: Stream<Item = Update> + Send,
    {
        self.run_until(updates, wait_for_shutdown()).await
    }
}

impl std::fmt::Debug for CourierRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CourierRuntime")
            .field("config", &self.config)
            .field("dispatcher", &self.dispatcher)
            .field("start_hooks", &self.start_hooks.len())
            .field("shutdown_hooks", &self.shutdown_hooks.len())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Waits for Ctrl+C or, on Unix, SIGTERM.
///
/// If a signal handler cannot be installed the error is logged and that
/// signal is never observed.
pub async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to register SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Loads and validates configuration, then creates a [`CourierRuntime`].
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
}

impl RuntimeBuilder {
    /// Searches the current directory and the user config directory.
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new()
                .with_current_dir()
                .with_user_config_dir(),
        }
    }

    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn with_env(mut self) -> Self {
        self.config_loader = self.config_loader.with_env();
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    pub fn merge(mut self, config: CourierConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    pub fn set<V: serde::Serialize>(mut self, key: &str, value: V) -> Self {
        self.config_loader = self.config_loader.set(key, value);
        self
    }

    /// Loads the configuration without building a runtime.
    pub fn load(self) -> RuntimeResult<CourierConfig> {
        let config = self.config_loader.load()?;
        validate_config(&config)?;
        Ok(config)
    }

    pub fn build(self, dispatcher: Dispatcher) -> RuntimeResult<CourierRuntime> {
        let config = self.load()?;
        Ok(CourierRuntime::from_config(&config, dispatcher))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
