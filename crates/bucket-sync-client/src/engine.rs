use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bucket_store::{ChangeEvent, LocalStore, StateStore, Transactional};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::flight::Flight;
use crate::pull::{self, PullOutcome};
use crate::push::{self, PushOutcome};
use crate::transport::Transport;

/// State shared between the engine handle and its agent tasks.
pub(crate) struct Shared<S, T> {
    pub(crate) store: Arc<LocalStore<S>>,
    pub(crate) transport: T,
    pub(crate) config: SyncConfig,
    pub(crate) push_flight: Flight,
    pub(crate) pull_flight: Flight,
    stopped: AtomicBool,
    run: AtomicU64,
    hydrated: AtomicBool,
    last_push_ms: AtomicU64,
    last_pull_ms: AtomicU64,
    reconnect: Notify,
}

impl<S, T> Shared<S, T>
where
    S: StateStore + Transactional,
{
    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Generation of the current run. Bumped by every start and stop.
    pub(crate) fn run(&self) -> u64 {
        self.run.load(Ordering::Acquire)
    }

    /// `true` if the engine stopped, or stopped and started again, since
    /// `run` was read.
    pub(crate) fn is_superseded(&self, run: u64) -> bool {
        self.is_stopped() || self.run() != run
    }

    pub(crate) fn is_hydrated(&self) -> bool {
        self.hydrated.load(Ordering::Acquire)
    }

    pub(crate) fn mark_pulled(&self) {
        self.last_pull_ms
            .store(self.store.now_ms(), Ordering::Release);
        if !self.hydrated.swap(true, Ordering::AcqRel) {
            info!("hydrated from remote snapshot, pushes enabled");
        }
    }

    pub(crate) fn mark_pushed(&self) {
        self.last_push_ms
            .store(self.store.now_ms(), Ordering::Release);
    }
}

/// Point-in-time view of an engine, for hosts and status displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStatus {
    /// Agent tasks are running.
    pub running: bool,
    /// At least one pull has completed.
    pub hydrated: bool,
    /// A push is outstanding.
    pub pushing: bool,
    /// A pull is outstanding.
    pub pulling: bool,
    /// Store clock time of the last accepted push.
    pub last_push_ms: Option<u64>,
    /// Store clock time of the last completed pull.
    pub last_pull_ms: Option<u64>,
}

struct Running {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

/// Client-side sync engine.
///
/// Owns the enabled, hydrated and in-flight flags of one client. Nothing
/// runs until [`start`](Self::start); [`stop`](Self::stop) ends the agent
/// loops and lets any outstanding request finish, discarding its result.
pub struct SyncEngine<S, T> {
    shared: Arc<Shared<S, T>>,
    running: Mutex<Option<Running>>,
}

impl<S, T> SyncEngine<S, T>
where
    S: StateStore + Transactional + Send + 'static,
    T: Transport,
{
    /// Create an engine over a shared store.
    ///
    /// Zero agent intervals are raised to [`MIN_INTERVAL`](crate::MIN_INTERVAL).
    pub fn new(store: Arc<LocalStore<S>>, transport: T, config: SyncConfig) -> Self {
        let config = config.clamp_intervals();
        Self {
            shared: Arc::new(Shared {
                store,
                transport,
                config,
                push_flight: Flight::default(),
                pull_flight: Flight::default(),
                stopped: AtomicBool::new(false),
                run: AtomicU64::new(0),
                hydrated: AtomicBool::new(false),
                last_push_ms: AtomicU64::new(0),
                last_pull_ms: AtomicU64::new(0),
                reconnect: Notify::new(),
            }),
            running: Mutex::new(None),
        }
    }

    /// The store this engine replicates.
    pub fn store(&self) -> &Arc<LocalStore<S>> {
        &self.shared.store
    }

    /// The engine's policy.
    pub fn config(&self) -> &SyncConfig {
        &self.shared.config
    }

    /// Spawn the push, pull and change-listener tasks.
    ///
    /// Must be called from within a Tokio runtime. Starting a running
    /// engine is a no-op.
    pub fn start(&self) {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.is_some() {
            return;
        }
        self.shared.run.fetch_add(1, Ordering::AcqRel);
        self.shared.stopped.store(false, Ordering::Release);
        // Each run hydrates again before its first push.
        self.shared.hydrated.store(false, Ordering::Release);

        let (shutdown, shutdown_rx) = watch::channel(false);
        // Subscribe before returning so writes made right after start are seen.
        let changes = self.shared.store.subscribe();

        let tasks = vec![
            tokio::spawn(pull_loop(self.shared.clone(), shutdown_rx.clone())),
            tokio::spawn(push_loop(self.shared.clone(), shutdown_rx.clone())),
            tokio::spawn(change_loop(self.shared.clone(), changes, shutdown_rx)),
        ];

        info!(
            push_interval = ?self.shared.config.push_interval,
            pull_interval = ?self.shared.config.pull_interval,
            "sync engine started"
        );
        *running = Some(Running { shutdown, tasks });
    }

    /// Stop the agent loops.
    ///
    /// Timers and listeners end; an in-flight request is not cancelled, but
    /// whatever it returns is ignored, even if the engine is started again
    /// before it completes.
    pub fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.shared.stopped.store(true, Ordering::Release);
        self.shared.run.fetch_add(1, Ordering::AcqRel);
        if let Some(Running { shutdown, tasks }) = running {
            let _ = shutdown.send(true);
            // Detach: the loops exit at their next select.
            drop(tasks);
            info!("sync engine stopped");
        }
    }

    /// Signal that the network came back; triggers a pull.
    pub fn notify_reconnect(&self) {
        self.shared.reconnect.notify_one();
    }

    /// Run one push now, subject to the hydration gate and single-flight.
    pub async fn push_now(&self) -> PushOutcome {
        push::push_once(&self.shared).await
    }

    /// Run one pull now, subject to single-flight.
    pub async fn pull_now(&self) -> PullOutcome {
        pull::pull_once(&self.shared).await
    }

    /// `true` once a pull has completed.
    pub fn is_hydrated(&self) -> bool {
        self.shared.is_hydrated()
    }

    /// Current flags and timings.
    pub fn status(&self) -> EngineStatus {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some();
        let since = |v: &AtomicU64| Some(v.load(Ordering::Acquire)).filter(|ms| *ms > 0);
        EngineStatus {
            running,
            hydrated: self.shared.is_hydrated(),
            pushing: self.shared.push_flight.is_active(),
            pulling: self.shared.pull_flight.is_active(),
            last_push_ms: since(&self.shared.last_push_ms),
            last_pull_ms: since(&self.shared.last_pull_ms),
        }
    }
}

impl<S, T> Drop for SyncEngine<S, T> {
    fn drop(&mut self) {
        let running = self
            .running
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.shared.stopped.store(true, Ordering::Release);
        self.shared.run.fetch_add(1, Ordering::AcqRel);
        if let Some(running) = running {
            let _ = running.shutdown.send(true);
        }
    }
}

async fn pull_loop<S, T>(shared: Arc<Shared<S, T>>, mut shutdown: watch::Receiver<bool>)
where
    S: StateStore + Transactional + Send + 'static,
    T: Transport,
{
    let mut ticker = interval(shared.config.pull_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shared.reconnect.notified() => debug!("reconnected, pulling"),
            _ = shutdown.changed() => break,
        }
        pull::pull_once(&shared).await;
    }
}

async fn push_loop<S, T>(shared: Arc<Shared<S, T>>, mut shutdown: watch::Receiver<bool>)
where
    S: StateStore + Transactional + Send + 'static,
    T: Transport,
{
    let mut ticker = interval(shared.config.push_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        push::push_once(&shared).await;
    }
}

async fn change_loop<S, T>(
    shared: Arc<Shared<S, T>>,
    mut changes: broadcast::Receiver<ChangeEvent>,
    mut shutdown: watch::Receiver<bool>,
) where
    S: StateStore + Transactional + Send + 'static,
    T: Transport,
{
    loop {
        let event = tokio::select! {
            event = changes.recv() => event,
            _ = shutdown.changed() => break,
        };
        match event {
            Ok(ChangeEvent::Local { key }) => debug!(%key, "local change, pushing"),
            Ok(ChangeEvent::Remote { .. }) => continue,
            Err(RecvError::Lagged(missed)) => debug!(missed, "change listener lagged, pushing"),
            Err(RecvError::Closed) => break,
        }
        push::push_once(&shared).await;
    }
}
