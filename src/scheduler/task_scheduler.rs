//! Owner-thread and async task scheduling across host variants.
//!
//! A [`TaskScheduler`] owns the threads mutations are allowed on. With a
//! single-owner host there is one global owner thread, started at
//! construction. With a region-partitioned host each region gets its own
//! owner once [`TaskScheduler::load_region`] reports it available; work for a
//! region nobody owns yet is parked and released by that liveness signal.
//!
//! Async tasks, delays and repeating timers run on a small tokio runtime.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::{Handle, Runtime};
use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior};

use crate::core::config::SchedulerConfig;
use crate::core::{Error, Result};
use crate::world::CellPos;

use super::host::{HostCapability, OwnerKey, RegionCoord};
use super::owner::{current_owner, Job, OwnerThread};
use super::task::{
    panic_message, SchedulerStats, TaskControl, TaskGuard, TaskHandle, TaskKind, TaskResult,
};

static NEXT_SCHEDULER_ID: AtomicU64 = AtomicU64::new(1);

type RepeatFn = Arc<dyn Fn() -> TaskResult + Send + Sync + 'static>;

/// Where an owner task wants to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Target {
    /// No location: the global owner, or a bootstrap region
    Any,
    /// The owner of a specific key
    Key(OwnerKey),
}

/// Owner work waiting for a region to become available.
enum Deferred {
    Once {
        target: Target,
        job: Job,
    },
    Repeating {
        target: Target,
        task: RepeatFn,
        interval: Duration,
        handle: TaskHandle,
        control: Arc<TaskControl>,
    },
}

impl Deferred {
    fn target(&self) -> Target {
        match self {
            Deferred::Once { target, .. } | Deferred::Repeating { target, .. } => *target,
        }
    }
}

struct Shared {
    id: u64,
    host: HostCapability,
    runtime: Handle,
    guard: TaskGuard,
    owners: RwLock<HashMap<OwnerKey, OwnerThread>>,
    /// Regions in the order they were loaded; the first live one bootstraps
    /// location-less work.
    load_order: Mutex<Vec<RegionCoord>>,
    deferred: Mutex<Vec<Deferred>>,
    controls: Mutex<HashMap<u64, Arc<TaskControl>>>,
    next_task: AtomicU64,
    shut_down: AtomicBool,
}

impl Shared {
    fn next_handle(&self) -> TaskHandle {
        TaskHandle(self.next_task.fetch_add(1, Ordering::Relaxed))
    }

    fn register(&self) -> (TaskHandle, Arc<TaskControl>) {
        let handle = self.next_handle();
        let control = Arc::new(TaskControl::default());
        self.controls.lock().insert(handle.0, control.clone());
        (handle, control)
    }

    fn forget(&self, handle: TaskHandle) {
        self.controls.lock().remove(&handle.0);
    }

    fn normalize(&self, target: Target) -> Target {
        match (self.host, target) {
            // The global key means "no location" on a partitioned host
            (HostCapability::RegionPartitioned { .. }, Target::Key(OwnerKey::Global)) => Target::Any,
            _ => target,
        }
    }

    /// Owner that should run work for `target`, if one exists right now.
    fn resolve(&self, target: Target) -> Option<OwnerKey> {
        match (self.host, self.normalize(target)) {
            (HostCapability::SingleOwnerThread, _) => Some(OwnerKey::Global),
            (HostCapability::RegionPartitioned { .. }, Target::Key(key)) => {
                self.owners.read().contains_key(&key).then_some(key)
            }
            (HostCapability::RegionPartitioned { .. }, Target::Any) => {
                let owners = self.owners.read();
                self.load_order
                    .lock()
                    .iter()
                    .map(|region| OwnerKey::Region(*region))
                    .find(|key| owners.contains_key(key))
            }
        }
    }

    fn is_current_owner_of(&self, target: Target) -> bool {
        match current_owner() {
            Some((id, key)) if id == self.id => match self.normalize(target) {
                Target::Any => true,
                Target::Key(wanted) => wanted == key,
            },
            _ => false,
        }
    }

    fn submit_to(&self, key: OwnerKey, job: Job) -> std::result::Result<(), Job> {
        match self.owners.read().get(&key) {
            Some(owner) => owner.submit(job),
            None => Err(job),
        }
    }

    /// Queue `job` to its owner, parking it when no owner exists yet.
    fn dispatch(&self, target: Target, job: Job) {
        if self.shut_down.load(Ordering::Acquire) {
            log::debug!("Scheduler {} is shut down; dropping owner job", self.id);
            return;
        }
        // Resolve under the deferred lock so a concurrent load_region either
        // sees this job parked or we see its owner.
        let mut deferred = self.deferred.lock();
        let job = match self.resolve(target) {
            Some(key) => match self.submit_to(key, job) {
                Ok(()) => return,
                Err(job) => job,
            },
            None => job,
        };
        self.guard.deferred.fetch_add(1, Ordering::Relaxed);
        log::debug!("No owner for {:?} yet; deferring job", target);
        deferred.push(Deferred::Once { target, job });
    }

    /// Wrap a one-shot body so it honours cancellation and runs guarded.
    fn wrap_once<F>(self: &Arc<Self>, handle: TaskHandle, control: Arc<TaskControl>, task: F) -> Job
    where
        F: FnOnce() -> TaskResult + Send + 'static,
    {
        let shared = self.clone();
        Box::new(move || {
            if !control.is_cancelled() {
                shared.guard.run(TaskKind::Owner, task);
            }
            shared.forget(handle);
        })
    }

    fn start_owner_timer(
        self: &Arc<Self>,
        target: Target,
        task: RepeatFn,
        interval: Duration,
        handle: TaskHandle,
        control: Arc<TaskControl>,
    ) {
        if control.is_cancelled() {
            self.forget(handle);
            return;
        }
        let shared = self.clone();
        let timer_control = control.clone();
        let timer = self.runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Set while an invocation is queued or running; ticks that find
            // it set are skipped instead of piling up on a slow owner.
            let busy = Arc::new(AtomicBool::new(false));
            loop {
                ticker.tick().await;
                if timer_control.is_cancelled() || shared.shut_down.load(Ordering::Acquire) {
                    break;
                }
                if busy.swap(true, Ordering::AcqRel) {
                    log::trace!("Repeating task {} still busy; skipping tick", handle.0);
                    continue;
                }
                let job_shared = shared.clone();
                let job_control = timer_control.clone();
                let job_task = task.clone();
                let job_busy = busy.clone();
                let job: Job = Box::new(move || {
                    if !job_control.is_cancelled() {
                        job_shared.guard.run(TaskKind::Owner, || job_task());
                    }
                    job_busy.store(false, Ordering::Release);
                });
                let submitted = match shared.resolve(target) {
                    Some(key) => shared.submit_to(key, job).is_ok(),
                    None => false,
                };
                if !submitted {
                    busy.store(false, Ordering::Release);
                    log::debug!("Repeating task {} has no owner this tick", handle.0);
                }
            }
            shared.forget(handle);
        });
        control.set_timer(timer.abort_handle());
    }

    /// Hand parked work to owners that now exist.
    fn release_deferred(self: &Arc<Self>) {
        let mut deferred = self.deferred.lock();
        let parked = std::mem::take(&mut *deferred);
        let total = parked.len();
        for item in parked {
            let Some(key) = self.resolve(item.target()) else {
                deferred.push(item);
                continue;
            };
            match item {
                Deferred::Once { target, job } => {
                    if let Err(job) = self.submit_to(key, job) {
                        deferred.push(Deferred::Once { target, job });
                    }
                }
                Deferred::Repeating {
                    target,
                    task,
                    interval,
                    handle,
                    control,
                } => self.start_owner_timer(target, task, interval, handle, control),
            }
        }
        let still_parked = deferred.len();
        if total > 0 {
            log::debug!(
                "Released {} deferred tasks ({} still waiting for an owner)",
                total - still_parked,
                still_parked
            );
        }
    }
}

/// Result of work handed to an owner, collected later.
pub struct Reply<T> {
    key: OwnerKey,
    inner: ReplyInner<T>,
}

enum ReplyInner<T> {
    Ready(T),
    Pending(oneshot::Receiver<T>),
}

impl<T> Reply<T> {
    /// Block until the owner has run the work.
    ///
    /// Must not be called from async code on a tokio worker thread; the
    /// blocking receive panics there. Blocking pool threads are fine.
    pub fn wait(self) -> Result<T> {
        let key = self.key;
        match self.inner {
            ReplyInner::Ready(value) => Ok(value),
            ReplyInner::Pending(rx) => rx.blocking_recv().map_err(|_| {
                Error::OwnerUnavailable(format!("work on {} did not complete", key))
            }),
        }
    }

    /// Whether the work already ran inline.
    pub fn is_ready(&self) -> bool {
        matches!(self.inner, ReplyInner::Ready(_))
    }
}

/// Schedules work on owner threads and on an async pool.
pub struct TaskScheduler {
    shared: Arc<Shared>,
    runtime: Option<Runtime>,
}

impl TaskScheduler {
    /// Create a scheduler for the given host.
    pub fn new(config: &SchedulerConfig) -> Result<Self> {
        config.validate()?;
        let id = NEXT_SCHEDULER_ID.fetch_add(1, Ordering::Relaxed);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.async_workers)
            .thread_name(format!("cellbatch-async-{}", id))
            .enable_time()
            .build()?;

        let mut owners = HashMap::new();
        if config.host == HostCapability::SingleOwnerThread {
            let owner = OwnerThread::spawn(id, OwnerKey::Global)?;
            owners.insert(OwnerKey::Global, owner);
        }

        let shared = Arc::new(Shared {
            id,
            host: config.host,
            runtime: runtime.handle().clone(),
            guard: TaskGuard::default(),
            owners: RwLock::new(owners),
            load_order: Mutex::new(Vec::new()),
            deferred: Mutex::new(Vec::new()),
            controls: Mutex::new(HashMap::new()),
            next_task: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
        });

        log::info!(
            "Task scheduler {} started ({:?}, {} async workers)",
            id,
            config.host,
            config.async_workers
        );

        Ok(Self {
            shared,
            runtime: Some(runtime),
        })
    }

    /// Scheduler for a single-owner host with default settings.
    pub fn single_owner() -> Result<Self> {
        Self::new(&SchedulerConfig::default())
    }

    /// Host variant this scheduler was built for.
    pub fn host(&self) -> HostCapability {
        self.shared.host
    }

    /// Owner responsible for `pos`.
    pub fn owner_key(&self, pos: CellPos) -> OwnerKey {
        self.shared.host.owner_key(pos)
    }

    /// Whether the calling thread is one of this scheduler's owners.
    pub fn is_owner_thread(&self) -> bool {
        matches!(current_owner(), Some((id, _)) if id == self.shared.id)
    }

    /// Whether the calling thread owns `key`.
    pub fn is_owner_of(&self, key: OwnerKey) -> bool {
        self.shared.is_current_owner_of(Target::Key(key))
    }

    /// Thread id of the owner for `key`, if it is running.
    pub fn owner_thread_id(&self, key: OwnerKey) -> Option<ThreadId> {
        self.shared.owners.read().get(&key).map(OwnerThread::thread_id)
    }

    /// Regions currently owned, in load order.
    pub fn loaded_regions(&self) -> Vec<RegionCoord> {
        self.shared.load_order.lock().clone()
    }

    /// Counters for completed, failed and deferred work.
    pub fn stats(&self) -> SchedulerStats {
        self.shared.guard.stats()
    }

    // --- Owner tasks ---

    /// Run `task` on an owner thread. Inline when already on one.
    pub fn run_on_owner<F>(&self, task: F) -> TaskHandle
    where
        F: FnOnce() -> TaskResult + Send + 'static,
    {
        self.submit_owner(Target::Any, task)
    }

    /// Run `task` on the owner of `pos`. Inline when already on it.
    pub fn run_on_owner_at<F>(&self, pos: CellPos, task: F) -> TaskHandle
    where
        F: FnOnce() -> TaskResult + Send + 'static,
    {
        self.submit_owner(Target::Key(self.owner_key(pos)), task)
    }

    /// Run `task` on the owner for `key`. Inline when already on it.
    pub fn run_on_owner_in<F>(&self, key: OwnerKey, task: F) -> TaskHandle
    where
        F: FnOnce() -> TaskResult + Send + 'static,
    {
        self.submit_owner(Target::Key(key), task)
    }

    fn submit_owner<F>(&self, target: Target, task: F) -> TaskHandle
    where
        F: FnOnce() -> TaskResult + Send + 'static,
    {
        if self.shared.is_current_owner_of(target) {
            let handle = self.shared.next_handle();
            self.shared.guard.run(TaskKind::Owner, task);
            return handle;
        }
        let (handle, control) = self.shared.register();
        let job = self.shared.wrap_once(handle, control, task);
        self.shared.dispatch(target, job);
        handle
    }

    /// Run `f` on the owner for `key` and hand back its result.
    ///
    /// Runs inline when the caller already owns `key`. A panic inside `f` is
    /// contained on the owner and surfaces as [`Error::OwnerUnavailable`].
    pub fn submit_with_reply<T, F>(&self, key: OwnerKey, f: F) -> Reply<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let target = Target::Key(key);
        if self.shared.is_current_owner_of(target) {
            return Reply {
                key,
                inner: ReplyInner::Ready(f()),
            };
        }
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => {
                let _ = tx.send(value);
            }
            Err(payload) => {
                log::error!("Owner call on {} panicked: {}", key, panic_message(payload.as_ref()));
            }
        });
        self.shared.dispatch(target, job);
        Reply {
            key,
            inner: ReplyInner::Pending(rx),
        }
    }

    /// Run `f` on the owner for `key`, blocking until it returns.
    pub fn call_on_owner<T, F>(&self, key: OwnerKey, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.submit_with_reply(key, f).wait()
    }

    /// Run `task` on an owner after `delay`.
    pub fn run_on_owner_after_delay<F>(&self, task: F, delay: Duration) -> Result<TaskHandle>
    where
        F: FnOnce() -> TaskResult + Send + 'static,
    {
        self.schedule_owner_delayed(Target::Any, task, delay)
    }

    /// Run `task` on the owner of `pos` after `delay`.
    pub fn run_on_owner_after_delay_at<F>(&self, pos: CellPos, task: F, delay: Duration) -> Result<TaskHandle>
    where
        F: FnOnce() -> TaskResult + Send + 'static,
    {
        self.schedule_owner_delayed(Target::Key(self.owner_key(pos)), task, delay)
    }

    fn schedule_owner_delayed<F>(&self, target: Target, task: F, delay: Duration) -> Result<TaskHandle>
    where
        F: FnOnce() -> TaskResult + Send + 'static,
    {
        require_positive(delay, "delay")?;
        let (handle, control) = self.shared.register();
        let shared = self.shared.clone();
        let job_control = control.clone();
        let timer = self.shared.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if job_control.is_cancelled() {
                shared.forget(handle);
                return;
            }
            let job = shared.wrap_once(handle, job_control, task);
            shared.dispatch(target, job);
        });
        control.set_timer(timer.abort_handle());
        Ok(handle)
    }

    /// Run `task` on an owner every `interval`, first after one interval.
    ///
    /// On a partitioned host with no region loaded the timer does not start
    /// until a region becomes available.
    pub fn run_on_owner_repeating<F>(&self, task: F, interval: Duration) -> Result<TaskHandle>
    where
        F: Fn() -> TaskResult + Send + Sync + 'static,
    {
        self.schedule_owner_repeating(Target::Any, Arc::new(task), interval)
    }

    /// Run `task` on the owner of `pos` every `interval`.
    pub fn run_on_owner_repeating_at<F>(&self, pos: CellPos, task: F, interval: Duration) -> Result<TaskHandle>
    where
        F: Fn() -> TaskResult + Send + Sync + 'static,
    {
        self.schedule_owner_repeating(Target::Key(self.owner_key(pos)), Arc::new(task), interval)
    }

    fn schedule_owner_repeating(&self, target: Target, task: RepeatFn, interval: Duration) -> Result<TaskHandle> {
        require_positive(interval, "interval")?;
        let (handle, control) = self.shared.register();

        let mut deferred = self.shared.deferred.lock();
        if self.shared.resolve(target).is_some() {
            drop(deferred);
            self.shared.start_owner_timer(target, task, interval, handle, control);
        } else {
            self.shared.guard.deferred.fetch_add(1, Ordering::Relaxed);
            log::debug!("No owner for repeating task {} yet; deferring", handle.0);
            deferred.push(Deferred::Repeating {
                target,
                task,
                interval,
                handle,
                control,
            });
        }
        Ok(handle)
    }

    // --- Async tasks ---

    /// Run `task` on the async worker pool.
    pub fn run_async<F>(&self, task: F) -> TaskHandle
    where
        F: FnOnce() -> TaskResult + Send + 'static,
    {
        let (handle, control) = self.shared.register();
        let shared = self.shared.clone();
        self.shared.runtime.spawn_blocking(move || {
            if !control.is_cancelled() {
                shared.guard.run(TaskKind::Async, task);
            }
            shared.forget(handle);
        });
        handle
    }

    /// Run `task` on the async pool after `delay`.
    pub fn run_async_after_delay<F>(&self, task: F, delay: Duration) -> Result<TaskHandle>
    where
        F: FnOnce() -> TaskResult + Send + 'static,
    {
        require_positive(delay, "delay")?;
        let (handle, control) = self.shared.register();
        let shared = self.shared.clone();
        let job_control = control.clone();
        let timer = self.shared.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if !job_control.is_cancelled() {
                let run_shared = shared.clone();
                let _ = tokio::task::spawn_blocking(move || {
                    run_shared.guard.run(TaskKind::Async, task);
                })
                .await;
            }
            shared.forget(handle);
        });
        control.set_timer(timer.abort_handle());
        Ok(handle)
    }

    /// Run `task` on the async pool every `interval`, first after one
    /// interval. Invocations never overlap.
    pub fn run_async_repeating<F>(&self, task: F, interval: Duration) -> Result<TaskHandle>
    where
        F: Fn() -> TaskResult + Send + Sync + 'static,
    {
        require_positive(interval, "interval")?;
        let (handle, control) = self.shared.register();
        let task: RepeatFn = Arc::new(task);
        let shared = self.shared.clone();
        let timer_control = control.clone();
        let timer = self.shared.runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if timer_control.is_cancelled() {
                    break;
                }
                let run_shared = shared.clone();
                let run_task = task.clone();
                let joined = tokio::task::spawn_blocking(move || {
                    run_shared.guard.run(TaskKind::Async, || run_task());
                })
                .await;
                if joined.is_err() {
                    break;
                }
            }
            shared.forget(handle);
        });
        control.set_timer(timer.abort_handle());
        Ok(handle)
    }

    /// Stop future invocations of a task. Returns false when the task is
    /// unknown or already finished. A running invocation is not interrupted.
    pub fn cancel(&self, handle: TaskHandle) -> bool {
        let control = self.shared.controls.lock().remove(&handle.0);
        match control {
            Some(control) => {
                control.cancel();
                log::debug!("Cancelled task {}", handle.0);
                true
            }
            None => false,
        }
    }

    // --- Region lifecycle ---

    /// Liveness signal: `region` is available. Starts its owner thread and
    /// releases work that was waiting for it.
    pub fn load_region(&self, region: RegionCoord) -> Result<()> {
        if !self.shared.host.is_region_partitioned() {
            return Err(Error::Unsupported(
                "regions are not partitioned on a single-owner host".to_string(),
            ));
        }
        let key = OwnerKey::Region(region);
        {
            let mut owners = self.shared.owners.write();
            if owners.contains_key(&key) {
                return Ok(());
            }
            let owner = OwnerThread::spawn(self.shared.id, key)?;
            owners.insert(key, owner);
        }
        self.shared.load_order.lock().push(region);
        log::info!("{} loaded; owner thread started", region);
        self.shared.release_deferred();
        Ok(())
    }

    /// `region` went away. Its owner finishes queued work and exits.
    /// Returns false if the region was not loaded.
    pub fn unload_region(&self, region: RegionCoord) -> Result<bool> {
        if !self.shared.host.is_region_partitioned() {
            return Err(Error::Unsupported(
                "regions are not partitioned on a single-owner host".to_string(),
            ));
        }
        let owner = self.shared.owners.write().remove(&OwnerKey::Region(region));
        self.shared.load_order.lock().retain(|r| *r != region);
        match owner {
            Some(owner) => {
                log::info!("{} unloaded; stopping {}", region, owner.key());
                owner.shutdown();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.shared.shut_down.store(true, Ordering::Release);

        let controls: Vec<_> = self.shared.controls.lock().drain().map(|(_, c)| c).collect();
        for control in controls {
            control.cancel();
        }
        let parked = std::mem::take(&mut *self.shared.deferred.lock());
        if !parked.is_empty() {
            log::warn!("Dropping {} tasks still waiting for an owner", parked.len());
        }

        let owners: Vec<_> = self.shared.owners.write().drain().map(|(_, o)| o).collect();
        for owner in owners {
            owner.shutdown();
        }

        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
        log::debug!("Task scheduler {} shut down", self.shared.id);
    }
}

fn require_positive(duration: Duration, what: &str) -> Result<()> {
    if duration.is_zero() {
        return Err(Error::InvalidSchedule(format!("{} must be greater than zero", what)));
    }
    Ok(())
}
