//! Runtime builder and the [`Runtime`] entry point.
//!
//! A [`Runtime`] bundles a scheduler, a supervisor, a metrics set and the
//! flags root fibers start with. Effects enter it through one of four doors:
//!
//! - [`Runtime::run_fork`]: start a root fiber and return its handle
//! - [`Runtime::run_callback`]: the same, with an exit callback
//! - [`Runtime::run_sync`]: run on the calling thread, failing if the fiber
//!   suspends
//! - [`Runtime::block_on`]: park the calling thread until the fiber exits

use super::config::{RuntimeConfig, UnhandledErrorLog};
use super::env_config;
use super::fiber::{FiberRuntime, RuntimeContext, RuntimeFiber};
use super::fiber_refs::FiberRefs;
use super::handle::Fiber;
use super::scheduler::{ControlledScheduler, Scheduler, SyncScheduler, WorkerScheduler};
use super::supervisor::{NoopSupervisor, Supervisor};
use crate::effect::Effect;
use crate::error::{Error, Result};
use crate::observability::metrics::FiberMetrics;
use crate::tracing_compat::{debug, trace};
use crate::types::value::typed_exit;
use crate::types::{Cause, Data, Exit, FiberId, RuntimeFlags};
use core::fmt;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

/// How long `block_on` parks between scheduler ticks on a controlled runtime.
const CONTROLLED_PARK: Duration = Duration::from_millis(1);

/// Settings made through builder methods. They win over env and file values.
#[derive(Debug, Clone, Default)]
struct Explicit {
    ops_budget: Option<usize>,
    worker_threads: Option<usize>,
    thread_name_prefix: Option<String>,
    interruption: Option<bool>,
    cooperative_yielding: Option<bool>,
    op_supervision: Option<bool>,
    runtime_metrics: Option<bool>,
    current_fiber: Option<bool>,
    unhandled_error_log: Option<UnhandledErrorLog>,
}

impl Explicit {
    fn apply(&self, config: &mut RuntimeConfig) {
        if let Some(v) = self.ops_budget {
            config.ops_budget = v;
        }
        if let Some(v) = self.worker_threads {
            config.worker_threads = v;
        }
        if let Some(ref v) = self.thread_name_prefix {
            config.thread_name_prefix.clone_from(v);
        }
        if let Some(v) = self.interruption {
            config.interruption = v;
        }
        if let Some(v) = self.cooperative_yielding {
            config.cooperative_yielding = v;
        }
        if let Some(v) = self.op_supervision {
            config.op_supervision = v;
        }
        if let Some(v) = self.runtime_metrics {
            config.runtime_metrics = v;
        }
        if let Some(v) = self.current_fiber {
            config.current_fiber = v;
        }
        if let Some(v) = self.unhandled_error_log {
            config.unhandled_error_log = v;
        }
    }
}

enum SchedulerChoice {
    Workers,
    Controlled(Option<u64>),
    Custom(Arc<dyn Scheduler>),
}

/// Builder for runtime configuration.
///
/// Every method consumes the builder and returns it, so calls chain.
pub struct RuntimeBuilder {
    base: RuntimeConfig,
    explicit: Explicit,
    scheduler: SchedulerChoice,
    supervisor: Arc<dyn Supervisor>,
    fiber_refs: FiberRefs,
}

impl RuntimeBuilder {
    /// Create a new builder with default configuration and a worker pool.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base: RuntimeConfig::default(),
            explicit: Explicit::default(),
            scheduler: SchedulerChoice::Workers,
            supervisor: Arc::new(NoopSupervisor),
            fiber_refs: FiberRefs::empty(),
        }
    }

    /// A multi-threaded runtime backed by `worker_threads` OS threads.
    #[must_use]
    pub fn multi_thread() -> Self {
        Self::new()
    }

    /// A runtime driven by a [`ControlledScheduler`] that runs nothing until
    /// ticked. A non-zero `seed` makes task selection pseudo-random but
    /// reproducible; zero keeps FIFO order.
    #[must_use]
    pub fn deterministic(seed: u64) -> Self {
        let mut builder = Self::new();
        builder.scheduler = SchedulerChoice::Controlled((seed != 0).then_some(seed));
        builder
    }

    /// Instructions a fiber runs before a forced yield.
    #[must_use]
    pub fn ops_budget(mut self, budget: usize) -> Self {
        self.explicit.ops_budget = Some(budget);
        self
    }

    /// Number of worker threads for the default scheduler.
    #[must_use]
    pub fn worker_threads(mut self, n: usize) -> Self {
        self.explicit.worker_threads = Some(n);
        self
    }

    /// Name prefix for worker threads.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.explicit.thread_name_prefix = Some(prefix.into());
        self
    }

    /// Whether root fibers start interruptible.
    #[must_use]
    pub fn interruption(mut self, enable: bool) -> Self {
        self.explicit.interruption = Some(enable);
        self
    }

    /// Whether yields go back through the scheduler.
    #[must_use]
    pub fn cooperative_yielding(mut self, enable: bool) -> Self {
        self.explicit.cooperative_yielding = Some(enable);
        self
    }

    /// Whether the supervisor sees every instruction.
    #[must_use]
    pub fn op_supervision(mut self, enable: bool) -> Self {
        self.explicit.op_supervision = Some(enable);
        self
    }

    /// Whether fiber lifecycle metrics are recorded.
    #[must_use]
    pub fn runtime_metrics(mut self, enable: bool) -> Self {
        self.explicit.runtime_metrics = Some(enable);
        self
    }

    /// Whether the running fiber is published in a thread-local.
    #[must_use]
    pub fn current_fiber(mut self, enable: bool) -> Self {
        self.explicit.current_fiber = Some(enable);
        self
    }

    /// Level at which unhandled fiber failures are logged.
    #[must_use]
    pub fn unhandled_error_log(mut self, level: UnhandledErrorLog) -> Self {
        self.explicit.unhandled_error_log = Some(level);
        self
    }

    /// Runs fibers on `scheduler` instead of a worker pool.
    #[must_use]
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = SchedulerChoice::Custom(scheduler);
        self
    }

    /// Reports fiber lifecycles to `supervisor`.
    #[must_use]
    pub fn supervisor(mut self, supervisor: Arc<dyn Supervisor>) -> Self {
        self.supervisor = supervisor;
        self
    }

    /// Fiber refs every root fiber starts with.
    #[must_use]
    pub fn fiber_refs(mut self, refs: FiberRefs) -> Self {
        self.fiber_refs = refs;
        self
    }

    /// Applies `COFIBER_*` environment variables. Values set through builder
    /// methods still take precedence.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        env_config::apply_env_overrides(&mut self.base)?;
        Ok(self)
    }

    /// A builder whose defaults come from a TOML document.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let parsed = env_config::parse_toml_str(toml)?;
        let mut builder = Self::new();
        env_config::apply_toml_config(&mut builder.base, &parsed)?;
        Ok(builder)
    }

    /// A builder whose defaults come from a TOML file.
    #[cfg(feature = "config-file")]
    pub fn from_toml(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let parsed = env_config::parse_toml_file(path.as_ref())?;
        let mut builder = Self::new();
        env_config::apply_toml_config(&mut builder.base, &parsed)?;
        Ok(builder)
    }

    /// The configuration `build` would use.
    #[must_use]
    pub fn resolved_config(&self) -> RuntimeConfig {
        let mut config = self.base.clone();
        self.explicit.apply(&mut config);
        config.normalize();
        config
    }

    /// Build a runtime from this configuration.
    pub fn build(self) -> Result<Runtime> {
        let config = self.resolved_config();
        let mut controlled = None;
        let mut workers = None;
        let scheduler: Arc<dyn Scheduler> = match self.scheduler {
            SchedulerChoice::Workers => {
                let pool = Arc::new(WorkerScheduler::new(
                    config.worker_threads,
                    &config.thread_name_prefix,
                )?);
                workers = Some(Arc::clone(&pool));
                pool
            }
            SchedulerChoice::Controlled(seed) => {
                let sched = Arc::new(seed.map_or_else(ControlledScheduler::new, |seed| {
                    ControlledScheduler::with_seed(seed)
                }));
                controlled = Some(Arc::clone(&sched));
                sched
            }
            SchedulerChoice::Custom(scheduler) => scheduler,
        };
        let context = Arc::new(RuntimeContext {
            scheduler,
            supervisor: self.supervisor,
            metrics: Arc::new(FiberMetrics::new()),
            ops_budget: config.ops_budget,
            unhandled_error_log: config.unhandled_error_log,
        });
        debug!(
            ops_budget = config.ops_budget,
            flags = ?config.runtime_flags(),
            "runtime built"
        );
        Ok(Runtime {
            context,
            flags: config.runtime_flags(),
            config,
            refs: self.fiber_refs,
            controlled,
            workers,
        })
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RuntimeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeBuilder")
            .field("config", &self.resolved_config())
            .finish_non_exhaustive()
    }
}

/// Runs effects as fibers.
pub struct Runtime {
    context: Arc<RuntimeContext>,
    config: RuntimeConfig,
    flags: RuntimeFlags,
    refs: FiberRefs,
    controlled: Option<Arc<ControlledScheduler>>,
    workers: Option<Arc<WorkerScheduler>>,
}

struct ExitSlot<A, E> {
    exit: Mutex<Option<Exit<A, E>>>,
    ready: Condvar,
}

impl Runtime {
    /// A runtime with default configuration.
    pub fn new() -> Result<Self> {
        RuntimeBuilder::new().build()
    }

    /// The resolved configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Fiber lifecycle metrics. Only updated for fibers running with the
    /// `RuntimeMetrics` flag.
    #[must_use]
    pub fn metrics(&self) -> &FiberMetrics {
        &self.context.metrics
    }

    /// The scheduler fibers run on.
    #[must_use]
    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.context.scheduler
    }

    /// The controlled scheduler of a deterministic runtime.
    #[must_use]
    pub fn controlled_scheduler(&self) -> Option<&Arc<ControlledScheduler>> {
        self.controlled.as_ref()
    }

    /// Flags root fibers start with.
    #[must_use]
    pub fn runtime_flags(&self) -> RuntimeFlags {
        self.flags
    }

    /// Fiber refs root fibers start with.
    #[must_use]
    pub fn fiber_refs(&self) -> &FiberRefs {
        &self.refs
    }

    /// Stops the worker pool, if this runtime owns one. Fibers that have not
    /// finished by then stop making progress.
    pub fn shutdown(&self) {
        if let Some(workers) = &self.workers {
            workers.shutdown();
        }
    }

    fn make_fiber(&self, context: Arc<RuntimeContext>) -> RuntimeFiber {
        let id = FiberId::next();
        let refs = self.refs.fork_as(id);
        FiberRuntime::new(id, context, refs, self.flags)
    }

    fn launch<A: Data, E: Data>(
        &self,
        fiber: &RuntimeFiber,
        effect: Effect<A, E>,
        on_exit: Option<Box<dyn FnOnce(&Exit<A, E>) + Send>>,
    ) {
        let instr = effect.into_instruction();
        self.context
            .supervisor
            .on_start(&self.refs, &instr, None, fiber);
        fiber.install_supervision(self.flags);
        if let Some(on_exit) = on_exit {
            fiber.add_observer_unstarted(Box::new(move |exit| on_exit(&typed_exit::<A, E>(exit))));
        }
        trace!(fiber_id = %fiber.id(), "root fiber starting");
        fiber.start(instr);
    }

    /// Starts `effect` in a root fiber. It runs on the calling thread until
    /// its first suspension or yield.
    pub fn run_fork<A: Data, E: Data>(&self, effect: Effect<A, E>) -> Fiber<A, E> {
        let fiber = self.make_fiber(Arc::clone(&self.context));
        self.launch(&fiber, effect, None);
        Fiber::from_runtime(fiber)
    }

    /// Like [`run_fork`](Self::run_fork), calling `on_exit` with the exit.
    pub fn run_callback<A: Data, E: Data, F>(&self, effect: Effect<A, E>, on_exit: F) -> Fiber<A, E>
    where
        F: FnOnce(&Exit<A, E>) + Send + 'static,
    {
        let fiber = self.make_fiber(Arc::clone(&self.context));
        self.launch(&fiber, effect, Some(Box::new(on_exit)));
        Fiber::from_runtime(fiber)
    }

    /// Runs `effect` to completion on the calling thread.
    ///
    /// Returns [`Error::AsyncFiber`] if the fiber suspends on an
    /// asynchronous operation. The fiber then keeps going on this runtime's
    /// scheduler.
    pub fn run_sync<A: Data, E: Data>(&self, effect: Effect<A, E>) -> Result<Exit<A, E>> {
        let sync = Arc::new(SyncScheduler::new(Arc::clone(&self.context.scheduler)));
        let context = Arc::new(self.context.with_scheduler(Arc::clone(&sync) as Arc<dyn Scheduler>));
        let fiber = self.make_fiber(context);
        self.launch(&fiber, effect, None);
        sync.flush();
        match fiber.poll() {
            Some(exit) => Ok(typed_exit(&exit)),
            None => {
                debug!(fiber_id = %fiber.id(), "synchronous run suspended");
                Err(Error::AsyncFiber(fiber.id()))
            }
        }
    }

    /// Runs `effect` and parks the calling thread until it exits.
    ///
    /// On a deterministic runtime the calling thread drives the controlled
    /// scheduler itself.
    pub fn block_on<A: Data, E: Data>(&self, effect: Effect<A, E>) -> Exit<A, E> {
        let slot = Arc::new(ExitSlot {
            exit: Mutex::new(None),
            ready: Condvar::new(),
        });
        let writer = Arc::clone(&slot);
        self.run_callback(effect, move |exit: &Exit<A, E>| {
            *writer.exit.lock() = Some(exit.clone());
            writer.ready.notify_all();
        });

        let mut guard = slot.exit.lock();
        loop {
            if let Some(exit) = guard.take() {
                return exit;
            }
            match &self.controlled {
                Some(controlled) => {
                    let progressed = parking_lot::MutexGuard::unlocked(&mut guard, || {
                        controlled.tick()
                    });
                    if !progressed && guard.is_none() {
                        slot.ready.wait_for(&mut guard, CONTROLLED_PARK);
                    }
                }
                None => slot.ready.wait(&mut guard),
            }
        }
    }

    /// Runs `effect` to completion and splits its exit. A fiber stopped only
    /// by interruption is reported as [`Error::Interrupted`].
    pub fn block_on_result<A: Data, E: Data>(
        &self,
        effect: Effect<A, E>,
    ) -> Result<core::result::Result<A, Cause<E>>> {
        let fiber_id = Arc::new(Mutex::new(FiberId::None));
        let recorded = Arc::clone(&fiber_id);
        let tagged = Effect::<FiberId>::fiber_id()
            .map(move |id| *recorded.lock() = id)
            .widen_error::<E>()
            .and_then(effect);
        match self.block_on(tagged) {
            Exit::Failure(cause) if cause.is_interrupted_only() => {
                Err(Error::Interrupted(*fiber_id.lock()))
            }
            exit => Ok(exit.into_result()),
        }
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("flags", &self.flags)
            .field("deterministic", &self.controlled.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    // =========================================================================
    // Builder
    // =========================================================================

    #[test]
    fn builder_setters_override_defaults() {
        init_test("builder_setters_override_defaults");
        let config = RuntimeBuilder::deterministic(0)
            .ops_budget(32)
            .thread_name_prefix("app")
            .runtime_metrics(true)
            .unhandled_error_log(UnhandledErrorLog::Off)
            .resolved_config();
        assert_eq!(config.ops_budget, 32);
        assert_eq!(config.thread_name_prefix, "app");
        assert!(config.runtime_metrics);
        assert_eq!(config.unhandled_error_log, UnhandledErrorLog::Off);
        crate::test_complete!("builder_setters_override_defaults");
    }

    #[test]
    fn builder_normalizes_zero_budget() {
        init_test("builder_normalizes_zero_budget");
        let config = RuntimeBuilder::deterministic(0).ops_budget(0).resolved_config();
        assert_eq!(config.ops_budget, 1);
        crate::test_complete!("builder_normalizes_zero_budget");
    }

    #[test]
    fn explicit_settings_beat_env() {
        init_test("explicit_settings_beat_env");
        let _guard = crate::test_utils::env_lock();
        std::env::set_var(env_config::ENV_OPS_BUDGET, "99");
        let config = RuntimeBuilder::deterministic(0)
            .ops_budget(7)
            .with_env_overrides()
            .map(|b| b.resolved_config());
        std::env::remove_var(env_config::ENV_OPS_BUDGET);
        assert_eq!(config.map(|c| c.ops_budget).ok(), Some(7));
        crate::test_complete!("explicit_settings_beat_env");
    }

    #[test]
    fn deterministic_runtime_exposes_controlled_scheduler() {
        init_test("deterministic_runtime_exposes_controlled_scheduler");
        let runtime = RuntimeBuilder::deterministic(0).build().unwrap();
        assert!(runtime.controlled_scheduler().is_some());
        assert_eq!(runtime.runtime_flags(), RuntimeFlags::DEFAULT);
        crate::test_complete!("deterministic_runtime_exposes_controlled_scheduler");
    }

    // =========================================================================
    // Entry points
    // =========================================================================

    #[test]
    fn run_sync_completes_pure_effects() {
        init_test("run_sync_completes_pure_effects");
        let runtime = RuntimeBuilder::deterministic(0).build().unwrap();
        let exit = runtime
            .run_sync(Effect::<i32, String>::succeed(20).map(|n| n + 1))
            .unwrap();
        assert_eq!(exit.into_result().ok(), Some(21));
        crate::test_complete!("run_sync_completes_pure_effects");
    }

    #[test]
    fn run_sync_reports_suspension() {
        init_test("run_sync_reports_suspension");
        let runtime = RuntimeBuilder::deterministic(0).build().unwrap();
        let result = runtime.run_sync(Effect::<(), String>::never());
        assert!(matches!(result, Err(Error::AsyncFiber(_))));
        crate::test_complete!("run_sync_reports_suspension");
    }

    #[test]
    fn run_fork_runs_inline_until_suspension() {
        init_test("run_fork_runs_inline_until_suspension");
        let runtime = RuntimeBuilder::deterministic(0).build().unwrap();
        let fiber = runtime.run_fork(Effect::<u8>::succeed(4));
        assert!(matches!(fiber.poll(), Some(Exit::Success(4))));
        crate::test_complete!("run_fork_runs_inline_until_suspension");
    }

    #[test]
    fn block_on_drives_controlled_scheduler() {
        init_test("block_on_drives_controlled_scheduler");
        let runtime = RuntimeBuilder::deterministic(0).build().unwrap();
        let effect = Effect::<()>::yield_now().and_then(Effect::<u32>::succeed(9));
        assert!(matches!(runtime.block_on(effect), Exit::Success(9)));
        crate::test_complete!("block_on_drives_controlled_scheduler");
    }

    #[test]
    fn block_on_result_reports_interruption() {
        init_test("block_on_result_reports_interruption");
        let runtime = RuntimeBuilder::deterministic(0).build().unwrap();
        let result = runtime.block_on_result(Effect::<(), String>::interrupt());
        assert!(matches!(result, Err(Error::Interrupted(_))));
        crate::test_complete!("block_on_result_reports_interruption");
    }

    #[test]
    fn run_callback_sees_typed_exit() {
        init_test("run_callback_sees_typed_exit");
        let runtime = RuntimeBuilder::deterministic(0).build().unwrap();
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        runtime.run_callback(Effect::<i32, String>::fail("no".into()), move |exit| {
            *sink.lock() = Some(exit.clone());
        });
        let exit = seen.lock().take();
        assert!(matches!(
            exit,
            Some(Exit::Failure(ref cause)) if cause.failures() == vec![&"no".to_string()]
        ));
        crate::test_complete!("run_callback_sees_typed_exit");
    }
}
