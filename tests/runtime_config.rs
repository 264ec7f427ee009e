//! The runtime surface: builder settings, env and TOML configuration,
//! supervisors, metrics and the synchronous entry points.

#[macro_use]
mod common;

use common::*;
use cofiber::runtime::env_config::{ALL_ENV_VARS, ENV_OPS_BUDGET, ENV_RUNTIME_METRICS};
use cofiber::runtime::{current_fiber_id, RuntimeBuilder, SupervisorExt, TrackingSupervisor};
use cofiber::{Effect, Error, Exit, FiberId, RuntimeFlags};
use std::sync::{Arc, Mutex};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn init_test(name: &str) {
    init_test_logging();
    test_phase!(name);
}

fn clear_env() {
    for var in ALL_ENV_VARS {
        std::env::remove_var(var);
    }
}

// ============================================================================
// Builder and configuration sources
// ============================================================================

#[test]
fn default_runtime_uses_default_flags() {
    init_test("default_runtime_uses_default_flags");
    let runtime = test_runtime();

    assert_eq!(runtime.runtime_flags(), RuntimeFlags::DEFAULT);
    assert_exit_success!(
        runtime.block_on(Effect::<RuntimeFlags>::runtime_flags()),
        RuntimeFlags::DEFAULT
    );
    test_complete!("default_runtime_uses_default_flags");
}

#[test]
fn disabled_interruption_reaches_root_fibers() {
    init_test("disabled_interruption_reaches_root_fibers");
    let runtime = RuntimeBuilder::deterministic(0)
        .interruption(false)
        .build()
        .expect("runtime builds");

    let exit = runtime.block_on(Effect::<RuntimeFlags>::runtime_flags());
    let Exit::Success(flags) = exit else {
        panic!("flags readable");
    };
    assert!(!flags.interruption());
    assert!(!runtime.config().interruption);
    test_complete!("disabled_interruption_reaches_root_fibers");
}

#[test]
fn env_overrides_apply_below_explicit_settings() {
    init_test("env_overrides_apply_below_explicit_settings");
    let _guard = ENV_LOCK
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    clear_env();
    std::env::set_var(ENV_OPS_BUDGET, "64");
    std::env::set_var(ENV_RUNTIME_METRICS, "true");

    let from_env = RuntimeBuilder::deterministic(0)
        .with_env_overrides()
        .expect("env parses")
        .resolved_config();
    let explicit = RuntimeBuilder::deterministic(0)
        .ops_budget(16)
        .with_env_overrides()
        .expect("env parses")
        .resolved_config();
    clear_env();

    assert_eq!(from_env.ops_budget, 64);
    assert!(from_env.runtime_metrics);
    assert_eq!(explicit.ops_budget, 16);
    assert!(explicit.runtime_metrics);
    test_complete!("env_overrides_apply_below_explicit_settings");
}

#[test]
fn invalid_env_values_are_config_errors() {
    init_test("invalid_env_values_are_config_errors");
    let _guard = ENV_LOCK
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    clear_env();
    std::env::set_var(ENV_OPS_BUDGET, "lots");

    let result = RuntimeBuilder::new().with_env_overrides();
    clear_env();

    match result {
        Err(Error::Config(message)) => assert!(message.contains(ENV_OPS_BUDGET)),
        other => panic!("expected Error::Config, got {other:?}"),
    }
    test_complete!("invalid_env_values_are_config_errors");
}

#[cfg(feature = "config-file")]
#[test]
fn toml_settings_sit_below_env_and_explicit() {
    init_test("toml_settings_sit_below_env_and_explicit");
    let _guard = ENV_LOCK
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    clear_env();
    std::env::set_var(ENV_OPS_BUDGET, "128");

    let toml = r#"
        [scheduler]
        ops_budget = 32
        worker_threads = 3

        [flags]
        op_supervision = true

        [logging]
        unhandled_error_log = "warn"
    "#;
    let config = RuntimeBuilder::from_toml_str(toml)
        .expect("toml parses")
        .with_env_overrides()
        .expect("env parses")
        .worker_threads(5)
        .resolved_config();
    clear_env();

    assert_eq!(config.ops_budget, 128);
    assert_eq!(config.worker_threads, 5);
    assert!(config.op_supervision);
    assert_eq!(
        config.unhandled_error_log,
        cofiber::runtime::UnhandledErrorLog::Warn
    );
    test_complete!("toml_settings_sit_below_env_and_explicit");
}

// ============================================================================
// Supervisors and metrics
// ============================================================================

#[test]
fn tracking_supervisor_sees_every_fiber() {
    init_test("tracking_supervisor_sees_every_fiber");
    let tracker = Arc::new(TrackingSupervisor::new());
    let runtime = RuntimeBuilder::deterministic(0)
        .supervisor(tracker.clone())
        .build()
        .expect("runtime builds");

    let observer = Arc::clone(&tracker);
    let program = Effect::<()>::never().fork().flat_map(move |child| {
        let observer = Arc::clone(&observer);
        let child_id = child.id();
        Effect::<()>::yield_now()
            .and_then(Effect::<FiberId>::fiber_id())
            .map(move |parent| (parent, observer.parent_of(child_id)))
    });

    let Exit::Success((parent, recorded)) = runtime.block_on(program) else {
        panic!("parent completes");
    };
    assert_eq!(recorded, Some(parent));

    let counts = tracker.counts();
    assert_eq!(counts.started, 2);
    assert_eq!(counts.ended, 2);
    assert_eq!(counts.failed, 1, "the interrupted child counts as failed");
    assert!(counts.suspends >= 1);
    assert!(tracker.live_fibers().is_empty());
    test_complete!("tracking_supervisor_sees_every_fiber");
}

#[test]
fn op_supervision_reports_instructions() {
    init_test("op_supervision_reports_instructions");
    let quiet = Arc::new(TrackingSupervisor::new());
    let loud = Arc::new(TrackingSupervisor::new());

    for (tracker, enabled) in [(&quiet, false), (&loud, true)] {
        let runtime = RuntimeBuilder::deterministic(0)
            .op_supervision(enabled)
            .supervisor(Arc::<TrackingSupervisor>::clone(tracker))
            .build()
            .expect("runtime builds");
        let program = Effect::<u32>::succeed(1).map(|n| n + 1).map(|n| n * 2);
        assert_exit_success!(runtime.block_on(program), 4);
    }

    assert_eq!(quiet.counts().effects, 0);
    assert!(loud.counts().effects > 0);
    test_complete!("op_supervision_reports_instructions");
}

#[test]
fn zipped_supervisors_both_observe() {
    init_test("zipped_supervisors_both_observe");
    let left = Arc::new(TrackingSupervisor::new());
    let right = Arc::new(TrackingSupervisor::new());
    let runtime = RuntimeBuilder::deterministic(0)
        .supervisor(Arc::new(Arc::clone(&left).zip(Arc::clone(&right))))
        .build()
        .expect("runtime builds");

    assert!(runtime.block_on(Effect::<()>::unit()).is_success());
    assert_eq!(left.counts(), right.counts());
    assert_eq!(left.counts().started, 1);
    test_complete!("zipped_supervisors_both_observe");
}

#[test]
fn metrics_are_recorded_only_when_enabled() {
    init_test("metrics_are_recorded_only_when_enabled");
    let program = || {
        Effect::<u32, String>::fail("no".into())
            .fork()
            .widen_error::<String>()
            .flat_map(|fiber| fiber.join())
            .exit()
    };

    let silent = test_runtime();
    assert!(silent.block_on(program()).is_success());
    assert_eq!(silent.metrics().snapshot().fibers_started, 0);

    let counted = RuntimeBuilder::deterministic(0)
        .runtime_metrics(true)
        .build()
        .expect("runtime builds");
    assert!(counted.block_on(program()).is_success());
    let snapshot = counted.metrics().snapshot();
    assert_eq!(snapshot.fibers_started, 2);
    assert_eq!(snapshot.fiber_failures, 1);
    assert_eq!(snapshot.fiber_successes, 1);
    assert_eq!(snapshot.fibers_active, 0);
    assert_eq!(snapshot.lifetime_count, 2);
    test_complete!("metrics_are_recorded_only_when_enabled");
}

// ============================================================================
// Entry points
// ============================================================================

#[test]
fn run_sync_reports_async_fibers() {
    init_test("run_sync_reports_async_fibers");
    let runtime = test_runtime();

    assert_eq!(
        runtime.run_sync(Effect::<u8>::succeed(3)).expect("sync"),
        Exit::Success(3)
    );
    match runtime.run_sync(Effect::<u8>::never()) {
        Err(Error::AsyncFiber(id)) => assert!(!id.is_none()),
        other => panic!("expected Error::AsyncFiber, got {other:?}"),
    }
    test_complete!("run_sync_reports_async_fibers");
}

#[test]
fn current_fiber_follows_the_flag() {
    init_test("current_fiber_follows_the_flag");
    let probe = || {
        Effect::<FiberId>::fiber_id().flat_map(|id| Effect::sync(move || (id, current_fiber_id())))
    };

    let Exit::Success((id, current)) = test_runtime().block_on(probe()) else {
        panic!("probe completes");
    };
    assert_eq!(current, Some(id));

    let without = RuntimeBuilder::deterministic(0)
        .current_fiber(false)
        .build()
        .expect("runtime builds");
    let Exit::Success((_, current)) = without.block_on(probe()) else {
        panic!("probe completes");
    };
    assert_eq!(current, None);
    assert_eq!(current_fiber_id(), None, "nothing leaks outside a drain");
    test_complete!("current_fiber_follows_the_flag");
}

#[test]
fn worker_threads_carry_the_configured_prefix() {
    init_test("worker_threads_carry_the_configured_prefix");
    let runtime = worker_runtime(2);

    let program = Effect::<()>::yield_now().and_then(Effect::sync(|| {
        std::thread::current().name().map(str::to_owned)
    }));
    let Exit::Success(name) = runtime.block_on(program) else {
        panic!("probe completes");
    };
    let name = name.expect("worker threads are named");
    assert!(name.starts_with("cofiber-test-"), "unexpected thread {name}");
    runtime.shutdown();
    test_complete!("worker_threads_carry_the_configured_prefix");
}
