//! Runtime configuration types.
//!
//! These types hold the concrete values that drive runtime behavior. In most
//! cases you should use [`RuntimeBuilder`](super::builder::RuntimeBuilder) to
//! construct a runtime rather than creating a [`RuntimeConfig`] directly.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `ops_budget` | 2048 |
//! | `worker_threads` | available CPU parallelism |
//! | `thread_name_prefix` | `"cofiber-worker"` |
//! | `interruption` | true |
//! | `cooperative_yielding` | true |
//! | `op_supervision` | false |
//! | `runtime_metrics` | false |
//! | `current_fiber` | true |
//! | `unhandled_error_log` | `Debug` |

use crate::error::Error;
use crate::types::{RuntimeFlag, RuntimeFlags};
use core::fmt;
use core::str::FromStr;

/// Instructions a fiber may run before it is forced to yield.
pub const DEFAULT_OPS_BUDGET: usize = 2048;

/// Name prefix for worker threads.
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "cofiber-worker";

/// Level at which fibers that end with an unhandled failure are logged.
///
/// Failures made only of interruptions are never logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnhandledErrorLog {
    /// Do not log.
    Off,
    /// Log at `DEBUG`.
    #[default]
    Debug,
    /// Log at `INFO`.
    Info,
    /// Log at `WARN`.
    Warn,
    /// Log at `ERROR`.
    Error,
}

impl UnhandledErrorLog {
    /// Lowercase name, as accepted by [`FromStr`].
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for UnhandledErrorLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnhandledErrorLog {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "off" | "none" => Ok(Self::Off),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(Error::InvalidConfig {
                field: "unhandled_error_log",
                reason: format!("expected off/debug/info/warn/error, got {s:?}"),
            }),
        }
    }
}

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Instructions a fiber runs before a forced yield.
    pub ops_budget: usize,
    /// Number of worker threads for multi-threaded runtimes.
    pub worker_threads: usize,
    /// Name prefix for worker threads.
    pub thread_name_prefix: String,
    /// Root fibers start interruptible.
    pub interruption: bool,
    /// Yields go back through the scheduler.
    pub cooperative_yielding: bool,
    /// The supervisor sees every instruction.
    pub op_supervision: bool,
    /// Fiber lifecycle metrics are recorded.
    pub runtime_metrics: bool,
    /// The running fiber is published in a thread-local.
    pub current_fiber: bool,
    /// Logging of unhandled fiber failures.
    pub unhandled_error_log: UnhandledErrorLog,
}

impl RuntimeConfig {
    /// Normalize configuration values to safe defaults.
    pub fn normalize(&mut self) {
        if self.ops_budget == 0 {
            self.ops_budget = 1;
        }
        if self.worker_threads == 0 {
            self.worker_threads = 1;
        }
        if self.thread_name_prefix.is_empty() {
            self.thread_name_prefix = DEFAULT_THREAD_NAME_PREFIX.to_string();
        }
    }

    /// The flags root fibers start with.
    #[must_use]
    pub fn runtime_flags(&self) -> RuntimeFlags {
        [
            (RuntimeFlag::Interruption, self.interruption),
            (RuntimeFlag::CooperativeYielding, self.cooperative_yielding),
            (RuntimeFlag::OpSupervision, self.op_supervision),
            (RuntimeFlag::RuntimeMetrics, self.runtime_metrics),
            (RuntimeFlag::CurrentFiber, self.current_fiber),
        ]
        .into_iter()
        .filter(|(_, on)| *on)
        .fold(RuntimeFlags::NONE, |flags, (flag, _)| flags.enable(flag))
    }

    pub(crate) fn default_worker_threads() -> usize {
        std::thread::available_parallelism()
            .map_or(1, std::num::NonZeroUsize::get)
            .max(1)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            ops_budget: DEFAULT_OPS_BUDGET,
            worker_threads: Self::default_worker_threads(),
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
            interruption: true,
            cooperative_yielding: true,
            op_supervision: false,
            runtime_metrics: false,
            current_fiber: true,
            unhandled_error_log: UnhandledErrorLog::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn test_default_config_sane() {
        init_test("test_default_config_sane");
        let config = RuntimeConfig::default();
        crate::assert_with_log!(
            config.worker_threads >= 1,
            "worker_threads",
            true,
            config.worker_threads >= 1
        );
        crate::assert_with_log!(
            config.ops_budget == 2048,
            "ops_budget",
            2048,
            config.ops_budget
        );
        crate::assert_with_log!(
            config.thread_name_prefix == "cofiber-worker",
            "thread_name_prefix",
            "cofiber-worker",
            config.thread_name_prefix
        );
        crate::assert_with_log!(
            config.unhandled_error_log == UnhandledErrorLog::Debug,
            "unhandled_error_log",
            UnhandledErrorLog::Debug,
            config.unhandled_error_log
        );
        crate::test_complete!("test_default_config_sane");
    }

    #[test]
    fn test_default_flags_match_root_fiber_defaults() {
        init_test("test_default_flags_match_root_fiber_defaults");
        let flags = RuntimeConfig::default().runtime_flags();
        crate::assert_with_log!(
            flags == RuntimeFlags::DEFAULT,
            "default flags",
            RuntimeFlags::DEFAULT,
            flags
        );
        crate::test_complete!("test_default_flags_match_root_fiber_defaults");
    }

    #[test]
    fn test_runtime_flags_follow_switches() {
        init_test("test_runtime_flags_follow_switches");
        let config = RuntimeConfig {
            interruption: false,
            op_supervision: true,
            runtime_metrics: true,
            ..RuntimeConfig::default()
        };
        let flags = config.runtime_flags();
        assert!(!flags.interruption());
        assert!(flags.op_supervision());
        assert!(flags.runtime_metrics());
        assert!(flags.cooperative_yielding());
        assert!(!flags.wind_down());
        crate::test_complete!("test_runtime_flags_follow_switches");
    }

    #[test]
    fn test_normalize_enforces_minimums() {
        init_test("test_normalize_enforces_minimums");
        let mut config = RuntimeConfig {
            ops_budget: 0,
            worker_threads: 0,
            thread_name_prefix: String::new(),
            ..RuntimeConfig::default()
        };
        config.normalize();
        crate::assert_with_log!(config.ops_budget == 1, "ops_budget", 1, config.ops_budget);
        crate::assert_with_log!(
            config.worker_threads == 1,
            "worker_threads",
            1,
            config.worker_threads
        );
        crate::assert_with_log!(
            config.thread_name_prefix == DEFAULT_THREAD_NAME_PREFIX,
            "thread_name_prefix",
            DEFAULT_THREAD_NAME_PREFIX,
            config.thread_name_prefix
        );
        crate::test_complete!("test_normalize_enforces_minimums");
    }

    #[test]
    fn test_normalize_preserves_custom_values() {
        init_test("test_normalize_preserves_custom_values");
        let mut config = RuntimeConfig {
            ops_budget: 7,
            worker_threads: 3,
            thread_name_prefix: "app".to_string(),
            ..RuntimeConfig::default()
        };
        let before = config.clone();
        config.normalize();
        assert_eq!(config, before);
        crate::test_complete!("test_normalize_preserves_custom_values");
    }

    #[test]
    fn test_unhandled_error_log_parse() {
        init_test("test_unhandled_error_log_parse");
        assert_eq!("off".parse::<UnhandledErrorLog>().ok(), Some(UnhandledErrorLog::Off));
        assert_eq!(" WARN ".parse::<UnhandledErrorLog>().ok(), Some(UnhandledErrorLog::Warn));
        assert_eq!("Error".parse::<UnhandledErrorLog>().ok(), Some(UnhandledErrorLog::Error));
        assert!("loud".parse::<UnhandledErrorLog>().is_err());
        for level in [
            UnhandledErrorLog::Off,
            UnhandledErrorLog::Debug,
            UnhandledErrorLog::Info,
            UnhandledErrorLog::Warn,
            UnhandledErrorLog::Error,
        ] {
            assert_eq!(level.to_string().parse::<UnhandledErrorLog>().ok(), Some(level));
        }
        crate::test_complete!("test_unhandled_error_log_parse");
    }
}
