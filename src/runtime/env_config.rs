//! Environment variable and config file support for [`RuntimeBuilder`](super::builder::RuntimeBuilder).
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: values set via builder methods (`ops_budget(512)`)
//! 2. **Environment variables**: values from `COFIBER_*` env vars
//! 3. **Config file**: values loaded from a TOML file (requires `config-file` feature)
//! 4. **Defaults**: built-in defaults from [`RuntimeConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `COFIBER_OPS_BUDGET` | `usize` | `ops_budget` |
//! | `COFIBER_WORKER_THREADS` | `usize` | `worker_threads` |
//! | `COFIBER_THREAD_NAME_PREFIX` | `String` | `thread_name_prefix` |
//! | `COFIBER_INTERRUPTION` | `bool` | `interruption` |
//! | `COFIBER_COOPERATIVE_YIELDING` | `bool` | `cooperative_yielding` |
//! | `COFIBER_OP_SUPERVISION` | `bool` | `op_supervision` |
//! | `COFIBER_RUNTIME_METRICS` | `bool` | `runtime_metrics` |
//! | `COFIBER_CURRENT_FIBER` | `bool` | `current_fiber` |
//! | `COFIBER_UNHANDLED_ERROR_LOG` | `off/debug/info/warn/error` | `unhandled_error_log` |

use crate::error::Error;
use crate::runtime::config::{RuntimeConfig, UnhandledErrorLog};

/// Environment variable name for the per-fiber instruction budget.
pub const ENV_OPS_BUDGET: &str = "COFIBER_OPS_BUDGET";
/// Environment variable name for worker thread count.
pub const ENV_WORKER_THREADS: &str = "COFIBER_WORKER_THREADS";
/// Environment variable name for thread name prefix.
pub const ENV_THREAD_NAME_PREFIX: &str = "COFIBER_THREAD_NAME_PREFIX";
/// Environment variable name for the `Interruption` root flag.
pub const ENV_INTERRUPTION: &str = "COFIBER_INTERRUPTION";
/// Environment variable name for the `CooperativeYielding` root flag.
pub const ENV_COOPERATIVE_YIELDING: &str = "COFIBER_COOPERATIVE_YIELDING";
/// Environment variable name for the `OpSupervision` root flag.
pub const ENV_OP_SUPERVISION: &str = "COFIBER_OP_SUPERVISION";
/// Environment variable name for the `RuntimeMetrics` root flag.
pub const ENV_RUNTIME_METRICS: &str = "COFIBER_RUNTIME_METRICS";
/// Environment variable name for the `CurrentFiber` root flag.
pub const ENV_CURRENT_FIBER: &str = "COFIBER_CURRENT_FIBER";
/// Environment variable name for the unhandled failure log level.
pub const ENV_UNHANDLED_ERROR_LOG: &str = "COFIBER_UNHANDLED_ERROR_LOG";

/// Every variable read by [`apply_env_overrides`].
pub const ALL_ENV_VARS: [&str; 9] = [
    ENV_OPS_BUDGET,
    ENV_WORKER_THREADS,
    ENV_THREAD_NAME_PREFIX,
    ENV_INTERRUPTION,
    ENV_COOPERATIVE_YIELDING,
    ENV_OP_SUPERVISION,
    ENV_RUNTIME_METRICS,
    ENV_CURRENT_FIBER,
    ENV_UNHANDLED_ERROR_LOG,
];

/// Apply environment variable overrides to a [`RuntimeConfig`].
///
/// Only variables that are set override the config. Returns an error if a
/// variable is set but cannot be parsed.
pub fn apply_env_overrides(config: &mut RuntimeConfig) -> Result<(), Error> {
    if let Some(val) = read_env(ENV_OPS_BUDGET) {
        config.ops_budget = parse_usize(ENV_OPS_BUDGET, &val)?;
    }
    if let Some(val) = read_env(ENV_WORKER_THREADS) {
        config.worker_threads = parse_usize(ENV_WORKER_THREADS, &val)?;
    }
    if let Some(val) = read_env(ENV_THREAD_NAME_PREFIX) {
        config.thread_name_prefix = val;
    }
    if let Some(val) = read_env(ENV_INTERRUPTION) {
        config.interruption = parse_bool(ENV_INTERRUPTION, &val)?;
    }
    if let Some(val) = read_env(ENV_COOPERATIVE_YIELDING) {
        config.cooperative_yielding = parse_bool(ENV_COOPERATIVE_YIELDING, &val)?;
    }
    if let Some(val) = read_env(ENV_OP_SUPERVISION) {
        config.op_supervision = parse_bool(ENV_OP_SUPERVISION, &val)?;
    }
    if let Some(val) = read_env(ENV_RUNTIME_METRICS) {
        config.runtime_metrics = parse_bool(ENV_RUNTIME_METRICS, &val)?;
    }
    if let Some(val) = read_env(ENV_CURRENT_FIBER) {
        config.current_fiber = parse_bool(ENV_CURRENT_FIBER, &val)?;
    }
    if let Some(val) = read_env(ENV_UNHANDLED_ERROR_LOG) {
        config.unhandled_error_log = parse_log_level(ENV_UNHANDLED_ERROR_LOG, &val)?;
    }
    Ok(())
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_usize(var_name: &str, val: &str) -> Result<usize, Error> {
    val.trim().parse::<usize>().map_err(|e| {
        Error::Config(format!(
            "invalid value for {var_name}: expected unsigned integer, got {val:?} ({e})"
        ))
    })
}

fn parse_bool(var_name: &str, val: &str) -> Result<bool, Error> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!(
            "invalid value for {var_name}: expected bool (true/false/1/0/yes/no), got {val:?}"
        ))),
    }
}

fn parse_log_level(var_name: &str, val: &str) -> Result<UnhandledErrorLog, Error> {
    val.parse::<UnhandledErrorLog>().map_err(|_| {
        Error::Config(format!(
            "invalid value for {var_name}: expected off/debug/info/warn/error, got {val:?}"
        ))
    })
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML configuration file structure.
///
/// ```toml
/// [scheduler]
/// ops_budget = 1024
/// worker_threads = 4
/// thread_name_prefix = "myapp-fiber"
///
/// [flags]
/// interruption = true
/// cooperative_yielding = true
/// op_supervision = false
/// runtime_metrics = true
/// current_fiber = true
///
/// [logging]
/// unhandled_error_log = "warn"
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct RuntimeTomlConfig {
    /// Scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerToml,
    /// Root fiber flags.
    #[serde(default)]
    pub flags: FlagsToml,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingToml,
}

/// Scheduler section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct SchedulerToml {
    /// Instructions a fiber runs before a forced yield.
    pub ops_budget: Option<usize>,
    /// Number of worker threads.
    pub worker_threads: Option<usize>,
    /// Name prefix for worker threads.
    pub thread_name_prefix: Option<String>,
}

/// Flags section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct FlagsToml {
    /// Root fibers start interruptible.
    pub interruption: Option<bool>,
    /// Yields go back through the scheduler.
    pub cooperative_yielding: Option<bool>,
    /// The supervisor sees every instruction.
    pub op_supervision: Option<bool>,
    /// Fiber lifecycle metrics are recorded.
    pub runtime_metrics: Option<bool>,
    /// The running fiber is published in a thread-local.
    pub current_fiber: Option<bool>,
}

/// Logging section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct LoggingToml {
    /// Level for unhandled fiber failures.
    pub unhandled_error_log: Option<String>,
}

/// Apply a parsed TOML config to a [`RuntimeConfig`].
///
/// Only fields that are `Some` in the TOML struct override the config.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(config: &mut RuntimeConfig, toml: &RuntimeTomlConfig) -> Result<(), Error> {
    if let Some(v) = toml.scheduler.ops_budget {
        config.ops_budget = v;
    }
    if let Some(v) = toml.scheduler.worker_threads {
        config.worker_threads = v;
    }
    if let Some(ref v) = toml.scheduler.thread_name_prefix {
        config.thread_name_prefix.clone_from(v);
    }
    if let Some(v) = toml.flags.interruption {
        config.interruption = v;
    }
    if let Some(v) = toml.flags.cooperative_yielding {
        config.cooperative_yielding = v;
    }
    if let Some(v) = toml.flags.op_supervision {
        config.op_supervision = v;
    }
    if let Some(v) = toml.flags.runtime_metrics {
        config.runtime_metrics = v;
    }
    if let Some(v) = toml.flags.current_fiber {
        config.current_fiber = v;
    }
    if let Some(ref v) = toml.logging.unhandled_error_log {
        config.unhandled_error_log = parse_log_level("logging.unhandled_error_log", v)?;
    }
    Ok(())
}

/// Parse a TOML string into a [`RuntimeTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<RuntimeTomlConfig, Error> {
    toml::from_str(toml_str).map_err(|e| Error::Config(format!("failed to parse TOML config: {e}")))
}

/// Read and parse a TOML file into a [`RuntimeTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<RuntimeTomlConfig, Error> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "failed to read config file {}: {e}",
            path.display()
        ))
    })?;
    parse_toml_str(&content)
}

// =========================================================================
// Tests
// =========================================================================


#[cfg(all(test, feature = "config-file"))]
mod toml_tests {
    use super::*;

    #[test]
    fn parse_toml_full_config() {
        let toml_str = r#"
[scheduler]
ops_budget = 512
worker_threads = 8
thread_name_prefix = "myapp"

[flags]
interruption = false
op_supervision = true
runtime_metrics = true

[logging]
unhandled_error_log = "error"
"#;
        let parsed = parse_toml_str(toml_str).unwrap();
        assert_eq!(parsed.scheduler.ops_budget, Some(512));
        assert_eq!(parsed.scheduler.worker_threads, Some(8));
        assert_eq!(parsed.scheduler.thread_name_prefix.as_deref(), Some("myapp"));
        assert_eq!(parsed.flags.interruption, Some(false));
        assert_eq!(parsed.flags.current_fiber, None);
        assert_eq!(parsed.logging.unhandled_error_log.as_deref(), Some("error"));
    }

    #[test]
    fn parse_toml_empty_config() {
        let parsed = parse_toml_str("").unwrap();
        assert_eq!(parsed.scheduler.ops_budget, None);
        assert_eq!(parsed.flags.interruption, None);
    }

    #[test]
    fn parse_toml_invalid_syntax() {
        let msg = parse_toml_str("not valid toml {{{{").unwrap_err().to_string();
        assert!(msg.contains("TOML"));
    }

    #[test]
    fn apply_toml_overrides_config() {
        let parsed = parse_toml_str(
            r#"
[scheduler]
ops_budget = 16

[flags]
runtime_metrics = true

[logging]
unhandled_error_log = "off"
"#,
        )
        .unwrap();
        let mut config = RuntimeConfig::default();
        apply_toml_config(&mut config, &parsed).unwrap();

        assert_eq!(config.ops_budget, 16);
        assert!(config.runtime_metrics);
        assert_eq!(config.unhandled_error_log, UnhandledErrorLog::Off);
        // Unset fields remain at defaults.
        assert_eq!(
            config.thread_name_prefix,
            RuntimeConfig::default().thread_name_prefix
        );
    }

    #[test]
    fn apply_toml_rejects_unknown_log_level() {
        let parsed = parse_toml_str("[logging]\nunhandled_error_log = \"shout\"\n").unwrap();
        let mut config = RuntimeConfig::default();
        assert!(apply_toml_config(&mut config, &parsed).is_err());
    }

    #[test]
    fn toml_file_not_found() {
        let result = parse_toml_file(std::path::Path::new("/nonexistent/cofiber.toml"));
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("failed to read"));
    }
}
