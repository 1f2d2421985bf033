//! Configuration types for interpreters and the bridge.
//!
//! Both types deserialize from partial documents; missing fields take their
//! defaults.
//!
//! ```
//! use tkbridge_runtime::InterpreterConfig;
//!
//! let config = InterpreterConfig::new().timer_interval_ms(0).safe(true);
//! assert_eq!(config.timer_interval_ms, 0);
//! assert!(config.safe);
//! assert_eq!(config.wait_timeout(), None);
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default period of the keepalive timer and per-iteration yield.
pub const DEFAULT_TIMER_INTERVAL_MS: u32 = 5;

/// Settings for one interpreter handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    /// Keepalive timer period for this interpreter's loop. `0` disables the
    /// timer and the per-iteration yield.
    /// Default: 5
    pub timer_interval_ms: u32,

    /// Upper bound for blocking cross-thread waits. `None` waits until the
    /// owning thread answers.
    /// Default: None
    pub wait_timeout_ms: Option<u64>,

    /// Create a safe interpreter (no file or process commands).
    /// Default: false
    pub safe: bool,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            timer_interval_ms: DEFAULT_TIMER_INTERVAL_MS,
            wait_timeout_ms: None,
            safe: false,
        }
    }
}

impl InterpreterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timer_interval_ms(mut self, ms: u32) -> Self {
        self.timer_interval_ms = ms;
        self
    }

    pub fn wait_timeout_ms(mut self, ms: u64) -> Self {
        self.wait_timeout_ms = Some(ms);
        self
    }

    pub fn safe(mut self, safe: bool) -> Self {
        self.safe = safe;
        self
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_ms.map(Duration::from_millis)
    }
}

/// Process-wide bridge settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Keepalive period used by [`run_global_loop`](crate::run_global_loop).
    /// Default: 5
    pub global_timer_interval_ms: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            global_timer_interval_ms: DEFAULT_TIMER_INTERVAL_MS,
        }
    }
}
