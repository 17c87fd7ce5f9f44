//! Application configuration - Termination and pacing settings
//!
//! `AppConfig` controls when an application stops on its own, whether it
//! waits for physical time to catch up with logical time, and how far apart
//! reaction priorities are spaced. It can be built in code or loaded from RON.

use crate::graph::DEFAULT_PRIORITY_SPACING;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Interval after which an idle keep-alive application checks again
pub const DEFAULT_SNOOZE: Duration = Duration::from_secs(1);

/// Configuration for an application
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tagflow_core::AppConfig;
///
/// // Real-time, terminates once the event queue drains (default)
/// let config = AppConfig::default();
/// assert!(!config.keep_alive());
/// assert!(!config.fast());
///
/// // Simulation mode with a five second logical horizon
/// let config = AppConfig::default()
///     .with_fast(true)
///     .with_execution_timeout(Duration::from_secs(5));
/// assert_eq!(config.execution_timeout(), Some(Duration::from_secs(5)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Logical time after the start at which execution ends
    ///
    /// `None` runs until the event queue drains (or forever with
    /// `keep_alive`).
    execution_timeout: Option<Duration>,

    /// Keep running with an empty event queue, waiting for physical actions
    keep_alive: bool,

    /// Process events as soon as possible instead of waiting for physical
    /// time to reach their tags
    fast: bool,

    /// How long an idle keep-alive application sleeps before checking again
    snooze: Duration,

    /// Distance between consecutive reaction priorities
    ///
    /// This value is clamped to at least `1`.
    priority_spacing: u64,
}

impl AppConfig {
    /// Load a configuration from RON
    ///
    /// Missing fields take their default values.
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use tagflow_core::AppConfig;
    ///
    /// let config = AppConfig::from_ron(
    ///     "(fast: true, execution_timeout: Some((secs: 3, nanos: 0)))",
    /// )
    /// .unwrap();
    /// assert!(config.fast());
    /// assert_eq!(config.execution_timeout(), Some(Duration::from_secs(3)));
    /// assert_eq!(config.priority_spacing(), 100);
    /// ```
    pub fn from_ron(source: &str) -> Result<Self> {
        let mut config: AppConfig = ron::from_str(source)?;
        config.priority_spacing = config.priority_spacing.max(1);
        Ok(config)
    }

    /// Set the logical horizon
    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }

    /// Set keep-alive mode
    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Set fast mode
    pub fn with_fast(mut self, fast: bool) -> Self {
        self.fast = fast;
        self
    }

    /// Set the idle snooze interval
    pub fn with_snooze(mut self, snooze: Duration) -> Self {
        self.snooze = snooze;
        self
    }

    /// Set the priority spacing
    ///
    /// The value is clamped to at least `1`.
    ///
    /// # Example
    ///
    /// ```
    /// use tagflow_core::AppConfig;
    ///
    /// let mut config = AppConfig::default();
    /// config.set_priority_spacing(0);
    /// assert_eq!(config.priority_spacing(), 1);
    /// ```
    pub fn set_priority_spacing(&mut self, spacing: u64) {
        self.priority_spacing = spacing.max(1);
    }

    /// Builder form of `set_priority_spacing`
    pub fn with_priority_spacing(mut self, spacing: u64) -> Self {
        self.set_priority_spacing(spacing);
        self
    }

    /// Get the logical horizon
    pub fn execution_timeout(&self) -> Option<Duration> {
        self.execution_timeout
    }

    /// Check if keep-alive mode is on
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Check if fast mode is on
    pub fn fast(&self) -> bool {
        self.fast
    }

    /// Get the idle snooze interval
    pub fn snooze(&self) -> Duration {
        self.snooze
    }

    /// Get the priority spacing
    pub fn priority_spacing(&self) -> u64 {
        self.priority_spacing
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            execution_timeout: None,
            keep_alive: false,
            fast: false,
            snooze: DEFAULT_SNOOZE,
            priority_spacing: DEFAULT_PRIORITY_SPACING,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.execution_timeout(), None);
        assert!(!config.keep_alive());
        assert!(!config.fast());
        assert_eq!(config.snooze(), Duration::from_secs(1));
        assert_eq!(config.priority_spacing(), 100);
    }

    #[test]
    fn test_builders() {
        let config = AppConfig::default()
            .with_keep_alive(true)
            .with_snooze(Duration::from_millis(50))
            .with_priority_spacing(10);
        assert!(config.keep_alive());
        assert_eq!(config.snooze(), Duration::from_millis(50));
        assert_eq!(config.priority_spacing(), 10);
    }

    #[test]
    fn test_priority_spacing_clamped_minimum() {
        let config = AppConfig::default().with_priority_spacing(0);
        assert_eq!(config.priority_spacing(), 1);

        let config = AppConfig::from_ron("(priority_spacing: 0)").unwrap();
        assert_eq!(config.priority_spacing(), 1);
    }

    #[test]
    fn test_from_ron_partial() {
        let config = AppConfig::from_ron("(keep_alive: true)").unwrap();
        assert!(config.keep_alive());
        assert!(!config.fast());
        assert_eq!(config.snooze(), DEFAULT_SNOOZE);
    }

    #[test]
    fn test_from_ron_rejects_garbage() {
        let err = AppConfig::from_ron("(keep_alive: maybe)").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_ron_round_trip() {
        let config = AppConfig::default()
            .with_fast(true)
            .with_execution_timeout(Duration::from_millis(1500));
        let text = ron::to_string(&config).unwrap();
        assert_eq!(AppConfig::from_ron(&text).unwrap(), config);
    }
}
