//! Hub configuration for development and production environments
//!
//! Provides pre-configured settings for different deployment scenarios with
//! validation and builder support. All numeric knobs are validated domain
//! types, so an in-range configuration is the only constructible kind.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::domain_types::{
    HistoryCapacity, LockTtlMs, MaxChannels, MaxPendingInputs, SweepIntervalMs, WaitTimeoutMs,
};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field failed domain validation
    #[error("invalid configuration: {field} - {reason}")]
    ValidationError {
        /// Field that failed
        field: String,
        /// Why it failed
        reason: String,
    },
}

/// Complete hub configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Cap on simultaneously existing channels
    pub max_channels: MaxChannels,
    /// Bounded per-channel history capacity
    pub max_history: HistoryCapacity,
    /// Period of the background expiry sweep
    pub sweep_interval_ms: SweepIntervalMs,
    /// Lifetime of a granted lock before forced expiry
    pub lock_ttl_ms: LockTtlMs,
    /// Default deadline for blocking waits that do not pass their own
    pub default_timeout_ms: WaitTimeoutMs,
    /// Bound on simultaneously pending input requests
    pub max_pending_inputs: MaxPendingInputs,
    /// Whether to run the background sweep task
    pub enable_sweep: bool,
    /// Gates verbose per-operation logging
    pub enable_detailed_logs: bool,
}

impl HubConfig {
    /// Creates a development configuration optimized for debugging and testing
    ///
    /// Small histories, a fast sweep, and detailed logs for quick feedback.
    ///
    /// # Panics
    /// Panics if any of the hardcoded values are out of range for their
    /// domain types.
    #[must_use]
    pub fn development() -> Self {
        Self {
            max_channels: MaxChannels::try_new(50).unwrap(),
            max_history: HistoryCapacity::try_new(50).unwrap(),
            sweep_interval_ms: SweepIntervalMs::try_new(1_000).unwrap(),
            lock_ttl_ms: LockTtlMs::try_new(5_000).unwrap(),
            default_timeout_ms: WaitTimeoutMs::try_new(5_000).unwrap(),
            max_pending_inputs: MaxPendingInputs::try_new(10).unwrap(),
            enable_sweep: true,
            enable_detailed_logs: true,
        }
    }

    /// Creates a production configuration
    ///
    /// Larger capacities, the standard 10 s sweep, and quiet logs.
    ///
    /// # Panics
    /// Panics if any of the hardcoded values are out of range for their
    /// domain types.
    #[must_use]
    pub fn production() -> Self {
        Self {
            max_channels: MaxChannels::try_new(200).unwrap(),
            max_history: HistoryCapacity::try_new(100).unwrap(),
            sweep_interval_ms: SweepIntervalMs::try_new(10_000).unwrap(),
            lock_ttl_ms: LockTtlMs::try_new(30_000).unwrap(),
            default_timeout_ms: WaitTimeoutMs::try_new(30_000).unwrap(),
            max_pending_inputs: MaxPendingInputs::try_new(10).unwrap(),
            enable_sweep: true,
            enable_detailed_logs: false,
        }
    }

    /// Starts a builder seeded with the production preset
    #[must_use]
    pub fn builder() -> HubConfigBuilder {
        HubConfigBuilder::new()
    }

    /// Checks cross-field consistency
    ///
    /// The sweep must run at least as often as locks expire, or expired
    /// locks would linger a full extra period.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enable_sweep && self.sweep_interval_ms.into_inner() > self.lock_ttl_ms.as_u64() {
            return Err(ConfigError::ValidationError {
                field: "sweep_interval_ms".to_string(),
                reason: format!(
                    "sweep interval {}ms exceeds lock TTL {}ms",
                    self.sweep_interval_ms.into_inner(),
                    self.lock_ttl_ms.as_u64()
                ),
            });
        }
        Ok(())
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::production()
    }
}

/// Fallible builder over raw primitive values
#[derive(Debug, Clone, Default)]
pub struct HubConfigBuilder {
    max_channels: Option<usize>,
    max_history: Option<usize>,
    sweep_interval_ms: Option<u64>,
    lock_ttl_ms: Option<u64>,
    default_timeout_ms: Option<u64>,
    max_pending_inputs: Option<usize>,
    enable_sweep: Option<bool>,
    enable_detailed_logs: Option<bool>,
}

impl HubConfigBuilder {
    /// Creates an empty builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the channel cap
    #[must_use]
    pub fn max_channels(mut self, value: usize) -> Self {
        self.max_channels = Some(value);
        self
    }

    /// Sets the per-channel history capacity
    #[must_use]
    pub fn max_history(mut self, value: usize) -> Self {
        self.max_history = Some(value);
        self
    }

    /// Sets the sweep period in milliseconds
    #[must_use]
    pub fn sweep_interval_ms(mut self, value: u64) -> Self {
        self.sweep_interval_ms = Some(value);
        self
    }

    /// Sets the lock TTL in milliseconds
    #[must_use]
    pub fn lock_ttl_ms(mut self, value: u64) -> Self {
        self.lock_ttl_ms = Some(value);
        self
    }

    /// Sets the default blocking-wait timeout in milliseconds
    #[must_use]
    pub fn default_timeout_ms(mut self, value: u64) -> Self {
        self.default_timeout_ms = Some(value);
        self
    }

    /// Sets the pending-input bound
    #[must_use]
    pub fn max_pending_inputs(mut self, value: usize) -> Self {
        self.max_pending_inputs = Some(value);
        self
    }

    /// Enables or disables the background sweep
    #[must_use]
    pub fn enable_sweep(mut self, value: bool) -> Self {
        self.enable_sweep = Some(value);
        self
    }

    /// Enables or disables verbose per-operation logging
    #[must_use]
    pub fn enable_detailed_logs(mut self, value: bool) -> Self {
        self.enable_detailed_logs = Some(value);
        self
    }

    /// Builds and validates the configuration
    pub fn build(self) -> Result<HubConfig, ConfigError> {
        let base = HubConfig::production();

        let config = HubConfig {
            max_channels: match self.max_channels {
                Some(v) => MaxChannels::try_new(v).map_err(|e| ConfigError::ValidationError {
                    field: "max_channels".to_string(),
                    reason: e.to_string(),
                })?,
                None => base.max_channels,
            },
            max_history: match self.max_history {
                Some(v) => {
                    HistoryCapacity::try_new(v).map_err(|e| ConfigError::ValidationError {
                        field: "max_history".to_string(),
                        reason: e.to_string(),
                    })?
                }
                None => base.max_history,
            },
            sweep_interval_ms: match self.sweep_interval_ms {
                Some(v) => {
                    SweepIntervalMs::try_new(v).map_err(|e| ConfigError::ValidationError {
                        field: "sweep_interval_ms".to_string(),
                        reason: e.to_string(),
                    })?
                }
                None => base.sweep_interval_ms,
            },
            lock_ttl_ms: match self.lock_ttl_ms {
                Some(v) => LockTtlMs::try_new(v).map_err(|e| ConfigError::ValidationError {
                    field: "lock_ttl_ms".to_string(),
                    reason: e.to_string(),
                })?,
                None => base.lock_ttl_ms,
            },
            default_timeout_ms: match self.default_timeout_ms {
                Some(v) => WaitTimeoutMs::try_new(v).map_err(|e| ConfigError::ValidationError {
                    field: "default_timeout_ms".to_string(),
                    reason: e.to_string(),
                })?,
                None => base.default_timeout_ms,
            },
            max_pending_inputs: match self.max_pending_inputs {
                Some(v) => {
                    MaxPendingInputs::try_new(v).map_err(|e| ConfigError::ValidationError {
                        field: "max_pending_inputs".to_string(),
                        reason: e.to_string(),
                    })?
                }
                None => base.max_pending_inputs,
            },
            enable_sweep: self.enable_sweep.unwrap_or(base.enable_sweep),
            enable_detailed_logs: self
                .enable_detailed_logs
                .unwrap_or(base.enable_detailed_logs),
        };

        config.validate()?;
        Ok(config)
    }
}
