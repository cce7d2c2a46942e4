//! Registry core configuration
//!
//! Values arrive already parsed from the server configuration layer; each
//! struct validates its own ranges before any component is built from it.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use registrar_common::{
    DEFAULT_LEASE_DURATION_SECS, DEFAULT_RENEWAL_INTERVAL_SECS, RegistrarError, RegistrarResult,
};

/// Lease table settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Lease duration applied when a registration does not carry one
    pub default_lease_duration_secs: u64,
    /// How long removal markers are kept before being purged
    pub tombstone_retention: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            default_lease_duration_secs: DEFAULT_LEASE_DURATION_SECS,
            tombstone_retention: Duration::from_secs(600),
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> RegistrarResult<()> {
        if self.default_lease_duration_secs == 0 {
            return Err(RegistrarError::Config(
                "default lease duration must be positive".to_string(),
            ));
        }
        if self.tombstone_retention.is_zero() {
            return Err(RegistrarError::Config(
                "tombstone retention must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Eviction sweep settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EvictionConfig {
    /// Period between sweeps (default: 30s)
    pub interval: Duration,
    /// Multiplier applied to a lease duration before it counts as expired (default: 2.0)
    pub grace_factor: f64,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            grace_factor: 2.0,
        }
    }
}

impl EvictionConfig {
    pub fn validate(&self) -> RegistrarResult<()> {
        if self.interval.is_zero() {
            return Err(RegistrarError::Config(
                "eviction interval must be positive".to_string(),
            ));
        }
        if !self.grace_factor.is_finite() || self.grace_factor < 1.0 {
            return Err(RegistrarError::Config(format!(
                "eviction grace factor must be >= 1.0, got {}",
                self.grace_factor
            )));
        }
        Ok(())
    }
}

/// Self-preservation settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProtectionConfig {
    pub enabled: bool,
    /// Fraction of expected renewals below which eviction is suspended (default: 0.85)
    pub renewal_threshold: f64,
    /// Renewal interval clients are expected to follow (default: 30s)
    pub expected_renewal_interval: Duration,
    /// Observation window (default: 60s)
    pub window: Duration,
    /// Consecutive healthy windows needed to lift protection (default: 2)
    pub recovery_windows: u32,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            renewal_threshold: 0.85,
            expected_renewal_interval: Duration::from_secs(DEFAULT_RENEWAL_INTERVAL_SECS),
            window: Duration::from_secs(60),
            recovery_windows: 2,
        }
    }
}

impl ProtectionConfig {
    pub fn validate(&self) -> RegistrarResult<()> {
        if !(self.renewal_threshold > 0.0 && self.renewal_threshold <= 1.0) {
            return Err(RegistrarError::Config(format!(
                "renewal threshold must be in (0, 1], got {}",
                self.renewal_threshold
            )));
        }
        if self.expected_renewal_interval.is_zero() || self.window.is_zero() {
            return Err(RegistrarError::Config(
                "protection window and renewal interval must be positive".to_string(),
            ));
        }
        if self.recovery_windows == 0 {
            return Err(RegistrarError::Config(
                "recovery windows must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Renewals expected per window for one lease
    pub fn renewals_per_lease(&self) -> f64 {
        self.window.as_secs_f64() / self.expected_renewal_interval.as_secs_f64()
    }
}

/// Lookup cache settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Upper bound on how long a cached lookup may be served (default: 30s)
    pub cache_ttl: Duration,
    /// Maximum cached entries (default: 10000)
    pub cache_capacity: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(30),
            cache_capacity: 10_000,
        }
    }
}

impl QueryConfig {
    pub fn validate(&self) -> RegistrarResult<()> {
        if self.cache_capacity == 0 {
            return Err(RegistrarError::Config(
                "query cache capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(StoreConfig::default().validate().is_ok());
        assert!(EvictionConfig::default().validate().is_ok());
        assert!(ProtectionConfig::default().validate().is_ok());
        assert!(QueryConfig::default().validate().is_ok());
    }

    #[test]
    fn test_grace_factor_below_one_rejected() {
        let config = EvictionConfig {
            grace_factor: 0.5,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(RegistrarError::Config(_))));
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let config = ProtectionConfig {
            renewal_threshold: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_renewals_per_lease() {
        assert_eq!(ProtectionConfig::default().renewals_per_lease(), 2.0);
    }
}
