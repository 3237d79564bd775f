//! Lineage keys: `slug(label) + "_" + timestamp`.
//!
//! A lineage key is created once by the first stage of a run and shared by
//! every artifact that run writes.

use std::fmt;
use std::sync::Arc;

use chrono::{Local, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Source of the timestamp half of a lineage key, and of the creation
/// times stamped into artifacts
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> NaiveDateTime;

    fn timestamp(&self) -> String {
        self.now().format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Local wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UtcClock;

impl Clock for UtcClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().naive_utc()
    }
}

/// Always returns the same instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

/// Configurable clock choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockSource {
    #[default]
    Local,
    Utc,
}

impl ClockSource {
    pub fn clock(self) -> Arc<dyn Clock> {
        match self {
            ClockSource::Local => Arc::new(SystemClock),
            ClockSource::Utc => Arc::new(UtcClock),
        }
    }
}

/// What to do when a new key matches one already in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Reuse the key; later writes replace earlier ones
    #[default]
    Accept,

    /// Append `_2`, `_3`, ... until the key is unused
    Suffix,
}

/// Lower-case, collapse runs outside `[a-z0-9_-]` to `_`, trim `_`
pub fn slug(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut in_run = false;
    for c in label.chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            out.push(c.to_ascii_lowercase());
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Builds lineage keys from labels
#[derive(Debug, Clone)]
pub struct LineageKeyGenerator {
    clock: Arc<dyn Clock>,
    policy: CollisionPolicy,
}

impl Default for LineageKeyGenerator {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock), CollisionPolicy::Accept)
    }
}

impl LineageKeyGenerator {
    pub fn new(clock: Arc<dyn Clock>, policy: CollisionPolicy) -> Self {
        Self { clock, policy }
    }

    pub fn policy(&self) -> CollisionPolicy {
        self.policy
    }

    /// Current time on the generator's clock
    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    pub fn generate(&self, label: &str) -> String {
        format!("{}_{}", slug(label), self.clock.timestamp())
    }

    /// The `attempt`-th candidate for a base key (1 is the base key itself)
    pub fn candidate(base: &str, attempt: usize) -> String {
        if attempt <= 1 {
            base.to_string()
        } else {
            format!("{}_{}", base, attempt)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn fixed() -> Arc<dyn Clock> {
        let at = NaiveDate::from_ymd_opt(2024, 3, 9)
            .and_then(|d| d.and_hms_opt(14, 5, 7))
            .unwrap();
        Arc::new(FixedClock(at))
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("Momentum Reversal!"), "momentum_reversal");
        assert_eq!(slug("  RSI / MACD -- cross "), "rsi_macd_--_cross");
        assert_eq!(slug("vol_of_vol"), "vol_of_vol");
        assert_eq!(slug("***"), "unnamed");
        assert_eq!(slug(""), "unnamed");
    }

    #[test]
    fn test_generate_with_fixed_clock() {
        let generator = LineageKeyGenerator::new(fixed(), CollisionPolicy::Accept);
        assert_eq!(generator.generate("Mean Reversion"), "mean_reversion_20240309_140507");
        assert_eq!(generator.generate("Mean Reversion"), generator.generate("mean reversion"));
    }

    #[test]
    fn test_now_follows_clock() {
        let generator = LineageKeyGenerator::new(fixed(), CollisionPolicy::Accept);
        assert_eq!(generator.now().format("%Y-%m-%d %H:%M:%S").to_string(), "2024-03-09 14:05:07");
    }

    #[test]
    fn test_candidates() {
        assert_eq!(LineageKeyGenerator::candidate("k", 1), "k");
        assert_eq!(LineageKeyGenerator::candidate("k", 3), "k_3");
    }

    #[test]
    fn test_policy_parses_from_yaml() {
        let policy: CollisionPolicy = serde_yaml::from_str("suffix").unwrap();
        assert_eq!(policy, CollisionPolicy::Suffix);
        let clock: ClockSource = serde_yaml::from_str("utc").unwrap();
        assert_eq!(clock, ClockSource::Utc);
    }
}
