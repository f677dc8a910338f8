//! Expiry classification.
//!
//! Status of a live certificate is a pure function of the whole days left
//! until `not_after`, rounded up.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::types::CertificateStatus;

/// Time-derived urgency of a certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryClass {
    /// More than `expiring_days` left
    Active,
    /// More than `critical_days`, at most `expiring_days` left
    Expiring,
    /// At most `critical_days` left
    Critical,
    /// No time left
    Expired,
}

impl From<ExpiryClass> for CertificateStatus {
    fn from(class: ExpiryClass) -> Self {
        match class {
            ExpiryClass::Active => CertificateStatus::Active,
            ExpiryClass::Expiring => CertificateStatus::Expiring,
            ExpiryClass::Critical => CertificateStatus::Critical,
            ExpiryClass::Expired => CertificateStatus::Expired,
        }
    }
}

/// Classification thresholds in days
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryThresholds {
    /// Critical at or below this many days
    pub critical_days: i64,
    /// Expiring at or below this many days
    pub expiring_days: i64,
}

impl Default for ExpiryThresholds {
    fn default() -> Self {
        Self {
            critical_days: 7,
            expiring_days: 30,
        }
    }
}

/// Whole days until `not_after`, rounded up; zero or negative once expired
pub fn days_remaining(now: DateTime<Utc>, not_after: DateTime<Utc>) -> i64 {
    let remaining = not_after - now;
    // Truncates toward zero, which is already the ceiling below zero
    let days = remaining.num_days();
    if remaining > Duration::days(days) {
        days + 1
    } else {
        days
    }
}

/// Classify with the default 7/30 day thresholds
pub fn classify(now: DateTime<Utc>, not_after: DateTime<Utc>) -> ExpiryClass {
    classify_with(now, not_after, ExpiryThresholds::default())
}

/// Classify with explicit thresholds
pub fn classify_with(
    now: DateTime<Utc>,
    not_after: DateTime<Utc>,
    thresholds: ExpiryThresholds,
) -> ExpiryClass {
    class_for_days(days_remaining(now, not_after), thresholds)
}

/// Classify an already computed day count
pub fn class_for_days(days: i64, thresholds: ExpiryThresholds) -> ExpiryClass {
    if days <= 0 {
        ExpiryClass::Expired
    } else if days <= thresholds.critical_days {
        ExpiryClass::Critical
    } else if days <= thresholds.expiring_days {
        ExpiryClass::Expiring
    } else {
        ExpiryClass::Active
    }
}

/// Status a stored record should have at `now`.
///
/// Only time-derived statuses move; `install_failed` keeps its value until the
/// certificate expires.
pub fn derive_status(
    stored: CertificateStatus,
    now: DateTime<Utc>,
    not_after: DateTime<Utc>,
    thresholds: ExpiryThresholds,
) -> CertificateStatus {
    if !stored.is_time_derived() {
        return stored;
    }

    let class = classify_with(now, not_after, thresholds);
    match stored {
        CertificateStatus::InstallFailed if class != ExpiryClass::Expired => stored,
        _ => class.into(),
    }
}
