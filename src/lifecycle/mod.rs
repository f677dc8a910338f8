//! Certificate lifecycle: issuance, activation, renewal, revocation and
//! expiry tracking

pub mod classifier;
pub mod engine;
pub mod locks;
pub mod types;

pub use classifier::{classify, classify_with, days_remaining, derive_status, ExpiryClass, ExpiryThresholds};
pub use engine::{LifecycleEngine, Reconciled};
pub use locks::KeyedLocks;
pub use types::{
    CertificateFilter, CertificateRequest, CertificateView, InventorySummary, RequestReceipt, SweepReport,
};
