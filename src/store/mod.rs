//! Certificate store: records, audit trail, issuance requests and install ledger

pub mod audit;
pub mod certificates;
pub mod installs;
pub mod records;

pub use audit::{verify_chain, AuditAction, AuditEntry, AuditEvent, AuditLog};
pub use certificates::CertificateStore;
pub use installs::{FailureKind, InstallLedger, InstallOutcome, InstallRecord, InstallTarget};
pub use records::{Certificate, CertificateMaterial, RequestRecord, RequestState};
