//! Audit trail delivery.
//!
//! Records are shipped to the audit service from a spawned task. Delivery
//! failures are logged locally and never reach the operation being audited.

pub mod record;
pub mod sink;

pub use record::{AuditRecord, AuditStatus};
pub use sink::{AuditHandle, AuditSink, DeliveryOutcome, DeliveryPolicy};
