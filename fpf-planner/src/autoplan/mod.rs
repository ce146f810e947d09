//! Autoplan pipeline
//!
//! Phases (`audit`, `apply`, `push`, `confirm`) each write exactly one row to
//! the autoplan audit trail per invocation, including `noop` runs, so the
//! pipeline's behavior can be reconstructed from the audit log alone.

pub mod apply;
pub mod audit;
pub mod audit_log;
pub mod chain;
pub mod confirm;
pub mod decision;
pub mod economics;
pub mod pipeline;
pub mod push;
pub mod store;

pub use apply::ApplyOutcome;
pub use audit::AuditOutcome;
pub use audit_log::{AuditWriter, AUDIT_TABLE};
pub use chain::ChainResult;
pub use confirm::{ConfirmMetrics, ConfirmOutcome};
pub use decision::{AuditRecord, Decision, EntityRef, Phase};
pub use economics::RpmThreshold;
pub use pipeline::{AutoplanPipeline, PhaseRequest};
pub use push::PushOutcome;
