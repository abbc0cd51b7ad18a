pub mod batch;
pub mod billing;
pub mod bulk;
pub mod collaborators;
pub mod config;
pub mod decimal;
pub mod errors;
pub mod events;
pub mod ledger;
pub mod locks;
pub mod payments;
pub mod records;
pub mod reporting;
pub mod store;
pub mod telemetry;
pub mod types;
pub mod views;

// re-export key types
pub use batch::{BatchFailure, BatchOutcome, BatchSummary};
pub use billing::{ConsolidationWarning, GenerationOutcome, InvoiceGenerator, InvoiceRequest};
pub use bulk::{BulkMutator, ClassChange, FeeAdjustment, FeeChange};
pub use collaborators::{MessageSink, OutboundMessage, PrivilegeCheck, Roster};
pub use config::{ClassifierConfig, LedgerConfig, RuleConfig};
pub use decimal::Money;
pub use errors::{LedgerError, Result};
pub use events::{EventStore, LedgerEvent};
pub use ledger::FeeLedger;
pub use payments::{PaymentApplicator, PaymentReceipt, PaymentRequest};
pub use records::{Charge, Invoice, LineItem, Payment, Student};
pub use reporting::{
    Bucket, BucketClassifier, BucketTotals, DateWindow, DefaulterAggregator, DefaulterReport,
    DefaulterRow,
};
pub use store::{InMemoryStore, LedgerStore};
pub use types::{
    AdjustmentDirection, BillingMonth, ClassId, FeeCategory, InvoiceId, InvoiceKind,
    InvoiceStatus, LineItemId, PaymentId, PaymentMethod, StudentId, StudentStatus,
};
pub use views::InvoiceView;

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;
