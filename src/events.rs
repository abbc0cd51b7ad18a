use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::types::{ClassId, InvoiceId, InvoiceStatus, LineItemId, PaymentId, StudentId};

/// audit events emitted by ledger operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LedgerEvent {
    // roster events
    StudentEnrolled {
        student_id: StudentId,
        class_id: ClassId,
        monthly_fee: Money,
        timestamp: DateTime<Utc>,
    },
    MonthlyFeeAdjusted {
        student_id: StudentId,
        old_fee: Money,
        new_fee: Money,
        timestamp: DateTime<Utc>,
    },
    ClassTransferred {
        student_id: StudentId,
        from: ClassId,
        to: ClassId,
        timestamp: DateTime<Utc>,
    },

    // invoice events
    InvoiceGenerated {
        invoice_id: InvoiceId,
        student_id: StudentId,
        total: Money,
        carried_over: Money,
        timestamp: DateTime<Utc>,
    },
    InvoiceExpired {
        invoice_id: InvoiceId,
        successor: InvoiceId,
        timestamp: DateTime<Utc>,
    },
    ExpiryFailed {
        invoice_id: InvoiceId,
        successor: InvoiceId,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    InvoiceDeleted {
        invoice_id: InvoiceId,
        student_id: StudentId,
        timestamp: DateTime<Utc>,
    },
    InvoiceRestored {
        invoice_id: InvoiceId,
        status: InvoiceStatus,
        timestamp: DateTime<Utc>,
    },

    // payment events
    PaymentApplied {
        payment_id: PaymentId,
        invoice_id: InvoiceId,
        line_item_id: LineItemId,
        amount: Money,
        remaining: Money,
        timestamp: DateTime<Utc>,
    },
    PaymentRejected {
        invoice_id: InvoiceId,
        line_item_id: LineItemId,
        amount: Money,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    StatusChanged {
        invoice_id: InvoiceId,
        old_status: InvoiceStatus,
        new_status: InvoiceStatus,
        timestamp: DateTime<Utc>,
    },
}

/// event store for collecting events during operations
#[derive(Debug, Default)]
pub struct EventStore {
    events: Vec<LedgerEvent>,
}

impl EventStore {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
        }
    }

    pub fn emit(&mut self, event: LedgerEvent) {
        self.events.push(event);
    }

    pub fn extend(&mut self, events: impl IntoIterator<Item = LedgerEvent>) {
        self.events.extend(events);
    }

    pub fn take_events(&mut self) -> Vec<LedgerEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
