pub mod application;
pub mod status;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::records::Payment;
use crate::types::{InvoiceId, InvoiceStatus, LineItemId, PaymentMethod};

pub use application::PaymentApplicator;
pub use status::{derive_status, status_for};

/// payment against one line item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub invoice_id: InvoiceId,
    pub line_item_id: LineItemId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub notes: String,
    pub paid_at: DateTime<Utc>,
}

impl PaymentRequest {
    pub fn new(
        invoice_id: InvoiceId,
        line_item_id: LineItemId,
        amount: Money,
        method: PaymentMethod,
        paid_at: DateTime<Utc>,
    ) -> Self {
        Self {
            invoice_id,
            line_item_id,
            amount,
            method,
            notes: String::new(),
            paid_at,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }
}

/// what the caller gets back after a payment is recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub payment: Payment,
    /// requested minus recorded; non-zero only inside the tolerance band
    pub absorbed: Money,
    pub line_item_remaining: Money,
    pub invoice_status: InvoiceStatus,
    pub invoice_outstanding: Money,
}

/// balances that a single payment is validated against
#[derive(Debug, Clone, PartialEq)]
pub struct LineItemContext {
    pub invoice_id: InvoiceId,
    pub invoice_status: InvoiceStatus,
    pub line_item_id: LineItemId,
    pub remaining: Money,
    pub tolerance: Money,
}

impl LineItemContext {
    /// amount to record for a requested payment
    ///
    /// Amounts up to `remaining + tolerance` are accepted and recorded capped
    /// at `remaining`, so the per-item paid sum never exceeds the line amount.
    pub fn validate_payment(&self, amount: Money) -> Result<Money> {
        if !amount.is_positive() {
            return Err(LedgerError::InvalidPaymentAmount { amount });
        }

        if !self.invoice_status.is_open() {
            return Err(LedgerError::InvoiceNotPayable {
                invoice_id: self.invoice_id,
                status: self.invoice_status,
            });
        }

        if !self.remaining.is_positive() || amount > self.remaining + self.tolerance {
            return Err(LedgerError::OverpaymentRejected {
                line_item_id: self.line_item_id,
                requested: amount,
                remaining: self.remaining,
            });
        }

        Ok(amount.min(self.remaining))
    }
}
