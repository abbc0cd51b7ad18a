use thiserror::Error;

use crate::decimal::Money;
use crate::types::{BillingMonth, InvoiceId, InvoiceStatus, LineItemId, StudentId};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("duplicate billing period: student {student_id} already has invoice {existing} for {month}")]
    DuplicateBillingPeriod {
        student_id: StudentId,
        month: BillingMonth,
        existing: InvoiceId,
    },

    #[error("overpayment rejected on line item {line_item_id}: requested {requested}, remaining {remaining}")]
    OverpaymentRejected {
        line_item_id: LineItemId,
        requested: Money,
        remaining: Money,
    },

    #[error("invoice {invoice_id} is not payable: current status is {status}")]
    InvoiceNotPayable {
        invoice_id: InvoiceId,
        status: InvoiceStatus,
    },

    #[error("invoice {invoice_id} was created but {} prior invoice(s) could not be expired", .unexpired.len())]
    PartialConsolidationFailure {
        invoice_id: InvoiceId,
        unexpired: Vec<InvoiceId>,
    },

    #[error("batch item {id} failed: {reason}")]
    BatchItemFailure {
        id: String,
        reason: Box<LedgerError>,
    },

    #[error("invalid payment amount: {amount}")]
    InvalidPaymentAmount {
        amount: Money,
    },

    #[error("invalid fee adjustment: {message}")]
    InvalidAdjustment {
        message: String,
    },

    #[error("invalid amount: {input}")]
    InvalidAmount {
        input: String,
    },

    #[error("student not found: {student_id}")]
    StudentNotFound {
        student_id: StudentId,
    },

    #[error("student {student_id} is inactive")]
    StudentInactive {
        student_id: StudentId,
    },

    #[error("student already exists: {student_id}")]
    StudentAlreadyExists {
        student_id: StudentId,
    },

    #[error("invoice not found: {invoice_id}")]
    InvoiceNotFound {
        invoice_id: InvoiceId,
    },

    #[error("line item {line_item_id} not found on invoice {invoice_id}")]
    LineItemNotFound {
        invoice_id: InvoiceId,
        line_item_id: LineItemId,
    },

    #[error("student {student_id} already has invoice history; admission billing applies only once")]
    InvoiceHistoryExists {
        student_id: StudentId,
    },

    #[error("invoice {invoice_id} has {payment_count} payment(s) and cannot be deleted")]
    InvoiceHasPayments {
        invoice_id: InvoiceId,
        payment_count: usize,
    },

    #[error("invoice {invoice_id} cannot be deleted: current status is {status}")]
    InvoiceNotDeletable {
        invoice_id: InvoiceId,
        status: InvoiceStatus,
    },

    #[error("operation requires a privileged role: {operation}")]
    NotPrivileged {
        operation: String,
    },

    #[error("no contact number on file for student {student_id}")]
    MissingContact {
        student_id: StudentId,
    },

    #[error("invalid date: {message}")]
    InvalidDate {
        message: String,
    },

    #[error("invalid configuration: {message}")]
    InvalidConfiguration {
        message: String,
    },

    #[error("lock poisoned for {key}")]
    LockPoisoned {
        key: String,
    },

    #[error("storage error: {message}")]
    Storage {
        message: String,
    },
}

impl LedgerError {
    /// validation rejections the caller can correct and resubmit
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            LedgerError::DuplicateBillingPeriod { .. }
                | LedgerError::OverpaymentRejected { .. }
                | LedgerError::InvalidPaymentAmount { .. }
                | LedgerError::InvalidAmount { .. }
                | LedgerError::PartialConsolidationFailure { .. }
        )
    }

    pub fn storage(message: impl Into<String>) -> Self {
        LedgerError::Storage {
            message: message.into(),
        }
    }

    pub(crate) fn lock_poisoned(key: impl ToString) -> Self {
        LedgerError::LockPoisoned {
            key: key.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
