pub mod consolidation;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::batch::BatchFailure;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::records::{Charge, Invoice, LineItem};
use crate::types::{InvoiceId, StudentId};

pub use consolidation::InvoiceGenerator;

/// input for one billing cycle of one student
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceRequest {
    pub student_id: StudentId,
    pub billing_date: NaiveDate,
    pub due_date: NaiveDate,
    pub charges: Vec<Charge>,
    pub notes: Option<String>,
}

impl InvoiceRequest {
    pub fn new(
        student_id: impl Into<StudentId>,
        billing_date: NaiveDate,
        due_date: NaiveDate,
        charges: Vec<Charge>,
    ) -> Self {
        Self {
            student_id: student_id.into(),
            billing_date,
            due_date,
            charges,
            notes: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.due_date < self.billing_date {
            return Err(LedgerError::InvalidDate {
                message: format!(
                    "due date {} is before billing date {}",
                    self.due_date, self.billing_date
                ),
            });
        }
        Ok(())
    }
}

/// prior invoices left unexpired after the new invoice was stored
#[derive(Debug, Clone, PartialEq)]
pub struct ConsolidationWarning {
    pub invoice_id: InvoiceId,
    pub failed: Vec<BatchFailure>,
}

impl ConsolidationWarning {
    pub fn unexpired(&self) -> Vec<InvoiceId> {
        self.failed
            .iter()
            .filter_map(|f| f.id.parse().ok())
            .collect()
    }

    pub fn into_error(self) -> LedgerError {
        LedgerError::PartialConsolidationFailure {
            invoice_id: self.invoice_id,
            unexpired: self.unexpired(),
        }
    }
}

/// result of a generation run; the invoice stands even when a warning is present
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOutcome {
    pub invoice: Invoice,
    pub line_items: Vec<LineItem>,
    /// net of the carried-over lines
    pub carried_over: Money,
    /// prior invoices flipped to expired by this run
    pub expired: Vec<InvoiceId>,
    pub warning: Option<ConsolidationWarning>,
}

impl GenerationOutcome {
    pub fn is_clean(&self) -> bool {
        self.warning.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_due_date_before_billing_date_rejected() {
        let request = InvoiceRequest::new("S-1", date(2024, 2, 10), date(2024, 2, 1), Vec::new());
        assert!(matches!(request.validate(), Err(LedgerError::InvalidDate { .. })));

        let request = InvoiceRequest::new("S-1", date(2024, 2, 1), date(2024, 2, 1), Vec::new());
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_warning_lists_unexpired_sources() {
        let invoice_id = Uuid::new_v4();
        let source = Uuid::new_v4();
        let warning = ConsolidationWarning {
            invoice_id,
            failed: vec![BatchFailure::new(source, LedgerError::storage("disk full"))],
        };

        assert_eq!(
            warning.into_error(),
            LedgerError::PartialConsolidationFailure {
                invoice_id,
                unexpired: vec![source],
            }
        );
    }
}
