pub mod memory;

use crate::collaborators::Roster;
use crate::errors::Result;
use crate::records::{Invoice, LineItem, Payment, Student};
use crate::types::{InvoiceId, InvoiceStatus, StudentId};

pub use memory::InMemoryStore;

/// persisted ledger state: students, invoices, line items, payments
///
/// Implementations must make `insert_invoice` atomic for the invoice and its
/// line items. Serialization of concurrent writers is handled by the caller.
pub trait LedgerStore: Roster + Send + Sync {
    fn insert_student(&self, student: &Student) -> Result<()>;

    fn save_student(&self, student: &Student) -> Result<()>;

    fn invoice(&self, invoice_id: InvoiceId) -> Result<Option<Invoice>>;

    /// all invoices of a student, oldest issue date first
    fn invoices_for_student(&self, student_id: &StudentId) -> Result<Vec<Invoice>>;

    fn line_items(&self, invoice_id: InvoiceId) -> Result<Vec<LineItem>>;

    fn payments_for_invoice(&self, invoice_id: InvoiceId) -> Result<Vec<Payment>>;

    fn insert_invoice(&self, invoice: &Invoice, line_items: &[LineItem]) -> Result<()>;

    fn set_invoice_status(&self, invoice_id: InvoiceId, status: InvoiceStatus) -> Result<()>;

    fn insert_payment(&self, payment: &Payment) -> Result<()>;

    /// remove an invoice and its line items; refused while payments exist
    fn delete_invoice(&self, invoice_id: InvoiceId) -> Result<()>;
}
