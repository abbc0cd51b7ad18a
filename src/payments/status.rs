use crate::decimal::Money;
use crate::errors::Result;
use crate::records::{total_paid, Invoice, Payment};
use crate::store::LedgerStore;
use crate::types::InvoiceStatus;

/// status from the declared total and the amount paid so far
pub fn status_for(declared_total: Money, paid: Money) -> InvoiceStatus {
    if paid >= declared_total {
        InvoiceStatus::Paid
    } else if paid.is_positive() {
        InvoiceStatus::Partial
    } else {
        InvoiceStatus::Unpaid
    }
}

/// full recomputation from the payment history; order of payments is irrelevant
pub fn derive_status(declared_total: Money, payments: &[Payment]) -> InvoiceStatus {
    status_for(declared_total, total_paid(payments))
}

/// derived status unless the invoice already carries the expired override
pub fn recompute(
    current: InvoiceStatus,
    declared_total: Money,
    payments: &[Payment],
) -> InvoiceStatus {
    match current {
        InvoiceStatus::Expired => InvoiceStatus::Expired,
        _ => derive_status(declared_total, payments),
    }
}

/// status an invoice would have without the expired override, read from the store
pub fn derived_from_store<S: LedgerStore + ?Sized>(
    store: &S,
    invoice: &Invoice,
) -> Result<InvoiceStatus> {
    let payments = store.payments_for_invoice(invoice.id)?;
    Ok(derive_status(invoice.total_amount, &payments))
}
