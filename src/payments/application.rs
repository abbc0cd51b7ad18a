use chrono::{DateTime, Utc};
use hourglass_rs::SafeTimeProvider;
use tracing::{info, warn};
use uuid::Uuid;

use crate::batch::BatchOutcome;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::events::{EventStore, LedgerEvent};
use crate::records::{line_balances, paid_on_item, total_paid, Payment};
use crate::store::LedgerStore;
use crate::types::{InvoiceId, PaymentMethod};

use super::status::recompute;
use super::{LineItemContext, PaymentReceipt, PaymentRequest};

/// applies payments to individual line items and re-derives invoice status
pub struct PaymentApplicator<'a, S: LedgerStore + ?Sized> {
    store: &'a S,
    tolerance: Money,
}

impl<'a, S: LedgerStore + ?Sized> PaymentApplicator<'a, S> {
    pub fn new(store: &'a S, tolerance: Money) -> Self {
        Self { store, tolerance }
    }

    /// validate and record one payment; the caller serializes per invoice
    pub fn apply(
        &self,
        request: PaymentRequest,
        time_provider: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<PaymentReceipt> {
        match self.try_apply(&request, time_provider, events) {
            Ok(receipt) => Ok(receipt),
            Err(err) => {
                warn!(
                    invoice_id = %request.invoice_id,
                    line_item_id = %request.line_item_id,
                    amount = %request.amount,
                    error = %err,
                    "payment rejected"
                );
                events.emit(LedgerEvent::PaymentRejected {
                    invoice_id: request.invoice_id,
                    line_item_id: request.line_item_id,
                    amount: request.amount,
                    reason: err.to_string(),
                    timestamp: time_provider.now(),
                });
                Err(err)
            }
        }
    }

    fn try_apply(
        &self,
        request: &PaymentRequest,
        time_provider: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<PaymentReceipt> {
        let invoice = self
            .store
            .invoice(request.invoice_id)?
            .ok_or(LedgerError::InvoiceNotFound {
                invoice_id: request.invoice_id,
            })?;

        let items = self.store.line_items(invoice.id)?;
        let item = items
            .iter()
            .find(|i| i.id == request.line_item_id)
            .ok_or(LedgerError::LineItemNotFound {
                invoice_id: invoice.id,
                line_item_id: request.line_item_id,
            })?;

        let prior = self.store.payments_for_invoice(invoice.id)?;
        let context = LineItemContext {
            invoice_id: invoice.id,
            invoice_status: invoice.status,
            line_item_id: item.id,
            remaining: item.amount - paid_on_item(&prior, item.id),
            tolerance: self.tolerance,
        };
        let recorded = context.validate_payment(request.amount)?;

        let now = time_provider.now();
        let payment = Payment {
            id: Uuid::new_v4(),
            invoice_id: invoice.id,
            line_item_id: item.id,
            amount: recorded,
            method: request.method,
            notes: request.notes.clone(),
            paid_at: request.paid_at,
            recorded_at: now,
        };
        self.store.insert_payment(&payment)?;

        // recompute from the stored history rather than patching a counter
        let history = self.store.payments_for_invoice(invoice.id)?;
        let new_status = recompute(invoice.status, invoice.total_amount, &history);
        if new_status != invoice.status {
            self.store.set_invoice_status(invoice.id, new_status)?;
            events.emit(LedgerEvent::StatusChanged {
                invoice_id: invoice.id,
                old_status: invoice.status,
                new_status,
                timestamp: now,
            });
        }

        let line_item_remaining = item.amount - paid_on_item(&history, item.id);
        events.emit(LedgerEvent::PaymentApplied {
            payment_id: payment.id,
            invoice_id: invoice.id,
            line_item_id: item.id,
            amount: recorded,
            remaining: line_item_remaining,
            timestamp: now,
        });

        info!(
            invoice_id = %invoice.id,
            line_item_id = %item.id,
            amount = %recorded,
            status = %new_status,
            "payment applied"
        );

        Ok(PaymentReceipt {
            absorbed: request.amount - recorded,
            line_item_remaining,
            invoice_status: new_status,
            invoice_outstanding: invoice.total_amount - total_paid(&history),
            payment,
        })
    }

    /// independent calls; already-applied payments stay when a later one fails
    pub fn apply_batch(
        &self,
        requests: Vec<PaymentRequest>,
        time_provider: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> BatchOutcome<PaymentReceipt> {
        let mut outcome = BatchOutcome::new();
        for request in requests {
            let id = request.line_item_id;
            outcome.record(id, self.apply(request, time_provider, events));
        }
        outcome
    }

    /// pay every outstanding line item its exact remaining, one payment per item
    pub fn settle(
        &self,
        invoice_id: InvoiceId,
        method: PaymentMethod,
        notes: &str,
        paid_at: DateTime<Utc>,
        time_provider: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<BatchOutcome<PaymentReceipt>> {
        let invoice = self
            .store
            .invoice(invoice_id)?
            .ok_or(LedgerError::InvoiceNotFound { invoice_id })?;
        if !invoice.status.is_open() {
            return Err(LedgerError::InvoiceNotPayable {
                invoice_id,
                status: invoice.status,
            });
        }

        let items = self.store.line_items(invoice_id)?;
        let payments = self.store.payments_for_invoice(invoice_id)?;
        let requests = line_balances(&items, &payments)
            .into_iter()
            .filter(|b| b.remaining.is_positive())
            .map(|b| {
                PaymentRequest::new(invoice_id, b.line_item_id, b.remaining, method, paid_at)
                    .with_notes(notes)
            })
            .collect();

        Ok(self.apply_batch(requests, time_provider, events))
    }
}
