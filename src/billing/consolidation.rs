use std::collections::HashSet;

use hourglass_rs::SafeTimeProvider;
use tracing::{info, warn};
use uuid::Uuid;

use crate::batch::BatchFailure;
use crate::config::LedgerConfig;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::events::{EventStore, LedgerEvent};
use crate::payments::status_for;
use crate::records::{line_balances, Invoice, LineItem, Student};
use crate::store::LedgerStore;
use crate::types::{BillingMonth, InvoiceId, InvoiceKind, InvoiceStatus, StudentId};

use super::{ConsolidationWarning, GenerationOutcome, InvoiceRequest};

/// builds new invoices and folds open prior balances into them
pub struct InvoiceGenerator<'a, S: LedgerStore + ?Sized> {
    store: &'a S,
    config: &'a LedgerConfig,
}

impl<'a, S: LedgerStore + ?Sized> InvoiceGenerator<'a, S> {
    pub fn new(store: &'a S, config: &'a LedgerConfig) -> Self {
        Self { store, config }
    }

    /// open invoices issued before the billing month, oldest first
    pub fn open_sources(
        &self,
        student_id: &StudentId,
        month: BillingMonth,
    ) -> Result<Vec<Invoice>> {
        let start = month.first_day();
        Ok(self
            .store
            .invoices_for_student(student_id)?
            .into_iter()
            .filter(|i| i.issue_date < start && i.status.is_open())
            .collect())
    }

    /// monthly generation with arrears carried in; the caller holds the student lock
    pub fn generate(
        &self,
        request: &InvoiceRequest,
        time_provider: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<GenerationOutcome> {
        request.validate()?;
        let student = self.active_student(&request.student_id)?;
        let month = BillingMonth::of(request.billing_date);
        let history = self.store.invoices_for_student(&student.id)?;
        duplicate_guard(&student.id, month, &history)?;

        // sources already carried into another stored invoice are only expired
        let folded: HashSet<InvoiceId> = history
            .iter()
            .flat_map(|i| i.consolidated_from.iter().copied())
            .collect();
        let sources = self.open_sources(&student.id, month)?;

        let invoice_id = Uuid::new_v4();
        let mut items: Vec<LineItem> = request
            .charges
            .iter()
            .cloned()
            .map(|c| c.into_line_item(invoice_id))
            .collect();

        let mut consolidated_from = Vec::new();
        let mut carried_over = Money::ZERO;
        for source in sources.iter().filter(|s| !folded.contains(&s.id)) {
            let carried = self.carry_over(source, invoice_id)?;
            carried_over += carried.iter().map(|i| i.amount).sum::<Money>();
            items.extend(carried);
            consolidated_from.push(source.id);
        }

        let total: Money = items.iter().map(|i| i.amount).sum();
        let now = time_provider.now();
        let invoice = Invoice {
            id: invoice_id,
            student_id: student.id.clone(),
            kind: InvoiceKind::Monthly,
            issue_date: request.billing_date,
            due_date: request.due_date,
            total_amount: total,
            status: status_for(total, Money::ZERO),
            notes: request.notes.clone(),
            consolidated_from,
            created_at: now,
        };
        // hard stop: nothing is expired unless the successor is stored
        self.store.insert_invoice(&invoice, &items)?;

        events.emit(LedgerEvent::InvoiceGenerated {
            invoice_id,
            student_id: student.id.clone(),
            total,
            carried_over,
            timestamp: now,
        });
        info!(
            student_id = %student.id,
            invoice_id = %invoice_id,
            month = %month,
            total = %total,
            carried_over = %carried_over,
            sources = sources.len(),
            "invoice generated"
        );

        let targets: Vec<InvoiceId> = sources.iter().map(|s| s.id).collect();
        let (expired, failed) = self.expire_all(&targets, invoice_id, time_provider, events);
        let warning = if failed.is_empty() {
            None
        } else {
            warn!(
                invoice_id = %invoice_id,
                unexpired = failed.len(),
                "partial consolidation: prior invoices left open"
            );
            Some(ConsolidationWarning {
                invoice_id,
                failed,
            })
        };

        Ok(GenerationOutcome {
            invoice,
            line_items: items,
            carried_over,
            expired,
            warning,
        })
    }

    /// first invoice of a student; no carry-over and no prior history allowed
    pub fn generate_admission(
        &self,
        request: &InvoiceRequest,
        time_provider: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<GenerationOutcome> {
        request.validate()?;
        let student = self.active_student(&request.student_id)?;
        if !self.store.invoices_for_student(&student.id)?.is_empty() {
            return Err(LedgerError::InvoiceHistoryExists {
                student_id: student.id,
            });
        }

        let invoice_id = Uuid::new_v4();
        let items: Vec<LineItem> = request
            .charges
            .iter()
            .cloned()
            .map(|c| c.into_line_item(invoice_id))
            .collect();
        let total: Money = items.iter().map(|i| i.amount).sum();
        let now = time_provider.now();
        let invoice = Invoice {
            id: invoice_id,
            student_id: student.id.clone(),
            kind: InvoiceKind::Admission,
            issue_date: request.billing_date,
            due_date: request.due_date,
            total_amount: total,
            status: status_for(total, Money::ZERO),
            notes: request.notes.clone(),
            consolidated_from: Vec::new(),
            created_at: now,
        };
        self.store.insert_invoice(&invoice, &items)?;

        events.emit(LedgerEvent::InvoiceGenerated {
            invoice_id,
            student_id: student.id.clone(),
            total,
            carried_over: Money::ZERO,
            timestamp: now,
        });
        info!(
            student_id = %student.id,
            invoice_id = %invoice_id,
            total = %total,
            "admission invoice generated"
        );

        Ok(GenerationOutcome {
            invoice,
            line_items: items,
            carried_over: Money::ZERO,
            expired: Vec::new(),
            warning: None,
        })
    }

    /// expire sources that a stored successor lists but that are still not expired
    pub fn expire_consolidated_sources(
        &self,
        student_id: &StudentId,
        time_provider: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<Vec<InvoiceId>> {
        let history = self.store.invoices_for_student(student_id)?;
        let mut expired = Vec::new();
        for successor in history.iter().filter(|i| !i.consolidated_from.is_empty()) {
            let pending: Vec<InvoiceId> = successor
                .consolidated_from
                .iter()
                .copied()
                .filter(|id| {
                    history
                        .iter()
                        .any(|i| i.id == *id && i.status != InvoiceStatus::Expired)
                })
                .collect();
            if pending.is_empty() {
                continue;
            }

            let (done, failed) = self.expire_all(&pending, successor.id, time_provider, events);
            if let Some(first) = failed.into_iter().next() {
                return Err(first.into_error());
            }
            expired.extend(done);
        }

        if !expired.is_empty() {
            info!(
                student_id = %student_id,
                expired = expired.len(),
                "consolidated sources expired"
            );
        }
        Ok(expired)
    }

    /// carried-over lines for every non-zero remaining balance of `source`
    ///
    /// Unredeemed discounts are carried as negative lines so the carried net
    /// equals the source's unpaid balance.
    fn carry_over(&self, source: &Invoice, invoice_id: InvoiceId) -> Result<Vec<LineItem>> {
        let items = self.store.line_items(source.id)?;
        let payments = self.store.payments_for_invoice(source.id)?;
        let since = source.issue_date.format("%Y-%m-%d");

        Ok(line_balances(&items, &payments)
            .into_iter()
            .filter(|b| !b.remaining.is_zero())
            .map(|b| LineItem {
                id: Uuid::new_v4(),
                invoice_id,
                category: b.category,
                description: format!(
                    "{} ({}: {})",
                    b.description, self.config.arrears_label, since
                ),
                amount: b.remaining,
                carried_from: Some(source.id),
            })
            .collect())
    }

    fn expire_all(
        &self,
        targets: &[InvoiceId],
        successor: InvoiceId,
        time_provider: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> (Vec<InvoiceId>, Vec<BatchFailure>) {
        let mut expired = Vec::new();
        let mut failed = Vec::new();
        for id in targets {
            match self.store.set_invoice_status(*id, InvoiceStatus::Expired) {
                Ok(()) => {
                    events.emit(LedgerEvent::InvoiceExpired {
                        invoice_id: *id,
                        successor,
                        timestamp: time_provider.now(),
                    });
                    expired.push(*id);
                }
                Err(err) => {
                    warn!(
                        invoice_id = %id,
                        successor = %successor,
                        error = %err,
                        "failed to expire invoice"
                    );
                    events.emit(LedgerEvent::ExpiryFailed {
                        invoice_id: *id,
                        successor,
                        reason: err.to_string(),
                        timestamp: time_provider.now(),
                    });
                    failed.push(BatchFailure::new(id, err));
                }
            }
        }
        (expired, failed)
    }

    fn active_student(&self, student_id: &StudentId) -> Result<Student> {
        let student = self
            .store
            .student(student_id)?
            .ok_or_else(|| LedgerError::StudentNotFound {
                student_id: student_id.clone(),
            })?;
        if !student.is_active() {
            return Err(LedgerError::StudentInactive {
                student_id: student.id,
            });
        }
        Ok(student)
    }
}

/// one non-expired invoice per student per billing month
fn duplicate_guard(student_id: &StudentId, month: BillingMonth, history: &[Invoice]) -> Result<()> {
    match history
        .iter()
        .find(|i| i.status != InvoiceStatus::Expired && month.contains(i.issue_date))
    {
        Some(existing) => Err(LedgerError::DuplicateBillingPeriod {
            student_id: student_id.clone(),
            month,
            existing: existing.id,
        }),
        None => Ok(()),
    }
}
