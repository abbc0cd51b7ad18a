use std::sync::Mutex;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use hourglass_rs::SafeTimeProvider;
use tracing::info;

use crate::batch::BatchOutcome;
use crate::billing::{GenerationOutcome, InvoiceGenerator, InvoiceRequest};
use crate::bulk::{BulkMutator, ClassChange, FeeAdjustment, FeeChange};
use crate::collaborators::{MessageSink, PrivilegeCheck};
use crate::config::LedgerConfig;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::events::{EventStore, LedgerEvent};
use crate::locks::{acquire_all, KeyedLocks};
use crate::payments::status::derived_from_store;
use crate::payments::{PaymentApplicator, PaymentReceipt, PaymentRequest};
use crate::records::{Charge, Invoice, Student};
use crate::reporting::{
    notify_defaulters, BucketClassifier, DateWindow, DefaulterAggregator, DefaulterReport,
};
use crate::store::LedgerStore;
use crate::types::{
    AdjustmentDirection, BillingMonth, ClassId, InvoiceId, InvoiceStatus, PaymentMethod, StudentId,
};
use crate::views::InvoiceView;

/// entry point: engines over one store behind per-student and per-invoice locks
pub struct FeeLedger<S: LedgerStore> {
    store: S,
    config: LedgerConfig,
    classifier: BucketClassifier,
    student_locks: KeyedLocks<StudentId>,
    invoice_locks: KeyedLocks<InvoiceId>,
    events: Mutex<EventStore>,
}

impl<S: LedgerStore> FeeLedger<S> {
    pub fn new(store: S, config: LedgerConfig) -> Result<Self> {
        config.validate()?;
        let classifier = BucketClassifier::from_config(&config.classifier)?;
        Ok(Self {
            store,
            config,
            classifier,
            student_locks: KeyedLocks::new(),
            invoice_locks: KeyedLocks::new(),
            events: Mutex::new(EventStore::new()),
        })
    }

    /// ledger with the standard configuration
    pub fn standard(store: S) -> Result<Self> {
        Self::new(store, LedgerConfig::standard())
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    // enrollment and generation

    /// store a new student and issue the admission invoice
    pub fn enroll_student(
        &self,
        student: Student,
        charges: Vec<Charge>,
        billing_date: NaiveDate,
        due_date: NaiveDate,
        time_provider: &SafeTimeProvider,
    ) -> Result<GenerationOutcome> {
        let request = InvoiceRequest::new(student.id.clone(), billing_date, due_date, charges);
        request.validate()?;

        let slot = self.student_locks.slot(&student.id);
        let _guard = slot.lock()?;

        self.store.insert_student(&student)?;
        let mut events = EventStore::new();
        events.emit(LedgerEvent::StudentEnrolled {
            student_id: student.id.clone(),
            class_id: student.class_id.clone(),
            monthly_fee: student.monthly_fee,
            timestamp: time_provider.now(),
        });
        info!(student_id = %student.id, class_id = %student.class_id, "student enrolled");

        let result = InvoiceGenerator::new(&self.store, &self.config).generate_admission(
            &request,
            time_provider,
            &mut events,
        );
        self.publish(events);
        result
    }

    pub fn generate_admission_invoice(
        &self,
        request: &InvoiceRequest,
        time_provider: &SafeTimeProvider,
    ) -> Result<GenerationOutcome> {
        let slot = self.student_locks.slot(&request.student_id);
        let _guard = slot.lock()?;

        let mut events = EventStore::new();
        let result = InvoiceGenerator::new(&self.store, &self.config).generate_admission(
            request,
            time_provider,
            &mut events,
        );
        self.publish(events);
        result
    }

    /// new cycle for one student, folding open prior invoices into it
    pub fn generate_invoice(
        &self,
        request: &InvoiceRequest,
        time_provider: &SafeTimeProvider,
    ) -> Result<GenerationOutcome> {
        let slot = self.student_locks.slot(&request.student_id);
        let _guard = slot.lock()?;

        let generator = InvoiceGenerator::new(&self.store, &self.config);
        // payments on the sources must not interleave with their expiry
        let month = BillingMonth::of(request.billing_date);
        let sources = generator.open_sources(&request.student_id, month)?;
        let slots = self.invoice_locks.sorted_slots(sources.iter().map(|i| i.id));
        let _invoice_guards = acquire_all(&slots)?;

        let mut events = EventStore::new();
        let result = generator.generate(request, time_provider, &mut events);
        self.publish(events);
        result
    }

    /// monthly cycle from the standing fee plus any extra charges
    pub fn generate_monthly_invoice(
        &self,
        student_id: &StudentId,
        billing_date: NaiveDate,
        extra_charges: Vec<Charge>,
        time_provider: &SafeTimeProvider,
    ) -> Result<GenerationOutcome> {
        let student = self
            .store
            .student(student_id)?
            .ok_or_else(|| LedgerError::StudentNotFound {
                student_id: student_id.clone(),
            })?;

        let mut charges = vec![Charge::monthly_tuition(&student, billing_date)];
        charges.extend(extra_charges);
        let due_date = billing_date + Duration::days(i64::from(self.config.default_due_days));
        let request = InvoiceRequest::new(student.id, billing_date, due_date, charges);
        self.generate_invoice(&request, time_provider)
    }

    /// retry expiry of sources a partial consolidation left open
    pub fn expire_consolidated_sources(
        &self,
        student_ids: &[StudentId],
        time_provider: &SafeTimeProvider,
    ) -> BatchOutcome<Vec<InvoiceId>> {
        let mut outcome = BatchOutcome::new();
        for student_id in student_ids {
            let result = self.expire_sources_for(student_id, time_provider);
            outcome.record(student_id, result);
        }
        outcome
    }

    fn expire_sources_for(
        &self,
        student_id: &StudentId,
        time_provider: &SafeTimeProvider,
    ) -> Result<Vec<InvoiceId>> {
        let slot = self.student_locks.slot(student_id);
        let _guard = slot.lock()?;

        let listed: Vec<InvoiceId> = self
            .store
            .invoices_for_student(student_id)?
            .into_iter()
            .flat_map(|i| i.consolidated_from)
            .collect();
        let slots = self.invoice_locks.sorted_slots(listed);
        let _invoice_guards = acquire_all(&slots)?;

        let mut events = EventStore::new();
        let result = InvoiceGenerator::new(&self.store, &self.config).expire_consolidated_sources(
            student_id,
            time_provider,
            &mut events,
        );
        self.publish(events);
        result
    }

    // payments

    pub fn apply_payment(
        &self,
        request: PaymentRequest,
        time_provider: &SafeTimeProvider,
    ) -> Result<PaymentReceipt> {
        let slot = self.invoice_locks.slot(&request.invoice_id);
        let _guard = slot.lock()?;

        let mut events = EventStore::new();
        let result = PaymentApplicator::new(&self.store, self.config.payment_tolerance).apply(
            request,
            time_provider,
            &mut events,
        );
        self.publish(events);
        result
    }

    /// each request is validated and recorded on its own; failures do not undo earlier ones
    pub fn apply_payments(
        &self,
        requests: Vec<PaymentRequest>,
        time_provider: &SafeTimeProvider,
    ) -> BatchOutcome<PaymentReceipt> {
        let mut outcome = BatchOutcome::new();
        for request in requests {
            let id = request.line_item_id;
            outcome.record(id, self.apply_payment(request, time_provider));
        }
        outcome
    }

    pub fn settle_invoice(
        &self,
        invoice_id: InvoiceId,
        method: PaymentMethod,
        notes: &str,
        paid_at: DateTime<Utc>,
        time_provider: &SafeTimeProvider,
    ) -> Result<BatchOutcome<PaymentReceipt>> {
        let slot = self.invoice_locks.slot(&invoice_id);
        let _guard = slot.lock()?;

        let mut events = EventStore::new();
        let result = PaymentApplicator::new(&self.store, self.config.payment_tolerance).settle(
            invoice_id,
            method,
            notes,
            paid_at,
            time_provider,
            &mut events,
        );
        self.publish(events);
        result
    }

    // reporting

    pub fn aggregate_defaulters(
        &self,
        student_ids: &[StudentId],
        window: DateWindow,
    ) -> Result<DefaulterReport> {
        DefaulterAggregator::new(&self.store, &self.classifier).aggregate(student_ids, window)
    }

    pub fn aggregate_class_defaulters(
        &self,
        class_id: &ClassId,
        window: DateWindow,
    ) -> Result<DefaulterReport> {
        let ids: Vec<StudentId> = self
            .store
            .students_by_class(class_id)?
            .into_iter()
            .map(|s| s.id)
            .collect();
        self.aggregate_defaulters(&ids, window)
    }

    pub fn notify_defaulters<M: MessageSink + ?Sized>(
        &self,
        report: &DefaulterReport,
        sink: &M,
    ) -> BatchOutcome<StudentId> {
        notify_defaulters(report, sink)
    }

    // roster mutation

    pub fn apply_bulk_adjustment(
        &self,
        student_ids: &[StudentId],
        delta: Money,
        direction: AdjustmentDirection,
        time_provider: &SafeTimeProvider,
    ) -> Result<BatchOutcome<FeeChange>> {
        let mut events = EventStore::new();
        let result = BulkMutator::new(&self.store)
            .with_locks(&self.student_locks)
            .apply_bulk_adjustment(student_ids, delta, direction, time_provider, &mut events);
        self.publish(events);
        result
    }

    pub fn apply_individual_adjustments(
        &self,
        adjustments: &[FeeAdjustment],
        time_provider: &SafeTimeProvider,
    ) -> BatchOutcome<FeeChange> {
        let mut events = EventStore::new();
        let outcome = BulkMutator::new(&self.store)
            .with_locks(&self.student_locks)
            .apply_individual_adjustments(adjustments, time_provider, &mut events);
        self.publish(events);
        outcome
    }

    pub fn apply_bulk_class_transfer(
        &self,
        student_ids: &[StudentId],
        target: &ClassId,
        time_provider: &SafeTimeProvider,
    ) -> BatchOutcome<ClassChange> {
        let mut events = EventStore::new();
        let outcome = BulkMutator::new(&self.store)
            .with_locks(&self.student_locks)
            .apply_bulk_class_transfer(student_ids, target, time_provider, &mut events);
        self.publish(events);
        outcome
    }

    // destructive

    /// remove an invoice that has no payments and put its sources back in play
    pub fn delete_invoice<P: PrivilegeCheck + ?Sized>(
        &self,
        invoice_id: InvoiceId,
        privilege: &P,
        time_provider: &SafeTimeProvider,
    ) -> Result<Invoice> {
        if !privilege.is_privileged() {
            return Err(LedgerError::NotPrivileged {
                operation: "delete invoice".to_string(),
            });
        }

        let student_id = self.load_invoice(invoice_id)?.student_id;
        let slot = self.student_locks.slot(&student_id);
        let _guard = slot.lock()?;

        let invoice = self.load_invoice(invoice_id)?;
        let related = std::iter::once(invoice.id).chain(invoice.consolidated_from.iter().copied());
        let slots = self.invoice_locks.sorted_slots(related);
        let _invoice_guards = acquire_all(&slots)?;

        if invoice.status == InvoiceStatus::Expired {
            return Err(LedgerError::InvoiceNotDeletable {
                invoice_id,
                status: invoice.status,
            });
        }
        let payment_count = self.store.payments_for_invoice(invoice_id)?.len();
        if payment_count > 0 {
            return Err(LedgerError::InvoiceHasPayments {
                invoice_id,
                payment_count,
            });
        }

        self.store.delete_invoice(invoice_id)?;
        let mut events = EventStore::new();
        events.emit(LedgerEvent::InvoiceDeleted {
            invoice_id,
            student_id: invoice.student_id.clone(),
            timestamp: time_provider.now(),
        });

        for source_id in &invoice.consolidated_from {
            let source = match self.store.invoice(*source_id)? {
                Some(source) if source.status == InvoiceStatus::Expired => source,
                _ => continue,
            };
            let status = derived_from_store(&self.store, &source)?;
            self.store.set_invoice_status(source.id, status)?;
            events.emit(LedgerEvent::InvoiceRestored {
                invoice_id: source.id,
                status,
                timestamp: time_provider.now(),
            });
        }

        info!(
            invoice_id = %invoice_id,
            student_id = %invoice.student_id,
            restored = invoice.consolidated_from.len(),
            "invoice deleted"
        );
        self.publish(events);
        Ok(invoice)
    }

    // views

    pub fn invoice_view(&self, invoice_id: InvoiceId) -> Result<InvoiceView> {
        let invoice = self.load_invoice(invoice_id)?;
        let items = self.store.line_items(invoice_id)?;
        let payments = self.store.payments_for_invoice(invoice_id)?;
        Ok(InvoiceView::from_parts(&invoice, &items, &payments))
    }

    /// every invoice of a student, oldest first
    pub fn student_invoices(&self, student_id: &StudentId) -> Result<Vec<InvoiceView>> {
        self.store
            .invoices_for_student(student_id)?
            .iter()
            .map(|invoice| {
                let items = self.store.line_items(invoice.id)?;
                let payments = self.store.payments_for_invoice(invoice.id)?;
                Ok(InvoiceView::from_parts(invoice, &items, &payments))
            })
            .collect()
    }

    /// drain collected audit events
    pub fn take_events(&self) -> Vec<LedgerEvent> {
        match self.events.lock() {
            Ok(mut events) => events.take_events(),
            Err(poisoned) => poisoned.into_inner().take_events(),
        }
    }

    fn publish(&self, mut events: EventStore) {
        let drained = events.take_events();
        match self.events.lock() {
            Ok(mut store) => store.extend(drained),
            Err(poisoned) => poisoned.into_inner().extend(drained),
        }
    }

    fn load_invoice(&self, invoice_id: InvoiceId) -> Result<Invoice> {
        self.store
            .invoice(invoice_id)?
            .ok_or(LedgerError::InvoiceNotFound { invoice_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::Roster;
    use crate::records::{line_balances, LineItem, Payment};
    use crate::store::InMemoryStore;
    use crate::types::FeeCategory;
    use chrono::TimeZone;
    use hourglass_rs::TimeSource;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn clock() -> SafeTimeProvider {
        SafeTimeProvider::new(TimeSource::Test(
            Utc.with_ymd_and_hms(2024, 1, 15, 8, 0, 0).unwrap(),
        ))
    }

    fn paid_at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 10, 0, 0).unwrap()
    }

    fn ledger_with<S: LedgerStore>(store: S) -> FeeLedger<S> {
        FeeLedger::standard(store).unwrap()
    }

    fn roster() -> InMemoryStore {
        InMemoryStore::with_students(vec![
            Student::new("S-1", "Fatima", "Siddiqui", "5A", Money::from_major(5_000))
                .with_phone("0321-5550000"),
            Student::new("S-2", "Hamza", "Qureshi", "5A", Money::from_major(4_000)),
        ])
    }

    fn january_request() -> InvoiceRequest {
        InvoiceRequest::new(
            "S-1",
            date(2024, 1, 15),
            date(2024, 1, 25),
            vec![
                Charge::tuition("Tuition Fee - Jan 2024", Money::from_major(5_000)),
                Charge::annual("Annual charges", Money::from_major(2_000)),
            ],
        )
    }

    fn february_request() -> InvoiceRequest {
        InvoiceRequest::new(
            "S-1",
            date(2024, 2, 10),
            date(2024, 2, 20),
            vec![Charge::tuition("Tuition Fee - Feb 2024", Money::from_major(5_000))],
        )
    }

    fn pay(item: &LineItem, amount: Money, at: DateTime<Utc>) -> PaymentRequest {
        PaymentRequest::new(item.invoice_id, item.id, amount, PaymentMethod::Cash, at)
    }

    /// store whose expiry writes fail for chosen invoices
    struct FlakyStore {
        inner: InMemoryStore,
        fail_expiry: Mutex<HashSet<InvoiceId>>,
    }

    impl FlakyStore {
        fn new(inner: InMemoryStore) -> Self {
            Self {
                inner,
                fail_expiry: Mutex::new(HashSet::new()),
            }
        }

        fn fail_on(&self, id: InvoiceId) {
            self.fail_expiry.lock().unwrap().insert(id);
        }

        fn heal(&self) {
            self.fail_expiry.lock().unwrap().clear();
        }
    }

    impl Roster for FlakyStore {
        fn student(&self, student_id: &StudentId) -> Result<Option<Student>> {
            self.inner.student(student_id)
        }

        fn students_by_class(&self, class_id: &ClassId) -> Result<Vec<Student>> {
            self.inner.students_by_class(class_id)
        }
    }

    impl LedgerStore for FlakyStore {
        fn insert_student(&self, student: &Student) -> Result<()> {
            self.inner.insert_student(student)
        }

        fn save_student(&self, student: &Student) -> Result<()> {
            self.inner.save_student(student)
        }

        fn invoice(&self, invoice_id: InvoiceId) -> Result<Option<Invoice>> {
            self.inner.invoice(invoice_id)
        }

        fn invoices_for_student(&self, student_id: &StudentId) -> Result<Vec<Invoice>> {
            self.inner.invoices_for_student(student_id)
        }

        fn line_items(&self, invoice_id: InvoiceId) -> Result<Vec<LineItem>> {
            self.inner.line_items(invoice_id)
        }

        fn payments_for_invoice(&self, invoice_id: InvoiceId) -> Result<Vec<Payment>> {
            self.inner.payments_for_invoice(invoice_id)
        }

        fn insert_invoice(&self, invoice: &Invoice, line_items: &[LineItem]) -> Result<()> {
            self.inner.insert_invoice(invoice, line_items)
        }

        fn set_invoice_status(&self, invoice_id: InvoiceId, status: InvoiceStatus) -> Result<()> {
            let failing = self.fail_expiry.lock().unwrap().contains(&invoice_id);
            if status == InvoiceStatus::Expired && failing {
                return Err(LedgerError::storage("write timeout"));
            }
            self.inner.set_invoice_status(invoice_id, status)
        }

        fn insert_payment(&self, payment: &Payment) -> Result<()> {
            self.inner.insert_payment(payment)
        }

        fn delete_invoice(&self, invoice_id: InvoiceId) -> Result<()> {
            self.inner.delete_invoice(invoice_id)
        }
    }

    #[test]
    fn test_arrears_consolidation_end_to_end() {
        let ledger = ledger_with(roster());
        let time = clock();

        let jan = ledger.generate_invoice(&january_request(), &time).unwrap();
        let first = pay(&jan.line_items[0], Money::from_major(2_000), paid_at(2024, 1, 20));
        ledger.apply_payment(first, &time).unwrap();

        let feb = ledger.generate_invoice(&february_request(), &time).unwrap();
        assert_eq!(feb.invoice.total_amount, Money::from_major(10_000));
        assert_eq!(
            ledger.invoice_view(jan.invoice.id).unwrap().status,
            InvoiceStatus::Expired
        );

        // expired invoices take no further payments
        let late = pay(&jan.line_items[1], Money::from_major(100), paid_at(2024, 2, 11));
        let err = ledger.apply_payment(late, &time).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InvoiceNotPayable {
                status: InvoiceStatus::Expired,
                ..
            }
        ));

        let events = ledger.take_events();
        assert!(events.iter().any(|e| matches!(
            e,
            LedgerEvent::InvoiceExpired { invoice_id, .. } if *invoice_id == jan.invoice.id
        )));
        assert!(events
            .iter()
            .any(|e| matches!(e, LedgerEvent::PaymentRejected { .. })));
        assert!(ledger.take_events().is_empty());
    }

    #[test]
    fn test_single_line_payment_marks_paid() {
        let ledger = ledger_with(roster());
        let time = clock();
        let request = InvoiceRequest::new(
            "S-2",
            date(2024, 3, 1),
            date(2024, 3, 10),
            vec![Charge::tuition("Tuition Fee - Mar 2024", Money::from_major(3_000))],
        );
        let inv = ledger.generate_invoice(&request, &time).unwrap();

        let full = pay(&inv.line_items[0], Money::from_major(3_000), paid_at(2024, 3, 2));
        let receipt = ledger.apply_payment(full, &time).unwrap();

        assert_eq!(receipt.line_item_remaining, Money::ZERO);
        assert_eq!(receipt.invoice_status, InvoiceStatus::Paid);
    }

    #[test]
    fn test_overpayment_boundary_with_tolerance() {
        let ledger = ledger_with(roster());
        let time = clock();
        let request = InvoiceRequest::new(
            "S-2",
            date(2024, 3, 1),
            date(2024, 3, 10),
            vec![
                Charge::tuition("Tuition", Money::from_major(3_000)),
                Charge::stationery("Stationery", Money::from_major(500)),
            ],
        );
        let inv = ledger.generate_invoice(&request, &time).unwrap();
        let tuition = &inv.line_items[0];

        let over = Money::from_major(3_000) + Money::from_minor(11);
        assert!(matches!(
            ledger.apply_payment(pay(tuition, over, paid_at(2024, 3, 2)), &time),
            Err(LedgerError::OverpaymentRejected { .. })
        ));

        let within = Money::from_major(3_000) + Money::from_minor(10);
        let receipt = ledger
            .apply_payment(pay(tuition, within, paid_at(2024, 3, 2)), &time)
            .unwrap();
        assert_eq!(receipt.payment.amount, Money::from_major(3_000));
        assert_eq!(receipt.absorbed, Money::from_minor(10));
        assert_eq!(receipt.invoice_status, InvoiceStatus::Partial);
    }

    #[test]
    fn test_partial_consolidation_failure_and_housekeeping() {
        let store = FlakyStore::new(roster());
        let ledger = ledger_with(store);
        let time = clock();

        let jan = ledger.generate_invoice(&january_request(), &time).unwrap();
        ledger.store().fail_on(jan.invoice.id);

        let feb = ledger.generate_invoice(&february_request(), &time).unwrap();
        let warning = feb.warning.clone().unwrap();
        assert_eq!(
            warning.into_error(),
            LedgerError::PartialConsolidationFailure {
                invoice_id: feb.invoice.id,
                unexpired: vec![jan.invoice.id],
            }
        );
        assert_eq!(feb.invoice.total_amount, Money::from_major(12_000));
        assert_eq!(
            ledger.invoice_view(jan.invoice.id).unwrap().status,
            InvoiceStatus::Unpaid
        );

        // the report buckets only the latest invoice
        let window = DateWindow::new(date(2024, 1, 1), date(2024, 2, 29)).unwrap();
        let report = ledger
            .aggregate_defaulters(&[StudentId::new("S-1")], window)
            .unwrap();
        assert_eq!(report.rows[0].total_pending, Money::from_major(12_000));

        // still failing: housekeeping reports the student as failed
        let outcome = ledger.expire_consolidated_sources(&[StudentId::new("S-1")], &time);
        assert_eq!(outcome.failure_count(), 1);

        ledger.store().heal();
        let outcome = ledger.expire_consolidated_sources(&[StudentId::new("S-1")], &time);
        assert_eq!(outcome.succeeded, vec![vec![jan.invoice.id]]);
        assert_eq!(
            ledger.invoice_view(jan.invoice.id).unwrap().status,
            InvoiceStatus::Expired
        );
    }

    #[test]
    fn test_unexpired_source_is_not_carried_twice() {
        let ledger = ledger_with(FlakyStore::new(roster()));
        let time = clock();

        let jan = ledger.generate_invoice(&january_request(), &time).unwrap();
        ledger.store().fail_on(jan.invoice.id);
        let feb = ledger.generate_invoice(&february_request(), &time).unwrap();
        assert!(!feb.is_clean());
        ledger.store().heal();

        let march =
            InvoiceRequest::new("S-1", date(2024, 3, 10), date(2024, 3, 20), Vec::new());
        let mar = ledger.generate_invoice(&march, &time).unwrap();

        // january is folded into february already, so only february carries
        assert_eq!(mar.invoice.consolidated_from, vec![feb.invoice.id]);
        assert_eq!(mar.carried_over, Money::from_major(12_000));
        assert_eq!(mar.expired.len(), 2);
        assert_eq!(
            ledger.invoice_view(jan.invoice.id).unwrap().status,
            InvoiceStatus::Expired
        );
    }

    #[test]
    fn test_concurrent_generation_bills_once() {
        let ledger = Arc::new(ledger_with(roster()));
        let jan = ledger.generate_invoice(&january_request(), &clock()).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                thread::spawn(move || ledger.generate_invoice(&february_request(), &clock()))
            })
            .collect();
        let results: Vec<Result<GenerationOutcome>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        let created: Vec<&GenerationOutcome> =
            results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].carried_over, Money::from_major(7_000));
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, LedgerError::DuplicateBillingPeriod { .. })));

        let invoices = ledger.student_invoices(&StudentId::new("S-1")).unwrap();
        assert_eq!(invoices.len(), 2);
        assert_eq!(invoices[0].id, jan.invoice.id);
        assert_eq!(invoices[0].status, InvoiceStatus::Expired);
        assert!(ledger.student_locks.is_empty());
        assert!(ledger.invoice_locks.is_empty());
    }

    #[test]
    fn test_concurrent_payments_never_overpay_a_line() {
        let ledger = Arc::new(ledger_with(roster()));
        let time = clock();
        let request = InvoiceRequest::new(
            "S-2",
            date(2024, 3, 1),
            date(2024, 3, 10),
            vec![
                Charge::tuition("Tuition Fee - Mar 2024", Money::from_major(3_000)),
                Charge::stationery("Stationery", Money::from_major(500)),
            ],
        );
        let inv = ledger.generate_invoice(&request, &time).unwrap();
        let tuition = inv.line_items[0].clone();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                let full = pay(&tuition, Money::from_major(3_000), paid_at(2024, 3, 2));
                thread::spawn(move || ledger.apply_payment(full, &clock()))
            })
            .collect();
        let results: Vec<Result<PaymentReceipt>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, LedgerError::OverpaymentRejected { .. })));

        let payments = ledger.store().payments_for_invoice(inv.invoice.id).unwrap();
        let paid: Money = payments
            .iter()
            .filter(|p| p.line_item_id == tuition.id)
            .map(|p| p.amount)
            .sum();
        assert_eq!(paid, tuition.amount);
        assert_eq!(
            ledger.invoice_view(inv.invoice.id).unwrap().status,
            InvoiceStatus::Partial
        );
        assert!(ledger.invoice_locks.is_empty());
    }

    #[test]
    fn test_lock_tables_drain_after_operations() {
        let ledger = ledger_with(roster());
        let time = clock();

        for id in ["S-1", "S-2"] {
            let generated = ledger
                .generate_monthly_invoice(&StudentId::new(id), date(2024, 1, 5), Vec::new(), &time)
                .unwrap();
            ledger
                .settle_invoice(
                    generated.invoice.id,
                    PaymentMethod::WalletB,
                    "counter",
                    paid_at(2024, 1, 6),
                    &time,
                )
                .unwrap();
        }
        ledger
            .generate_monthly_invoice(&StudentId::new("S-1"), date(2024, 2, 5), Vec::new(), &time)
            .unwrap();
        ledger
            .apply_bulk_adjustment(
                &[StudentId::new("S-1"), StudentId::new("S-2")],
                Money::from_major(250),
                AdjustmentDirection::Increase,
                &time,
            )
            .unwrap();
        ledger.expire_consolidated_sources(&[StudentId::new("S-1")], &time);

        assert!(ledger.student_locks.is_empty());
        assert!(ledger.invoice_locks.is_empty());
    }

    #[test]
    fn test_enrollment_and_monthly_helper() {
        let ledger = ledger_with(InMemoryStore::new());
        let time = clock();
        let student = Student::new("S-10", "Ahmed", "Ali", "1A", Money::from_major(3_500));

        let admission = ledger
            .enroll_student(
                student.clone(),
                vec![
                    Charge::admission("Admission fee", Money::from_major(8_000)),
                    Charge::discount("Merit waiver", Money::from_major(1_000)),
                ],
                date(2024, 4, 2),
                date(2024, 4, 12),
                &time,
            )
            .unwrap();
        assert_eq!(admission.invoice.total_amount, Money::from_major(7_000));
        let again =
            ledger.enroll_student(student, Vec::new(), date(2024, 4, 2), date(2024, 4, 12), &time);
        assert!(matches!(
            again,
            Err(LedgerError::StudentAlreadyExists { .. })
        ));

        let may = ledger
            .generate_monthly_invoice(&StudentId::new("S-10"), date(2024, 5, 3), Vec::new(), &time)
            .unwrap();
        assert_eq!(may.invoice.due_date, date(2024, 5, 13));
        assert_eq!(may.line_items[0].description, "Tuition Fee - May 2024");
        assert_eq!(may.invoice.total_amount, Money::from_major(10_500));
        assert!(ledger
            .take_events()
            .iter()
            .any(|e| matches!(e, LedgerEvent::StudentEnrolled { .. })));
    }

    #[test]
    fn test_delete_requires_privilege_and_restores_sources() {
        let ledger = ledger_with(roster());
        let time = clock();
        let jan = ledger.generate_invoice(&january_request(), &time).unwrap();
        let first = pay(&jan.line_items[0], Money::from_major(2_000), paid_at(2024, 1, 20));
        ledger.apply_payment(first, &time).unwrap();
        let feb = ledger.generate_invoice(&february_request(), &time).unwrap();

        assert!(matches!(
            ledger.delete_invoice(feb.invoice.id, &false, &time),
            Err(LedgerError::NotPrivileged { .. })
        ));
        assert!(matches!(
            ledger.delete_invoice(jan.invoice.id, &true, &time),
            Err(LedgerError::InvoiceNotDeletable { .. })
        ));

        let deleted = ledger.delete_invoice(feb.invoice.id, &true, &time).unwrap();
        assert_eq!(deleted.id, feb.invoice.id);
        assert!(matches!(
            ledger.invoice_view(feb.invoice.id),
            Err(LedgerError::InvoiceNotFound { .. })
        ));
        assert_eq!(
            ledger.invoice_view(jan.invoice.id).unwrap().status,
            InvoiceStatus::Partial
        );

        // the restored invoice has payments and so cannot itself be deleted
        assert!(matches!(
            ledger.delete_invoice(jan.invoice.id, &true, &time),
            Err(LedgerError::InvoiceHasPayments {
                payment_count: 1,
                ..
            })
        ));

        // billing february again carries january exactly once
        let again = ledger.generate_invoice(&february_request(), &time).unwrap();
        assert_eq!(again.invoice.total_amount, Money::from_major(10_000));
    }

    #[test]
    fn test_class_report_and_notices() {
        use crate::collaborators::OutboundMessage;

        #[derive(Default)]
        struct Outbox(Mutex<Vec<OutboundMessage>>);

        impl MessageSink for Outbox {
            fn enqueue_message(&self, message: OutboundMessage) -> Result<()> {
                self.0.lock().unwrap().push(message);
                Ok(())
            }
        }

        let ledger = ledger_with(roster());
        let time = clock();
        ledger
            .generate_monthly_invoice(&StudentId::new("S-1"), date(2024, 2, 1), Vec::new(), &time)
            .unwrap();
        ledger
            .generate_monthly_invoice(&StudentId::new("S-2"), date(2024, 2, 1), Vec::new(), &time)
            .unwrap();

        let window = DateWindow::month_of(date(2024, 2, 1));
        let report = ledger
            .aggregate_class_defaulters(&ClassId::new("5A"), window)
            .unwrap();
        assert_eq!(report.rows.len(), 2);
        assert_eq!(report.grand_total.current_tuition, Money::from_major(9_000));
        assert!(report.to_json_pretty().unwrap().contains("\"current_tuition\""));

        let outbox = Outbox::default();
        let outcome = ledger.notify_defaulters(&report, &outbox);
        assert_eq!(outcome.success_count(), 1);
        assert_eq!(outcome.failed[0].id, "S-2");
        assert_eq!(outbox.0.lock().unwrap()[0].phone_number, "0321-5550000");
    }

    #[test]
    fn test_bulk_decrease_clamps_through_ledger() {
        let ledger = ledger_with(roster());
        let time = clock();
        let ids = [StudentId::new("S-2")];
        let outcome = ledger
            .apply_bulk_adjustment(
                &ids,
                Money::from_major(10_000),
                AdjustmentDirection::Decrease,
                &time,
            )
            .unwrap();
        assert_eq!(outcome.succeeded[0].new_fee, Money::ZERO);
        let stored = ledger.store().student(&ids[0]).unwrap().unwrap();
        assert_eq!(stored.monthly_fee, Money::ZERO);

        let moved = ledger.apply_bulk_class_transfer(&ids, &ClassId::new("6A"), &time);
        assert_eq!(moved.success_count(), 1);
        let raise = [FeeAdjustment::increase("S-2", Money::from_major(4_500))];
        let changed = ledger.apply_individual_adjustments(&raise, &time);
        assert_eq!(changed.succeeded[0].new_fee, Money::from_major(4_500));
    }

    fn category(index: u8) -> FeeCategory {
        match index % 4 {
            0 => FeeCategory::Tuition,
            1 => FeeCategory::Annual,
            2 => FeeCategory::Stationery,
            _ => FeeCategory::Other,
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: consolidation moves exactly the unpaid balance into the new invoice.
        #[test]
        fn consolidation_conserves_value(
            lines in prop::collection::vec((0u8..4, 1i64..1_000_000), 1..6),
            discount in 0i64..50_000,
            paid_permille in prop::collection::vec(0i64..=1000, 1..6),
            new_charge in 0i64..1_000_000,
        ) {
            let ledger = ledger_with(roster());
            let time = clock();

            let mut charges: Vec<Charge> = lines
                .iter()
                .map(|(c, amount)| {
                    Charge::new(category(*c), category(*c).label(), Money::from_minor(*amount))
                })
                .collect();
            if discount > 0 {
                charges.push(Charge::discount("Discount", Money::from_minor(discount)));
            }
            let request =
                InvoiceRequest::new("S-1", date(2024, 1, 10), date(2024, 1, 20), charges);
            let jan = ledger.generate_invoice(&request, &time).unwrap();

            for (item, permille) in jan.line_items.iter().zip(paid_permille.iter()) {
                let amount = Money::from_minor(item.amount.minor() * permille / 1000);
                if amount.is_positive() {
                    let _ = ledger.apply_payment(pay(item, amount, paid_at(2024, 1, 15)), &time);
                }
            }

            let source = ledger.invoice_view(jan.invoice.id).unwrap();
            let history = ledger.store().payments_for_invoice(jan.invoice.id).unwrap();
            let balances = line_balances(&jan.line_items, &history);
            let unpaid: Money = balances.iter().map(|b| b.remaining).sum();
            prop_assert_eq!(unpaid, source.totals.outstanding);

            let feb_request = InvoiceRequest::new(
                "S-1",
                date(2024, 2, 10),
                date(2024, 2, 20),
                vec![Charge::tuition("Tuition", Money::from_minor(new_charge))],
            );
            let feb = ledger.generate_invoice(&feb_request, &time).unwrap();

            if source.status.is_open() {
                prop_assert_eq!(feb.carried_over, unpaid);
                prop_assert_eq!(feb.expired.clone(), vec![jan.invoice.id]);
            } else {
                prop_assert_eq!(feb.carried_over, Money::ZERO);
            }
            prop_assert_eq!(
                feb.invoice.total_amount,
                Money::from_minor(new_charge) + feb.carried_over
            );

            for view in ledger.student_invoices(&StudentId::new("S-1")).unwrap() {
                if view.status != InvoiceStatus::Expired {
                    let sum: Money = view.lines.iter().map(|l| l.amount).sum();
                    prop_assert_eq!(sum, view.totals.total_amount);
                }
            }
        }
    }
}
