use std::collections::BTreeMap;
use std::ops::AddAssign;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::records::{line_balances, Student};
use crate::store::LedgerStore;
use crate::types::{BillingMonth, ClassId, InvoiceId, StudentId};

use super::classifier::{Bucket, BucketClassifier};

/// inclusive date range scanned by a report; `end` is the reference date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end < start {
            return Err(LedgerError::InvalidDate {
                message: format!("window end {} is before start {}", end, start),
            });
        }
        Ok(Self { start, end })
    }

    /// the whole calendar month containing `date`
    pub fn month_of(date: NaiveDate) -> Self {
        let month = BillingMonth::of(date);
        let end = month.next_first_day().pred_opt().unwrap_or(date);
        Self {
            start: month.first_day(),
            end,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn reference_date(&self) -> NaiveDate {
        self.end
    }

    pub fn reference_month(&self) -> BillingMonth {
        BillingMonth::of(self.end)
    }
}

/// pending amounts per bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketTotals {
    pub current_tuition: Money,
    pub previous_tuition: Money,
    pub annual: Money,
    pub stationery: Money,
    pub arrears: Money,
}

impl BucketTotals {
    pub fn add(&mut self, bucket: Bucket, amount: Money) {
        let slot = match bucket {
            Bucket::CurrentTuition => &mut self.current_tuition,
            Bucket::PreviousTuition => &mut self.previous_tuition,
            Bucket::Annual => &mut self.annual,
            Bucket::Stationery => &mut self.stationery,
            Bucket::Arrears => &mut self.arrears,
        };
        *slot += amount;
    }

    pub fn get(&self, bucket: Bucket) -> Money {
        match bucket {
            Bucket::CurrentTuition => self.current_tuition,
            Bucket::PreviousTuition => self.previous_tuition,
            Bucket::Annual => self.annual,
            Bucket::Stationery => self.stationery,
            Bucket::Arrears => self.arrears,
        }
    }

    pub fn total(&self) -> Money {
        self.current_tuition + self.previous_tuition + self.annual + self.stationery + self.arrears
    }
}

impl AddAssign for BucketTotals {
    fn add_assign(&mut self, other: Self) {
        self.current_tuition += other.current_tuition;
        self.previous_tuition += other.previous_tuition;
        self.annual += other.annual;
        self.stationery += other.stationery;
        self.arrears += other.arrears;
    }
}

/// one defaulting student
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaulterRow {
    pub student_id: StudentId,
    pub name: String,
    pub father_name: String,
    pub class_id: ClassId,
    pub guardian_phone: Option<String>,
    /// latest open invoice in the window, the one that was bucketed
    pub invoice_id: InvoiceId,
    pub buckets: BucketTotals,
    pub total_pending: Money,
    /// payments dated in the reference month; not netted against buckets
    pub amount_received: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassTotals {
    pub class_id: ClassId,
    pub students: usize,
    pub buckets: BucketTotals,
    pub total_pending: Money,
    pub amount_received: Money,
}

impl ClassTotals {
    fn new(class_id: ClassId) -> Self {
        Self {
            class_id,
            students: 0,
            buckets: BucketTotals::default(),
            total_pending: Money::ZERO,
            amount_received: Money::ZERO,
        }
    }

    fn absorb(&mut self, row: &DefaulterRow) {
        self.students += 1;
        self.buckets += row.buckets;
        self.total_pending += row.total_pending;
        self.amount_received += row.amount_received;
    }
}

/// point-in-time defaulter snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaulterReport {
    pub window: DateWindow,
    pub rows: Vec<DefaulterRow>,
    pub class_totals: BTreeMap<ClassId, ClassTotals>,
    pub grand_total: BucketTotals,
    pub amount_received: Money,
    /// requested ids absent from the roster
    pub missing: Vec<StudentId>,
}

impl DefaulterReport {
    pub fn total_pending(&self) -> Money {
        self.grand_total.total()
    }

    /// convert to pretty-printed json string
    pub fn to_json_pretty(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// read-only scan of open invoices into bucket totals
pub struct DefaulterAggregator<'a, S: LedgerStore + ?Sized> {
    store: &'a S,
    classifier: &'a BucketClassifier,
}

impl<'a, S: LedgerStore + ?Sized> DefaulterAggregator<'a, S> {
    pub fn new(store: &'a S, classifier: &'a BucketClassifier) -> Self {
        Self { store, classifier }
    }

    pub fn aggregate(
        &self,
        student_ids: &[StudentId],
        window: DateWindow,
    ) -> Result<DefaulterReport> {
        let mut rows = Vec::new();
        let mut missing = Vec::new();

        for student_id in student_ids {
            match self.store.student(student_id)? {
                Some(student) => {
                    if let Some(row) = self.student_row(&student, window)? {
                        rows.push(row);
                    }
                }
                None => missing.push(student_id.clone()),
            }
        }

        let mut class_totals: BTreeMap<ClassId, ClassTotals> = BTreeMap::new();
        let mut grand_total = BucketTotals::default();
        let mut amount_received = Money::ZERO;
        for row in &rows {
            class_totals
                .entry(row.class_id.clone())
                .or_insert_with(|| ClassTotals::new(row.class_id.clone()))
                .absorb(row);
            grand_total += row.buckets;
            amount_received += row.amount_received;
        }

        info!(
            students = student_ids.len(),
            defaulters = rows.len(),
            total_pending = %grand_total.total(),
            "defaulters aggregated"
        );

        Ok(DefaulterReport {
            window,
            rows,
            class_totals,
            grand_total,
            amount_received,
            missing,
        })
    }

    /// row for one student, `None` when nothing is pending
    pub fn student_row(
        &self,
        student: &Student,
        window: DateWindow,
    ) -> Result<Option<DefaulterRow>> {
        let in_window: Vec<_> = self
            .store
            .invoices_for_student(&student.id)?
            .into_iter()
            .filter(|i| window.contains(i.issue_date))
            .collect();

        let reference_month = window.reference_month();
        let mut amount_received = Money::ZERO;
        for invoice in &in_window {
            amount_received += self
                .store
                .payments_for_invoice(invoice.id)?
                .iter()
                .filter(|p| reference_month.contains(p.paid_at.date_naive()))
                .map(|p| p.amount)
                .sum::<Money>();
        }

        // store order is oldest first, so the last open one is the latest
        let latest = match in_window.iter().rev().find(|i| i.status.is_open()) {
            Some(invoice) => invoice,
            None => return Ok(None),
        };

        let items = self.store.line_items(latest.id)?;
        let payments = self.store.payments_for_invoice(latest.id)?;
        let mut buckets = BucketTotals::default();
        for (item, balance) in items.iter().zip(line_balances(&items, &payments)) {
            if balance.remaining.is_positive() {
                let bucket = self
                    .classifier
                    .classify(item, latest.issue_date, window.reference_date());
                buckets.add(bucket, balance.remaining);
            }
        }

        let total_pending = buckets.total();
        if !total_pending.is_positive() {
            return Ok(None);
        }

        Ok(Some(DefaulterRow {
            student_id: student.id.clone(),
            name: student.name.clone(),
            father_name: student.father_name.clone(),
            class_id: student.class_id.clone(),
            guardian_phone: student.guardian_phone.clone(),
            invoice_id: latest.id,
            buckets,
            total_pending,
            amount_received,
        }))
    }
}
