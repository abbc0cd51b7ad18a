use hourglass_rs::SafeTimeProvider;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::batch::BatchOutcome;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::events::{EventStore, LedgerEvent};
use crate::locks::KeyedLocks;
use crate::records::Student;
use crate::store::LedgerStore;
use crate::types::{AdjustmentDirection, ClassId, StudentId};

/// per-student fee delta
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeAdjustment {
    pub student_id: StudentId,
    /// magnitude; the sign comes from `direction`
    pub delta: Money,
    pub direction: AdjustmentDirection,
}

impl FeeAdjustment {
    pub fn increase(student_id: impl Into<StudentId>, delta: Money) -> Self {
        Self {
            student_id: student_id.into(),
            delta,
            direction: AdjustmentDirection::Increase,
        }
    }

    pub fn decrease(student_id: impl Into<StudentId>, delta: Money) -> Self {
        Self {
            student_id: student_id.into(),
            delta,
            direction: AdjustmentDirection::Decrease,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeChange {
    pub student_id: StudentId,
    pub old_fee: Money,
    pub new_fee: Money,
    /// a decrease would have gone below zero
    pub clamped: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassChange {
    pub student_id: StudentId,
    pub from: ClassId,
    pub to: ClassId,
}

/// new fee after applying a delta, floored at zero
pub fn adjusted_fee(
    current: Money,
    delta: Money,
    direction: AdjustmentDirection,
) -> Result<(Money, bool)> {
    let raw = match direction {
        AdjustmentDirection::Increase => current.checked_add(delta)?,
        AdjustmentDirection::Decrease => current.checked_sub(delta)?,
    };
    Ok((raw.clamp_non_negative(), raw.is_negative()))
}

fn check_delta(delta: Money) -> Result<()> {
    if delta.is_negative() {
        return Err(LedgerError::InvalidAdjustment {
            message: format!("delta must not be negative: {}", delta),
        });
    }
    Ok(())
}

/// batch updates of roster fee and class fields, one student at a time
pub struct BulkMutator<'a, S: LedgerStore + ?Sized> {
    store: &'a S,
    locks: Option<&'a KeyedLocks<StudentId>>,
}

impl<'a, S: LedgerStore + ?Sized> BulkMutator<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store, locks: None }
    }

    /// serialize each student's read-modify-write through `locks`
    pub fn with_locks(mut self, locks: &'a KeyedLocks<StudentId>) -> Self {
        self.locks = Some(locks);
        self
    }

    /// same delta for every student; a bad delta rejects the whole call
    pub fn apply_bulk_adjustment(
        &self,
        student_ids: &[StudentId],
        delta: Money,
        direction: AdjustmentDirection,
        time_provider: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<BatchOutcome<FeeChange>> {
        check_delta(delta)?;
        let adjustments: Vec<FeeAdjustment> = student_ids
            .iter()
            .map(|id| FeeAdjustment {
                student_id: id.clone(),
                delta,
                direction,
            })
            .collect();
        Ok(self.apply_individual_adjustments(&adjustments, time_provider, events))
    }

    pub fn apply_individual_adjustments(
        &self,
        adjustments: &[FeeAdjustment],
        time_provider: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> BatchOutcome<FeeChange> {
        let mut outcome = BatchOutcome::new();
        for adjustment in adjustments {
            let result = self.adjust_one(adjustment, time_provider, events);
            if let Err(err) = &result {
                warn!(student_id = %adjustment.student_id, error = %err, "fee adjustment failed");
            }
            outcome.record(&adjustment.student_id, result);
        }
        info!(
            updated = outcome.success_count(),
            failed = outcome.failure_count(),
            "monthly fees adjusted"
        );
        outcome
    }

    pub fn apply_bulk_class_transfer(
        &self,
        student_ids: &[StudentId],
        target: &ClassId,
        time_provider: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> BatchOutcome<ClassChange> {
        let mut outcome = BatchOutcome::new();
        for student_id in student_ids {
            let result = self.transfer_one(student_id, target, time_provider, events);
            if let Err(err) = &result {
                warn!(student_id = %student_id, error = %err, "class transfer failed");
            }
            outcome.record(student_id, result);
        }
        info!(
            target = %target,
            moved = outcome.success_count(),
            failed = outcome.failure_count(),
            "class transfer applied"
        );
        outcome
    }

    fn adjust_one(
        &self,
        adjustment: &FeeAdjustment,
        time_provider: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<FeeChange> {
        check_delta(adjustment.delta)?;
        let slot = self.locks.map(|l| l.slot(&adjustment.student_id));
        let _guard = slot.as_ref().map(|s| s.lock()).transpose()?;
        let mut student = self.load(&adjustment.student_id)?;
        let old_fee = student.monthly_fee;
        let (new_fee, clamped) = adjusted_fee(old_fee, adjustment.delta, adjustment.direction)?;

        student.monthly_fee = new_fee;
        self.store.save_student(&student)?;
        events.emit(LedgerEvent::MonthlyFeeAdjusted {
            student_id: student.id.clone(),
            old_fee,
            new_fee,
            timestamp: time_provider.now(),
        });

        Ok(FeeChange {
            student_id: student.id,
            old_fee,
            new_fee,
            clamped,
        })
    }

    fn transfer_one(
        &self,
        student_id: &StudentId,
        target: &ClassId,
        time_provider: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<ClassChange> {
        let slot = self.locks.map(|l| l.slot(student_id));
        let _guard = slot.as_ref().map(|s| s.lock()).transpose()?;
        let mut student = self.load(student_id)?;
        let from = std::mem::replace(&mut student.class_id, target.clone());
        self.store.save_student(&student)?;
        events.emit(LedgerEvent::ClassTransferred {
            student_id: student.id.clone(),
            from: from.clone(),
            to: target.clone(),
            timestamp: time_provider.now(),
        });

        Ok(ClassChange {
            student_id: student.id,
            from,
            to: target.clone(),
        })
    }

    fn load(&self, student_id: &StudentId) -> Result<Student> {
        self.store
            .student(student_id)?
            .ok_or_else(|| LedgerError::StudentNotFound {
                student_id: student_id.clone(),
            })
    }
}
