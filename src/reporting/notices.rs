use tracing::{info, warn};

use crate::batch::BatchOutcome;
use crate::collaborators::{MessageSink, OutboundMessage};
use crate::errors::LedgerError;
use crate::types::{BillingMonth, StudentId};

use super::defaulters::{DefaulterReport, DefaulterRow};

/// plain summary text for one defaulter
pub fn reminder_text(row: &DefaulterRow, month: BillingMonth) -> String {
    let b = &row.buckets;
    let mut parts = Vec::new();
    for (label, amount) in [
        ("tuition", b.current_tuition),
        ("previous tuition", b.previous_tuition),
        ("annual charges", b.annual),
        ("stationery", b.stationery),
        ("arrears", b.arrears),
    ] {
        if amount.is_positive() {
            parts.push(format!("{} {}", label, amount));
        }
    }

    format!(
        "Dear parent, fee of {} ({}) for {} is pending: {}. Total due {}.",
        row.name,
        row.class_id,
        month.label(),
        parts.join(", "),
        row.total_pending
    )
}

/// queue one reminder per defaulter row; rows without a contact number fail
pub fn notify_defaulters<M: MessageSink + ?Sized>(
    report: &DefaulterReport,
    sink: &M,
) -> BatchOutcome<StudentId> {
    let month = report.window.reference_month();
    let mut outcome = BatchOutcome::new();

    for row in &report.rows {
        let result = match row.guardian_phone.as_deref().map(str::trim) {
            Some(phone) if !phone.is_empty() => sink
                .enqueue_message(OutboundMessage {
                    student_id: row.student_id.clone(),
                    class_id: row.class_id.clone(),
                    text: reminder_text(row, month),
                    phone_number: phone.to_string(),
                })
                .map(|()| row.student_id.clone()),
            _ => Err(LedgerError::MissingContact {
                student_id: row.student_id.clone(),
            }),
        };

        if let Err(err) = &result {
            warn!(student_id = %row.student_id, error = %err, "reminder not queued");
        }
        outcome.record(&row.student_id, result);
    }

    info!(
        queued = outcome.success_count(),
        failed = outcome.failure_count(),
        "defaulter reminders queued"
    );
    outcome
}
