/// defaulter report - bucket pending balances for a class and queue reminders
use std::sync::Mutex;

use fee_ledger_rs::chrono::{NaiveDate, Utc};
use fee_ledger_rs::{
    telemetry, ClassId, DateWindow, FeeLedger, InMemoryStore, MessageSink, OutboundMessage,
    Money, Result as LedgerResult, SafeTimeProvider, Student, StudentId, TimeSource,
};

/// stands in for the messaging queue
#[derive(Default)]
struct ConsoleQueue {
    sent: Mutex<Vec<OutboundMessage>>,
}

impl MessageSink for ConsoleQueue {
    fn enqueue_message(&self, message: OutboundMessage) -> LedgerResult<()> {
        println!("-> {} {}: {}", message.class_id, message.phone_number, message.text);
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(message);
        }
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    telemetry::init_with_default("warn");

    let ledger = FeeLedger::standard(InMemoryStore::with_students(vec![
        Student::new("S-201", "Hina", "Aslam", "8C", Money::from_major(6_000))
            .with_phone("0300-1112223"),
        Student::new("S-202", "Omar", "Farooq", "8C", Money::from_major(6_000))
            .with_phone("0300-4445556"),
        Student::new("S-203", "Sana", "Malik", "8C", Money::from_major(6_000)),
    ]))?;
    let time = SafeTimeProvider::new(TimeSource::System);
    let class = ClassId::new("8C");

    for month in 1..=3 {
        let billing = NaiveDate::from_ymd_opt(2024, month, 5).ok_or("bad date")?;
        for id in ["S-201", "S-202", "S-203"] {
            ledger.generate_monthly_invoice(&StudentId::new(id), billing, Vec::new(), &time)?;
        }
    }

    // S-202 clears march in full
    let views = ledger.student_invoices(&StudentId::new("S-202"))?;
    if let Some(latest) = views.last() {
        let outcome = ledger.settle_invoice(
            latest.id,
            fee_ledger_rs::PaymentMethod::Cash,
            "paid at counter",
            Utc::now(),
            &time,
        )?;
        println!("settled {} line(s) for S-202", outcome.success_count());
    }

    let window = DateWindow::new(
        NaiveDate::from_ymd_opt(2024, 1, 1).ok_or("bad date")?,
        NaiveDate::from_ymd_opt(2024, 3, 31).ok_or("bad date")?,
    )?;
    let report = ledger.aggregate_class_defaulters(&class, window)?;
    println!("{}", report.to_json_pretty()?);

    let queue = ConsoleQueue::default();
    let outcome = ledger.notify_defaulters(&report, &queue);
    for failure in &outcome.failed {
        println!("not notified {}: {}", failure.id, failure.reason);
    }

    Ok(())
}
