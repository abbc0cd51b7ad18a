/// arrears consolidation - unpaid january balances roll into february
use fee_ledger_rs::chrono::{Duration, NaiveDate, TimeZone, Utc};
use fee_ledger_rs::{
    telemetry, Charge, FeeLedger, InMemoryStore, InvoiceRequest, InvoiceStatus, Money,
    PaymentMethod, PaymentRequest, SafeTimeProvider, Student, TimeSource,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    telemetry::init();
    println!("=== arrears consolidation ===\n");

    let ledger = FeeLedger::standard(InMemoryStore::with_students(vec![Student::new(
        "S-014",
        "Bilal",
        "Ahmed",
        "7B",
        Money::from_major(5_000),
    )]))?;

    // test clock so the audit timestamps are reproducible
    let time = SafeTimeProvider::new(TimeSource::Test(
        Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap()
    ));
    let controller = time.test_control().unwrap();

    let january = ledger.generate_invoice(
        &InvoiceRequest::new(
            "S-014",
            NaiveDate::from_ymd_opt(2024, 1, 15).ok_or("bad date")?,
            NaiveDate::from_ymd_opt(2024, 1, 25).ok_or("bad date")?,
            vec![
                Charge::tuition("Tuition Fee - Jan 2024", Money::from_major(5_000)),
                Charge::annual("Annual charges", Money::from_major(2_000)),
            ],
        ),
        &time,
    )?;
    println!("january total: {}", january.invoice.total_amount);

    // partial payment against the tuition line only
    ledger.apply_payment(
        PaymentRequest::new(
            january.invoice.id,
            january.line_items[0].id,
            Money::from_major(2_000),
            PaymentMethod::WalletA,
            Utc.with_ymd_and_hms(2024, 1, 20, 11, 30, 0).single().ok_or("bad time")?,
        )
        .with_notes("first instalment"),
        &time,
    )?;

    controller.advance(Duration::days(26));
    let february = ledger.generate_monthly_invoice(
        &"S-014".into(),
        NaiveDate::from_ymd_opt(2024, 2, 10).ok_or("bad date")?,
        Vec::new(),
        &time,
    )?;

    println!("february total: {}", february.invoice.total_amount);
    println!("carried over:   {}", february.carried_over);
    for item in &february.line_items {
        println!("  {:<45} {:>10}", item.description, item.amount);
    }

    let january_now = ledger.invoice_view(january.invoice.id)?;
    assert_eq!(january_now.status, InvoiceStatus::Expired);
    println!("\njanuary status: {}", january_now.status);

    // regenerating the same month is refused
    if let Err(err) = ledger.generate_monthly_invoice(
        &"S-014".into(),
        NaiveDate::from_ymd_opt(2024, 2, 12).ok_or("bad date")?,
        Vec::new(),
        &time,
    ) {
        println!("second february run: {}", err);
    }

    println!("\naudit events: {}", ledger.take_events().len());
    Ok(())
}
