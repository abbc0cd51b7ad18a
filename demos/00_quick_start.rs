/// quick start - bill one student and take a payment
use fee_ledger_rs::chrono::{NaiveDate, Utc};
use fee_ledger_rs::{
    telemetry, Charge, FeeLedger, InMemoryStore, InvoiceRequest, Money, PaymentMethod,
    PaymentRequest, SafeTimeProvider, Student, TimeSource,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    telemetry::init();

    let store = InMemoryStore::with_students(vec![Student::new(
        "S-001",
        "Ayesha",
        "Khan",
        "5A",
        Money::from_major(4_000),
    )]);
    let ledger = FeeLedger::standard(store)?;
    let time = SafeTimeProvider::new(TimeSource::System);

    // march tuition plus stationery
    let request = InvoiceRequest::new(
        "S-001",
        NaiveDate::from_ymd_opt(2024, 3, 1).ok_or("bad date")?,
        NaiveDate::from_ymd_opt(2024, 3, 10).ok_or("bad date")?,
        vec![
            Charge::tuition("Tuition Fee - Mar 2024", Money::from_major(4_000)),
            Charge::stationery("Stationery", Money::from_major(600)),
        ],
    );
    let generated = ledger.generate_invoice(&request, &time)?;

    // pay the tuition line in full
    let tuition = &generated.line_items[0];
    let receipt = ledger.apply_payment(
        PaymentRequest::new(
            generated.invoice.id,
            tuition.id,
            Money::from_str_exact("4000.00")?,
            PaymentMethod::Cash,
            Utc::now(),
        ),
        &time,
    )?;
    println!("invoice status: {}", receipt.invoice_status);

    println!("{}", ledger.invoice_view(generated.invoice.id)?.to_json_pretty()?);

    Ok(())
}
