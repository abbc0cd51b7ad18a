use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Money;
use crate::types::{
    BillingMonth, ClassId, FeeCategory, InvoiceId, InvoiceKind, InvoiceStatus, LineItemId,
    PaymentId, PaymentMethod, StudentId, StudentStatus,
};

/// roster record as seen by the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: StudentId,
    pub name: String,
    pub father_name: String,
    pub class_id: ClassId,
    /// standing recurring tuition amount
    pub monthly_fee: Money,
    /// manual "no open dues" acknowledgement by staff, never derived
    pub clearance_flag: bool,
    pub status: StudentStatus,
    pub guardian_phone: Option<String>,
}

impl Student {
    pub fn new(
        id: impl Into<StudentId>,
        name: impl Into<String>,
        father_name: impl Into<String>,
        class_id: impl Into<ClassId>,
        monthly_fee: Money,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            father_name: father_name.into(),
            class_id: class_id.into(),
            monthly_fee,
            clearance_flag: false,
            status: StudentStatus::Active,
            guardian_phone: None,
        }
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.guardian_phone = Some(phone.into());
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == StudentStatus::Active
    }
}

/// one billing cycle for one student
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub student_id: StudentId,
    pub kind: InvoiceKind,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    /// always equals the sum of the invoice's line items
    pub total_amount: Money,
    pub status: InvoiceStatus,
    pub notes: Option<String>,
    /// prior invoices whose remaining balances were folded into this one
    pub consolidated_from: Vec<InvoiceId>,
    pub created_at: DateTime<Utc>,
}

impl Invoice {
    pub fn billing_month(&self) -> BillingMonth {
        BillingMonth::of(self.issue_date)
    }
}

/// immutable charge line on an invoice; discounts carry a negative amount
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: LineItemId,
    pub invoice_id: InvoiceId,
    pub category: FeeCategory,
    pub description: String,
    pub amount: Money,
    /// source invoice when this line is a carried-over remainder
    pub carried_from: Option<InvoiceId>,
}

impl LineItem {
    /// text the bucket classifier reads
    pub fn classification_text(&self) -> String {
        format!("{} {}", self.category.label(), self.description)
    }
}

/// append-only payment fact against exactly one line item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub invoice_id: InvoiceId,
    pub line_item_id: LineItemId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub notes: String,
    pub paid_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
}

/// caller-supplied charge for a new billing cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Charge {
    pub category: FeeCategory,
    pub description: String,
    pub amount: Money,
}

impl Charge {
    pub fn new(category: FeeCategory, description: impl Into<String>, amount: Money) -> Self {
        Self {
            category,
            description: description.into(),
            amount,
        }
    }

    pub fn tuition(description: impl Into<String>, amount: Money) -> Self {
        Self::new(FeeCategory::Tuition, description, amount)
    }

    pub fn annual(description: impl Into<String>, amount: Money) -> Self {
        Self::new(FeeCategory::Annual, description, amount)
    }

    pub fn stationery(description: impl Into<String>, amount: Money) -> Self {
        Self::new(FeeCategory::Stationery, description, amount)
    }

    pub fn admission(description: impl Into<String>, amount: Money) -> Self {
        Self::new(FeeCategory::Admission, description, amount)
    }

    pub fn other(description: impl Into<String>, amount: Money) -> Self {
        Self::new(FeeCategory::Other, description, amount)
    }

    /// discount line; stored negative whatever the sign passed in
    pub fn discount(description: impl Into<String>, amount: Money) -> Self {
        Self::new(FeeCategory::Discount, description, -amount.abs())
    }

    /// tuition line from the student's standing monthly fee
    pub fn monthly_tuition(student: &Student, billing_date: NaiveDate) -> Self {
        let month = BillingMonth::of(billing_date);
        Self::tuition(format!("Tuition Fee - {}", month.label()), student.monthly_fee)
    }

    pub(crate) fn into_line_item(self, invoice_id: InvoiceId) -> LineItem {
        LineItem {
            id: Uuid::new_v4(),
            invoice_id,
            category: self.category,
            description: self.description,
            amount: self.amount,
            carried_from: None,
        }
    }
}

/// paid and remaining figures for one line item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineBalance {
    pub line_item_id: LineItemId,
    pub category: FeeCategory,
    pub description: String,
    pub amount: Money,
    pub paid: Money,
    pub remaining: Money,
}

/// sum of payments referencing a line item
pub fn paid_on_item(payments: &[Payment], line_item_id: LineItemId) -> Money {
    payments
        .iter()
        .filter(|p| p.line_item_id == line_item_id)
        .map(|p| p.amount)
        .sum()
}

/// sum of every payment in the slice
pub fn total_paid(payments: &[Payment]) -> Money {
    payments.iter().map(|p| p.amount).sum()
}

/// per-line balances, in line item order
pub fn line_balances(items: &[LineItem], payments: &[Payment]) -> Vec<LineBalance> {
    items
        .iter()
        .map(|item| {
            let paid = paid_on_item(payments, item.id);
            LineBalance {
                line_item_id: item.id,
                category: item.category,
                description: item.description.clone(),
                amount: item.amount,
                paid,
                remaining: item.amount - paid,
            }
        })
        .collect()
}
