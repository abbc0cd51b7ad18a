/// serializable views for the pdf and csv collaborators
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::records::{line_balances, total_paid, Invoice, LineItem, Payment};
use crate::types::{
    FeeCategory, InvoiceId, InvoiceKind, InvoiceStatus, LineItemId, PaymentId, PaymentMethod,
    StudentId,
};

/// an invoice with per-line paid and remaining figures
#[derive(Debug, Serialize, Deserialize)]
pub struct InvoiceView {
    pub id: InvoiceId,
    pub student_id: StudentId,
    pub kind: InvoiceKind,
    pub status: InvoiceStatus,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub notes: Option<String>,
    pub consolidated_from: Vec<InvoiceId>,
    pub lines: Vec<LineView>,
    pub payments: Vec<PaymentView>,
    pub totals: TotalsView,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LineView {
    pub id: LineItemId,
    pub category: FeeCategory,
    pub description: String,
    pub amount: Money,
    pub paid: Money,
    pub remaining: Money,
    pub carried_from: Option<InvoiceId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentView {
    pub id: PaymentId,
    pub line_item_id: LineItemId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub notes: String,
    pub paid_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TotalsView {
    pub total_amount: Money,
    pub total_paid: Money,
    pub outstanding: Money,
    pub carried_over: Money,
}

impl InvoiceView {
    pub fn from_parts(invoice: &Invoice, items: &[LineItem], payments: &[Payment]) -> Self {
        let lines: Vec<LineView> = items
            .iter()
            .zip(line_balances(items, payments))
            .map(|(item, balance)| LineView {
                id: item.id,
                category: item.category,
                description: item.description.clone(),
                amount: item.amount,
                paid: balance.paid,
                remaining: balance.remaining,
                carried_from: item.carried_from,
            })
            .collect();
        let paid = total_paid(payments);

        InvoiceView {
            id: invoice.id,
            student_id: invoice.student_id.clone(),
            kind: invoice.kind,
            status: invoice.status,
            issue_date: invoice.issue_date,
            due_date: invoice.due_date,
            notes: invoice.notes.clone(),
            consolidated_from: invoice.consolidated_from.clone(),
            totals: TotalsView {
                total_amount: invoice.total_amount,
                total_paid: paid,
                outstanding: invoice.total_amount - paid,
                carried_over: items
                    .iter()
                    .filter(|i| i.carried_from.is_some())
                    .map(|i| i.amount)
                    .sum(),
            },
            lines,
            payments: payments
                .iter()
                .map(|p| PaymentView {
                    id: p.id,
                    line_item_id: p.line_item_id,
                    amount: p.amount,
                    method: p.method,
                    notes: p.notes.clone(),
                    paid_at: p.paid_at,
                })
                .collect(),
        }
    }

    /// lines that still accept a payment
    pub fn payable_lines(&self) -> impl Iterator<Item = &LineView> {
        self.lines.iter().filter(|l| l.remaining.is_positive())
    }

    /// convert to pretty-printed json string
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
