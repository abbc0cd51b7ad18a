use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::collaborators::Roster;
use crate::errors::{LedgerError, Result};
use crate::records::{Invoice, LineItem, Payment, Student};
use crate::types::{ClassId, InvoiceId, InvoiceStatus, StudentId};

use super::LedgerStore;

#[derive(Debug, Default)]
struct Tables {
    students: HashMap<StudentId, Student>,
    invoices: HashMap<InvoiceId, Invoice>,
    line_items: HashMap<InvoiceId, Vec<LineItem>>,
    payments: HashMap<InvoiceId, Vec<Payment>>,
}

/// in-process store behind a single lock
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// seed with roster records
    pub fn with_students(students: impl IntoIterator<Item = Student>) -> Self {
        let store = Self::new();
        if let Ok(mut tables) = store.tables.write() {
            for student in students {
                tables.students.insert(student.id.clone(), student);
            }
        }
        store
    }

    pub fn invoice_count(&self) -> usize {
        self.read().map(|t| t.invoices.len()).unwrap_or(0)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| LedgerError::storage("in-memory tables poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| LedgerError::storage("in-memory tables poisoned"))
    }
}

impl Roster for InMemoryStore {
    fn student(&self, student_id: &StudentId) -> Result<Option<Student>> {
        Ok(self.read()?.students.get(student_id).cloned())
    }

    fn students_by_class(&self, class_id: &ClassId) -> Result<Vec<Student>> {
        let tables = self.read()?;
        let mut students: Vec<Student> = tables
            .students
            .values()
            .filter(|s| &s.class_id == class_id)
            .cloned()
            .collect();
        students.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(students)
    }
}

impl LedgerStore for InMemoryStore {
    fn insert_student(&self, student: &Student) -> Result<()> {
        let mut tables = self.write()?;
        if tables.students.contains_key(&student.id) {
            return Err(LedgerError::StudentAlreadyExists {
                student_id: student.id.clone(),
            });
        }
        tables.students.insert(student.id.clone(), student.clone());
        Ok(())
    }

    fn save_student(&self, student: &Student) -> Result<()> {
        let mut tables = self.write()?;
        match tables.students.get_mut(&student.id) {
            Some(existing) => {
                *existing = student.clone();
                Ok(())
            }
            None => Err(LedgerError::StudentNotFound {
                student_id: student.id.clone(),
            }),
        }
    }

    fn invoice(&self, invoice_id: InvoiceId) -> Result<Option<Invoice>> {
        Ok(self.read()?.invoices.get(&invoice_id).cloned())
    }

    fn invoices_for_student(&self, student_id: &StudentId) -> Result<Vec<Invoice>> {
        let tables = self.read()?;
        let mut invoices: Vec<Invoice> = tables
            .invoices
            .values()
            .filter(|i| &i.student_id == student_id)
            .cloned()
            .collect();
        invoices.sort_by(|a, b| {
            a.issue_date
                .cmp(&b.issue_date)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(invoices)
    }

    fn line_items(&self, invoice_id: InvoiceId) -> Result<Vec<LineItem>> {
        Ok(self
            .read()?
            .line_items
            .get(&invoice_id)
            .cloned()
            .unwrap_or_default())
    }

    fn payments_for_invoice(&self, invoice_id: InvoiceId) -> Result<Vec<Payment>> {
        Ok(self
            .read()?
            .payments
            .get(&invoice_id)
            .cloned()
            .unwrap_or_default())
    }

    fn insert_invoice(&self, invoice: &Invoice, line_items: &[LineItem]) -> Result<()> {
        if line_items.iter().any(|item| item.invoice_id != invoice.id) {
            return Err(LedgerError::storage(format!(
                "line items do not belong to invoice {}",
                invoice.id
            )));
        }

        let mut tables = self.write()?;
        if tables.invoices.contains_key(&invoice.id) {
            return Err(LedgerError::storage(format!("invoice {} already exists", invoice.id)));
        }
        tables.invoices.insert(invoice.id, invoice.clone());
        tables.line_items.insert(invoice.id, line_items.to_vec());
        Ok(())
    }

    fn set_invoice_status(&self, invoice_id: InvoiceId, status: InvoiceStatus) -> Result<()> {
        let mut tables = self.write()?;
        let invoice = tables
            .invoices
            .get_mut(&invoice_id)
            .ok_or(LedgerError::InvoiceNotFound { invoice_id })?;
        invoice.status = status;
        Ok(())
    }

    fn insert_payment(&self, payment: &Payment) -> Result<()> {
        let mut tables = self.write()?;
        let known_item = tables
            .line_items
            .get(&payment.invoice_id)
            .map(|items| items.iter().any(|i| i.id == payment.line_item_id))
            .unwrap_or(false);
        if !known_item {
            return Err(LedgerError::LineItemNotFound {
                invoice_id: payment.invoice_id,
                line_item_id: payment.line_item_id,
            });
        }
        tables
            .payments
            .entry(payment.invoice_id)
            .or_default()
            .push(payment.clone());
        Ok(())
    }

    fn delete_invoice(&self, invoice_id: InvoiceId) -> Result<()> {
        let mut tables = self.write()?;
        let payment_count = tables.payments.get(&invoice_id).map(Vec::len).unwrap_or(0);
        if payment_count > 0 {
            return Err(LedgerError::InvoiceHasPayments {
                invoice_id,
                payment_count,
            });
        }
        tables
            .invoices
            .remove(&invoice_id)
            .ok_or(LedgerError::InvoiceNotFound { invoice_id })?;
        tables.line_items.remove(&invoice_id);
        tables.payments.remove(&invoice_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Money;
    use crate::records::Charge;
    use crate::types::InvoiceKind;
    use chrono::{NaiveDate, TimeZone, Utc};
    use uuid::Uuid;

    fn invoice(student_id: &str, day: u32) -> Invoice {
        Invoice {
            id: Uuid::new_v4(),
            student_id: StudentId::new(student_id),
            kind: InvoiceKind::Monthly,
            issue_date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            due_date: NaiveDate::from_ymd_opt(2024, 1, 28).unwrap(),
            total_amount: Money::from_major(100),
            status: InvoiceStatus::Unpaid,
            notes: None,
            consolidated_from: Vec::new(),
            created_at: Utc.with_ymd_and_hms(2024, 1, day, 8, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_invoices_sorted_oldest_first() {
        let store = InMemoryStore::new();
        let late = invoice("S-1", 20);
        let early = invoice("S-1", 5);
        store.insert_invoice(&late, &[]).unwrap();
        store.insert_invoice(&early, &[]).unwrap();
        store.insert_invoice(&invoice("S-2", 1), &[]).unwrap();

        let invoices = store.invoices_for_student(&StudentId::new("S-1")).unwrap();
        assert_eq!(invoices.len(), 2);
        assert_eq!(invoices[0].id, early.id);
        assert_eq!(invoices[1].id, late.id);
    }

    #[test]
    fn test_insert_invoice_rejects_foreign_items() {
        let store = InMemoryStore::new();
        let inv = invoice("S-1", 1);
        let foreign =
            Charge::tuition("Tuition", Money::from_major(100)).into_line_item(Uuid::new_v4());
        assert!(store.insert_invoice(&inv, &[foreign]).is_err());
        assert_eq!(store.invoice_count(), 0);
    }

    #[test]
    fn test_delete_refused_while_payments_exist() {
        let store = InMemoryStore::new();
        let inv = invoice("S-1", 1);
        let item = Charge::tuition("Tuition", Money::from_major(100)).into_line_item(inv.id);
        store.insert_invoice(&inv, &[item.clone()]).unwrap();

        let at = Utc.with_ymd_and_hms(2024, 1, 3, 8, 0, 0).unwrap();
        store
            .insert_payment(&Payment {
                id: Uuid::new_v4(),
                invoice_id: inv.id,
                line_item_id: item.id,
                amount: Money::from_major(10),
                method: crate::types::PaymentMethod::Cash,
                notes: String::new(),
                paid_at: at,
                recorded_at: at,
            })
            .unwrap();

        assert!(matches!(
            store.delete_invoice(inv.id),
            Err(LedgerError::InvoiceHasPayments { payment_count: 1, .. })
        ));
    }

    #[test]
    fn test_duplicate_student_rejected() {
        let student = Student::new("S-1", "Ali", "Raza", "5A", Money::from_major(4_000));
        let store = InMemoryStore::with_students(vec![student.clone()]);
        assert!(matches!(
            store.insert_student(&student),
            Err(LedgerError::StudentAlreadyExists { .. })
        ));
        assert_eq!(store.students_by_class(&ClassId::new("5A")).unwrap().len(), 1);
    }
}
