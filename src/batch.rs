use serde::Serialize;

use crate::errors::LedgerError;

/// one failed item of a batch, keyed by the caller's identifier
#[derive(Debug, Clone, PartialEq)]
pub struct BatchFailure {
    pub id: String,
    pub reason: LedgerError,
}

impl BatchFailure {
    pub fn new(id: impl ToString, reason: LedgerError) -> Self {
        Self {
            id: id.to_string(),
            reason,
        }
    }

    pub fn into_error(self) -> LedgerError {
        LedgerError::BatchItemFailure {
            id: self.id,
            reason: Box::new(self.reason),
        }
    }
}

/// result of a partial-failure-tolerant batch
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome<T> {
    pub succeeded: Vec<T>,
    pub failed: Vec<BatchFailure>,
}

impl<T> Default for BatchOutcome<T> {
    fn default() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }
}

impl<T> BatchOutcome<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn success(&mut self, item: T) {
        self.succeeded.push(item);
    }

    pub fn failure(&mut self, id: impl ToString, reason: LedgerError) {
        self.failed.push(BatchFailure::new(id, reason));
    }

    /// record the result of one item under `id`
    pub fn record(&mut self, id: impl ToString, result: crate::errors::Result<T>) {
        match result {
            Ok(item) => self.success(item),
            Err(reason) => self.failure(id, reason),
        }
    }

    pub fn success_count(&self) -> usize {
        self.succeeded.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// serializable summary for callers that only report counts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: Vec<FailureView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureView {
    pub id: String,
    pub reason: String,
}

impl<T> From<&BatchOutcome<T>> for BatchSummary {
    fn from(outcome: &BatchOutcome<T>) -> Self {
        Self {
            succeeded: outcome.success_count(),
            failed: outcome
                .failed
                .iter()
                .map(|f| FailureView {
                    id: f.id.clone(),
                    reason: f.reason.to_string(),
                })
                .collect(),
        }
    }
}
