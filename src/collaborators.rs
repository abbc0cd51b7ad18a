use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::records::Student;
use crate::types::{ClassId, StudentId};

/// read-only student directory
pub trait Roster {
    fn student(&self, student_id: &StudentId) -> Result<Option<Student>>;

    fn students_by_class(&self, class_id: &ClassId) -> Result<Vec<Student>>;
}

/// privileged-role capability, consulted only by destructive operations
pub trait PrivilegeCheck {
    fn is_privileged(&self) -> bool;
}

impl PrivilegeCheck for bool {
    fn is_privileged(&self) -> bool {
        *self
    }
}

/// message to be queued for the external dispatcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub student_id: StudentId,
    pub class_id: ClassId,
    pub text: String,
    pub phone_number: String,
}

/// write-only sink into the messaging queue
pub trait MessageSink {
    fn enqueue_message(&self, message: OutboundMessage) -> Result<()>;
}
