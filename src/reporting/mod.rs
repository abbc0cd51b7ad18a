pub mod classifier;
pub mod defaulters;
pub mod notices;

pub use classifier::{Bucket, BucketClassifier, PatternKind, RuleTarget};
pub use defaulters::{
    BucketTotals, ClassTotals, DateWindow, DefaulterAggregator, DefaulterReport, DefaulterRow,
};
pub use notices::{notify_defaulters, reminder_text};
