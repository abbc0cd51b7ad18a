use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ClassifierConfig;
use crate::errors::{LedgerError, Result};
use crate::records::LineItem;
use crate::types::BillingMonth;

static ISO_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{4})-(\d{1,2})(?:-\d{1,2})?\b").expect("valid iso date pattern")
});

static MONTH_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)\b(january|february|march|april|may|june|july|august|september|october",
        r"|november|december|jan|feb|mar|apr|jun|jul|aug|sept|sep|oct|nov|dec)",
        r"\b(?:[\s,.\-]+(\d{4})\b)?",
    ))
    .expect("valid month name pattern")
});

/// how a classifier rule matches line text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternKind {
    /// case-insensitive substring
    Contains,
    Regex,
}

/// bucket family a rule assigns; tuition is split by month afterwards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleTarget {
    Tuition,
    Annual,
    Stationery,
}

/// defaulter report bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    CurrentTuition,
    PreviousTuition,
    Annual,
    Stationery,
    /// catch-all
    Arrears,
}

/// month (and year when written) named inside a description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthToken {
    pub month: u32,
    pub year: Option<i32>,
}

impl MonthToken {
    pub fn matches(&self, reference: BillingMonth) -> bool {
        self.month == reference.month && self.year.map_or(true, |y| y == reference.year)
    }
}

#[derive(Debug)]
enum Matcher {
    Contains(String),
    Regex(Regex),
}

impl Matcher {
    fn is_match(&self, text: &str, lowered: &str) -> bool {
        match self {
            Matcher::Contains(pattern) => lowered.contains(pattern.as_str()),
            Matcher::Regex(re) => re.is_match(text),
        }
    }
}

/// ordered rules, first match wins, unmatched text is arrears
#[derive(Debug)]
pub struct BucketClassifier {
    rules: Vec<(Matcher, RuleTarget)>,
}

impl BucketClassifier {
    pub fn from_config(config: &ClassifierConfig) -> Result<Self> {
        let rules = config
            .rules
            .iter()
            .map(|rule| {
                let matcher = match rule.kind {
                    PatternKind::Contains => Matcher::Contains(rule.pattern.to_lowercase()),
                    PatternKind::Regex => Matcher::Regex(Regex::new(&rule.pattern).map_err(|e| {
                        LedgerError::InvalidConfiguration {
                            message: format!("bad classifier pattern {}: {}", rule.pattern, e),
                        }
                    })?),
                };
                Ok((matcher, rule.target))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// first rule matching `text`
    pub fn target(&self, text: &str) -> Option<RuleTarget> {
        let lowered = text.to_lowercase();
        self.rules
            .iter()
            .find(|(matcher, _)| matcher.is_match(text, &lowered))
            .map(|(_, target)| *target)
    }

    /// bucket for free text; `issued` is the owning invoice's issue date
    pub fn classify_text(&self, text: &str, issued: NaiveDate, reference: NaiveDate) -> Bucket {
        let bucket = match self.target(text) {
            Some(RuleTarget::Tuition) => {
                let reference_month = BillingMonth::of(reference);
                let current = match month_token(text) {
                    Some(token) => token.matches(reference_month),
                    None => BillingMonth::of(issued) == reference_month,
                };
                if current {
                    Bucket::CurrentTuition
                } else {
                    Bucket::PreviousTuition
                }
            }
            Some(RuleTarget::Annual) => Bucket::Annual,
            Some(RuleTarget::Stationery) => Bucket::Stationery,
            None => Bucket::Arrears,
        };
        debug!(text, ?bucket, "line classified");
        bucket
    }

    pub fn classify(&self, item: &LineItem, issued: NaiveDate, reference: NaiveDate) -> Bucket {
        self.classify_text(&item.classification_text(), issued, reference)
    }
}

/// earliest month reference in `text`, either an ISO date or a month name
pub fn month_token(text: &str) -> Option<MonthToken> {
    let iso = ISO_DATE.captures_iter(text).find_map(|caps| {
        let start = caps.get(0)?.start();
        let year: i32 = caps.get(1)?.as_str().parse().ok()?;
        let month: u32 = caps.get(2)?.as_str().parse().ok()?;
        (1..=12).contains(&month).then_some((
            start,
            MonthToken {
                month,
                year: Some(year),
            },
        ))
    });

    let named = MONTH_NAME.captures_iter(text).find_map(|caps| {
        let whole = caps.get(0)?;
        let name = caps.get(1)?.as_str();
        let year = caps.get(2).and_then(|y| y.as_str().parse().ok());
        // bare "may" is usually the verb
        if year.is_none() && name.eq_ignore_ascii_case("may") {
            return None;
        }
        let month = month_number(name)?;
        Some((whole.start(), MonthToken { month, year }))
    });

    match (iso, named) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a.1 } else { b.1 }),
        (a, b) => a.or(b).map(|(_, token)| token),
    }
}

fn month_number(name: &str) -> Option<u32> {
    let prefix: String = name.chars().take(3).collect::<String>().to_lowercase();
    match prefix.as_str() {
        "jan" => Some(1),
        "feb" => Some(2),
        "mar" => Some(3),
        "apr" => Some(4),
        "may" => Some(5),
        "jun" => Some(6),
        "jul" => Some(7),
        "aug" => Some(8),
        "sep" => Some(9),
        "oct" => Some(10),
        "nov" => Some(11),
        "dec" => Some(12),
        _ => None,
    }
}
