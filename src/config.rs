use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::reporting::classifier::{PatternKind, RuleTarget};

/// ledger configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// slack absorbed above a line item's remaining balance
    pub payment_tolerance: Money,
    /// label used when annotating carried-over descriptions
    pub arrears_label: String,
    /// days from billing date to due date for the monthly helper
    pub default_due_days: u32,
    pub classifier: ClassifierConfig,
}

/// ordered text rules for defaulter buckets; unmatched lines land in arrears
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub rules: Vec<RuleConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub kind: PatternKind,
    pub pattern: String,
    pub target: RuleTarget,
}

impl RuleConfig {
    pub fn contains(pattern: &str, target: RuleTarget) -> Self {
        Self {
            kind: PatternKind::Contains,
            pattern: pattern.to_string(),
            target,
        }
    }

    pub fn regex(pattern: &str, target: RuleTarget) -> Self {
        Self {
            kind: PatternKind::Regex,
            pattern: pattern.to_string(),
            target,
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            rules: vec![
                RuleConfig::contains("tuition", RuleTarget::Tuition),
                RuleConfig::contains("annual", RuleTarget::Annual),
                // "stationary" is a common misspelling on legacy lines
                RuleConfig::regex(r"(?i)station[ae]ry", RuleTarget::Stationery),
            ],
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self::standard()
    }
}

impl LedgerConfig {
    /// defaults used by the school office: 0.10 tolerance for form rounding
    pub fn standard() -> Self {
        Self {
            payment_tolerance: Money::from_decimal(dec!(0.10)).unwrap_or(Money::from_minor(10)),
            arrears_label: "Arrears".to_string(),
            default_due_days: 10,
            classifier: ClassifierConfig::default(),
        }
    }

    /// no tolerance; amounts must not exceed the remaining balance at all
    pub fn strict() -> Self {
        Self {
            payment_tolerance: Money::ZERO,
            ..Self::standard()
        }
    }

    /// load from json and validate
    pub fn from_json(json: &str) -> Result<Self> {
        let config: LedgerConfig =
            serde_json::from_str(json).map_err(|e| LedgerError::InvalidConfiguration {
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.payment_tolerance.is_negative() {
            return Err(LedgerError::InvalidConfiguration {
                message: format!(
                    "payment tolerance must not be negative: {}",
                    self.payment_tolerance
                ),
            });
        }

        if self.arrears_label.trim().is_empty() {
            return Err(LedgerError::InvalidConfiguration {
                message: "arrears label must not be empty".to_string(),
            });
        }

        for rule in &self.classifier.rules {
            if rule.pattern.trim().is_empty() {
                return Err(LedgerError::InvalidConfiguration {
                    message: format!("empty pattern for {:?} rule", rule.target),
                });
            }
            if rule.kind == PatternKind::Regex {
                regex::Regex::new(&rule.pattern).map_err(|e| LedgerError::InvalidConfiguration {
                    message: format!("bad classifier pattern {}: {}", rule.pattern, e),
                })?;
            }
        }

        Ok(())
    }
}
