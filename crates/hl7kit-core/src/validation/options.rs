//! Validation options and per-rule severity overrides

use std::collections::HashMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::diagnostics::Severity;
use super::rules::RuleMetadata;
use crate::datatypes::DatePrecision;

/// Configured severity for a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RuleSeverity {
    /// Disable the rule
    Off,
    /// Informational message
    Info,
    /// Warning (message still accepted)
    Warn,
    /// Error (message rejected)
    Error,
}

impl RuleSeverity {
    pub fn to_severity(self) -> Option<Severity> {
        match self {
            RuleSeverity::Off => None,
            RuleSeverity::Info => Some(Severity::Info),
            RuleSeverity::Warn => Some(Severity::Warning),
            RuleSeverity::Error => Some(Severity::Error),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationOptions {
    /// Report warnings as errors
    pub strict: bool,
    /// Minimum precision for DTM and TS values
    pub min_date_precision: Option<DatePrecision>,
    /// Severity overrides by rule id
    pub rules: HashMap<String, RuleSeverity>,
}

impl ValidationOptions {
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::default()
        }
    }

    pub fn with_rule(mut self, rule_id: impl Into<String>, severity: RuleSeverity) -> Self {
        self.rules.insert(rule_id.into(), severity);
        self
    }

    /// Effective severity for `rule`, `None` when it is switched off
    pub fn severity_for(&self, rule: &RuleMetadata) -> Option<Severity> {
        let severity = match self.rules.get(rule.id) {
            Some(configured) => configured.to_severity()?,
            None => rule.default_severity,
        };
        if self.strict && severity == Severity::Warning {
            Some(Severity::Error)
        } else {
            Some(severity)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::rules::{MAX_LENGTH, UNKNOWN_FIELD, rule_metadata};

    #[test]
    fn test_defaults_and_overrides() {
        let max_length = rule_metadata(MAX_LENGTH).unwrap();
        let options = ValidationOptions::default();
        assert_eq!(options.severity_for(max_length), Some(Severity::Warning));

        let options = options.with_rule(MAX_LENGTH, RuleSeverity::Off);
        assert_eq!(options.severity_for(max_length), None);
    }

    #[test]
    fn test_strict_upgrades_warnings_only() {
        let options = ValidationOptions::strict();
        assert_eq!(
            options.severity_for(rule_metadata(MAX_LENGTH).unwrap()),
            Some(Severity::Error)
        );
        assert_eq!(
            options.severity_for(rule_metadata(UNKNOWN_FIELD).unwrap()),
            Some(Severity::Info)
        );
    }

    #[test]
    fn test_rule_severity_serialization() {
        assert_eq!(serde_json::to_string(&RuleSeverity::Warn).unwrap(), r#""warn""#);
        let parsed: RuleSeverity = serde_json::from_str(r#""off""#).unwrap();
        assert_eq!(parsed, RuleSeverity::Off);
    }
}
