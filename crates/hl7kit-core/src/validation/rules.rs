//! Catalogue of validation rules

use serde::Serialize;

use super::diagnostics::Severity;

pub const REQUIRED_ELEMENT: &str = "structure/required-element";
pub const ELEMENT_REPETITION: &str = "structure/repetition";
pub const UNEXPECTED_SEGMENT: &str = "structure/unexpected-segment";
pub const REQUIRED_FIELD: &str = "field/required";
pub const FIELD_REPETITION: &str = "field/repetition";
pub const MAX_LENGTH: &str = "field/max-length";
pub const UNKNOWN_FIELD: &str = "field/unknown";
pub const NUMERIC: &str = "datatype/numeric";
pub const SEQUENCE_ID: &str = "datatype/sequence-id";
pub const DATE: &str = "datatype/date";
pub const TIME: &str = "datatype/time";
pub const DATETIME: &str = "datatype/datetime";
pub const TABLE_VALUE: &str = "table/value";
pub const HEADER_VERSION: &str = "header/version";
pub const HEADER_CONTROL_ID: &str = "header/control-id";

/// Static description of a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuleMetadata {
    pub id: &'static str,
    pub default_severity: Severity,
    pub description: &'static str,
    /// HL7 table 0357 code reported in acknowledgments
    pub code: Option<u16>,
}

const fn rule(
    id: &'static str,
    default_severity: Severity,
    code: Option<u16>,
    description: &'static str,
) -> RuleMetadata {
    RuleMetadata {
        id,
        default_severity,
        description,
        code,
    }
}

pub const RULES: &[RuleMetadata] = &[
    rule(
        REQUIRED_ELEMENT,
        Severity::Error,
        Some(100),
        "A required segment or group is missing",
    ),
    rule(
        ELEMENT_REPETITION,
        Severity::Error,
        Some(100),
        "A non-repeating segment or group occurs more than once",
    ),
    rule(
        UNEXPECTED_SEGMENT,
        Severity::Warning,
        Some(100),
        "A segment is not part of the structure or is out of order",
    ),
    rule(
        REQUIRED_FIELD,
        Severity::Error,
        Some(101),
        "A required field is empty",
    ),
    rule(
        FIELD_REPETITION,
        Severity::Error,
        Some(102),
        "A field repeats more often than its definition allows",
    ),
    rule(
        MAX_LENGTH,
        Severity::Warning,
        Some(102),
        "A field value is longer than its maximum length",
    ),
    rule(
        UNKNOWN_FIELD,
        Severity::Info,
        None,
        "A field is present beyond the last defined field",
    ),
    rule(NUMERIC, Severity::Error, Some(102), "NM values must be numbers"),
    rule(
        SEQUENCE_ID,
        Severity::Error,
        Some(102),
        "SI values must be non-negative integers",
    ),
    rule(DATE, Severity::Error, Some(102), "DT values must be valid dates"),
    rule(TIME, Severity::Error, Some(102), "TM values must be valid times"),
    rule(
        DATETIME,
        Severity::Error,
        Some(102),
        "DTM and TS values must be valid and precise enough",
    ),
    rule(
        TABLE_VALUE,
        Severity::Warning,
        Some(103),
        "A coded value is not in its HL7 table",
    ),
    rule(
        HEADER_VERSION,
        Severity::Warning,
        Some(203),
        "MSH-12 does not match the definitions version",
    ),
    rule(
        HEADER_CONTROL_ID,
        Severity::Error,
        Some(101),
        "MSH-10 message control id is empty",
    ),
];

/// Look up a rule by id
pub fn rule_metadata(id: &str) -> Option<&'static RuleMetadata> {
    RULES.iter().find(|rule| rule.id == id)
}
