//! Message validation
//!
//! A [`Validator`] walks a parsed [`Message`](crate::model::Message) against
//! its structure definition and reports [`Diagnostic`]s:
//!
//! - structure rules: required, repeating and unexpected segments or groups
//! - field rules: required fields, field repetitions, maximum length and
//!   fields beyond the definition
//! - datatype rules for NM, SI, DT, TM and DTM/TS values
//! - table rules for coded values
//! - header rules for MSH-10 and MSH-12
//!
//! Every rule has an id (see [`rules::RULES`]) whose severity can be
//! changed or switched off through [`ValidationOptions`].

mod diagnostics;
mod options;
pub mod rules;
mod validator;

pub use diagnostics::{Diagnostic, Location, Severity, ValidationReport};
pub use options::{RuleSeverity, ValidationOptions};
pub use rules::{RULES, RuleMetadata, rule_metadata};
pub use validator::Validator;
