//! Configuration types for hl7kit

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::datatypes::DatePrecision;
use crate::parser::ParserOptions;
use crate::validation::{RuleSeverity, ValidationOptions, rule_metadata};

/// Root configuration
///
/// ```yaml
/// parser:
///   strict: false
///   defaultVersion: "2.5"
/// validation:
///   minDatePrecision: day
///   rules:
///     field/max-length: off
/// definitions:
///   paths: ["./site-segments.yaml"]
/// files:
///   include: ["inbound/**/*.hl7"]
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Hl7kitConfig {
    /// JSON schema reference, ignored by hl7kit
    #[serde(rename = "$schema", skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parser: Option<ParserConfiguration>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationConfiguration>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub definitions: Option<DefinitionsConfiguration>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<FilesConfiguration>,
}

/// Parser configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParserConfiguration {
    #[schemars(description = "Reject unknown structures and out-of-place segments")]
    pub strict: Option<bool>,

    #[schemars(description = "Parse messages without a structure definition as a flat list")]
    pub allow_unknown_structures: Option<bool>,

    #[schemars(description = "Segment terminator used when encoding (default \"\\r\")")]
    pub segment_separator: Option<String>,

    #[schemars(description = "HL7 version assumed when MSH-12 is empty")]
    pub default_version: Option<String>,
}

/// Validation configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationConfiguration {
    #[schemars(description = "Enable or disable validation")]
    pub enabled: Option<bool>,

    #[schemars(description = "Report warnings as errors")]
    pub strict: Option<bool>,

    #[schemars(description = "Minimum precision for DTM and TS values (year ... second)")]
    pub min_date_precision: Option<DatePrecision>,

    #[schemars(description = "Severity overrides keyed by rule id, e.g. \"field/max-length\"")]
    pub rules: Option<HashMap<String, RuleSeverity>>,
}

/// Extra definition files merged over the built-in registry
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionsConfiguration {
    #[schemars(description = "YAML, JSON or TOML definition files, relative to the config file")]
    pub paths: Option<Vec<PathBuf>>,
}

/// Files configuration
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FilesConfiguration {
    #[schemars(description = "Glob patterns for files to include")]
    pub include: Option<Vec<String>>,

    #[schemars(description = "Glob patterns for files to exclude")]
    pub exclude: Option<Vec<String>>,
}

impl Default for FilesConfiguration {
    fn default() -> Self {
        Self {
            include: Some(vec![
                "**/*.hl7".to_string(),
                "**/*.txt".to_string(),
                "**/*.er7".to_string(),
            ]),
            exclude: Some(vec![
                "**/target/**".to_string(),
                "**/node_modules/**".to_string(),
            ]),
        }
    }
}

impl Hl7kitConfig {
    /// A fully populated configuration, written by `hl7kit config init`
    pub fn example() -> Self {
        Self {
            schema: None,
            parser: Some(ParserConfiguration {
                strict: Some(false),
                allow_unknown_structures: Some(true),
                segment_separator: None,
                default_version: Some("2.5".to_string()),
            }),
            validation: Some(ValidationConfiguration {
                enabled: Some(true),
                strict: Some(false),
                min_date_precision: None,
                rules: Some(HashMap::from([(
                    "structure/unexpected-segment".to_string(),
                    RuleSeverity::Warn,
                )])),
            }),
            definitions: None,
            files: Some(FilesConfiguration::default()),
        }
    }

    pub fn parser_options(&self) -> ParserOptions {
        let mut options = ParserOptions::default();
        if let Some(parser) = &self.parser {
            if let Some(strict) = parser.strict {
                options.strict = strict;
            }
            if let Some(allow) = parser.allow_unknown_structures {
                options.allow_unknown_structures = allow;
            }
            if let Some(separator) = &parser.segment_separator {
                options.segment_separator = separator.clone();
            }
            if let Some(version) = &parser.default_version {
                options.default_version = version.clone();
            }
        }
        options
    }

    pub fn validation_options(&self) -> ValidationOptions {
        let Some(validation) = &self.validation else {
            return ValidationOptions::default();
        };
        ValidationOptions {
            strict: validation.strict.unwrap_or(false),
            min_date_precision: validation.min_date_precision,
            rules: validation.rules.clone().unwrap_or_default(),
        }
    }

    pub fn validation_enabled(&self) -> bool {
        self.validation
            .as_ref()
            .and_then(|v| v.enabled)
            .unwrap_or(true)
    }

    pub fn files_config(&self) -> FilesConfiguration {
        self.files.clone().unwrap_or_default()
    }

    /// Definition paths resolved against `base` (the config file's directory)
    pub fn definition_paths(&self, base: &Path) -> Vec<PathBuf> {
        self.definitions
            .as_ref()
            .and_then(|d| d.paths.as_ref())
            .map(|paths| {
                paths
                    .iter()
                    .map(|p| if p.is_absolute() { p.clone() } else { base.join(p) })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Problems a loaded configuration can have that serde does not catch
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if let Some(rules) = self.validation.as_ref().and_then(|v| v.rules.as_ref()) {
            let mut ids: Vec<&String> = rules.keys().collect();
            ids.sort();
            for id in ids {
                if rule_metadata(id).is_none() {
                    problems.push(format!("Unknown rule '{id}' in validation.rules"));
                }
            }
        }
        if let Some(separator) = self
            .parser
            .as_ref()
            .and_then(|p| p.segment_separator.as_ref())
            && !matches!(separator.as_str(), "\r" | "\n" | "\r\n")
        {
            problems.push(format!(
                "parser.segmentSeparator must be \\r, \\n or \\r\\n, got {separator:?}"
            ));
        }
        if let Some(FilesConfiguration {
            include: Some(include),
            ..
        }) = &self.files
            && include.is_empty()
        {
            problems.push("files.include is empty, no files would be discovered".to_string());
        }
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_severity_serialization() {
        let json = serde_json::to_string(&RuleSeverity::Warn).unwrap();
        assert_eq!(json, r#""warn""#);
    }

    #[test]
    fn test_parser_options_from_config() {
        let config: Hl7kitConfig = serde_json::from_str(
            r#"{"parser": {"strict": true, "segmentSeparator": "\n", "defaultVersion": "2.3"}}"#,
        )
        .unwrap();
        let options = config.parser_options();
        assert!(options.strict);
        assert!(options.allow_unknown_structures);
        assert_eq!(options.segment_separator, "\n");
        assert_eq!(options.default_version, "2.3");
    }

    #[test]
    fn test_validation_options_from_config() {
        let config: Hl7kitConfig = serde_yaml::from_str(
            "validation:\n  strict: true\n  minDatePrecision: day\n  rules:\n    field/max-length: off\n",
        )
        .unwrap();
        let options = config.validation_options();
        assert!(options.strict);
        assert_eq!(options.min_date_precision, Some(DatePrecision::Day));
        assert_eq!(
            options.rules.get("field/max-length"),
            Some(&RuleSeverity::Off)
        );
        assert!(config.validation_enabled());
    }

    #[test]
    fn test_problems() {
        let config: Hl7kitConfig = serde_json::from_str(
            r#"{"validation": {"rules": {"field/nope": "error"}}, "parser": {"segmentSeparator": ";"}}"#,
        )
        .unwrap();
        let problems = config.problems();
        assert_eq!(problems.len(), 2);
        assert!(problems[0].contains("field/nope"));

        assert!(Hl7kitConfig::example().problems().is_empty());
    }

    #[test]
    fn test_definition_paths_relative_to_config() {
        let config = Hl7kitConfig {
            definitions: Some(DefinitionsConfiguration {
                paths: Some(vec![PathBuf::from("defs/site.yaml")]),
            }),
            ..Default::default()
        };
        assert_eq!(
            config.definition_paths(Path::new("/etc/hl7kit")),
            vec![PathBuf::from("/etc/hl7kit/defs/site.yaml")]
        );
    }
}
