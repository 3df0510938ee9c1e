//! The definition registry: lookups over segments, datatypes, structures,
//! trigger events and tables for one HL7 version

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::types::{
    ComponentDefinition, DatatypeDefinition, FieldDefinition, SegmentDefinition,
    StructureDefinition, StructureElement, TableDefinition,
};
use crate::{Hl7Error, Result};

const BUILTIN_V25: &str = include_str!("../../definitions/v2.5.yaml");

static BUILTIN: OnceLock<std::result::Result<Arc<DefinitionRegistry>, String>> = OnceLock::new();

/// All definitions known for one HL7 version
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefinitionRegistry {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub segments: IndexMap<String, SegmentDefinition>,
    #[serde(default)]
    pub datatypes: IndexMap<String, DatatypeDefinition>,
    #[serde(default)]
    pub structures: IndexMap<String, StructureDefinition>,
    /// `CODE^TRIGGER` to structure id
    #[serde(default)]
    pub events: IndexMap<String, String>,
    #[serde(default)]
    pub tables: IndexMap<u16, TableDefinition>,
}

impl DefinitionRegistry {
    /// The embedded v2.5 registry, parsed once and shared
    pub fn builtin() -> Result<Arc<DefinitionRegistry>> {
        BUILTIN
            .get_or_init(|| {
                Self::from_yaml_str(BUILTIN_V25)
                    .map(Arc::new)
                    .map_err(|e| e.to_string())
            })
            .clone()
            .map_err(Hl7Error::definition_error)
    }

    /// The built-in registry extended with definition files, in order
    pub fn with_extensions(paths: &[PathBuf]) -> Result<DefinitionRegistry> {
        let mut registry = Self::builtin()?.as_ref().clone();
        for path in paths {
            let extension = Self::from_file(path)?;
            debug!(
                "Merging {} segment(s), {} structure(s) from {}",
                extension.segments.len(),
                extension.structures.len(),
                path.display()
            );
            registry.merge(extension);
        }
        for issue in registry.consistency_issues() {
            warn!("{}", issue);
        }
        Ok(registry)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let registry: Self = serde_yaml::from_str(content)
            .map_err(|e| Hl7Error::definition_error(format!("Invalid definitions: {e}")))?;
        Ok(registry.with_ids())
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let registry: Self = serde_json::from_str(content)
            .map_err(|e| Hl7Error::definition_error(format!("Invalid definitions: {e}")))?;
        Ok(registry.with_ids())
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let registry: Self = toml::from_str(content)
            .map_err(|e| Hl7Error::definition_error(format!("Invalid definitions: {e}")))?;
        Ok(registry.with_ids())
    }

    /// Load definitions from a YAML, JSON or TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| Hl7Error::io_error(path, e))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            Some("json") => Self::from_json_str(&content),
            Some("toml") => Self::from_toml_str(&content),
            _ => Err(Hl7Error::definition_error(format!(
                "Unsupported definition file format: {}",
                path.display()
            ))),
        }
    }

    fn with_ids(mut self) -> Self {
        for (id, segment) in self.segments.iter_mut() {
            segment.id = id.clone();
        }
        for (id, datatype) in self.datatypes.iter_mut() {
            datatype.id = id.clone();
        }
        for (id, structure) in self.structures.iter_mut() {
            structure.id = id.clone();
        }
        self
    }

    /// Add or override definitions from `other`.
    ///
    /// The version is only taken from `other` when this registry has none.
    pub fn merge(&mut self, other: DefinitionRegistry) {
        if self.version.is_empty() {
            self.version = other.version;
        }
        self.segments.extend(other.segments);
        self.datatypes.extend(other.datatypes);
        self.structures.extend(other.structures);
        self.events.extend(other.events);
        self.tables.extend(other.tables);
    }

    pub fn segment(&self, id: &str) -> Option<&SegmentDefinition> {
        self.segments.get(id)
    }

    pub fn datatype(&self, id: &str) -> Option<&DatatypeDefinition> {
        self.datatypes.get(id)
    }

    pub fn structure(&self, id: &str) -> Option<&StructureDefinition> {
        self.structures.get(id)
    }

    pub fn table(&self, id: u16) -> Option<&TableDefinition> {
        self.tables.get(&id)
    }

    /// Field definition by segment id and 1-based field position
    pub fn field(&self, segment: &str, index: usize) -> Option<&FieldDefinition> {
        self.segment(segment)?.field(index)
    }

    /// Component definition by segment id, field and component (1-based)
    pub fn component(
        &self,
        segment: &str,
        field: usize,
        component: usize,
    ) -> Option<&ComponentDefinition> {
        let field = self.field(segment, field)?;
        self.datatype(&field.datatype)?.component(component)
    }

    /// Component of a datatype by 1-based position
    pub fn datatype_component(&self, datatype: &str, index: usize) -> Option<&ComponentDefinition> {
        self.datatype(datatype)?.component(index)
    }

    /// Resolve the structure a message should be assembled against.
    ///
    /// Tries the explicit MSH-9.3 structure, then the `CODE^TRIGGER` event
    /// mapping, then `CODE_TRIGGER`, then the bare code (for `ACK`).
    pub fn resolve_structure(
        &self,
        code: &str,
        trigger: Option<&str>,
        explicit: Option<&str>,
    ) -> Option<String> {
        if let Some(explicit) = explicit
            && self.structures.contains_key(explicit)
        {
            return Some(explicit.to_string());
        }

        if let Some(trigger) = trigger {
            if let Some(mapped) = self.events.get(&format!("{code}^{trigger}"))
                && self.structures.contains_key(mapped)
            {
                return Some(mapped.clone());
            }
            let joined = format!("{code}_{trigger}");
            if self.structures.contains_key(&joined) {
                return Some(joined);
            }
        }

        self.structures
            .contains_key(code)
            .then(|| code.to_string())
    }

    /// Dangling references between definitions
    pub fn consistency_issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        for (id, structure) in &self.structures {
            for name in structure.segment_names() {
                if !self.segments.contains_key(name) {
                    issues.push(format!(
                        "Structure {id} references undefined segment {name}"
                    ));
                }
            }
        }
        for (event, structure) in &self.events {
            if !self.structures.contains_key(structure) {
                issues.push(format!(
                    "Event {event} maps to undefined structure {structure}"
                ));
            }
        }
        for (id, segment) in &self.segments {
            for (i, field) in segment.fields.iter().enumerate() {
                if let Some(table) = field.table
                    && !self.tables.contains_key(&table)
                {
                    debug!("{id}-{} references table {table} with no values", i + 1);
                }
            }
        }
        issues
    }

    /// `Patient Name, len: 250 (XPN) [required/∞]`
    pub fn describe_field(&self, segment: &str, index: usize) -> Option<String> {
        self.field(segment, index).map(describe_row)
    }

    pub fn describe_component(
        &self,
        segment: &str,
        field: usize,
        component: usize,
    ) -> Option<String> {
        self.component(segment, field, component).map(describe_row)
    }

    /// Segment description followed by one line per field
    pub fn describe_segment(&self, id: &str) -> Option<String> {
        let segment = self.segment(id)?;
        let mut out = format!("{id}: {}", segment.description);
        if !segment.has_fields() {
            out.push_str("\n  (fields not described)");
        }
        for (i, field) in segment.fields.iter().enumerate() {
            let _ = write!(out, "\n  {id}-{} {}", i + 1, describe_row(field));
            if let Some(table) = field.table.and_then(|t| self.table(t)) {
                let _ = write!(out, " table: {}", table.description);
            }
        }
        Some(out)
    }

    /// Indented abstract message syntax of a structure
    pub fn describe_structure(&self, id: &str) -> Option<String> {
        fn render(elements: &[StructureElement], depth: usize, out: &mut String) {
            for element in elements {
                let _ = write!(out, "\n{}{}", "  ".repeat(depth), element.notation());
                render(element.elements(), depth + 1, out);
            }
        }

        let structure = self.structure(id)?;
        let mut out = format!("{id}: {}", structure.description);
        render(&structure.elements, 1, &mut out);
        Some(out)
    }

    pub fn describe_table(&self, id: u16) -> Option<String> {
        let table = self.table(id)?;
        let mut out = format!("Table {id:04}: {}", table.description);
        for (code, text) in &table.values {
            let _ = write!(out, "\n  {code}  {text}");
        }
        Some(out)
    }
}

fn describe_row(row: &FieldDefinition) -> String {
    let mut out = row.name.clone();
    if let Some(len) = row.max_length {
        let _ = write!(out, ", len: {len}");
    }
    let _ = write!(
        out,
        " ({}) [{}/{}]",
        row.datatype, row.optionality, row.repeatability
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_loads() {
        let registry = DefinitionRegistry::builtin().unwrap();
        assert_eq!(registry.version, "2.5");
        assert_eq!(registry.segment("PID").unwrap().id, "PID");
        assert_eq!(registry.structure("ADT_A01").unwrap().id, "ADT_A01");
        assert_eq!(registry.field("PID", 5).unwrap().datatype, "XPN");
        assert_eq!(registry.component("PID", 5, 2).unwrap().name, "Given Name");
    }

    #[test]
    fn test_builtin_is_consistent() {
        let registry = DefinitionRegistry::builtin().unwrap();
        assert_eq!(registry.consistency_issues(), Vec::<String>::new());
    }

    #[test]
    fn test_builtin_tables() {
        let registry = DefinitionRegistry::builtin().unwrap();
        for id in [1, 3, 4, 8, 76, 85, 103, 104, 125, 136, 155, 357, 516] {
            assert!(registry.table(id).is_some(), "table {id} missing");
        }
        assert!(registry.table(8).unwrap().contains("AA"));
        assert_eq!(registry.table(136).unwrap().describe("Y"), Some("Yes"));
    }

    #[test]
    fn test_resolve_structure() {
        let registry = DefinitionRegistry::builtin().unwrap();
        assert_eq!(
            registry.resolve_structure("ADT", Some("A04"), None).as_deref(),
            Some("ADT_A01")
        );
        assert_eq!(
            registry
                .resolve_structure("ADT", Some("A04"), Some("ADT_A01"))
                .as_deref(),
            Some("ADT_A01")
        );
        assert_eq!(
            registry.resolve_structure("ACK", Some("A01"), None).as_deref(),
            Some("ACK")
        );
        assert_eq!(registry.resolve_structure("ZZZ", Some("Z01"), None), None);
    }

    #[test]
    fn test_describe_field() {
        let registry = DefinitionRegistry::builtin().unwrap();
        assert_eq!(
            registry.describe_field("PID", 5).unwrap(),
            "Patient Name, len: 250 (XPN) [required/∞]"
        );
        assert!(registry.describe_field("PID", 99).is_none());
    }

    #[test]
    fn test_describe_structure() {
        let registry = DefinitionRegistry::builtin().unwrap();
        let text = registry.describe_structure("ADT_A39").unwrap();
        assert!(text.starts_with("ADT_A39: "));
        assert!(text.contains("\n  {PATIENT}\n    PID\n    [PD1]\n    MRG"));
    }

    #[test]
    fn test_merge_extension() {
        let extension = DefinitionRegistry::from_yaml_str(
            r#"
segments:
  ZPI:
    description: Local patient extras
    fields:
      - {name: Nickname, type: ST, len: 40}
structures:
  ADT_A01:
    description: Local ADT_A01
    elements: [MSH, EVN, PID, "[ZPI]", PV1]
"#,
        )
        .unwrap();
        let mut registry = DefinitionRegistry::builtin().unwrap().as_ref().clone();
        registry.merge(extension);
        assert_eq!(registry.version, "2.5");
        assert_eq!(registry.field("ZPI", 1).unwrap().name, "Nickname");
        assert_eq!(registry.structure("ADT_A01").unwrap().elements.len(), 5);
        assert!(registry.segment("PID").is_some());
    }

    #[test]
    fn test_from_file_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.json");
        std::fs::write(
            &path,
            r#"{"segments": {"ZAB": {"description": "Local", "fields": [{"name": "Code", "type": "ID", "len": 3, "table": 9001}]}},
               "tables": {"9001": {"description": "Local codes", "values": {"X": "Ex"}}}}"#,
        )
        .unwrap();
        let registry = DefinitionRegistry::from_file(&path).unwrap();
        assert_eq!(registry.segment("ZAB").unwrap().id, "ZAB");
        assert!(registry.table(9001).unwrap().contains("X"));

        let bad = dir.path().join("local.txt");
        std::fs::write(&bad, "").unwrap();
        assert!(DefinitionRegistry::from_file(&bad).is_err());
    }
}
