//! Structural, field, datatype and table validation of parsed messages

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, debug_span};

use super::diagnostics::{Diagnostic, Location, Severity, ValidationReport};
use super::options::ValidationOptions;
use super::rules::{self, RuleMetadata, rule_metadata};
use crate::datatypes::{Date, DateTime, Time, is_numeric, is_sequence_id};
use crate::definitions::{DefinitionRegistry, FieldDefinition, StructureElement};
use crate::model::{Component, HL7_NULL, Message, Node, Repetition, Segment};
use crate::{Hl7Error, Result};

/// Checks messages against a [`DefinitionRegistry`]
#[derive(Debug, Clone)]
pub struct Validator {
    registry: Arc<DefinitionRegistry>,
    options: ValidationOptions,
}

impl Validator {
    pub fn new(registry: Arc<DefinitionRegistry>, options: ValidationOptions) -> Self {
        Self { registry, options }
    }

    /// Validator over the built-in definitions with default options
    pub fn with_builtin() -> Result<Self> {
        Ok(Self::new(
            DefinitionRegistry::builtin()?,
            ValidationOptions::default(),
        ))
    }

    pub fn options(&self) -> &ValidationOptions {
        &self.options
    }

    pub fn registry(&self) -> &DefinitionRegistry {
        &self.registry
    }

    pub fn validate(&self, message: &Message) -> ValidationReport {
        let _span = debug_span!("validate", structure = %message.structure).entered();
        let mut run = Run {
            validator: self,
            diagnostics: Vec::new(),
            ordinal: 0,
        };

        run.check_header(message);
        match self.registry.structure(&message.structure) {
            Some(structure) => {
                run.check_level(&structure.elements, &message.children, "", &structure.id)
            }
            None => {
                debug!(
                    "No structure definition for {}, checking fields only",
                    message.structure
                );
                run.check_flat(&message.children, "");
            }
        }

        debug!(
            "Validated {} with {} diagnostic(s)",
            message.structure,
            run.diagnostics.len()
        );
        ValidationReport {
            structure: message.structure.clone(),
            control_id: message.control_id().map(str::to_string),
            diagnostics: run.diagnostics,
        }
    }

    /// Validate and turn error-level findings into [`Hl7Error::ValidationFailed`]
    pub fn check(&self, message: &Message) -> Result<ValidationReport> {
        let report = self.validate(message);
        match report.error_count() {
            0 => Ok(report),
            errors => Err(Hl7Error::ValidationFailed { errors }),
        }
    }
}

/// Where a child node falls in its element list
enum Placement {
    InOrder(usize),
    OutOfOrder(usize),
    Unknown,
}

fn place(elements: &[StructureElement], last: Option<usize>, node: &Node) -> Placement {
    let is_group = matches!(node, Node::Group(_));
    let matches = |i: usize| elements[i].name() == node.name() && elements[i].is_group() == is_group;

    if let Some(l) = last
        && matches(l)
        && elements[l].is_repeating()
    {
        return Placement::InOrder(l);
    }
    let start = last.map_or(0, |l| l + 1);
    if let Some(i) = (start..elements.len()).find(|&i| matches(i)) {
        return Placement::InOrder(i);
    }
    if let Some(l) = last
        && matches(l)
    {
        return Placement::InOrder(l);
    }
    match (0..start).find(|&i| matches(i)) {
        Some(i) => Placement::OutOfOrder(i),
        None => Placement::Unknown,
    }
}

fn child_path(parent: &str, name: &str, repetition: usize) -> String {
    if repetition > 0 {
        format!("{parent}/{name}({repetition})")
    } else {
        format!("{parent}/{name}")
    }
}

fn kind(element: &StructureElement) -> &'static str {
    if element.is_group() { "group" } else { "segment" }
}

/// Slice without its trailing empty items
fn trimmed<T>(items: &[T], is_empty: impl Fn(&T) -> bool) -> &[T] {
    let end = items.iter().rposition(|item| !is_empty(item)).map_or(0, |i| i + 1);
    &items[..end]
}

/// Length of a repetition as it would be written, ignoring escapes
fn encoded_len(repetition: &Repetition) -> usize {
    let components = trimmed(&repetition.components, Component::is_empty);
    let content: usize = components
        .iter()
        .map(|component| {
            let subcomponents = trimmed(&component.subcomponents, String::is_empty);
            subcomponents.iter().map(|s| s.chars().count()).sum::<usize>()
                + subcomponents.len().saturating_sub(1)
        })
        .sum();
    content + components.len().saturating_sub(1)
}

/// State of one validation pass
struct Run<'v> {
    validator: &'v Validator,
    diagnostics: Vec<Diagnostic>,
    /// 1-based position of the last segment visited
    ordinal: usize,
}

impl Run<'_> {
    fn report(&mut self, rule_id: &str, message: String, location: Location) {
        self.report_capped(rule_id, Severity::Error, message, location);
    }

    /// Report with a severity no higher than `cap`
    fn report_capped(&mut self, rule_id: &str, cap: Severity, message: String, location: Location) {
        let Some(rule) = rule_metadata(rule_id) else {
            return;
        };
        let Some(severity) = self.validator.options.severity_for(rule) else {
            return;
        };
        self.push(rule, severity.min(cap), message, location);
    }

    fn push(&mut self, rule: &RuleMetadata, severity: Severity, message: String, location: Location) {
        let mut diagnostic = Diagnostic::new(rule.id, severity, message, location);
        if let Some(code) = rule.code {
            diagnostic = diagnostic.with_code(code);
        }
        self.diagnostics.push(diagnostic);
    }

    fn check_header(&mut self, message: &Message) {
        let validator = self.validator;
        let registry = &validator.registry;
        let Some(msh) = message.msh() else {
            self.report(
                rules::REQUIRED_ELEMENT,
                "Message has no MSH segment".to_string(),
                Location::new("/", 0),
            );
            return;
        };
        if msh.field_value(10).is_none() {
            self.report(
                rules::HEADER_CONTROL_ID,
                "Message control id (MSH-10) is empty".to_string(),
                Location::new("/MSH-10", 1),
            );
        }
        if let Some(version) = msh.field_value(12)
            && !registry.version.is_empty()
            && version != registry.version
        {
            self.report(
                rules::HEADER_VERSION,
                format!(
                    "Message version {version} differs from definitions version {}",
                    registry.version
                ),
                Location::new("/MSH-12", 1),
            );
        }
    }

    /// Check `nodes` against the element list of one structure level
    fn check_level(
        &mut self,
        elements: &[StructureElement],
        nodes: &[Node],
        path: &str,
        container: &str,
    ) {
        let mut counts = vec![0usize; elements.len()];
        let mut last = None;
        let mut siblings: HashMap<&str, usize> = HashMap::new();

        for node in nodes {
            let name = node.name();
            let repetition = {
                let seen = siblings.entry(name).or_insert(0);
                *seen += 1;
                *seen - 1
            };
            let node_path = child_path(path, name, repetition);
            let location = Location::new(node_path.clone(), self.ordinal + 1);

            let index = match place(elements, last, node) {
                Placement::InOrder(index) => {
                    last = Some(index);
                    Some(index)
                }
                Placement::OutOfOrder(index) => {
                    self.report(
                        rules::UNEXPECTED_SEGMENT,
                        format!("{} {name} is out of order in {container}", kind(&elements[index])),
                        location.clone(),
                    );
                    Some(index)
                }
                Placement::Unknown => {
                    let cap = if name.starts_with('Z') {
                        Severity::Info
                    } else {
                        Severity::Error
                    };
                    self.report_capped(
                        rules::UNEXPECTED_SEGMENT,
                        cap,
                        format!("Segment {name} is not part of {container}"),
                        location.clone(),
                    );
                    None
                }
            };

            if let Some(index) = index {
                counts[index] += 1;
                let element = &elements[index];
                if counts[index] > 1 && !element.is_repeating() {
                    self.report(
                        rules::ELEMENT_REPETITION,
                        format!(
                            "{} {name} occurs {} times in {container} but does not repeat",
                            kind(element),
                            counts[index]
                        ),
                        location,
                    );
                }
            }

            match node {
                Node::Segment(segment) => {
                    self.ordinal += 1;
                    let ordinal = self.ordinal;
                    self.check_segment(segment, &node_path, ordinal);
                }
                Node::Group(group) => match index.map(|i| &elements[i]) {
                    Some(StructureElement::Group { elements, .. }) => {
                        self.check_level(elements, &group.children, &node_path, &group.name)
                    }
                    _ => self.check_flat(&group.children, &node_path),
                },
            }
        }

        for (element, count) in elements.iter().zip(&counts) {
            if *count == 0 && element.is_required() {
                self.report(
                    rules::REQUIRED_ELEMENT,
                    format!(
                        "Required {} {} is missing from {container}",
                        kind(element),
                        element.name()
                    ),
                    Location::new(if path.is_empty() { "/" } else { path }, 0),
                );
            }
        }
    }

    /// Field checks only, for content with no structure definition
    fn check_flat(&mut self, nodes: &[Node], path: &str) {
        let mut siblings: HashMap<&str, usize> = HashMap::new();
        for node in nodes {
            let seen = siblings.entry(node.name()).or_insert(0);
            let node_path = child_path(path, node.name(), *seen);
            *seen += 1;
            match node {
                Node::Segment(segment) => {
                    self.ordinal += 1;
                    let ordinal = self.ordinal;
                    self.check_segment(segment, &node_path, ordinal);
                }
                Node::Group(group) => self.check_flat(&group.children, &node_path),
            }
        }
    }

    fn check_segment(&mut self, segment: &Segment, path: &str, ordinal: usize) {
        let registry = Arc::clone(&self.validator.registry);
        let Some(definition) = registry.segment(&segment.name).filter(|d| d.has_fields()) else {
            return;
        };

        for (index, field_definition) in definition.fields.iter().enumerate() {
            let position = index + 1;
            // MSH-1 and MSH-2 hold the delimiters themselves
            if segment.is_header() && position <= 2 {
                continue;
            }
            let label = format!("{}-{position}", segment.name);
            let location = Location::new(format!("{path}-{position}"), ordinal);

            let Some(field) = segment.field(position).filter(|f| !f.is_empty()) else {
                // MSH-10 is reported by the header rule
                let header_checked = segment.name == "MSH" && position == 10;
                if field_definition.optionality.is_required() && !header_checked {
                    self.report(
                        rules::REQUIRED_FIELD,
                        format!(
                            "Required field {label} ({}) is missing",
                            field_definition.name
                        ),
                        location,
                    );
                }
                continue;
            };

            let count = field.repetition_count();
            if !field_definition.repeatability.allows(count) {
                self.report(
                    rules::FIELD_REPETITION,
                    format!(
                        "{label} has {count} repetitions but at most {} allowed",
                        field_definition.repeatability
                    ),
                    location.clone(),
                );
            }

            let datatype = self.field_datatype(segment, position, field_definition);
            for (r, repetition) in field.repetitions.iter().enumerate() {
                if repetition.is_empty() || repetition.value() == HL7_NULL {
                    continue;
                }
                let location = if r > 0 {
                    Location::new(format!("{path}-{position}({r})"), ordinal)
                } else {
                    location.clone()
                };
                if let Some(max) = field_definition.max_length {
                    let len = encoded_len(repetition);
                    if len > max {
                        self.report(
                            rules::MAX_LENGTH,
                            format!("{label} is {len} characters long, maximum is {max}"),
                            location.clone(),
                        );
                    }
                }
                self.check_repetition(
                    &registry,
                    &datatype,
                    field_definition.table,
                    repetition,
                    &label,
                    &location,
                );
            }
        }

        for (index, field) in segment
            .fields
            .iter()
            .enumerate()
            .skip(definition.fields.len())
        {
            if !field.is_empty() {
                self.report(
                    rules::UNKNOWN_FIELD,
                    format!(
                        "{}-{} is not defined for {} in version {}",
                        segment.name,
                        index + 1,
                        segment.name,
                        registry.version
                    ),
                    Location::new(format!("{path}-{}", index + 1), ordinal),
                );
            }
        }
    }

    /// Declared datatype, with OBX-5 taken from OBX-2
    fn field_datatype(
        &self,
        segment: &Segment,
        position: usize,
        definition: &FieldDefinition,
    ) -> String {
        if definition.datatype == "varies"
            && segment.name == "OBX"
            && position == 5
            && let Some(value_type) = segment.field_value(2)
        {
            return value_type.to_string();
        }
        definition.datatype.clone()
    }

    fn check_repetition(
        &mut self,
        registry: &DefinitionRegistry,
        datatype: &str,
        table: Option<u16>,
        repetition: &Repetition,
        label: &str,
        location: &Location,
    ) {
        let Some(composite) = registry.datatype(datatype).filter(|d| !d.is_primitive()) else {
            self.check_primitive(registry, datatype, table, repetition.value(), label, location);
            return;
        };

        for (c, component) in repetition.components.iter().enumerate() {
            let Some(component_definition) = composite.component(c + 1) else {
                continue;
            };
            let component_label = format!("{label}.{}", c + 1);
            match registry
                .datatype(&component_definition.datatype)
                .filter(|d| !d.is_primitive())
            {
                Some(inner) => {
                    for (s, value) in component.subcomponents.iter().enumerate() {
                        if let Some(sub_definition) = inner.component(s + 1) {
                            self.check_primitive(
                                registry,
                                &sub_definition.datatype,
                                sub_definition.table,
                                value,
                                &format!("{component_label}.{}", s + 1),
                                location,
                            );
                        }
                    }
                }
                None => self.check_primitive(
                    registry,
                    &component_definition.datatype,
                    component_definition.table,
                    component.value(),
                    &component_label,
                    location,
                ),
            }
        }
    }

    fn check_primitive(
        &mut self,
        registry: &DefinitionRegistry,
        datatype: &str,
        table: Option<u16>,
        value: &str,
        label: &str,
        location: &Location,
    ) {
        if value.is_empty() || value == HL7_NULL {
            return;
        }
        let location = location.clone();
        match datatype {
            "NM" if !is_numeric(value) => self.report(
                rules::NUMERIC,
                format!("{label} value '{value}' is not a number"),
                location,
            ),
            "SI" if !is_sequence_id(value) => self.report(
                rules::SEQUENCE_ID,
                format!("{label} value '{value}' is not a sequence id"),
                location,
            ),
            "DT" => {
                if let Err(err) = Date::parse(value) {
                    self.report(rules::DATE, format!("{label}: {err}"), location);
                }
            }
            "TM" => {
                if let Err(err) = Time::parse(value) {
                    self.report(rules::TIME, format!("{label}: {err}"), location);
                }
            }
            "DTM" => match DateTime::parse(value) {
                Err(err) => self.report(rules::DATETIME, format!("{label}: {err}"), location),
                Ok(parsed) => {
                    if let Some(min) = self.validator.options.min_date_precision
                        && !parsed.is_at_least(min)
                    {
                        self.report(
                            rules::DATETIME,
                            format!(
                                "{label} value '{value}' has {} precision, at least {min} is required",
                                parsed.precision
                            ),
                            location,
                        );
                    }
                }
            },
            "ID" | "IS" => {
                if let Some(table) = table
                    && let Some(definition) = registry.table(table)
                    && !definition.contains(value)
                {
                    self.report(
                        rules::TABLE_VALUE,
                        format!(
                            "{label} value '{value}' is not in table {table:04} ({})",
                            definition.description
                        ),
                        location,
                    );
                }
            }
            _ => {}
        }
    }
}
