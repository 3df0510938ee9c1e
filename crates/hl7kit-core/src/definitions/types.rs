//! Definition types: fields, segments, datatypes, structures and tables

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Usage code of a field, component or structure element
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Optionality {
    #[serde(rename = "R")]
    Required,
    #[default]
    #[serde(rename = "O")]
    Optional,
    #[serde(rename = "C")]
    Conditional,
    #[serde(rename = "B")]
    BackwardCompatible,
    #[serde(rename = "X", alias = "W")]
    NotSupported,
}

impl Optionality {
    pub fn is_required(self) -> bool {
        self == Optionality::Required
    }

    /// Single-letter HL7 code
    pub fn code(self) -> char {
        match self {
            Optionality::Required => 'R',
            Optionality::Optional => 'O',
            Optionality::Conditional => 'C',
            Optionality::BackwardCompatible => 'B',
            Optionality::NotSupported => 'X',
        }
    }
}

impl fmt::Display for Optionality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Optionality::Required => "required",
            Optionality::Optional => "optional",
            Optionality::Conditional => "conditional",
            Optionality::BackwardCompatible => "backward compatible",
            Optionality::NotSupported => "not supported",
        };
        f.write_str(text)
    }
}

/// How many times a field may repeat
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRepeat", into = "RawRepeat")]
pub enum Repeatability {
    #[default]
    Single,
    Unbounded,
    Bounded(u32),
}

impl Repeatability {
    /// Upper bound on occurrences, `None` when unbounded
    pub fn max_occurs(self) -> Option<u32> {
        match self {
            Repeatability::Single => Some(1),
            Repeatability::Unbounded => None,
            Repeatability::Bounded(n) => Some(n),
        }
    }

    pub fn allows(self, count: usize) -> bool {
        self.max_occurs()
            .is_none_or(|max| count <= max as usize)
    }

    pub fn is_repeating(self) -> bool {
        self != Repeatability::Single
    }
}

impl fmt::Display for Repeatability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Repeatability::Single => f.write_str("1"),
            Repeatability::Unbounded => f.write_str("∞"),
            Repeatability::Bounded(n) => write!(f, "{n}"),
        }
    }
}

/// Wire form of [`Repeatability`]: `1`, `3`, `"*"`
#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawRepeat {
    Count(u32),
    Text(String),
}

impl TryFrom<RawRepeat> for Repeatability {
    type Error = String;

    fn try_from(raw: RawRepeat) -> std::result::Result<Self, Self::Error> {
        match raw {
            RawRepeat::Count(0) => Ok(Repeatability::Unbounded),
            RawRepeat::Count(1) => Ok(Repeatability::Single),
            RawRepeat::Count(n) => Ok(Repeatability::Bounded(n)),
            RawRepeat::Text(text) => match text.trim() {
                "*" | "Y" | "unbounded" => Ok(Repeatability::Unbounded),
                "N" | "" => Ok(Repeatability::Single),
                other => other
                    .parse::<u32>()
                    .map_err(|_| format!("invalid repeatability '{other}'"))
                    .and_then(|n| Repeatability::try_from(RawRepeat::Count(n))),
            },
        }
    }
}

impl From<Repeatability> for RawRepeat {
    fn from(value: Repeatability) -> Self {
        match value {
            Repeatability::Single => RawRepeat::Count(1),
            Repeatability::Unbounded => RawRepeat::Text("*".to_string()),
            Repeatability::Bounded(n) => RawRepeat::Count(n),
        }
    }
}

/// One field of a segment, or one component of a datatype
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub datatype: String,
    #[serde(rename = "opt", default)]
    pub optionality: Optionality,
    #[serde(rename = "rep", default)]
    pub repeatability: Repeatability,
    #[serde(rename = "len", default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<u16>,
}

/// Components share the field row layout
pub type ComponentDefinition = FieldDefinition;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentDefinition {
    #[serde(default, skip_serializing)]
    pub id: String,
    pub description: String,
    /// Fields in position order; empty when only the name is known
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
}

impl SegmentDefinition {
    /// Field by 1-based position
    pub fn field(&self, index: usize) -> Option<&FieldDefinition> {
        index.checked_sub(1).and_then(|i| self.fields.get(i))
    }

    /// Whether field-level checks apply to this segment
    pub fn has_fields(&self) -> bool {
        !self.fields.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatatypeDefinition {
    #[serde(default, skip_serializing)]
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub components: Vec<ComponentDefinition>,
}

impl DatatypeDefinition {
    pub fn is_primitive(&self) -> bool {
        self.components.is_empty()
    }

    /// Component by 1-based position
    pub fn component(&self, index: usize) -> Option<&ComponentDefinition> {
        index.checked_sub(1).and_then(|i| self.components.get(i))
    }
}

/// An element of an abstract message syntax: a segment or a nested group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawElement", into = "RawElement")]
pub enum StructureElement {
    Segment {
        name: String,
        optional: bool,
        repeating: bool,
    },
    Group {
        name: String,
        optional: bool,
        repeating: bool,
        elements: Vec<StructureElement>,
    },
}

/// Wire form: `"[{NK1}]"` or `{group: "[{PROCEDURE}]", elements: [...]}`
#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawElement {
    Segment(String),
    Group {
        group: String,
        elements: Vec<StructureElement>,
    },
}

impl TryFrom<RawElement> for StructureElement {
    type Error = String;

    fn try_from(raw: RawElement) -> std::result::Result<Self, Self::Error> {
        match raw {
            RawElement::Segment(text) => {
                let (name, optional, repeating) = parse_notation(&text)?;
                Ok(StructureElement::Segment {
                    name,
                    optional,
                    repeating,
                })
            }
            RawElement::Group { group, elements } => {
                let (name, optional, repeating) = parse_notation(&group)?;
                if elements.is_empty() {
                    return Err(format!("group '{name}' has no elements"));
                }
                Ok(StructureElement::Group {
                    name,
                    optional,
                    repeating,
                    elements,
                })
            }
        }
    }
}

impl From<StructureElement> for RawElement {
    fn from(element: StructureElement) -> Self {
        let notation = element.notation();
        match element {
            StructureElement::Segment { .. } => RawElement::Segment(notation),
            StructureElement::Group { elements, .. } => RawElement::Group {
                group: notation,
                elements,
            },
        }
    }
}

/// Split `[{NAME}]`-style notation into name, optional and repeating flags
pub fn parse_notation(text: &str) -> std::result::Result<(String, bool, bool), String> {
    let mut inner = text.trim();
    let mut optional = false;
    let mut repeating = false;

    loop {
        if let Some(rest) = inner.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
            if optional {
                return Err(format!("'{text}' is marked optional twice"));
            }
            optional = true;
            inner = rest.trim();
        } else if let Some(rest) = inner.strip_prefix('{').and_then(|r| r.strip_suffix('}')) {
            if repeating {
                return Err(format!("'{text}' is marked repeating twice"));
            }
            repeating = true;
            inner = rest.trim();
        } else {
            break;
        }
    }

    if inner.is_empty()
        || !inner
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(format!("invalid structure element '{text}'"));
    }
    Ok((inner.to_string(), optional, repeating))
}

impl StructureElement {
    pub fn name(&self) -> &str {
        match self {
            StructureElement::Segment { name, .. } | StructureElement::Group { name, .. } => name,
        }
    }

    pub fn is_optional(&self) -> bool {
        match self {
            StructureElement::Segment { optional, .. }
            | StructureElement::Group { optional, .. } => *optional,
        }
    }

    pub fn is_repeating(&self) -> bool {
        match self {
            StructureElement::Segment { repeating, .. }
            | StructureElement::Group { repeating, .. } => *repeating,
        }
    }

    pub fn is_required(&self) -> bool {
        !self.is_optional()
    }

    pub fn is_group(&self) -> bool {
        matches!(self, StructureElement::Group { .. })
    }

    /// Child elements of a group, empty for segments
    pub fn elements(&self) -> &[StructureElement] {
        match self {
            StructureElement::Group { elements, .. } => elements,
            StructureElement::Segment { .. } => &[],
        }
    }

    /// Abstract message syntax for this element, e.g. `[{NK1}]`
    pub fn notation(&self) -> String {
        let name = self.name();
        match (self.is_optional(), self.is_repeating()) {
            (true, true) => format!("[{{{name}}}]"),
            (true, false) => format!("[{name}]"),
            (false, true) => format!("{{{name}}}"),
            (false, false) => name.to_string(),
        }
    }

    /// Whether a segment with this name can begin this element
    pub fn can_start_with(&self, segment: &str) -> bool {
        match self {
            StructureElement::Segment { name, .. } => name == segment,
            StructureElement::Group { elements, .. } => {
                for element in elements {
                    if element.can_start_with(segment) {
                        return true;
                    }
                    if element.is_required() {
                        return false;
                    }
                }
                false
            }
        }
    }

    /// Whether a segment with this name appears anywhere inside this element
    pub fn contains_segment(&self, segment: &str) -> bool {
        match self {
            StructureElement::Segment { name, .. } => name == segment,
            StructureElement::Group { elements, .. } => {
                elements.iter().any(|e| e.contains_segment(segment))
            }
        }
    }

    fn collect_segment_names<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            StructureElement::Segment { name, .. } => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            StructureElement::Group { elements, .. } => {
                for element in elements {
                    element.collect_segment_names(out);
                }
            }
        }
    }
}

/// Abstract message syntax of one message structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureDefinition {
    #[serde(default, skip_serializing)]
    pub id: String,
    pub description: String,
    pub elements: Vec<StructureElement>,
}

impl StructureDefinition {
    /// Every distinct segment name the structure references
    pub fn segment_names(&self) -> Vec<&str> {
        let mut out = Vec::new();
        for element in &self.elements {
            element.collect_segment_names(&mut out);
        }
        out
    }
}

/// An HL7 coded value table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub description: String,
    pub values: IndexMap<String, String>,
}

impl TableDefinition {
    pub fn contains(&self, code: &str) -> bool {
        self.values.contains_key(code)
    }

    pub fn describe(&self, code: &str) -> Option<&str> {
        self.values.get(code).map(String::as_str)
    }
}
