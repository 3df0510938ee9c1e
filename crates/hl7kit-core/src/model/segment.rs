//! Segments and their field/repetition/component/subcomponent tree
//!
//! Values are stored unescaped. Field, component and subcomponent numbers
//! are 1-based as in the HL7 tables; repetition indices are 0-based.

use serde::{Deserialize, Serialize};

use crate::encoding::HEADER_SEGMENTS;

/// The HL7 explicit null, meaning "delete the receiver's value"
pub const HL7_NULL: &str = "\"\"";

/// A component and its subcomponents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub subcomponents: Vec<String>,
}

impl Component {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            subcomponents: vec![value.into()],
        }
    }

    /// First subcomponent, or "" when absent
    pub fn value(&self) -> &str {
        self.subcomponents.first().map(String::as_str).unwrap_or("")
    }

    /// Subcomponent by 1-based position
    pub fn subcomponent(&self, index: usize) -> Option<&str> {
        index
            .checked_sub(1)
            .and_then(|i| self.subcomponents.get(i))
            .map(String::as_str)
    }

    /// Set a subcomponent by 1-based position, growing as needed
    pub fn set_subcomponent(&mut self, index: usize, value: impl Into<String>) {
        let index = index.max(1);
        if self.subcomponents.len() < index {
            self.subcomponents.resize(index, String::new());
        }
        self.subcomponents[index - 1] = value.into();
    }

    pub fn is_empty(&self) -> bool {
        self.subcomponents.iter().all(String::is_empty)
    }
}

/// One occurrence of a field
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repetition {
    pub components: Vec<Component>,
}

impl Repetition {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            components: vec![Component::new(value)],
        }
    }

    /// First subcomponent of the first component, or ""
    pub fn value(&self) -> &str {
        self.components.first().map(Component::value).unwrap_or("")
    }

    /// Component by 1-based position
    pub fn component(&self, index: usize) -> Option<&Component> {
        index.checked_sub(1).and_then(|i| self.components.get(i))
    }

    /// Component by 1-based position, growing as needed
    pub fn component_mut(&mut self, index: usize) -> &mut Component {
        let index = index.max(1);
        if self.components.len() < index {
            self.components.resize_with(index, Component::default);
        }
        &mut self.components[index - 1]
    }

    pub fn is_empty(&self) -> bool {
        self.components.iter().all(Component::is_empty)
    }
}

/// A field with all its repetitions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub repetitions: Vec<Repetition>,
}

impl Field {
    /// Field holding a single plain value
    pub fn from_value(value: impl Into<String>) -> Self {
        Self {
            repetitions: vec![Repetition::new(value)],
        }
    }

    /// First value of the first repetition when it is not empty
    pub fn value(&self) -> Option<&str> {
        self.repetitions
            .first()
            .map(Repetition::value)
            .filter(|v| !v.is_empty())
    }

    /// Repetition by 0-based index
    pub fn repetition(&self, index: usize) -> Option<&Repetition> {
        self.repetitions.get(index)
    }

    /// Repetition by 0-based index, growing as needed
    pub fn repetition_mut(&mut self, index: usize) -> &mut Repetition {
        if self.repetitions.len() <= index {
            self.repetitions.resize_with(index + 1, Repetition::default);
        }
        &mut self.repetitions[index]
    }

    /// Number of non-trailing-empty repetitions
    pub fn repetition_count(&self) -> usize {
        self.repetitions
            .iter()
            .rposition(|r| !r.is_empty())
            .map(|i| i + 1)
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.repetitions.iter().all(Repetition::is_empty)
    }

    /// Whether the field carries the HL7 explicit null `""`
    pub fn is_null(&self) -> bool {
        self.value() == Some(HL7_NULL)
    }
}

/// A segment: a three character name plus ordered fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub name: String,
    pub fields: Vec<Field>,
}

impl Segment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Field by 1-based position
    pub fn field(&self, index: usize) -> Option<&Field> {
        index.checked_sub(1).and_then(|i| self.fields.get(i))
    }

    /// Field by 1-based position, growing as needed
    pub fn field_mut(&mut self, index: usize) -> &mut Field {
        let index = index.max(1);
        if self.fields.len() < index {
            self.fields.resize_with(index, Field::default);
        }
        &mut self.fields[index - 1]
    }

    /// Value at field/repetition/component/subcomponent, `None` when empty
    pub fn value(
        &self,
        field: usize,
        repetition: usize,
        component: usize,
        subcomponent: usize,
    ) -> Option<&str> {
        self.field(field)?
            .repetition(repetition)?
            .component(component)?
            .subcomponent(subcomponent)
            .filter(|v| !v.is_empty())
    }

    /// First value of a field (`SEG-n`), `None` when empty
    pub fn field_value(&self, field: usize) -> Option<&str> {
        self.value(field, 0, 1, 1)
    }

    /// Set a value, creating intermediate repetitions and components
    pub fn set_value(
        &mut self,
        field: usize,
        repetition: usize,
        component: usize,
        subcomponent: usize,
        value: impl Into<String>,
    ) {
        self.field_mut(field)
            .repetition_mut(repetition)
            .component_mut(component)
            .set_subcomponent(subcomponent, value);
    }

    /// Replace a whole field with a single value
    pub fn set_field(&mut self, field: usize, value: impl Into<String>) {
        *self.field_mut(field) = Field::from_value(value);
    }

    /// Number of repetitions present in a field
    pub fn repetition_count(&self, field: usize) -> usize {
        self.field(field).map(Field::repetition_count).unwrap_or(0)
    }

    /// Append an empty repetition to a field
    pub fn add_repetition(&mut self, field: usize) -> &mut Repetition {
        let target = self.field_mut(field);
        let next = target.repetition_count();
        target.repetition_mut(next)
    }

    /// Whether this segment declares encoding characters (MSH, FHS, BHS)
    pub fn is_header(&self) -> bool {
        HEADER_SEGMENTS.contains(&self.name.as_str())
    }

    /// Locally defined segments start with Z
    pub fn is_z_segment(&self) -> bool {
        self.name.starts_with('Z')
    }

    pub fn is_empty(&self) -> bool {
        self.fields.iter().all(Field::is_empty)
    }
}
