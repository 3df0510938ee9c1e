//! HL7 table metadata
//!
//! Segment layouts, datatype components, message structures and coded
//! tables are described as data. The parser, validator, XML codec and
//! typed views all read from a [`DefinitionRegistry`] instead of relying on
//! one generated type per message or segment.

mod registry;
mod types;

pub use registry::DefinitionRegistry;
pub use types::{
    ComponentDefinition, DatatypeDefinition, FieldDefinition, Optionality, Repeatability,
    SegmentDefinition, StructureDefinition, StructureElement, TableDefinition, parse_notation,
};
