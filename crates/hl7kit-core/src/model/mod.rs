//! Generic, field-indexed HL7 v2 message model
//!
//! Instead of one type per message, group and segment, every message is a
//! tree of [`Node`]s whose shape is dictated by a
//! [`StructureDefinition`](crate::definitions::StructureDefinition).

mod message;
mod segment;

pub use message::{Group, Message, MessageType, Node, NodeContainer, Segments};
pub use segment::{Component, Field, HL7_NULL, Repetition, Segment};
