//! Assembly of a flat segment list into the group tree of a structure

use std::iter::Peekable;
use std::vec::IntoIter;

use tracing::debug;

use crate::definitions::{StructureDefinition, StructureElement};
use crate::model::{Group, Node, Segment};
use crate::{Hl7Error, Result};

/// Matching state for one level of the structure
struct Frame<'a> {
    elements: &'a [StructureElement],
    last: Option<usize>,
}

impl Frame<'_> {
    /// Element that should take a segment named `name`, if any.
    ///
    /// The last matched element is retried first when it repeats, then the
    /// elements after it are searched in order.
    fn find(&self, name: &str) -> Option<usize> {
        let start = match self.last {
            Some(last) => {
                let element = &self.elements[last];
                if element.is_repeating() && element.can_start_with(name) {
                    return Some(last);
                }
                last + 1
            }
            None => 0,
        };
        (start..self.elements.len()).find(|&i| self.elements[i].can_start_with(name))
    }
}

struct Assembler<'a> {
    segments: Peekable<IntoIter<Segment>>,
    position: usize,
    structure: &'a str,
    strict: bool,
}

impl<'a> Assembler<'a> {
    fn take(&mut self, children: &mut Vec<Node>) {
        if let Some(segment) = self.segments.next() {
            self.position += 1;
            children.push(Node::Segment(segment));
        }
    }

    fn fill(&mut self, stack: &mut Vec<Frame<'a>>, children: &mut Vec<Node>) -> Result<()> {
        while let Some(next) = self.segments.peek() {
            let name = next.name.clone();
            let depth = stack.len();
            let Some(frame) = stack.last_mut() else {
                return Ok(());
            };
            let elements = frame.elements;

            match frame.find(&name) {
                Some(index) => {
                    frame.last = Some(index);
                    match &elements[index] {
                        StructureElement::Segment { .. } => self.take(children),
                        StructureElement::Group {
                            name: group_name,
                            elements: group_elements,
                            ..
                        } => {
                            let mut group = Group::new(group_name.as_str());
                            stack.push(Frame {
                                elements: group_elements,
                                last: None,
                            });
                            self.fill(stack, &mut group.children)?;
                            stack.pop();
                            children.push(Node::Group(group));
                        }
                    }
                }
                None => {
                    let enclosing_accepts = stack[..depth - 1]
                        .iter()
                        .any(|frame| frame.find(&name).is_some());
                    if enclosing_accepts {
                        return Ok(());
                    }
                    if self.strict {
                        return Err(Hl7Error::SegmentSequence {
                            segment: name,
                            position: self.position,
                            structure: self.structure.to_string(),
                        });
                    }
                    debug!(
                        "Keeping non-standard segment {} at position {} in {}",
                        name, self.position, self.structure
                    );
                    self.take(children);
                }
            }
        }
        Ok(())
    }
}

/// Arrange `segments` into the groups of `structure`.
///
/// Segments no element accepts are kept where they appear, or rejected with
/// [`Hl7Error::SegmentSequence`] when `strict`. Flattening the returned
/// nodes always yields `segments` in their original order.
pub fn assemble(
    structure: &StructureDefinition,
    segments: Vec<Segment>,
    strict: bool,
) -> Result<Vec<Node>> {
    let mut assembler = Assembler {
        segments: segments.into_iter().peekable(),
        position: 1,
        structure: &structure.id,
        strict,
    };
    let mut stack = vec![Frame {
        elements: &structure.elements,
        last: None,
    }];
    let mut children = Vec::new();
    assembler.fill(&mut stack, &mut children)?;
    Ok(children)
}
