//! Messages, groups and the node tree they share

use serde::{Deserialize, Serialize};

use super::segment::{Field, Segment};
use crate::encoding::EncodingCharacters;

/// A child of a message or group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Node {
    Segment(Segment),
    Group(Group),
}

impl Node {
    /// Segments of `nodes` in message order, groups dissolved
    pub fn flatten(nodes: Vec<Node>) -> Vec<Segment> {
        fn walk(nodes: Vec<Node>, out: &mut Vec<Segment>) {
            for node in nodes {
                match node {
                    Node::Segment(segment) => out.push(segment),
                    Node::Group(group) => walk(group.children, out),
                }
            }
        }
        let mut out = Vec::new();
        walk(nodes, &mut out);
        out
    }

    /// Segment or group name
    pub fn name(&self) -> &str {
        match self {
            Node::Segment(segment) => &segment.name,
            Node::Group(group) => &group.name,
        }
    }

    pub fn as_segment(&self) -> Option<&Segment> {
        match self {
            Node::Segment(segment) => Some(segment),
            Node::Group(_) => None,
        }
    }

    pub fn as_group(&self) -> Option<&Group> {
        match self {
            Node::Group(group) => Some(group),
            Node::Segment(_) => None,
        }
    }
}

/// A named aggregation of segments and sub-groups
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    pub children: Vec<Node>,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
        }
    }
}

/// MSH-9 split into its components
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageType {
    pub code: String,
    pub trigger: Option<String>,
    pub structure: Option<String>,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code)?;
        if let Some(trigger) = &self.trigger {
            write!(f, "^{trigger}")?;
        }
        if let Some(structure) = &self.structure {
            write!(f, "^{structure}")?;
        }
        Ok(())
    }
}

/// One HL7 transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Structure id the message was assembled against (e.g. `ADT_A01`)
    pub structure: String,
    /// HL7 version (MSH-12)
    pub version: String,
    pub encoding: EncodingCharacters,
    pub children: Vec<Node>,
}

/// Shared navigation over anything holding child nodes
pub trait NodeContainer {
    fn children(&self) -> &[Node];

    fn children_mut(&mut self) -> &mut Vec<Node>;

    /// All segments, depth-first in message order
    fn segments(&self) -> Segments<'_> {
        Segments {
            stack: vec![self.children().iter()],
        }
    }

    /// All segments, mutable, depth-first in message order
    fn segments_mut(&mut self) -> Vec<&mut Segment> {
        let mut out = Vec::new();
        collect_segments_mut(self.children_mut(), &mut out);
        out
    }

    /// First segment with the given name anywhere below this node
    fn segment(&self, name: &str) -> Option<&Segment> {
        self.segments().find(|s| s.name == name)
    }

    /// First segment with the given name anywhere below this node, mutable
    fn segment_mut(&mut self, name: &str) -> Option<&mut Segment> {
        self.segments_mut().into_iter().find(|s| s.name == name)
    }

    fn segments_named(&self, name: &str) -> Vec<&Segment> {
        self.segments().filter(|s| s.name == name).collect()
    }

    /// First group with the given name anywhere below this node
    fn group(&self, name: &str) -> Option<&Group> {
        self.groups_named(name).into_iter().next()
    }

    /// All groups with the given name, depth-first
    fn groups_named(&self, name: &str) -> Vec<&Group> {
        let mut out = Vec::new();
        collect_groups(self.children(), name, &mut out);
        out
    }

    fn push_segment(&mut self, segment: Segment) {
        self.children_mut().push(Node::Segment(segment));
    }

    fn push_group(&mut self, group: Group) {
        self.children_mut().push(Node::Group(group));
    }
}

impl NodeContainer for Message {
    fn children(&self) -> &[Node] {
        &self.children
    }

    fn children_mut(&mut self) -> &mut Vec<Node> {
        &mut self.children
    }
}

impl NodeContainer for Group {
    fn children(&self) -> &[Node] {
        &self.children
    }

    fn children_mut(&mut self) -> &mut Vec<Node> {
        &mut self.children
    }
}

/// Depth-first segment iterator
pub struct Segments<'a> {
    stack: Vec<std::slice::Iter<'a, Node>>,
}

impl<'a> Iterator for Segments<'a> {
    type Item = &'a Segment;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let top = self.stack.last_mut()?;
            match top.next() {
                Some(Node::Segment(segment)) => return Some(segment),
                Some(Node::Group(group)) => self.stack.push(group.children.iter()),
                None => {
                    self.stack.pop();
                }
            }
        }
    }
}

fn collect_segments_mut<'a>(nodes: &'a mut [Node], out: &mut Vec<&'a mut Segment>) {
    for node in nodes.iter_mut() {
        match node {
            Node::Segment(segment) => out.push(segment),
            Node::Group(group) => collect_segments_mut(&mut group.children, out),
        }
    }
}

fn collect_groups<'a>(nodes: &'a [Node], name: &str, out: &mut Vec<&'a Group>) {
    for node in nodes {
        if let Node::Group(group) = node {
            if group.name == name {
                out.push(group);
            }
            collect_groups(&group.children, name, out);
        }
    }
}

impl Message {
    /// Create a message with an MSH segment carrying default delimiters.
    ///
    /// When `structure` has the `CODE_TRIGGER` form, MSH-9 is filled in.
    pub fn new(structure: impl Into<String>, version: impl Into<String>) -> Self {
        let structure = structure.into();
        let version = version.into();
        let encoding = EncodingCharacters::default();

        let mut msh = Segment::new("MSH");
        msh.set_field(1, encoding.field.to_string());
        msh.set_field(2, encoding.msh2());
        if let Some((code, trigger)) = structure.split_once('_') {
            msh.set_value(9, 0, 1, 1, code);
            msh.set_value(9, 0, 2, 1, trigger);
            msh.set_value(9, 0, 3, 1, structure.as_str());
        }
        msh.set_field(12, version.as_str());

        Self {
            structure,
            version,
            encoding,
            children: vec![Node::Segment(msh)],
        }
    }

    /// The MSH segment, when present
    pub fn msh(&self) -> Option<&Segment> {
        self.segment("MSH")
    }

    /// MSH-9 as code, trigger and structure
    pub fn message_type(&self) -> Option<MessageType> {
        let msh = self.msh()?;
        let code = msh.value(9, 0, 1, 1)?.to_string();
        Some(MessageType {
            code,
            trigger: msh.value(9, 0, 2, 1).map(str::to_string),
            structure: msh.value(9, 0, 3, 1).map(str::to_string),
        })
    }

    /// MSH-10 message control id
    pub fn control_id(&self) -> Option<&str> {
        self.msh().and_then(|msh| msh.field_value(10))
    }

    /// Flatten the tree back into message order
    pub fn into_segments(self) -> Vec<Segment> {
        Node::flatten(self.children)
    }

    /// Field of the MSH segment, used for header checks
    pub fn header_field(&self, index: usize) -> Option<&Field> {
        self.msh().and_then(|msh| msh.field(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Message {
        let mut message = Message::new("ORU_R01", "2.5");
        let mut patient = Group::new("PATIENT");
        patient.push_segment(Segment::new("PID"));
        let mut order = Group::new("ORDER_OBSERVATION");
        order.push_segment(Segment::new("OBR"));
        order.push_segment(Segment::new("OBX"));
        order.push_segment(Segment::new("OBX"));
        message.push_group(patient);
        message.push_group(order);
        message
    }

    #[test]
    fn test_new_message_header() {
        let message = Message::new("ADT_A01", "2.5");
        let mtype = message.message_type().unwrap();
        assert_eq!(mtype.code, "ADT");
        assert_eq!(mtype.trigger.as_deref(), Some("A01"));
        assert_eq!(mtype.structure.as_deref(), Some("ADT_A01"));
        assert_eq!(mtype.to_string(), "ADT^A01^ADT_A01");
        assert_eq!(message.msh().unwrap().field_value(12), Some("2.5"));
        assert_eq!(message.msh().unwrap().field_value(2), Some("^~\\&"));
    }

    #[test]
    fn test_depth_first_segments() {
        let message = sample();
        let names: Vec<&str> = message.segments().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["MSH", "PID", "OBR", "OBX", "OBX"]);
        assert_eq!(message.segments_named("OBX").len(), 2);
    }

    #[test]
    fn test_group_lookup() {
        let message = sample();
        let order = message.group("ORDER_OBSERVATION").unwrap();
        assert_eq!(order.segments().count(), 3);
        assert!(message.group("MISSING").is_none());
    }

    #[test]
    fn test_segment_mut() {
        let mut message = sample();
        message.segment_mut("PID").unwrap().set_field(3, "12345");
        assert_eq!(message.segment("PID").unwrap().field_value(3), Some("12345"));
    }

    #[test]
    fn test_into_segments_keeps_order() {
        let names: Vec<String> = sample().into_segments().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["MSH", "PID", "OBR", "OBX", "OBX"]);
    }
}
