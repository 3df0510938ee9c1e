//! HL7 v2.xml encoding
//!
//! Messages become `<ADT_A01 xmlns="urn:hl7-org:v2xml">`, groups
//! `<ADT_A01.PROCEDURE>`, segments `<PID>`, fields `<PID.5>` (one element per
//! repetition), components `<XPN.1>` and subcomponents `<FN.1>`. Element
//! names below the field level come from the datatype definitions; the
//! reader only relies on nesting and the numeric suffix.

use std::sync::Arc;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use tracing::debug;

use super::{MessageCodec, ParserOptions, structure};
use crate::definitions::DefinitionRegistry;
use crate::encoding::EncodingCharacters;
use crate::model::{Component, Field, Group, Message, Node, NodeContainer, Repetition, Segment};
use crate::{Hl7Error, Result};

pub const XML_NAMESPACE: &str = "urn:hl7-org:v2xml";

/// Reader and writer for the XML encoding
#[derive(Debug, Clone)]
pub struct XmlParser {
    registry: Arc<DefinitionRegistry>,
    options: ParserOptions,
}

impl XmlParser {
    pub fn new(registry: Arc<DefinitionRegistry>, options: ParserOptions) -> Self {
        Self { registry, options }
    }

    pub fn with_builtin() -> Result<Self> {
        Ok(Self::new(
            DefinitionRegistry::builtin()?,
            ParserOptions::default(),
        ))
    }

    /// Encode a message as an indented XML document
    pub fn encode(&self, message: &Message) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        emit(
            &mut writer,
            Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
        )?;

        let root = BytesStart::new(message.structure.as_str())
            .with_attributes([("xmlns", XML_NAMESPACE)]);
        emit(&mut writer, Event::Start(root))?;
        self.write_nodes(&mut writer, message, &message.children)?;
        emit(
            &mut writer,
            Event::End(BytesEnd::new(message.structure.as_str())),
        )?;

        String::from_utf8(writer.into_inner())
            .map_err(|e| Hl7Error::xml_error(format!("encoder produced invalid UTF-8: {e}")))
    }

    fn write_nodes(
        &self,
        writer: &mut Writer<Vec<u8>>,
        message: &Message,
        nodes: &[Node],
    ) -> Result<()> {
        for node in nodes {
            match node {
                Node::Segment(segment) => self.write_segment(writer, message, segment)?,
                Node::Group(group) => {
                    let name = format!("{}.{}", message.structure, group.name);
                    emit(writer, Event::Start(BytesStart::new(name.as_str())))?;
                    self.write_nodes(writer, message, &group.children)?;
                    emit(writer, Event::End(BytesEnd::new(name.as_str())))?;
                }
            }
        }
        Ok(())
    }

    fn write_segment(
        &self,
        writer: &mut Writer<Vec<u8>>,
        message: &Message,
        segment: &Segment,
    ) -> Result<()> {
        let seg = segment.name.as_str();
        emit(writer, Event::Start(BytesStart::new(seg)))?;

        for (i, field) in segment.fields.iter().enumerate() {
            let index = i + 1;
            let field_name = format!("{seg}.{index}");

            if segment.is_header() && index <= 2 {
                let value = if index == 1 {
                    message.encoding.field.to_string()
                } else {
                    message.encoding.msh2()
                };
                write_leaf(writer, &field_name, &value)?;
                continue;
            }
            if field.is_empty() {
                continue;
            }

            let datatype = self.field_datatype(segment, index);
            for repetition in &field.repetitions[..field.repetition_count()] {
                self.write_repetition(writer, &field_name, datatype.as_deref(), repetition)?;
            }
        }

        emit(writer, Event::End(BytesEnd::new(seg)))
    }

    /// Datatype of a field, resolving OBX-5 through OBX-2
    fn field_datatype(&self, segment: &Segment, index: usize) -> Option<String> {
        let definition = self.registry.field(&segment.name, index)?;
        if definition.datatype == "varies" {
            return segment.field_value(2).map(str::to_string);
        }
        Some(definition.datatype.clone())
    }

    fn is_composite(&self, datatype: Option<&str>) -> bool {
        datatype
            .and_then(|dt| self.registry.datatype(dt))
            .is_none_or(|dt| !dt.is_primitive())
    }

    fn write_repetition(
        &self,
        writer: &mut Writer<Vec<u8>>,
        field_name: &str,
        datatype: Option<&str>,
        repetition: &Repetition,
    ) -> Result<()> {
        let components = trimmed_len(&repetition.components, Component::is_empty);
        if components <= 1
            && !self.is_composite(datatype)
            && repetition
                .components
                .first()
                .is_none_or(|c| trimmed_len(&c.subcomponents, String::is_empty) <= 1)
        {
            return write_leaf(writer, field_name, repetition.value());
        }

        emit(writer, Event::Start(BytesStart::new(field_name)))?;
        for (i, component) in repetition.components[..components].iter().enumerate() {
            if component.is_empty() {
                continue;
            }
            let index = i + 1;
            let (name, component_type) = match datatype {
                Some(dt) => (
                    format!("{dt}.{index}"),
                    self.registry
                        .datatype_component(dt, index)
                        .map(|c| c.datatype.as_str()),
                ),
                None => (format!("{field_name}.{index}"), None),
            };

            let subcomponents = trimmed_len(&component.subcomponents, String::is_empty);
            let composite = component_type
                .and_then(|ct| self.registry.datatype(ct))
                .is_some_and(|ct| !ct.is_primitive());
            if subcomponents <= 1 && !composite {
                write_leaf(writer, &name, component.value())?;
                continue;
            }

            emit(writer, Event::Start(BytesStart::new(name.as_str())))?;
            for (j, value) in component.subcomponents[..subcomponents].iter().enumerate() {
                if value.is_empty() {
                    continue;
                }
                let sub_name = match component_type {
                    Some(ct) => format!("{ct}.{}", j + 1),
                    None => format!("{name}.{}", j + 1),
                };
                write_leaf(writer, &sub_name, value)?;
            }
            emit(writer, Event::End(BytesEnd::new(name.as_str())))?;
        }
        emit(writer, Event::End(BytesEnd::new(field_name)))
    }

    /// Parse an XML-encoded message.
    ///
    /// Segments are regrouped against the structure named by the root
    /// element, so flat documents and documents with groups read the same.
    /// Groups written in the document are kept only when no definition for
    /// the root exists.
    pub fn parse(&self, xml: &str) -> Result<Message> {
        let root = read_tree(xml)?;
        let children = build_nodes(&root)?;

        let mut message = Message {
            structure: root.name.clone(),
            version: self.options.default_version.clone(),
            encoding: EncodingCharacters::default(),
            children,
        };

        let (encoding, version) = {
            let msh = message
                .segments()
                .next()
                .filter(|s| s.name == "MSH")
                .ok_or_else(|| Hl7Error::xml_error("first segment must be MSH"))?;
            let encoding = match (
                msh.field_value(1).and_then(|f| f.chars().next()),
                msh.field_value(2),
            ) {
                (Some(field), Some(msh2)) => EncodingCharacters::new(field, msh2)?,
                _ => EncodingCharacters::default(),
            };
            (encoding, msh.value(12, 0, 1, 1).map(str::to_string))
        };
        message.encoding = encoding;
        if let Some(version) = version {
            message.version = version;
        }

        match self.registry.structure(&message.structure) {
            Some(definition) => {
                let segments = Node::flatten(std::mem::take(&mut message.children));
                message.children = structure::assemble(definition, segments, self.options.strict)?;
            }
            None if self.options.strict || !self.options.allow_unknown_structures => {
                return Err(Hl7Error::unknown_structure(message.structure));
            }
            None => debug!("No structure for {}, keeping document groups", message.structure),
        }

        debug!(
            "Parsed XML message {} with {} segment(s)",
            message.structure,
            message.segments().count()
        );
        Ok(message)
    }
}

impl MessageCodec for XmlParser {
    fn parse(&self, text: &str) -> Result<Message> {
        XmlParser::parse(self, text)
    }

    fn encode(&self, message: &Message) -> Result<String> {
        XmlParser::encode(self, message)
    }
}

fn emit(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<()> {
    writer
        .write_event(event)
        .map_err(|e| Hl7Error::xml_error(e.to_string()))
}

fn write_leaf(writer: &mut Writer<Vec<u8>>, name: &str, value: &str) -> Result<()> {
    emit(writer, Event::Start(BytesStart::new(name)))?;
    emit(writer, Event::Text(BytesText::new(value)))?;
    emit(writer, Event::End(BytesEnd::new(name)))
}

/// Length of `items` with trailing empty entries dropped
fn trimmed_len<T>(items: &[T], is_empty: impl Fn(&T) -> bool) -> usize {
    items
        .iter()
        .rposition(|item| !is_empty(item))
        .map_or(0, |i| i + 1)
}

/// Minimal element tree read from the document
#[derive(Debug, Default)]
struct Element {
    name: String,
    text: String,
    children: Vec<Element>,
}

fn element_name(name: &[u8]) -> Result<String> {
    std::str::from_utf8(name)
        .map(str::to_string)
        .map_err(|e| Hl7Error::xml_error(format!("element name is not UTF-8: {e}")))
}

fn read_tree(xml: &str) -> Result<Element> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<Element> = Vec::new();
    let mut root = None;

    loop {
        match reader.read_event()? {
            Event::Start(start) => stack.push(Element {
                name: element_name(start.local_name().as_ref())?,
                ..Element::default()
            }),
            Event::Empty(empty) => {
                let element = Element {
                    name: element_name(empty.local_name().as_ref())?,
                    ..Element::default()
                };
                attach(&mut stack, &mut root, element);
            }
            Event::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text.unescape()?);
                }
            }
            Event::CData(data) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| Hl7Error::xml_error("unbalanced closing tag"))?;
                attach(&mut stack, &mut root, element);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(Hl7Error::xml_error("document ended inside an element"));
    }
    root.ok_or_else(|| Hl7Error::xml_error("document has no root element"))
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => *root = Some(element),
    }
}

/// Numeric suffix of `PID.5` or `XPN.1`
fn position(name: &str) -> Option<usize> {
    name.rsplit_once('.')
        .and_then(|(_, n)| n.parse::<usize>().ok())
        .filter(|n| *n > 0)
}

fn is_segment_element(name: &str) -> bool {
    name.len() == 3 && !name.contains('.')
}

fn build_nodes(parent: &Element) -> Result<Vec<Node>> {
    let mut nodes = Vec::with_capacity(parent.children.len());
    for child in &parent.children {
        if is_segment_element(&child.name) {
            nodes.push(Node::Segment(build_segment(child)?));
        } else if let Some((_, group)) = child.name.rsplit_once('.')
            && position(&child.name).is_none()
        {
            let mut node = Group::new(group);
            node.children = build_nodes(child)?;
            nodes.push(Node::Group(node));
        } else {
            return Err(Hl7Error::xml_error(format!(
                "unexpected element <{}> inside <{}>",
                child.name, parent.name
            )));
        }
    }
    Ok(nodes)
}

fn build_segment(element: &Element) -> Result<Segment> {
    let mut segment = Segment::new(element.name.as_str());
    for child in &element.children {
        let index = position(&child.name).ok_or_else(|| {
            Hl7Error::xml_error(format!(
                "expected a field element inside <{}>, found <{}>",
                element.name, child.name
            ))
        })?;

        if segment.is_header() && index <= 2 {
            *segment.field_mut(index) = Field::from_value(child.text.as_str());
            continue;
        }
        let repetition = build_repetition(child)?;
        segment.field_mut(index).repetitions.push(repetition);
    }
    Ok(segment)
}

fn build_repetition(element: &Element) -> Result<Repetition> {
    if element.children.is_empty() {
        return Ok(Repetition::new(element.text.as_str()));
    }
    let mut repetition = Repetition::default();
    for child in &element.children {
        let index = position(&child.name).ok_or_else(|| {
            Hl7Error::xml_error(format!("expected a component element, found <{}>", child.name))
        })?;
        *repetition.component_mut(index) = build_component(child)?;
    }
    Ok(repetition)
}

fn build_component(element: &Element) -> Result<Component> {
    if element.children.is_empty() {
        return Ok(Component::new(element.text.as_str()));
    }
    let mut component = Component::default();
    for child in &element.children {
        let index = position(&child.name).ok_or_else(|| {
            Hl7Error::xml_error(format!(
                "expected a subcomponent element, found <{}>",
                child.name
            ))
        })?;
        component.set_subcomponent(index, child.text.as_str());
    }
    Ok(component)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::PipeParser;

    const ORU: &str = "MSH|^~\\&|LAB|HOSP|||20240301120000||ORU^R01^ORU_R01|LAB0001|P|2.5\r\
PID|1||555^^^HOSP&1.2.3&ISO^MR||SMITH^ANNA\r\
OBR|1||ORD1|GLU^Glucose\r\
OBX|1|NM|GLU^Glucose||5.4|mmol/L|||||F\r\
OBX|2|TX|NOTE||fasting <8h> \\T\\ calm||||||F\r";

    #[test]
    fn test_encode_shape() {
        let message = PipeParser::with_builtin().unwrap().parse(ORU).unwrap();
        let xml = XmlParser::with_builtin().unwrap().encode(&message).unwrap();

        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("<ORU_R01 xmlns=\"urn:hl7-org:v2xml\">"));
        assert!(xml.contains("<ORU_R01.PATIENT_RESULT>"));
        assert!(xml.contains("<MSH.1>|</MSH.1>"));
        assert!(xml.contains("<MSH.2>^~\\&amp;</MSH.2>"));
        assert!(xml.contains("<XPN.2>ANNA</XPN.2>"));
        assert!(xml.contains("<HD.2>1.2.3</HD.2>"));
        assert!(xml.contains("<OBX.5>5.4</OBX.5>"));
        assert!(xml.contains("fasting &lt;8h&gt; &amp; calm"));
    }

    #[test]
    fn test_pipe_xml_pipe() {
        let pipe = PipeParser::with_builtin().unwrap();
        let xml = XmlParser::with_builtin().unwrap();

        let message = pipe.parse(ORU).unwrap();
        let document = xml.encode(&message).unwrap();
        let decoded = xml.parse(&document).unwrap();

        assert_eq!(decoded.structure, "ORU_R01");
        assert_eq!(decoded.version, "2.5");
        assert_eq!(decoded.groups_named("ORDER_OBSERVATION").len(), 1);
        assert_eq!(pipe.encode(&decoded), ORU);
    }

    #[test]
    fn test_repetitions_round_trip() {
        let text = "MSH|^~\\&|||||||ADT^A01|1|P|2.5\rPID|||A1~B2^^^X||DOE^J\r";
        let pipe = PipeParser::with_builtin().unwrap();
        let xml = XmlParser::with_builtin().unwrap();
        let message = pipe.parse(text).unwrap();
        let decoded = xml.parse(&xml.encode(&message).unwrap()).unwrap();
        assert_eq!(decoded.segment("PID").unwrap().repetition_count(3), 2);
        assert_eq!(pipe.encode(&decoded), text);
    }

    #[test]
    fn test_parse_handwritten() {
        let document = r#"<?xml version="1.0"?>
<ACK xmlns="urn:hl7-org:v2xml">
  <MSH>
    <MSH.1>|</MSH.1>
    <MSH.2>^~\&amp;</MSH.2>
    <MSH.9><MSG.1>ACK</MSG.1></MSH.9>
    <MSH.10>99</MSH.10>
    <MSH.12><VID.1>2.4</VID.1></MSH.12>
  </MSH>
  <MSA>
    <MSA.1>AA</MSA.1>
    <MSA.2>ORIG1</MSA.2>
  </MSA>
</ACK>"#;
        let message = XmlParser::with_builtin().unwrap().parse(document).unwrap();
        assert_eq!(message.structure, "ACK");
        assert_eq!(message.version, "2.4");
        assert_eq!(message.control_id(), Some("99"));
        assert_eq!(message.segment("MSA").unwrap().field_value(2), Some("ORIG1"));
    }

    #[test]
    fn test_flat_document_is_grouped() {
        let pipe = PipeParser::with_builtin().unwrap();
        let xml = XmlParser::with_builtin().unwrap();
        let message = pipe.parse(ORU).unwrap();

        let mut flat = message.clone();
        flat.children = Node::flatten(std::mem::take(&mut flat.children))
            .into_iter()
            .map(Node::Segment)
            .collect();
        let document = xml.encode(&flat).unwrap();
        assert!(!document.contains("<ORU_R01.PATIENT_RESULT>"));

        let decoded = xml.parse(&document).unwrap();
        assert_eq!(decoded.groups_named("ORDER_OBSERVATION").len(), 1);
        assert_eq!(decoded.groups_named("OBSERVATION").len(), 2);
        assert_eq!(pipe.encode(&decoded), ORU);
    }

    #[test]
    fn test_strict_document_rejects_out_of_place_segment() {
        let document = r#"<ACK xmlns="urn:hl7-org:v2xml">
  <MSH><MSH.1>|</MSH.1><MSH.2>^~\&amp;</MSH.2><MSH.9><MSG.1>ACK</MSG.1></MSH.9></MSH>
  <MSA><MSA.1>AA</MSA.1><MSA.2>1</MSA.2></MSA>
  <ZZZ><ZZZ.1>x</ZZZ.1></ZZZ>
  <MSA><MSA.1>AA</MSA.1><MSA.2>2</MSA.2></MSA>
</ACK>"#;
        assert!(XmlParser::with_builtin().unwrap().parse(document).is_ok());

        let strict = XmlParser::new(
            DefinitionRegistry::builtin().unwrap(),
            ParserOptions {
                strict: true,
                ..ParserOptions::default()
            },
        );
        assert!(matches!(
            strict.parse(document),
            Err(Hl7Error::SegmentSequence { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_bad_documents() {
        let xml = XmlParser::with_builtin().unwrap();
        assert!(xml.parse("").is_err());
        assert!(xml.parse("<ACK><MSA><MSA.1>AA</MSA.1></MSA></ACK>").is_err());
        assert!(xml.parse("<ACK><MSH><bogus/></MSH></ACK>").is_err());
    }
}
