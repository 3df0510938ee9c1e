//! Path-based access to message values
//!
//! A path names a value as `[/][GROUP(r)/]...SEG(r)-field(r)-component-subcomponent`.
//! Repetitions in parentheses are 0-based and default to 0; field,
//! component and subcomponent numbers are 1-based. Component and
//! subcomponent default to 1.
//!
//! - `PID-5-1` is the first family name of the first PID anywhere.
//! - `OBX(1)-5` is the value of the second OBX anywhere.
//! - `/PATIENT_RESULT/ORDER_OBSERVATION(1)/OBR-4-2` walks groups from the root.
//! - `ORDER_OBSERVATION(1)/OBSERVATION/OBX-5` starts at the second
//!   ORDER_OBSERVATION group found anywhere.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::encoding::HEADER_SEGMENTS;
use crate::model::{Group, Message, Node, NodeContainer, Segment};
use crate::{Hl7Error, Result};

/// A parsed terser path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerserPath {
    pub anchored: bool,
    pub groups: Vec<(String, usize)>,
    pub segment: String,
    pub segment_repetition: usize,
    pub field: usize,
    pub field_repetition: usize,
    pub component: usize,
    pub subcomponent: usize,
}

impl TerserPath {
    pub fn parse(path: &str) -> Result<Self> {
        let invalid = |message: String| Hl7Error::invalid_path(path, message);

        let trimmed = path.trim();
        let (anchored, rest) = match trimmed.strip_prefix('/') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        if rest.is_empty() {
            return Err(invalid("path is empty".to_string()));
        }

        let mut steps: Vec<&str> = rest.split('/').collect();
        let Some(last) = steps.pop() else {
            return Err(invalid("path is empty".to_string()));
        };

        let mut groups = Vec::with_capacity(steps.len());
        for step in steps {
            let (name, repetition) = split_repetition(step).map_err(&invalid)?;
            if name.is_empty()
                || !name
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
            {
                return Err(invalid(format!("'{step}' is not a group name")));
            }
            groups.push((name.to_string(), repetition));
        }

        let mut parts = last.split('-');
        let segment_part = parts.next().unwrap_or_default();
        let (segment, segment_repetition) = split_repetition(segment_part).map_err(&invalid)?;
        if !is_segment_name(segment) {
            return Err(invalid(format!("'{segment}' is not a segment name")));
        }

        let Some(field_part) = parts.next() else {
            return Err(invalid("a field number is required".to_string()));
        };
        let (field, field_repetition) = split_repetition(field_part).map_err(&invalid)?;
        let field = position(field, "field").map_err(&invalid)?;
        let component = match parts.next() {
            Some(part) => position(part, "component").map_err(&invalid)?,
            None => 1,
        };
        let subcomponent = match parts.next() {
            Some(part) => position(part, "subcomponent").map_err(&invalid)?,
            None => 1,
        };
        if parts.next().is_some() {
            return Err(invalid("too many '-' separated parts".to_string()));
        }

        Ok(Self {
            anchored,
            groups,
            segment: segment.to_string(),
            segment_repetition,
            field,
            field_repetition,
            component,
            subcomponent,
        })
    }
}

impl fmt::Display for TerserPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.anchored {
            write!(f, "/")?;
        }
        for (name, repetition) in &self.groups {
            write!(f, "{name}")?;
            if *repetition > 0 {
                write!(f, "({repetition})")?;
            }
            write!(f, "/")?;
        }
        write!(f, "{}", self.segment)?;
        if self.segment_repetition > 0 {
            write!(f, "({})", self.segment_repetition)?;
        }
        write!(f, "-{}", self.field)?;
        if self.field_repetition > 0 {
            write!(f, "({})", self.field_repetition)?;
        }
        write!(f, "-{}-{}", self.component, self.subcomponent)
    }
}

fn is_segment_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() == 3
        && bytes[0].is_ascii_uppercase()
        && bytes[1..]
            .iter()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

static STEP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([^()]*)(?:\((\d+)\))?$").expect("step pattern is valid")
});

/// `NAME(3)` into `("NAME", 3)`; no parentheses means repetition 0
fn split_repetition(step: &str) -> std::result::Result<(&str, usize), String> {
    let captures = STEP
        .captures(step)
        .ok_or_else(|| format!("malformed repetition in '{step}'"))?;
    let name = captures.get(1).map_or("", |m| m.as_str());
    match captures.get(2) {
        Some(number) => number
            .as_str()
            .parse()
            .map(|repetition| (name, repetition))
            .map_err(|_| format!("'{}' is not a repetition index", number.as_str())),
        None => Ok((name, 0)),
    }
}

fn position(text: &str, what: &str) -> std::result::Result<usize, String> {
    match text.parse::<usize>() {
        Ok(0) => Err(format!("{what} numbers start at 1")),
        Ok(n) => Ok(n),
        Err(_) => Err(format!("'{text}' is not a {what} number")),
    }
}

/// Read-only path access to a message
pub struct Terser<'a> {
    message: &'a Message,
}

impl<'a> Terser<'a> {
    pub fn new(message: &'a Message) -> Self {
        Self { message }
    }

    /// Value at `path`, `None` when the segment or value is absent
    pub fn get(&self, path: &str) -> Result<Option<String>> {
        let path = TerserPath::parse(path)?;
        Ok(self
            .find_segment(&path)?
            .and_then(|segment| {
                segment.value(
                    path.field,
                    path.field_repetition,
                    path.component,
                    path.subcomponent,
                )
            })
            .map(str::to_string))
    }

    /// Segment addressed by `path`
    pub fn find_segment(&self, path: &TerserPath) -> Result<Option<&'a Segment>> {
        if path.groups.is_empty() {
            let found = if path.anchored {
                nth_segment(&self.message.children, &path.segment, path.segment_repetition)
            } else {
                self.message
                    .segments()
                    .filter(|s| s.name == path.segment)
                    .nth(path.segment_repetition)
            };
            return Ok(found);
        }

        let mut groups = path.groups.iter();
        let Some((first, first_repetition)) = groups.next() else {
            return Ok(None);
        };
        let start = if path.anchored {
            nth_group(&self.message.children, first, *first_repetition)
        } else {
            self.message.groups_named(first).get(*first_repetition).copied()
        };
        let Some(mut group) = start else {
            return Ok(None);
        };
        for (name, repetition) in groups {
            match nth_group(&group.children, name, *repetition) {
                Some(next) => group = next,
                None => return Ok(None),
            }
        }
        Ok(nth_segment(
            &group.children,
            &path.segment,
            path.segment_repetition,
        ))
    }
}

/// Path access that can also write
pub struct TerserMut<'a> {
    message: &'a mut Message,
}

impl<'a> TerserMut<'a> {
    pub fn new(message: &'a mut Message) -> Self {
        Self { message }
    }

    pub fn get(&self, path: &str) -> Result<Option<String>> {
        Terser::new(self.message).get(path)
    }

    /// Set the value at `path`.
    ///
    /// Missing repetitions, components and subcomponents are created. A
    /// missing segment is appended at the root when the path names no
    /// groups, asks for the next free repetition and no instance of the
    /// segment sits inside a group.
    pub fn set(&mut self, path: &str, value: impl Into<String>) -> Result<()> {
        let raw = path;
        let path = TerserPath::parse(raw)?;
        if HEADER_SEGMENTS.contains(&path.segment.as_str()) && path.field <= 2 {
            return Err(Hl7Error::invalid_path(
                raw,
                format!(
                    "{0}-1 and {0}-2 are derived from the encoding characters",
                    path.segment
                ),
            ));
        }

        let segment = self.segment_for_write(raw, &path)?;
        segment.set_value(
            path.field,
            path.field_repetition,
            path.component,
            path.subcomponent,
            value,
        );
        Ok(())
    }

    fn segment_for_write(&mut self, raw: &str, path: &TerserPath) -> Result<&mut Segment> {
        if path.groups.is_empty() {
            let at_root = self
                .message
                .children
                .iter()
                .filter(|node| matches!(node, Node::Segment(s) if s.name == path.segment))
                .count();
            let anywhere = self.message.segments_named(&path.segment).len();
            let existing = if path.anchored { at_root } else { anywhere };
            if path.segment_repetition > existing {
                return Err(Hl7Error::invalid_path(
                    raw,
                    format!(
                        "repetition {} of {} skips over missing segments",
                        path.segment_repetition, path.segment
                    ),
                ));
            }
            if path.segment_repetition == existing {
                if anywhere > at_root {
                    return Err(Hl7Error::invalid_path(
                        raw,
                        format!(
                            "{} lives inside a group; address new repetitions through the group",
                            path.segment
                        ),
                    ));
                }
                self.message.push_segment(Segment::new(path.segment.as_str()));
            }
            let found = if path.anchored {
                nth_segment_mut(
                    &mut self.message.children,
                    &path.segment,
                    path.segment_repetition,
                )
            } else {
                self.message
                    .segments_mut()
                    .into_iter()
                    .filter(|s| s.name == path.segment)
                    .nth(path.segment_repetition)
            };
            return found.ok_or_else(|| Hl7Error::internal_error("appended segment not found"));
        }

        let missing = || Hl7Error::invalid_path(raw, "no such group or segment in message");
        let mut groups = path.groups.iter();
        let (first, first_repetition) = groups.next().ok_or_else(missing)?;
        let mut group = if path.anchored {
            nth_group_mut(&mut self.message.children, first, *first_repetition)
        } else {
            let mut skip = *first_repetition;
            find_group_mut(&mut self.message.children, first, &mut skip)
        }
        .ok_or_else(missing)?;
        for (name, repetition) in groups {
            group = nth_group_mut(&mut group.children, name, *repetition).ok_or_else(missing)?;
        }
        nth_segment_mut(&mut group.children, &path.segment, path.segment_repetition)
            .ok_or_else(missing)
    }
}

fn nth_segment<'a>(nodes: &'a [Node], name: &str, n: usize) -> Option<&'a Segment> {
    nodes
        .iter()
        .filter_map(Node::as_segment)
        .filter(|s| s.name == name)
        .nth(n)
}

fn nth_group<'a>(nodes: &'a [Node], name: &str, n: usize) -> Option<&'a Group> {
    nodes
        .iter()
        .filter_map(Node::as_group)
        .filter(|g| g.name == name)
        .nth(n)
}

fn nth_segment_mut<'a>(nodes: &'a mut [Node], name: &str, n: usize) -> Option<&'a mut Segment> {
    nodes
        .iter_mut()
        .filter_map(|node| match node {
            Node::Segment(segment) if segment.name == name => Some(segment),
            _ => None,
        })
        .nth(n)
}

fn nth_group_mut<'a>(nodes: &'a mut [Node], name: &str, n: usize) -> Option<&'a mut Group> {
    nodes
        .iter_mut()
        .filter_map(|node| match node {
            Node::Group(group) if group.name == name => Some(group),
            _ => None,
        })
        .nth(n)
}

/// Depth-first search in the same order as [`NodeContainer::groups_named`]
fn find_group_mut<'a>(nodes: &'a mut [Node], name: &str, skip: &mut usize) -> Option<&'a mut Group> {
    for node in nodes.iter_mut() {
        if let Node::Group(group) = node {
            if group.name == name {
                if *skip == 0 {
                    return Some(group);
                }
                *skip -= 1;
            }
            if let Some(found) = find_group_mut(&mut group.children, name, skip) {
                return Some(found);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::PipeParser;

    const ORU: &str = "MSH|^~\\&|LAB|HOSP|EHR|HOSP|20240517094512||ORU^R01^ORU_R01|MSG0001|P|2.5\r\
PID|1||12345^^^HOSP^MR~67890^^^STATE^SS||DOE^JANE^Q||19800101|F\r\
OBR|1|ORD1||GLU^Glucose^L\r\
OBX|1|NM|GLU^Glucose^L||95|mg/dL\r\
OBX|2|NM|NA^Sodium^L||140|mmol/L\r\
OBR|2|ORD2||K^Potassium^L\r\
OBX|1|NM|K^Potassium^L||4.1|mmol/L&UCUM\r";

    fn message() -> Message {
        PipeParser::with_builtin().unwrap().parse(ORU).unwrap()
    }

    #[test]
    fn test_parse_path() {
        let path = TerserPath::parse("/PATIENT_RESULT/ORDER_OBSERVATION(1)/OBX(2)-5(1)-3-2").unwrap();
        assert!(path.anchored);
        assert_eq!(
            path.groups,
            vec![
                ("PATIENT_RESULT".to_string(), 0),
                ("ORDER_OBSERVATION".to_string(), 1)
            ]
        );
        assert_eq!(path.segment, "OBX");
        assert_eq!(path.segment_repetition, 2);
        assert_eq!(path.field, 5);
        assert_eq!(path.field_repetition, 1);
        assert_eq!(path.component, 3);
        assert_eq!(path.subcomponent, 2);
        assert_eq!(
            path.to_string(),
            "/PATIENT_RESULT/ORDER_OBSERVATION(1)/OBX(2)-5(1)-3-2"
        );
    }

    #[test]
    fn test_invalid_paths() {
        for path in ["", "/", "PID", "pid-5", "PID-0", "PID-5-x", "PID(1-5", "PID-5-1-1-1", "bad group/PID-5"] {
            let err = TerserPath::parse(path).unwrap_err();
            assert!(matches!(err, Hl7Error::InvalidPath { .. }), "{path}: {err}");
        }
    }

    #[test]
    fn test_get_anywhere() {
        let message = message();
        let terser = Terser::new(&message);
        assert_eq!(terser.get("PID-5").unwrap().as_deref(), Some("DOE"));
        assert_eq!(terser.get("PID-5-2").unwrap().as_deref(), Some("JANE"));
        assert_eq!(terser.get("PID-3(1)-4").unwrap().as_deref(), Some("STATE"));
        assert_eq!(terser.get("OBX(2)-5").unwrap().as_deref(), Some("4.1"));
        assert_eq!(terser.get("OBX(2)-6-1-2").unwrap().as_deref(), Some("UCUM"));
        assert_eq!(terser.get("MSH-9-3").unwrap().as_deref(), Some("ORU_R01"));
        assert_eq!(terser.get("PID-19").unwrap(), None);
        assert_eq!(terser.get("PV1-2").unwrap(), None);
    }

    #[test]
    fn test_get_through_groups() {
        let message = message();
        let terser = Terser::new(&message);
        assert_eq!(
            terser
                .get("/PATIENT_RESULT/ORDER_OBSERVATION(1)/OBR-4-2")
                .unwrap()
                .as_deref(),
            Some("Potassium")
        );
        assert_eq!(
            terser
                .get("ORDER_OBSERVATION/OBSERVATION(1)/OBX-5")
                .unwrap()
                .as_deref(),
            Some("140")
        );
        assert_eq!(terser.get("/OBX-5").unwrap(), None);
        assert_eq!(terser.get("ORDER_OBSERVATION(5)/OBR-1").unwrap(), None);
    }

    #[test]
    fn test_set_existing_and_new_values() {
        let mut message = message();
        let mut terser = TerserMut::new(&mut message);
        terser.set("PID-5-2", "JOAN").unwrap();
        terser.set("PID-3(2)-1", "NEW-ID").unwrap();
        terser
            .set("ORDER_OBSERVATION(1)/OBSERVATION/OBX-8", "H")
            .unwrap();
        assert_eq!(terser.get("PID-5-2").unwrap().as_deref(), Some("JOAN"));
        assert_eq!(terser.get("PID-3(2)").unwrap().as_deref(), Some("NEW-ID"));
        assert_eq!(terser.get("OBX(2)-8").unwrap().as_deref(), Some("H"));
    }

    #[test]
    fn test_set_creates_segment_at_root() {
        let mut message = message();
        TerserMut::new(&mut message).set("ZPI-2-1", "custom").unwrap();
        let last = message.children.last().and_then(Node::as_segment).unwrap();
        assert_eq!(last.name, "ZPI");
        assert_eq!(last.value(2, 0, 1, 1), Some("custom"));

        let err = TerserMut::new(&mut message).set("ZPI(3)-1", "x").unwrap_err();
        assert!(matches!(err, Hl7Error::InvalidPath { .. }));
    }

    #[test]
    fn test_set_missing_group_fails() {
        let mut message = message();
        let err = TerserMut::new(&mut message)
            .set("ORDER_OBSERVATION(4)/OBR-1", "1")
            .unwrap_err();
        assert!(err.to_string().contains("no such group"));
    }

    #[test]
    fn test_set_new_grouped_segment_rejected() {
        let mut message = message();
        let before = PipeParser::with_builtin().unwrap().encode(&message);
        let mut terser = TerserMut::new(&mut message);

        let err = terser.set("OBX(3)-5", "2").unwrap_err();
        assert!(err.to_string().contains("inside a group"), "{err}");
        let err = terser.set("/OBX-5", "2").unwrap_err();
        assert!(matches!(err, Hl7Error::InvalidPath { .. }));

        terser.set("OBX(2)-5", "4.2").unwrap();
        assert_eq!(terser.get("OBX(2)-5").unwrap().as_deref(), Some("4.2"));
        assert_eq!(message.segments_named("OBX").len(), 3);
        assert_eq!(
            PipeParser::with_builtin().unwrap().encode(&message),
            before.replace("||4.1|", "||4.2|")
        );
    }

    #[test]
    fn test_set_header_delimiters_rejected() {
        let mut message = message();
        let mut terser = TerserMut::new(&mut message);
        for path in ["MSH-1", "MSH-2", "FHS-1", "FHS-2", "BHS-2"] {
            let err = terser.set(path, "^~").unwrap_err();
            assert!(err.to_string().contains("encoding characters"), "{path}");
        }
        terser.set("MSH-3", "LAB2").unwrap();
    }
}
