//! ER7 (pipe-delimited) parsing and encoding

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::{MessageCodec, ParserOptions, structure};
use crate::definitions::DefinitionRegistry;
use crate::encoding::EncodingCharacters;
use crate::escape::{escape, unescape};
use crate::model::{Component, Field, Message, Node, NodeContainer, Repetition, Segment};
use crate::{Hl7Error, Result, ResultExt};

/// Split message text into segment lines.
///
/// Accepts `\r`, `\n` and `\r\n` terminators, skips blank lines and drops
/// MLLP framing bytes around the payload.
pub fn segment_lines(text: &str) -> impl Iterator<Item = &str> {
    text.trim_matches(['\u{0b}', '\u{1c}'])
        .split(['\r', '\n'])
        .map(|line| line.trim_matches(['\u{0b}', '\u{1c}']))
        .filter(|line| !line.trim().is_empty())
}

fn is_valid_segment_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() == 3
        && bytes[0].is_ascii_uppercase()
        && bytes[1..]
            .iter()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

/// Parser and encoder for ER7 messages
#[derive(Debug, Clone)]
pub struct PipeParser {
    registry: Arc<DefinitionRegistry>,
    options: ParserOptions,
}

impl PipeParser {
    pub fn new(registry: Arc<DefinitionRegistry>, options: ParserOptions) -> Self {
        Self { registry, options }
    }

    /// Parser over the built-in definitions with default options
    pub fn with_builtin() -> Result<Self> {
        Ok(Self::new(
            DefinitionRegistry::builtin()?,
            ParserOptions::default(),
        ))
    }

    pub fn options(&self) -> &ParserOptions {
        &self.options
    }

    pub fn registry(&self) -> &Arc<DefinitionRegistry> {
        &self.registry
    }

    /// Parse one message
    pub fn parse(&self, text: &str) -> Result<Message> {
        let (encoding, segments) = self.parse_segments(text)?;
        self.build_message(encoding, segments)
    }

    /// Parse the segments of one message without assembling groups
    pub fn parse_segments(&self, text: &str) -> Result<(EncodingCharacters, Vec<Segment>)> {
        let mut lines = segment_lines(text).peekable();
        let first = lines
            .peek()
            .copied()
            .ok_or_else(|| Hl7Error::parse_error("message is empty", 0))?;
        if !first.starts_with("MSH") {
            return Err(Hl7Error::parse_error(
                format!(
                    "first segment must be MSH, found '{}'",
                    first.chars().take(3).collect::<String>()
                ),
                1,
            ));
        }

        let encoding = EncodingCharacters::from_msh(first)?;
        let segments = lines
            .enumerate()
            .map(|(i, line)| parse_segment(line, &encoding, i + 1))
            .collect::<Result<Vec<_>>>()?;
        trace!("Parsed {} segment(s)", segments.len());
        Ok((encoding, segments))
    }

    fn build_message(
        &self,
        encoding: EncodingCharacters,
        segments: Vec<Segment>,
    ) -> Result<Message> {
        let msh = &segments[0];
        let version = msh
            .value(12, 0, 1, 1)
            .unwrap_or(self.options.default_version.as_str())
            .to_string();
        let code = msh.value(9, 0, 1, 1);
        let trigger = msh.value(9, 0, 2, 1);
        let explicit = msh.value(9, 0, 3, 1);

        let resolved =
            code.and_then(|code| self.registry.resolve_structure(code, trigger, explicit));

        let (structure, children) = match resolved {
            Some(id) => {
                let definition = self
                    .registry
                    .structure(&id)
                    .ok_or_else(|| Hl7Error::unknown_structure(id.as_str()))?;
                debug!("Assembling message against {}", id);
                let children = structure::assemble(definition, segments, self.options.strict)?;
                (id, children)
            }
            None => {
                let name = match (code, trigger, explicit) {
                    (_, _, Some(explicit)) => explicit.to_string(),
                    (Some(code), Some(trigger), None) => format!("{code}_{trigger}"),
                    (Some(code), None, None) => code.to_string(),
                    (None, _, None) => {
                        return Err(Hl7Error::parse_error("MSH-9 message type is empty", 1));
                    }
                };
                if self.options.strict || !self.options.allow_unknown_structures {
                    return Err(Hl7Error::unknown_structure(name));
                }
                debug!("No structure for {}, keeping segments flat", name);
                (name, segments.into_iter().map(Node::Segment).collect())
            }
        };

        Ok(Message {
            structure,
            version,
            encoding,
            children,
        })
    }

    /// Encode a message, one terminator after every segment
    pub fn encode(&self, message: &Message) -> String {
        let separator = &self.options.segment_separator;
        let mut out = String::new();
        for segment in message.segments() {
            out.push_str(&encode_segment(segment, &message.encoding));
            out.push_str(separator);
        }
        out
    }

    /// Parse an FHS/BHS batch file or a run of concatenated messages
    pub fn parse_batch(&self, text: &str) -> Result<Batch> {
        let mut lines = segment_lines(text).peekable();
        let first = lines
            .peek()
            .copied()
            .ok_or_else(|| Hl7Error::parse_error("batch is empty", 0))?;
        let encoding = EncodingCharacters::from_msh(first)?;

        let mut batch = Batch::default();
        let mut chunks: Vec<Vec<&str>> = Vec::new();
        for (i, line) in lines.enumerate() {
            match line.get(0..3).unwrap_or_default() {
                "FHS" | "BHS" => batch.headers.push(parse_segment(line, &encoding, i + 1)?),
                "BTS" | "FTS" => batch.trailers.push(parse_segment(line, &encoding, i + 1)?),
                "MSH" => chunks.push(vec![line]),
                _ => match chunks.last_mut() {
                    Some(chunk) => chunk.push(line),
                    None => {
                        return Err(Hl7Error::parse_error(
                            "segment appears before the first MSH",
                            i + 1,
                        ));
                    }
                },
            }
        }

        for (index, chunk) in chunks.iter().enumerate() {
            let context = format!("message {} of batch", index + 1);
            match self.parse(&chunk.join("\r")).recoverable(&context)? {
                Some(message) => batch.messages.push(message),
                None => batch.skipped += 1,
            }
        }

        if let Some(expected) = batch.declared_message_count()
            && expected != batch.messages.len()
        {
            warn!(
                "BTS-1 declares {} message(s) but the batch holds {}",
                expected,
                batch.messages.len()
            );
        }
        debug!("Parsed batch with {} message(s)", batch.messages.len());
        Ok(batch)
    }
}

impl MessageCodec for PipeParser {
    fn parse(&self, text: &str) -> Result<Message> {
        PipeParser::parse(self, text)
    }

    fn encode(&self, message: &Message) -> Result<String> {
        Ok(PipeParser::encode(self, message))
    }
}

/// Messages read from one batch or file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    /// FHS/BHS segments in order
    pub headers: Vec<Segment>,
    /// BTS/FTS segments in order
    pub trailers: Vec<Segment>,
    pub messages: Vec<Message>,
    /// Messages dropped because they failed to parse
    #[serde(default)]
    pub skipped: usize,
}

impl Batch {
    /// Message count declared in BTS-1, when present and numeric
    pub fn declared_message_count(&self) -> Option<usize> {
        self.trailers
            .iter()
            .find(|s| s.name == "BTS")
            .and_then(|bts| bts.field_value(1))
            .and_then(|count| count.trim().parse().ok())
    }
}

/// Parse a single segment line. `ordinal` is 1-based and used in errors.
pub fn parse_segment(line: &str, encoding: &EncodingCharacters, ordinal: usize) -> Result<Segment> {
    let mut parts = line.split(encoding.field);
    let name = parts.next().unwrap_or_default();
    if !is_valid_segment_name(name) {
        return Err(Hl7Error::parse_error(
            format!("invalid segment name '{name}'"),
            ordinal,
        ));
    }

    let mut segment = Segment::new(name);
    if segment.is_header() {
        let msh2 = parts.next().unwrap_or_default();
        segment.fields.push(Field::from_value(encoding.field.to_string()));
        segment.fields.push(Field::from_value(msh2));
    }
    for raw in parts {
        segment.fields.push(parse_field(raw, encoding));
    }
    Ok(segment)
}

fn parse_field(raw: &str, encoding: &EncodingCharacters) -> Field {
    Field {
        repetitions: raw
            .split(encoding.repetition)
            .map(|rep| Repetition {
                components: rep
                    .split(encoding.component)
                    .map(|comp| Component {
                        subcomponents: comp
                            .split(encoding.subcomponent)
                            .map(|sub| unescape(sub, encoding).into_owned())
                            .collect(),
                    })
                    .collect(),
            })
            .collect(),
    }
}

/// Join parts with `separator`, dropping trailing empty parts
fn join_trimmed(mut parts: Vec<String>, separator: char) -> String {
    while parts.last().is_some_and(String::is_empty) {
        parts.pop();
    }
    let mut buf = [0u8; 4];
    parts.join(separator.encode_utf8(&mut buf))
}

fn encode_field(field: &Field, encoding: &EncodingCharacters) -> String {
    let repetitions = field
        .repetitions
        .iter()
        .map(|rep| {
            let components = rep
                .components
                .iter()
                .map(|comp| {
                    let subs = comp
                        .subcomponents
                        .iter()
                        .map(|sub| escape(sub, encoding).into_owned())
                        .collect();
                    join_trimmed(subs, encoding.subcomponent)
                })
                .collect();
            join_trimmed(components, encoding.component)
        })
        .collect();
    join_trimmed(repetitions, encoding.repetition)
}

/// Encode one segment without its terminator
pub fn encode_segment(segment: &Segment, encoding: &EncodingCharacters) -> String {
    let mut out = segment.name.clone();
    let skip = if segment.is_header() {
        out.push(encoding.field);
        out.push_str(&encoding.msh2());
        2
    } else {
        0
    };

    let fields: Vec<String> = segment
        .fields
        .iter()
        .skip(skip)
        .map(|field| encode_field(field, encoding))
        .collect();
    let last = fields.iter().rposition(|f| !f.is_empty());
    if let Some(last) = last {
        for field in &fields[..=last] {
            out.push(encoding.field);
            out.push_str(field);
        }
    }
    out
}
