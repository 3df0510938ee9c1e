//! Acknowledgment generation

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::datatypes::DateTime;
use crate::model::{Message, NodeContainer, Segment};
use crate::validation::{Diagnostic, Severity, ValidationReport};
use crate::{Hl7Error, Result};

/// MSA-1 acknowledgment code (HL7 table 0008)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AckCode {
    /// Application accept
    AA,
    /// Application error
    AE,
    /// Application reject
    AR,
    /// Commit accept
    CA,
    /// Commit error
    CE,
    /// Commit reject
    CR,
}

impl AckCode {
    pub fn as_str(self) -> &'static str {
        match self {
            AckCode::AA => "AA",
            AckCode::AE => "AE",
            AckCode::AR => "AR",
            AckCode::CA => "CA",
            AckCode::CE => "CE",
            AckCode::CR => "CR",
        }
    }

    pub fn is_accept(self) -> bool {
        matches!(self, AckCode::AA | AckCode::CA)
    }

    /// AA, or AE when the report holds errors
    pub fn from_report(report: &ValidationReport) -> Self {
        if report.has_errors() {
            AckCode::AE
        } else {
            AckCode::AA
        }
    }
}

impl fmt::Display for AckCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AckCode {
    type Err = Hl7Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "AA" => Ok(AckCode::AA),
            "AE" => Ok(AckCode::AE),
            "AR" => Ok(AckCode::AR),
            "CA" => Ok(AckCode::CA),
            "CE" => Ok(AckCode::CE),
            "CR" => Ok(AckCode::CR),
            other => Err(Hl7Error::datatype_error(
                "ID",
                other,
                "not an acknowledgment code (AA, AE, AR, CA, CE, CR)",
            )),
        }
    }
}

static CONTROL_COUNTER: AtomicU32 = AtomicU32::new(0);

/// A message control id unique within this process: timestamp plus counter
pub fn next_control_id() -> String {
    let sequence = CONTROL_COUNTER.fetch_add(1, Ordering::Relaxed) % 10_000;
    format!("{}{:04}", Local::now().format("%Y%m%d%H%M%S"), sequence)
}

/// Build an acknowledgment for `original`.
///
/// Sending and receiving application/facility are swapped, MSH-9 becomes
/// `ACK^<trigger>^ACK` and MSA-2 echoes the original control id. A
/// non-accept code with `text` adds an ERR segment carrying the text.
pub fn generate_ack(original: &Message, code: AckCode, text: Option<&str>) -> Result<Message> {
    let mut ack = ack_header(original, code, text)?;
    if !code.is_accept()
        && let Some(text) = text
    {
        let mut err = Segment::new("ERR");
        err.set_value(3, 0, 1, 1, "207");
        err.set_value(3, 0, 2, 1, "Application internal error");
        err.set_value(3, 0, 3, 1, "HL70357");
        err.set_field(4, "E");
        err.set_field(8, text);
        ack.push_segment(err);
    }
    Ok(ack)
}

/// Acknowledge `original` with one ERR per warning or error in `report`
pub fn generate_ack_for_report(original: &Message, report: &ValidationReport) -> Result<Message> {
    let code = AckCode::from_report(report);
    let text = (!code.is_accept()).then(|| format!("{} error(s)", report.error_count()));
    let mut ack = ack_header(original, code, text.as_deref())?;
    for diagnostic in report
        .diagnostics
        .iter()
        .filter(|d| d.severity >= Severity::Warning)
    {
        ack.push_segment(error_segment(diagnostic));
    }
    Ok(ack)
}

fn ack_header(original: &Message, code: AckCode, text: Option<&str>) -> Result<Message> {
    let source = original
        .msh()
        .ok_or_else(|| Hl7Error::parse_error("Message has no MSH segment", 1))?;

    let mut ack = Message::new("ACK", original.version.as_str());
    ack.encoding = original.encoding;

    let mut msh = Segment::new("MSH");
    msh.set_field(1, ack.encoding.field.to_string());
    msh.set_field(2, ack.encoding.msh2());
    for (to, from) in [(3, 5), (4, 6), (5, 3), (6, 4)] {
        if let Some(field) = source.field(from) {
            *msh.field_mut(to) = field.clone();
        }
    }
    msh.set_field(7, DateTime::now().to_string());
    msh.set_value(9, 0, 1, 1, "ACK");
    if let Some(trigger) = source.value(9, 0, 2, 1) {
        msh.set_value(9, 0, 2, 1, trigger);
    }
    msh.set_value(9, 0, 3, 1, "ACK");
    msh.set_field(10, next_control_id());
    if let Some(field) = source.field(11) {
        *msh.field_mut(11) = field.clone();
    }
    msh.set_field(12, original.version.as_str());

    let mut msa = Segment::new("MSA");
    msa.set_field(1, code.as_str());
    msa.set_field(2, original.control_id().unwrap_or_default());
    if let Some(text) = text {
        msa.set_field(3, text);
    }

    ack.children.clear();
    ack.push_segment(msh);
    ack.push_segment(msa);
    Ok(ack)
}

/// ERR segment for one diagnostic
fn error_segment(diagnostic: &Diagnostic) -> Segment {
    let mut err = Segment::new("ERR");
    if let Some((segment, field)) = error_location(&diagnostic.location.path) {
        err.set_value(2, 0, 1, 1, segment);
        if diagnostic.location.segment > 0 {
            err.set_value(2, 0, 2, 1, diagnostic.location.segment.to_string());
        }
        if let Some(field) = field {
            err.set_value(2, 0, 3, 1, field);
        }
    }
    let code = diagnostic.code.unwrap_or(207);
    err.set_value(3, 0, 1, 1, code.to_string());
    err.set_value(3, 0, 2, 1, error_code_text(code));
    err.set_value(3, 0, 3, 1, "HL70357");
    err.set_field(
        4,
        match diagnostic.severity {
            Severity::Error => "E",
            Severity::Warning => "W",
            Severity::Info => "I",
        },
    );
    err.set_field(8, diagnostic.message.as_str());
    err
}

/// Segment id and field number from a path such as `/PATIENT/PID(1)-3(2)`
fn error_location(path: &str) -> Option<(&str, Option<&str>)> {
    let last = path.rsplit('/').next()?;
    let mut parts = last.split('-');
    let segment = parts.next()?.split('(').next()?;
    if segment.len() != 3 {
        return None;
    }
    let field = parts.next().and_then(|f| f.split('(').next());
    Some((segment, field))
}

fn error_code_text(code: u16) -> &'static str {
    match code {
        0 => "Message accepted",
        100 => "Segment sequence error",
        101 => "Required field missing",
        102 => "Data type error",
        103 => "Table value not found",
        200 => "Unsupported message type",
        201 => "Unsupported event code",
        202 => "Unsupported processing id",
        203 => "Unsupported version id",
        _ => "Application internal error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::PipeParser;
    use crate::segments::{ErrSegment, Msa, Msh};
    use crate::validation::Validator;

    const ADT: &str = "MSH|^~\\&|ADM|HOSP|EHR|CLINIC|20240517094512||ADT^A04^ADT_A01|MSG0001|P|2.5\r\
EVN|A04|20240517094500\r\
PID|1||12345^^^HOSP^MR||DOE^JANE||19800101|F\r\
PV1|1|O\r";

    fn original() -> Message {
        PipeParser::with_builtin().unwrap().parse(ADT).unwrap()
    }

    #[test]
    fn test_accept() {
        let ack = generate_ack(&original(), AckCode::AA, None).unwrap();
        let msh = Msh::from_segment(ack.msh().unwrap()).unwrap();
        assert_eq!(msh.sending_application(), Some("EHR"));
        assert_eq!(msh.sending_facility(), Some("CLINIC"));
        assert_eq!(msh.receiving_application(), Some("ADM"));
        assert_eq!(msh.receiving_facility(), Some("HOSP"));
        assert_eq!(msh.message_type().unwrap().to_string(), "ACK^A04^ACK");
        assert_eq!(msh.processing_id(), Some("P"));
        assert_eq!(msh.version_id(), Some("2.5"));
        assert_ne!(msh.message_control_id(), Some("MSG0001"));
        assert!(msh.timestamp().unwrap().is_some());

        let msa = Msa::from_segment(ack.segment("MSA").unwrap()).unwrap();
        assert_eq!(msa.acknowledgment_code(), Some("AA"));
        assert_eq!(msa.message_control_id(), Some("MSG0001"));
        assert!(ack.segment("ERR").is_none());
        assert_eq!(ack.structure, "ACK");
    }

    #[test]
    fn test_error_with_text() {
        let ack = generate_ack(&original(), AckCode::AE, Some("Unknown patient")).unwrap();
        let msa = Msa::from_segment(ack.segment("MSA").unwrap()).unwrap();
        assert_eq!(msa.acknowledgment_code(), Some("AE"));
        assert_eq!(msa.text_message(), Some("Unknown patient"));
        let err = ErrSegment::from_segment(ack.segment("ERR").unwrap()).unwrap();
        assert_eq!(err.hl7_error_code(), Some("207"));
        assert_eq!(err.user_message(), Some("Unknown patient"));
    }

    #[test]
    fn test_ack_validates() {
        let ack = generate_ack(&original(), AckCode::AR, Some("rejected")).unwrap();
        let report = Validator::with_builtin().unwrap().validate(&ack);
        assert!(report.is_valid(), "{:#?}", report.diagnostics);
    }

    #[test]
    fn test_ack_for_report() {
        let message = PipeParser::with_builtin()
            .unwrap()
            .parse(&ADT.replace("12345^^^HOSP^MR", ""))
            .unwrap();
        let report = Validator::with_builtin().unwrap().validate(&message);
        let ack = generate_ack_for_report(&message, &report).unwrap();
        let msa = Msa::from_segment(ack.segment("MSA").unwrap()).unwrap();
        assert_eq!(msa.acknowledgment_code(), Some("AE"));
        let err = ErrSegment::from_segment(ack.segment("ERR").unwrap()).unwrap();
        assert_eq!(err.error_location(), Some("PID"));
        assert_eq!(err.segment().value(2, 0, 2, 1), Some("3"));
        assert_eq!(err.segment().value(2, 0, 3, 1), Some("3"));
        assert_eq!(err.hl7_error_code(), Some("101"));
        assert_eq!(err.severity(), Some("E"));
    }

    #[test]
    fn test_control_ids_differ() {
        assert_ne!(next_control_id(), next_control_id());
    }

    #[test]
    fn test_parse_code() {
        assert_eq!("ca".parse::<AckCode>().unwrap(), AckCode::CA);
        assert!("XX".parse::<AckCode>().is_err());
        assert!(AckCode::CA.is_accept());
        assert!(!AckCode::CR.is_accept());
    }
}
