//! Parse/encode round trips over representative messages
//!
//! Each message is parsed into groups, re-encoded as ER7 and as XML, and
//! read back. Normalized ER7 must come back byte-for-byte.

use hl7kit_core::parser::pipe::segment_lines;
use hl7kit_core::segments::{Obx, Pid};
use hl7kit_core::{
    Hl7Error, Message, Node, NodeContainer, ParserOptions, PipeParser, Terser, TerserMut,
    XmlParser,
};

const ADT_A01: &str = "MSH|^~\\&|ADM|HOSP|EHR|CLINIC|20240517094512||ADT^A01^ADT_A01|MSG0001|P|2.5\r\
EVN|A01|20240517094500\r\
PID|1||12345^^^HOSP^MR~67890^^^HOSP^PI||DOE^JANE^Q||19800101|F\r\
NK1|1|DOE^JOHN|SPO\r\
NK1|2|DOE^ANNA|DAU\r\
PV1|1|I|WARD^101^A\r\
AL1|1||PCN^Penicillin\r\
PR1|1||P1^Appendectomy\r\
ROL|1|AD|SURG\r\
PR1|2||P2^Lavage\r\
IN1|1|PLAN1\r\
IN2|1\r";

const ORU_R01: &str = "MSH|^~\\&|LAB|HOSP|EHR|CLINIC|20240517120000||ORU^R01^ORU_R01|LAB0001|P|2.5\r\
PID|1||555^^^HOSP^MR||SMITH^JOHN\r\
OBR|1|ORD1|FIL1|CBC^Complete blood count^L\r\
OBX|1|NM|WBC^White cells^L||7.2|10*3/uL|4.0-11.0|N|||F\r\
OBX|2|NM|HGB^Hemoglobin^L||13.5|g/dL|12-16|N|||F\r\
OBR|2|ORD2|FIL2|BMP^Basic metabolic^L\r\
OBX|1|ST|NA^Sodium^L||Normal \\T\\ stable \\F\\ rechecked||||||F\r";

const ADT_A39: &str = "MSH|^~\\&|ADM|HOSP|EHR|CLINIC|20240517094512||ADT^A40|MRG0001|P|2.5\r\
EVN|A40|20240517094500\r\
PID|1||111^^^HOSP^MR||ROE^RICHARD\r\
MRG|999^^^HOSP^MR\r\
PID|2||222^^^HOSP^MR||ROE^RITA\r\
MRG|888^^^HOSP^MR\r";

fn parser() -> PipeParser {
    PipeParser::with_builtin().unwrap()
}

fn child_names(nodes: &[Node]) -> Vec<String> {
    nodes.iter().map(|node| node.name().to_string()).collect()
}

#[test]
fn test_adt_a01_assembles_groups() {
    let message = parser().parse(ADT_A01).unwrap();
    assert_eq!(message.structure, "ADT_A01");
    assert_eq!(message.version, "2.5");
    assert_eq!(
        child_names(&message.children),
        vec![
            "MSH",
            "EVN",
            "PID",
            "NK1",
            "NK1",
            "PV1",
            "AL1",
            "PROCEDURE",
            "PROCEDURE",
            "INSURANCE"
        ]
    );

    let procedures = message.groups_named("PROCEDURE");
    assert_eq!(procedures.len(), 2);
    assert_eq!(child_names(&procedures[0].children), vec!["PR1", "ROL"]);
    assert_eq!(child_names(&procedures[1].children), vec!["PR1"]);

    let insurance = message.group("INSURANCE").unwrap();
    assert_eq!(child_names(&insurance.children), vec!["IN1", "IN2"]);
}

#[test]
fn test_oru_r01_nests_order_observations() {
    let message = parser().parse(ORU_R01).unwrap();
    assert_eq!(message.structure, "ORU_R01");

    let results = message.groups_named("PATIENT_RESULT");
    assert_eq!(results.len(), 1);
    let orders = message.groups_named("ORDER_OBSERVATION");
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0].groups_named("OBSERVATION").len(), 2);
    assert_eq!(orders[1].groups_named("OBSERVATION").len(), 1);
    assert!(message.group("PATIENT").unwrap().segment("PID").is_some());
}

#[test]
fn test_oru_r01_escapes_are_decoded() {
    let message = parser().parse(ORU_R01).unwrap();
    let terser = Terser::new(&message);
    assert_eq!(
        terser
            .get("/PATIENT_RESULT/ORDER_OBSERVATION(1)/OBSERVATION/OBX-5")
            .unwrap()
            .as_deref(),
        Some("Normal & stable | rechecked")
    );
    assert_eq!(terser.get("OBX(2)-3-1").unwrap().as_deref(), Some("NA"));
    assert_eq!(
        terser
            .get("ORDER_OBSERVATION/OBSERVATION(1)/OBX-5")
            .unwrap()
            .as_deref(),
        Some("13.5")
    );
}

#[test]
fn test_escaped_formatting_text_stays_literal() {
    let text = ORU_R01.replace(
        "OBX|1|ST|NA^Sodium^L||Normal \\T\\ stable \\F\\ rechecked||||||F\r",
        "OBX|1|TX|NOTE^Note^L||a\\E\\.br\\E\\b\\.br\\c||||||F\r",
    );
    let parser = parser();
    let message = parser.parse(&text).unwrap();
    assert_eq!(parser.encode(&message), text);

    let value = Terser::new(&message).get("OBX(2)-5").unwrap().unwrap();
    assert_eq!(value, "a\u{E000}.br\\b\\.br\\c");

    let xml = XmlParser::with_builtin().unwrap();
    let back = xml.parse(&xml.encode(&message).unwrap()).unwrap();
    assert_eq!(parser.encode(&back), text);
}

#[test]
fn test_repeating_patient_group() {
    let message = parser().parse(ADT_A39).unwrap();
    assert_eq!(message.structure, "ADT_A39");
    let patients = message.groups_named("PATIENT");
    assert_eq!(patients.len(), 2);
    assert_eq!(child_names(&patients[1].children), vec!["PID", "MRG"]);

    let terser = Terser::new(&message);
    assert_eq!(
        terser.get("PATIENT(1)/MRG-1-1").unwrap().as_deref(),
        Some("888")
    );
}

#[test]
fn test_er7_round_trip_is_exact() {
    let parser = parser();
    for text in [ADT_A01, ORU_R01, ADT_A39] {
        let message = parser.parse(text).unwrap();
        assert_eq!(parser.encode(&message), text);
    }
}

#[test]
fn test_xml_round_trip_preserves_model() {
    let pipe = parser();
    let xml = XmlParser::with_builtin().unwrap();
    for text in [ADT_A01, ORU_R01, ADT_A39] {
        let message = pipe.parse(text).unwrap();
        let document = xml.encode(&message).unwrap();
        let back = xml.parse(&document).unwrap();
        assert_eq!(back.structure, message.structure);
        assert_eq!(pipe.encode(&back), text);
    }
}

#[test]
fn test_newline_separated_input() {
    let parser = parser();
    let text = ADT_A01.replace('\r', "\r\n");
    let message = parser.parse(&text).unwrap();
    assert_eq!(parser.encode(&message), ADT_A01);
    assert_eq!(segment_lines(&text).count(), 12);
}

#[test]
fn test_custom_delimiters_survive() {
    let text = "MSH#$*@!#ADM#HOSP#EHR#CLINIC#20240517094512##ADT$A01#MSG0002#P#2.5\r\
EVN#A01#20240517094500\r\
PID#1##12345$$$HOSP$MR*67890##DOE$JANE!X\r\
PV1#1#I\r";
    let parser = parser();
    let message = parser.parse(text).unwrap();
    assert_eq!(message.encoding.field, '#');
    assert_eq!(message.encoding.component, '$');

    let terser = Terser::new(&message);
    assert_eq!(terser.get("PID-3(1)-1").unwrap().as_deref(), Some("67890"));
    assert_eq!(terser.get("PID-5-2-2").unwrap().as_deref(), Some("X"));
    assert_eq!(parser.encode(&message), text);
}

#[test]
fn test_typed_views_read_values() {
    let message = parser().parse(ORU_R01).unwrap();
    let pid = Pid::from_segment(message.segment("PID").unwrap()).unwrap();
    assert_eq!(pid.identifiers(), vec!["555"]);
    assert_eq!(pid.given_name(), Some("JOHN"));

    let obx = Obx::from_segment(message.segment("OBX").unwrap()).unwrap();
    assert!(obx.is_numeric());
    assert_eq!(obx.values(), vec!["7.2"]);
    assert_eq!(obx.result_status(), Some("F"));
}

#[test]
fn test_edit_then_encode() {
    let parser = parser();
    let mut message = parser.parse(ADT_A01).unwrap();
    {
        let mut terser = TerserMut::new(&mut message);
        terser.set("PID-5-1", "DOE-SMITH").unwrap();
        terser.set("PID-3(2)-1", "ABC").unwrap();
        terser.set("PV1-3-2", "202").unwrap();
    }
    let encoded = parser.encode(&message);
    assert!(encoded.contains("PID|1||12345^^^HOSP^MR~67890^^^HOSP^PI~ABC||DOE-SMITH^JANE^Q||19800101|F\r"));
    assert!(encoded.contains("PV1|1|I|WARD^202^A\r"));
}

#[test]
fn test_message_built_from_scratch() {
    let parser = parser();
    let mut message = Message::new("ADT_A20", "2.5");
    {
        let mut terser = TerserMut::new(&mut message);
        terser.set("MSH-3", "BEDS").unwrap();
        terser.set("MSH-7", "20240517094512").unwrap();
        terser.set("MSH-10", "BED0001").unwrap();
        terser.set("MSH-11", "P").unwrap();
        terser.set("EVN-2", "20240517094500").unwrap();
        terser.set("NPU-1-1", "WARD").unwrap();
        terser.set("NPU-2", "C").unwrap();
    }
    let encoded = parser.encode(&message);
    assert!(encoded.starts_with("MSH|^~\\&|BEDS||||20240517094512||ADT^A20^ADT_A20|BED0001|P|2.5\r"));

    let back = parser.parse(&encoded).unwrap();
    assert_eq!(back.structure, "ADT_A20");
    assert_eq!(Terser::new(&back).get("NPU-2").unwrap().as_deref(), Some("C"));
}

#[test]
fn test_non_standard_segment_kept_in_place() {
    let text = ADT_A01.replace("PV1|1|I|WARD^101^A\r", "PV1|1|I|WARD^101^A\rZPV|custom|value\r");
    let parser = parser();
    let message = parser.parse(&text).unwrap();
    let names: Vec<&str> = message.segments().map(|s| s.name.as_str()).collect();
    let pv1 = names.iter().position(|n| *n == "PV1").unwrap();
    assert_eq!(names[pv1 + 1], "ZPV");
    assert_eq!(parser.encode(&message), text);
}

#[test]
fn test_strict_parser_rejects_out_of_place_segment() {
    let text = ADT_A01.replace("PV1|1|I|WARD^101^A\r", "PV1|1|I|WARD^101^A\rZPV|custom\r");
    let registry = parser().registry().clone();
    let strict = PipeParser::new(
        registry,
        ParserOptions {
            strict: true,
            ..ParserOptions::default()
        },
    );
    let err = strict.parse(&text).unwrap_err();
    assert!(matches!(err, Hl7Error::SegmentSequence { ref segment, .. } if segment == "ZPV"));
}

#[test]
fn test_unknown_structure_kept_flat() {
    let text = "MSH|^~\\&|A|B|C|D|20240517||ZZZ^Z01|X1|P|2.5\rZAB|1\rZAC|2\r";
    let parser = parser();
    let message = parser.parse(text).unwrap();
    assert_eq!(message.structure, "ZZZ_Z01");
    assert_eq!(child_names(&message.children), vec!["MSH", "ZAB", "ZAC"]);
    assert_eq!(parser.encode(&message), text);
}

#[test]
fn test_batch_of_messages() {
    let batch_text = format!(
        "FHS|^~\\&|ADM\rBHS|^~\\&|ADM\r{ADT_A01}{ORU_R01}BTS|2\rFTS|1\r"
    );
    let batch = parser().parse_batch(&batch_text).unwrap();
    assert_eq!(batch.headers.len(), 2);
    assert_eq!(batch.trailers.len(), 2);
    assert_eq!(batch.declared_message_count(), Some(2));
    let structures: Vec<&str> = batch.messages.iter().map(|m| m.structure.as_str()).collect();
    assert_eq!(structures, vec!["ADT_A01", "ORU_R01"]);
}

#[test]
fn test_parse_errors() {
    let parser = parser();
    assert!(parser.parse("").is_err());
    assert!(parser.parse("PID|1||12345\r").is_err());
    assert!(parser.parse("MSH|^~\\&|A\rpid|1\r").is_err());
}
