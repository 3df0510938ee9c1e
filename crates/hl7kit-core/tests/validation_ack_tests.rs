//! Validation, acknowledgment and MLLP exchange over whole messages

use hl7kit_core::ack::AckCode;
use futures::{SinkExt, StreamExt};
use hl7kit_core::mllp::{self, payload_text};
use hl7kit_core::validation::rules;
use hl7kit_core::validation::RuleSeverity;
use hl7kit_core::{
    DatePrecision, DefinitionRegistry, Hl7Error, NodeContainer, PipeParser, Severity, Terser,
    ValidationOptions, Validator, generate_ack, generate_ack_for_report,
};

const ADT_A01: &str = "MSH|^~\\&|ADM|HOSP|EHR|CLINIC|20240517094512||ADT^A01^ADT_A01|MSG0001|P|2.5\r\
EVN|A01|20240517094500\r\
PID|1||12345^^^HOSP^MR~67890^^^HOSP^PI||DOE^JANE^Q||19800101|F\r\
NK1|1|DOE^JOHN|SPO\r\
PV1|1|I|WARD^101^A\r\
AL1|1||PCN^Penicillin\r";

const ORU_R01: &str = "MSH|^~\\&|LAB|HOSP|EHR|CLINIC|20240517120000||ORU^R01^ORU_R01|LAB0001|P|2.5\r\
PID|1||555^^^HOSP^MR||SMITH^JOHN\r\
OBR|1|ORD1|FIL1|CBC^Complete blood count^L\r\
OBX|1|NM|WBC^White cells^L||7.2|10*3/uL|4.0-11.0|N|||F\r\
OBX|2|NM|HGB^Hemoglobin^L||13.5|g/dL|12-16|N|||F\r";

fn parser() -> PipeParser {
    PipeParser::with_builtin().unwrap()
}

fn validator(options: ValidationOptions) -> Validator {
    Validator::new(DefinitionRegistry::builtin().unwrap(), options)
}

#[test]
fn test_well_formed_messages_have_no_errors() {
    let parser = parser();
    let validator = validator(ValidationOptions::default());
    for text in [ADT_A01, ORU_R01] {
        let message = parser.parse(text).unwrap();
        let report = validator.validate(&message);
        assert_eq!(report.error_count(), 0, "{:#?}", report.diagnostics);
        assert_eq!(report.control_id.as_deref(), message.control_id());
    }
}

#[test]
fn test_missing_required_segment() {
    let text = ADT_A01.replace("PV1|1|I|WARD^101^A\r", "");
    let message = parser().parse(&text).unwrap();
    let report = validator(ValidationOptions::default()).validate(&message);

    let missing: Vec<_> = report.by_rule(rules::REQUIRED_ELEMENT).collect();
    assert_eq!(missing.len(), 1);
    assert!(missing[0].message.contains("PV1"));
    assert_eq!(missing[0].code, Some(100));
}

#[test]
fn test_field_level_findings() {
    let text = ADT_A01
        .replace("PID|1||", "PID|x||")
        .replace("|19800101|", "|1980-01-01|")
        .replace("PV1|1|I|", "PV1|1||");
    let message = parser().parse(&text).unwrap();
    let report = validator(ValidationOptions::default()).validate(&message);

    assert_eq!(report.by_rule(rules::SEQUENCE_ID).count(), 1);
    assert_eq!(report.by_rule(rules::DATETIME).count(), 1);
    let required: Vec<_> = report.by_rule(rules::REQUIRED_FIELD).collect();
    assert_eq!(required.len(), 1);
    assert_eq!(required[0].location.path, "/PV1-2");
    assert_eq!(required[0].location.segment, 5);
}

#[test]
fn test_explicit_null_counts_as_present() {
    let text = ADT_A01.replace("12345^^^HOSP^MR~67890^^^HOSP^PI", "\"\"");
    let message = parser().parse(&text).unwrap();
    let report = validator(ValidationOptions::default()).validate(&message);
    assert_eq!(report.by_rule(rules::REQUIRED_FIELD).count(), 0);
}

#[test]
fn test_table_value_severity_override() {
    let text = ADT_A01.replace("|F\r", "|Q\r");
    let message = parser().parse(&text).unwrap();

    let report = validator(ValidationOptions::default()).validate(&message);
    assert_eq!(report.error_count(), 0);
    assert_eq!(report.warning_count(), 1);

    let options = ValidationOptions::default().with_rule(rules::TABLE_VALUE, RuleSeverity::Error);
    let report = validator(options).validate(&message);
    let errors: Vec<_> = report.errors().collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code, Some(103));

    let options = ValidationOptions::default().with_rule(rules::TABLE_VALUE, RuleSeverity::Off);
    assert!(validator(options).validate(&message).diagnostics.is_empty());
}

#[test]
fn test_strict_turns_warnings_into_errors() {
    let text = ADT_A01.replace("|F\r", "|Q\r");
    let message = parser().parse(&text).unwrap();
    let report = validator(ValidationOptions::strict()).validate(&message);
    assert_eq!(report.error_count(), 1);
    assert_eq!(report.max_severity(), Some(Severity::Error));
}

#[test]
fn test_minimum_date_precision() {
    let text = ADT_A01.replace("|20240517094512|", "|202405|");
    let message = parser().parse(&text).unwrap();

    assert_eq!(
        validator(ValidationOptions::default())
            .validate(&message)
            .by_rule(rules::DATETIME)
            .count(),
        0
    );

    let options = ValidationOptions {
        min_date_precision: Some(DatePrecision::Day),
        ..ValidationOptions::default()
    };
    let report = validator(options).validate(&message);
    let findings: Vec<_> = report.by_rule(rules::DATETIME).collect();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].location.path, "/MSH-7");
}

#[test]
fn test_check_returns_validation_failed() {
    let text = ADT_A01.replace("12345^^^HOSP^MR~67890^^^HOSP^PI", "");
    let message = parser().parse(&text).unwrap();
    let err = validator(ValidationOptions::default())
        .check(&message)
        .unwrap_err();
    assert!(matches!(err, Hl7Error::ValidationFailed { errors: 1 }));
}

#[test]
fn test_ack_for_valid_message() {
    let parser = parser();
    let message = parser.parse(ADT_A01).unwrap();
    let report = validator(ValidationOptions::default()).validate(&message);
    let ack = generate_ack_for_report(&message, &report).unwrap();

    let terser = Terser::new(&ack);
    assert_eq!(terser.get("MSA-1").unwrap().as_deref(), Some("AA"));
    assert_eq!(terser.get("MSA-2").unwrap().as_deref(), Some("MSG0001"));
    assert_eq!(terser.get("MSH-3").unwrap().as_deref(), Some("EHR"));
    assert_eq!(terser.get("MSH-6").unwrap().as_deref(), Some("HOSP"));
    assert_eq!(terser.get("MSH-9-2").unwrap().as_deref(), Some("A01"));
    assert_ne!(terser.get("MSH-10").unwrap().as_deref(), Some("MSG0001"));
    assert!(ack.segment("ERR").is_none());
}

#[test]
fn test_ack_for_invalid_message_round_trips() {
    let parser = parser();
    let text = ADT_A01.replace("12345^^^HOSP^MR~67890^^^HOSP^PI", "");
    let message = parser.parse(&text).unwrap();
    let report = validator(ValidationOptions::default()).validate(&message);
    let ack = generate_ack_for_report(&message, &report).unwrap();

    let encoded = parser.encode(&ack);
    let parsed = parser.parse(&encoded).unwrap();
    assert_eq!(parsed.structure, "ACK");

    let terser = Terser::new(&parsed);
    assert_eq!(terser.get("MSA-1").unwrap().as_deref(), Some("AE"));
    assert_eq!(terser.get("ERR-2-1").unwrap().as_deref(), Some("PID"));
    assert_eq!(terser.get("ERR-2-3").unwrap().as_deref(), Some("3"));
    assert_eq!(terser.get("ERR-3-1").unwrap().as_deref(), Some("101"));
    assert_eq!(terser.get("ERR-4").unwrap().as_deref(), Some("E"));

    let ack_report = validator(ValidationOptions::default()).validate(&parsed);
    assert_eq!(ack_report.error_count(), 0, "{:#?}", ack_report.diagnostics);
}

#[test]
fn test_explicit_reject_ack() {
    let message = parser().parse(ADT_A01).unwrap();
    let code: AckCode = "ar".parse().unwrap();
    let ack = generate_ack(&message, code, Some("Unknown facility")).unwrap();
    let terser = Terser::new(&ack);
    assert_eq!(terser.get("MSA-1").unwrap().as_deref(), Some("AR"));
    assert_eq!(
        terser.get("MSA-3").unwrap().as_deref(),
        Some("Unknown facility")
    );
    assert_eq!(
        terser.get("ERR-8").unwrap().as_deref(),
        Some("Unknown facility")
    );
}

#[tokio::test]
async fn test_mllp_exchange() {
    let (client, server) = tokio::io::duplex(4096);

    let parser = parser();
    let validator = validator(ValidationOptions::default());
    let receiver = tokio::spawn(async move {
        let mut server = mllp::framed(server);
        let mut answered = 0;
        while let Some(payload) = server.next().await {
            let message = parser.parse(&payload_text(&payload.unwrap())).unwrap();
            let report = validator.validate(&message);
            let ack = generate_ack_for_report(&message, &report).unwrap();
            server.send(parser.encode(&ack)).await.unwrap();
            answered += 1;
        }
        answered
    });

    let mut client = mllp::framed(client);
    client.send(ADT_A01).await.unwrap();
    client.send(ORU_R01).await.unwrap();

    let reader = PipeParser::with_builtin().unwrap();
    let mut acks = Vec::new();
    for _ in 0..2 {
        let payload = client.next().await.unwrap().unwrap();
        let ack = reader.parse(&payload_text(&payload)).unwrap();
        acks.push(Terser::new(&ack).get("MSA-2").unwrap());
    }
    drop(client);

    assert_eq!(receiver.await.unwrap(), 2);
    assert_eq!(
        acks,
        vec![Some("MSG0001".to_string()), Some("LAB0001".to_string())]
    );
}
