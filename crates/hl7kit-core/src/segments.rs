//! Typed, borrowing views over common segments
//!
//! Each view is generated by [`segment_view!`] from a table of
//! `accessor, field accessor => position: datatype` rows that mirrors the
//! segment definition in the built-in registry. A view never copies; it
//! wraps a `&Segment` whose name matched.

use crate::datatypes::DateTime;
use crate::model::MessageType;
use crate::Result;

/// Generate a typed view over one segment id.
///
/// For every row, `accessor()` returns the first component of the first
/// repetition and `field_accessor()` the whole
/// [`Field`](crate::model::Field).
#[macro_export]
macro_rules! segment_view {
    (
        $(#[$meta:meta])*
        $view:ident = $id:literal {
            $( $accessor:ident, $field_accessor:ident => $index:literal : $datatype:literal; )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy)]
        pub struct $view<'a> {
            segment: &'a $crate::model::Segment,
        }

        impl<'a> $view<'a> {
            pub const ID: &'static str = $id;

            /// `(accessor, position, datatype)` for every generated accessor
            pub const FIELDS: &'static [(&'static str, usize, &'static str)] =
                &[$((stringify!($accessor), $index, $datatype)),*];

            pub fn from_segment(segment: &'a $crate::model::Segment) -> Option<Self> {
                (segment.name == $id).then_some(Self { segment })
            }

            pub fn segment(&self) -> &'a $crate::model::Segment {
                self.segment
            }

            $(
                pub fn $accessor(&self) -> Option<&'a str> {
                    self.segment.value($index, 0, 1, 1)
                }

                pub fn $field_accessor(&self) -> Option<&'a $crate::model::Field> {
                    self.segment.field($index)
                }
            )*
        }
    };
}

segment_view! {
    /// Message header
    Msh = "MSH" {
        field_separator, field_separator_field => 1: "ST";
        encoding_characters, encoding_characters_field => 2: "ST";
        sending_application, sending_application_field => 3: "HD";
        sending_facility, sending_facility_field => 4: "HD";
        receiving_application, receiving_application_field => 5: "HD";
        receiving_facility, receiving_facility_field => 6: "HD";
        date_time_of_message, date_time_of_message_field => 7: "TS";
        security, security_field => 8: "ST";
        message_code, message_type_field => 9: "MSG";
        message_control_id, message_control_id_field => 10: "ST";
        processing_id, processing_id_field => 11: "PT";
        version_id, version_id_field => 12: "VID";
        sequence_number, sequence_number_field => 13: "NM";
        continuation_pointer, continuation_pointer_field => 14: "ST";
        accept_ack_type, accept_ack_type_field => 15: "ID";
        application_ack_type, application_ack_type_field => 16: "ID";
        country_code, country_code_field => 17: "ID";
        character_set, character_set_field => 18: "ID";
    }
}

impl Msh<'_> {
    /// MSH-9 split into code, trigger event and structure
    pub fn message_type(&self) -> Option<MessageType> {
        let repetition = self.segment.field(9)?.repetition(0)?;
        let part = |i: usize| {
            repetition
                .component(i)
                .map(|c| c.value())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        Some(MessageType {
            code: part(1)?,
            trigger: part(2),
            structure: part(3),
        })
    }

    /// MSH-7, `None` when empty
    pub fn timestamp(&self) -> Result<Option<DateTime>> {
        self.date_time_of_message().map(DateTime::parse).transpose()
    }
}

segment_view! {
    /// Event type
    Evn = "EVN" {
        event_type_code, event_type_code_field => 1: "ID";
        recorded_date_time, recorded_date_time_field => 2: "TS";
        date_time_planned_event, date_time_planned_event_field => 3: "TS";
        event_reason_code, event_reason_code_field => 4: "IS";
        operator_id, operator_id_field => 5: "XCN";
        event_occurred, event_occurred_field => 6: "TS";
        event_facility, event_facility_field => 7: "HD";
    }
}

segment_view! {
    /// Patient identification
    Pid = "PID" {
        set_id, set_id_field => 1: "SI";
        patient_id, patient_id_field => 2: "CX";
        patient_identifier, patient_identifier_list => 3: "CX";
        alternate_patient_id, alternate_patient_id_field => 4: "CX";
        family_name, patient_name => 5: "XPN";
        mothers_maiden_name, mothers_maiden_name_field => 6: "XPN";
        birth_date_time, birth_date_time_field => 7: "TS";
        administrative_sex, administrative_sex_field => 8: "IS";
        patient_alias, patient_alias_field => 9: "XPN";
        race, race_field => 10: "CE";
        patient_address, patient_address_field => 11: "XAD";
        county_code, county_code_field => 12: "IS";
        home_phone, home_phone_field => 13: "XTN";
        business_phone, business_phone_field => 14: "XTN";
        primary_language, primary_language_field => 15: "CE";
        marital_status, marital_status_field => 16: "CE";
        religion, religion_field => 17: "CE";
        patient_account_number, patient_account_number_field => 18: "CX";
        ssn, ssn_field => 19: "ST";
        death_date_time, death_date_time_field => 29: "TS";
        death_indicator, death_indicator_field => 30: "ID";
    }
}

impl Pid<'_> {
    /// PID-7, `None` when empty
    pub fn date_of_birth(&self) -> Result<Option<DateTime>> {
        self.birth_date_time().map(DateTime::parse).transpose()
    }

    /// PID-5 component 2 of the first name
    pub fn given_name(&self) -> Option<&str> {
        self.segment.value(5, 0, 2, 1)
    }

    /// Values of PID-3.1 across all repetitions
    pub fn identifiers(&self) -> Vec<&str> {
        self.patient_identifier_list()
            .map(|field| {
                field
                    .repetitions
                    .iter()
                    .map(|r| r.value())
                    .filter(|v| !v.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

segment_view! {
    /// Patient visit
    Pv1 = "PV1" {
        set_id, set_id_field => 1: "SI";
        patient_class, patient_class_field => 2: "IS";
        point_of_care, assigned_patient_location => 3: "PL";
        admission_type, admission_type_field => 4: "IS";
        preadmit_number, preadmit_number_field => 5: "CX";
        prior_patient_location, prior_patient_location_field => 6: "PL";
        attending_doctor, attending_doctor_field => 7: "XCN";
        referring_doctor, referring_doctor_field => 8: "XCN";
        hospital_service, hospital_service_field => 10: "IS";
        admit_source, admit_source_field => 14: "IS";
        patient_type, patient_type_field => 18: "IS";
        visit_number, visit_number_field => 19: "CX";
        discharge_disposition, discharge_disposition_field => 36: "IS";
        admit_date_time, admit_date_time_field => 44: "TS";
        discharge_date_time, discharge_date_time_field => 45: "TS";
    }
}

segment_view! {
    /// Next of kin / associated parties
    Nk1 = "NK1" {
        set_id, set_id_field => 1: "SI";
        family_name, name => 2: "XPN";
        relationship, relationship_field => 3: "CE";
        address, address_field => 4: "XAD";
        phone_number, phone_number_field => 5: "XTN";
        contact_role, contact_role_field => 7: "CE";
        start_date, start_date_field => 8: "DT";
        end_date, end_date_field => 9: "DT";
    }
}

segment_view! {
    /// Observation request
    Obr = "OBR" {
        set_id, set_id_field => 1: "SI";
        placer_order_number, placer_order_number_field => 2: "EI";
        filler_order_number, filler_order_number_field => 3: "EI";
        service_identifier, universal_service_identifier => 4: "CE";
        priority, priority_field => 5: "ID";
        observation_date_time, observation_date_time_field => 7: "TS";
        observation_end_date_time, observation_end_date_time_field => 8: "TS";
        ordering_provider, ordering_provider_field => 16: "XCN";
        results_status_change, results_status_change_field => 22: "TS";
        diagnostic_service_section, diagnostic_service_section_field => 24: "ID";
        result_status, result_status_field => 25: "ID";
    }
}

segment_view! {
    /// Observation or result
    Obx = "OBX" {
        set_id, set_id_field => 1: "SI";
        value_type, value_type_field => 2: "ID";
        observation_code, observation_identifier => 3: "CE";
        observation_sub_id, observation_sub_id_field => 4: "ST";
        observation_value, observation_value_field => 5: "varies";
        units, units_field => 6: "CE";
        references_range, references_range_field => 7: "ST";
        abnormal_flags, abnormal_flags_field => 8: "IS";
        result_status, result_status_field => 11: "ID";
        observation_date_time, observation_date_time_field => 14: "TS";
    }
}

impl Obx<'_> {
    /// OBX-5 repetitions as plain values
    pub fn values(&self) -> Vec<&str> {
        self.observation_value_field()
            .map(|field| field.repetitions.iter().map(|r| r.value()).collect())
            .unwrap_or_default()
    }

    /// Whether OBX-2 declares a numeric value
    pub fn is_numeric(&self) -> bool {
        matches!(self.value_type(), Some("NM" | "SN"))
    }
}

segment_view! {
    /// Common order
    Orc = "ORC" {
        order_control, order_control_field => 1: "ID";
        placer_order_number, placer_order_number_field => 2: "EI";
        filler_order_number, filler_order_number_field => 3: "EI";
        placer_group_number, placer_group_number_field => 4: "EI";
        order_status, order_status_field => 5: "ID";
        transaction_date_time, transaction_date_time_field => 9: "TS";
        entered_by, entered_by_field => 10: "XCN";
        ordering_provider, ordering_provider_field => 12: "XCN";
    }
}

segment_view! {
    /// Message acknowledgment
    Msa = "MSA" {
        acknowledgment_code, acknowledgment_code_field => 1: "ID";
        message_control_id, message_control_id_field => 2: "ST";
        text_message, text_message_field => 3: "ST";
        expected_sequence_number, expected_sequence_number_field => 4: "NM";
    }
}

segment_view! {
    /// Error
    ErrSegment = "ERR" {
        error_location, error_location_field => 2: "ERL";
        hl7_error_code, hl7_error_code_field => 3: "CWE";
        severity, severity_field => 4: "ID";
        application_error_code, application_error_code_field => 5: "CWE";
        diagnostic_information, diagnostic_information_field => 7: "TX";
        user_message, user_message_field => 8: "TX";
    }
}

segment_view! {
    /// Scheduling activity information
    Sch = "SCH" {
        placer_appointment_id, placer_appointment_id_field => 1: "EI";
        filler_appointment_id, filler_appointment_id_field => 2: "EI";
        occurrence_number, occurrence_number_field => 3: "NM";
        schedule_id, schedule_id_field => 5: "CE";
        event_reason, event_reason_field => 6: "CE";
        appointment_reason, appointment_reason_field => 7: "CE";
        appointment_type, appointment_type_field => 8: "CE";
        filler_contact_person, filler_contact_person_field => 16: "XCN";
    }
}

segment_view! {
    /// Bed status update
    Npu = "NPU" {
        bed_location, bed_location_field => 1: "PL";
        bed_status, bed_status_field => 2: "IS";
    }
}
