//! Error types and handling for HL7 v2 operations

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for hl7kit operations
#[derive(Debug, Error)]
pub enum Hl7Error {
    /// Malformed message text
    #[error("Parse error: {message} (segment {segment})")]
    ParseError { message: String, segment: usize },

    /// Invalid or missing encoding characters in MSH-1/MSH-2
    #[error("Encoding characters error: {message}")]
    EncodingError { message: String },

    /// Escape sequence could not be processed
    #[error("Malformed escape sequence: {sequence}")]
    MalformedEscapeSequence { sequence: String },

    /// A segment appeared where the message structure does not allow it
    #[error("Segment {segment} at position {position} is not allowed in {structure}")]
    SegmentSequence {
        segment: String,
        position: usize,
        structure: String,
    },

    /// A value does not match its HL7 datatype
    #[error("Invalid {datatype} value '{value}': {message}")]
    DatatypeError {
        datatype: String,
        value: String,
        message: String,
    },

    /// No structure definition exists for the message type
    #[error("Unknown message structure: {structure}")]
    UnknownStructure { structure: String },

    /// A terser path could not be parsed or resolved
    #[error("Invalid path '{path}': {message}")]
    InvalidPath { path: String, message: String },

    /// Definition tables are inconsistent or could not be loaded
    #[error("Definition error: {message}")]
    DefinitionError { message: String },

    /// Configuration loading or validation errors
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// File system I/O errors
    #[error("IO error for path '{path}': {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// MLLP stream could not be framed
    #[error("Framing error: {message}")]
    FrameError { message: String },

    /// XML encoding or decoding errors
    #[error("XML error: {message}")]
    XmlError { message: String },

    /// JSON/YAML/TOML serialization errors
    #[error("Serialization error: {message}")]
    SerializationError { message: String },

    /// Strict validation rejected a message
    #[error("Validation failed with {errors} error(s)")]
    ValidationFailed { errors: usize },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    InternalError { message: String },
}

/// Error kind enumeration for categorizing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Parse,
    Encoding,
    Structure,
    Path,
    Definition,
    Config,
    Io,
    Framing,
    Xml,
    Serialization,
    Validation,
    Internal,
}

impl Hl7Error {
    /// Get the error kind for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Hl7Error::ParseError { .. } => ErrorKind::Parse,
            Hl7Error::MalformedEscapeSequence { .. } => ErrorKind::Parse,
            Hl7Error::EncodingError { .. } => ErrorKind::Encoding,
            Hl7Error::SegmentSequence { .. } => ErrorKind::Structure,
            Hl7Error::UnknownStructure { .. } => ErrorKind::Structure,
            Hl7Error::DatatypeError { .. } => ErrorKind::Validation,
            Hl7Error::InvalidPath { .. } => ErrorKind::Path,
            Hl7Error::DefinitionError { .. } => ErrorKind::Definition,
            Hl7Error::ConfigError { .. } => ErrorKind::Config,
            Hl7Error::IoError { .. } => ErrorKind::Io,
            Hl7Error::FrameError { .. } => ErrorKind::Framing,
            Hl7Error::XmlError { .. } => ErrorKind::Xml,
            Hl7Error::SerializationError { .. } => ErrorKind::Serialization,
            Hl7Error::ValidationFailed { .. } => ErrorKind::Validation,
            Hl7Error::InternalError { .. } => ErrorKind::Internal,
        }
    }

    /// Check if this error is recoverable (processing of other messages can continue)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Parse
                | ErrorKind::Encoding
                | ErrorKind::Structure
                | ErrorKind::Xml
                | ErrorKind::Validation
        )
    }

    /// Create a parse error for the segment at `segment` (1-based)
    pub fn parse_error(message: impl Into<String>, segment: usize) -> Self {
        Self::ParseError {
            message: message.into(),
            segment,
        }
    }

    /// Create an encoding characters error
    pub fn encoding_error(message: impl Into<String>) -> Self {
        Self::EncodingError {
            message: message.into(),
        }
    }

    /// Create an unknown structure error
    pub fn unknown_structure(structure: impl Into<String>) -> Self {
        Self::UnknownStructure {
            structure: structure.into(),
        }
    }

    /// Create a datatype error
    pub fn datatype_error(
        datatype: impl Into<String>,
        value: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::DatatypeError {
            datatype: datatype.into(),
            value: value.into(),
            message: message.into(),
        }
    }

    /// Create an invalid path error
    pub fn invalid_path(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a definition error
    pub fn definition_error(message: impl Into<String>) -> Self {
        Self::DefinitionError {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Create an IO error with path context
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoError {
            path: path.into(),
            source,
        }
    }

    /// Create an XML error
    pub fn xml_error(message: impl Into<String>) -> Self {
        Self::XmlError {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization_error(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Create an MLLP framing error
    pub fn frame_error(message: impl Into<String>) -> Self {
        Self::FrameError {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}

/// Convert from std::io::Error
impl From<std::io::Error> for Hl7Error {
    fn from(err: std::io::Error) -> Self {
        Self::IoError {
            path: PathBuf::new(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for Hl7Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization_error(err.to_string())
    }
}

impl From<serde_yaml::Error> for Hl7Error {
    fn from(err: serde_yaml::Error) -> Self {
        Self::serialization_error(err.to_string())
    }
}

impl From<quick_xml::Error> for Hl7Error {
    fn from(err: quick_xml::Error) -> Self {
        Self::xml_error(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(Hl7Error::parse_error("bad", 1).kind(), ErrorKind::Parse);
        assert_eq!(
            Hl7Error::unknown_structure("ZZZ_Z01").kind(),
            ErrorKind::Structure
        );
        assert_eq!(Hl7Error::config_error("x").kind(), ErrorKind::Config);
    }

    #[test]
    fn test_recoverable() {
        assert!(Hl7Error::parse_error("bad", 2).is_recoverable());
        assert!(!Hl7Error::frame_error("frame too long").is_recoverable());
        assert!(!Hl7Error::config_error("missing").is_recoverable());
        assert!(
            !Hl7Error::io_error("a.hl7", std::io::Error::other("boom")).is_recoverable()
        );
    }

    #[test]
    fn test_display() {
        let err = Hl7Error::SegmentSequence {
            segment: "ZPI".to_string(),
            position: 4,
            structure: "ADT_A01".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Segment ZPI at position 4 is not allowed in ADT_A01"
        );
    }
}
