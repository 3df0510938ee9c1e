//! hl7kit core
//!
//! Parsing, encoding and validation of HL7 v2 messages. Message structures,
//! segments, datatypes and tables are read from definition metadata rather
//! than generated per type, so the same generic model covers every message.

pub mod ack;
pub mod config;
pub mod datatypes;
pub mod definitions;
pub mod discovery;
pub mod encoding;
pub mod error;
pub mod escape;
pub mod executor;
pub mod mllp;
pub mod model;
pub mod parser;
pub mod result;
pub mod segments;
pub mod terser;
pub mod validation;

// Re-export commonly used types
pub use ack::{AckCode, generate_ack, generate_ack_for_report};
pub use config::{ConfigLoader, FilesConfiguration, Hl7kitConfig, LoadedConfig};
pub use datatypes::{Date, DatePrecision, DateTime, Time};
pub use definitions::DefinitionRegistry;
pub use discovery::{DefaultFileDiscovery, FileDiscovery};
pub use encoding::EncodingCharacters;
pub use error::{ErrorKind, Hl7Error};
pub use executor::{ExecutionSummary, FileReport, ValidationExecutor, validate_files};
pub use model::{Component, Field, Group, Message, Node, NodeContainer, Repetition, Segment};
pub use parser::{MessageCodec, ParserOptions, PipeParser, XmlParser};
pub use result::{Result, ResultExt};
pub use terser::{Terser, TerserMut, TerserPath};
pub use validation::{Diagnostic, Severity, ValidationOptions, ValidationReport, Validator};

/// Initialize the tracing subscriber for logging
pub fn init_tracing() {
    init_tracing_with("hl7kit=info");
}

/// Initialize tracing with `default_directive` unless `RUST_LOG` is set
pub fn init_tracing_with(default_directive: &str) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    // A second call (tests, embedding) leaves the first subscriber in place
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false),
        )
        .try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
