//! Message codecs: ER7 (pipe-delimited) and XML, plus structure assembly

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::model::Message;

pub mod pipe;
pub mod structure;
pub mod xml;

pub use pipe::{Batch, PipeParser, segment_lines};
pub use structure::assemble;
pub use xml::XmlParser;

/// Options shared by the pipe and XML codecs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ParserOptions {
    /// Reject unknown structures and out-of-place segments
    pub strict: bool,

    /// Parse messages with no structure definition into a flat segment list
    pub allow_unknown_structures: bool,

    /// Segment terminator written by the encoder
    pub segment_separator: String,

    /// Version assumed when MSH-12 is empty
    pub default_version: String,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            strict: false,
            allow_unknown_structures: true,
            segment_separator: "\r".to_string(),
            default_version: "2.5".to_string(),
        }
    }
}

/// A wire format a [`Message`] can be read from and written to
pub trait MessageCodec {
    fn parse(&self, text: &str) -> Result<Message>;

    fn encode(&self, message: &Message) -> Result<String>;
}

/// Whether `text` looks like an XML-encoded message rather than ER7
pub fn is_xml(text: &str) -> bool {
    text.trim_start_matches('\u{feff}').trim_start().starts_with('<')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = ParserOptions::default();
        assert!(!options.strict);
        assert!(options.allow_unknown_structures);
        assert_eq!(options.segment_separator, "\r");
    }

    #[test]
    fn test_options_camel_case() {
        let options: ParserOptions =
            serde_json::from_str(r#"{"strict": true, "defaultVersion": "2.3"}"#).unwrap();
        assert!(options.strict);
        assert_eq!(options.default_version, "2.3");
        assert!(options.allow_unknown_structures);
    }

    #[test]
    fn test_is_xml() {
        assert!(is_xml("  <?xml version=\"1.0\"?><ADT_A01/>"));
        assert!(!is_xml("MSH|^~\\&|"));
    }
}
