//! Delimiter (encoding character) handling
//!
//! Every HL7 v2 message declares its own delimiters in MSH-1 (field
//! separator) and MSH-2 (component, repetition, escape, subcomponent and,
//! from v2.7, truncation characters).

use serde::{Deserialize, Serialize};

use crate::{Hl7Error, Result};

/// The delimiters a message is encoded with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingCharacters {
    pub field: char,
    pub component: char,
    pub repetition: char,
    pub escape: char,
    pub subcomponent: char,
    /// v2.7 truncation character (fifth MSH-2 character)
    pub truncation: Option<char>,
}

impl Default for EncodingCharacters {
    fn default() -> Self {
        Self {
            field: '|',
            component: '^',
            repetition: '~',
            escape: '\\',
            subcomponent: '&',
            truncation: None,
        }
    }
}

/// Segments that carry encoding characters in their first two fields
pub const HEADER_SEGMENTS: [&str; 3] = ["MSH", "FHS", "BHS"];

impl EncodingCharacters {
    /// Build encoding characters from a field separator and an MSH-2 value
    pub fn new(field: char, msh2: &str) -> Result<Self> {
        let chars: Vec<char> = msh2.chars().collect();
        if chars.len() < 4 {
            return Err(Hl7Error::encoding_error(format!(
                "MSH-2 must contain at least 4 encoding characters, found '{msh2}'"
            )));
        }
        if chars.len() > 5 {
            return Err(Hl7Error::encoding_error(format!(
                "MSH-2 must contain at most 5 encoding characters, found '{msh2}'"
            )));
        }

        let encoding = Self {
            field,
            component: chars[0],
            repetition: chars[1],
            escape: chars[2],
            subcomponent: chars[3],
            truncation: chars.get(4).copied(),
        };
        encoding.check()?;
        Ok(encoding)
    }

    /// Read encoding characters from the text of an MSH, FHS or BHS segment
    pub fn from_msh(segment: &str) -> Result<Self> {
        let name = segment.get(0..3).unwrap_or_default();
        if !HEADER_SEGMENTS.contains(&name) {
            return Err(Hl7Error::encoding_error(format!(
                "expected a header segment (MSH, FHS, BHS), found '{}'",
                segment.chars().take(3).collect::<String>()
            )));
        }

        let mut rest = segment[3..].chars();
        let field = rest.next().ok_or_else(|| {
            Hl7Error::encoding_error(format!("{name} segment too short to declare delimiters"))
        })?;
        let msh2: String = rest.take_while(|c| *c != field).collect();
        Self::new(field, &msh2)
    }

    /// Render the MSH-2 value for these encoding characters
    pub fn msh2(&self) -> String {
        let mut value = String::with_capacity(5);
        value.push(self.component);
        value.push(self.repetition);
        value.push(self.escape);
        value.push(self.subcomponent);
        if let Some(truncation) = self.truncation {
            value.push(truncation);
        }
        value
    }

    /// All delimiter characters, field separator first
    pub fn delimiters(&self) -> Vec<char> {
        let mut all = vec![
            self.field,
            self.component,
            self.repetition,
            self.escape,
            self.subcomponent,
        ];
        all.extend(self.truncation);
        all
    }

    /// Whether `c` is one of the delimiters
    pub fn is_delimiter(&self, c: char) -> bool {
        c == self.field
            || c == self.component
            || c == self.repetition
            || c == self.escape
            || c == self.subcomponent
            || Some(c) == self.truncation
    }

    fn check(&self) -> Result<()> {
        let all = self.delimiters();
        for (i, c) in all.iter().enumerate() {
            if c.is_alphanumeric() || c.is_whitespace() {
                return Err(Hl7Error::encoding_error(format!(
                    "'{c}' cannot be used as a delimiter"
                )));
            }
            if all[i + 1..].contains(c) {
                return Err(Hl7Error::encoding_error(format!(
                    "delimiter '{c}' is declared more than once"
                )));
            }
        }
        Ok(())
    }
}
