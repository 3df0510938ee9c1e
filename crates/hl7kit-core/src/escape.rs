//! Escape sequence handling
//!
//! Delimiter characters inside values travel as escape sequences
//! (`\F\`, `\S\`, `\T\`, `\R\`, `\E\`, `\P\`). Hex data (`\Xhh..\`) is decoded.
//! Formatting, highlighting and locally defined sequences (`\.br\`, `\H\`,
//! `\N\`, `\Cxxyy\`, `\Mxxyyzz\`, `\Z..\`) are kept verbatim in both
//! directions so they survive a parse/encode cycle.
//!
//! An escaped escape character that would read back as the start of such a
//! sequence (`\E\.br\E\`) decodes to [`LITERAL_ESCAPE`] instead, so literal
//! text never turns into formatting on the way out.

use std::borrow::Cow;

use crate::encoding::EncodingCharacters;

/// Decoded stand-in for a literal escape character that would otherwise
/// open a formatting sequence. Reserved: it always encodes as `\E\`.
pub const LITERAL_ESCAPE: char = '\u{E000}';

/// Decode escape sequences in a raw value
pub fn unescape<'a>(text: &'a str, enc: &EncodingCharacters) -> Cow<'a, str> {
    if !text.contains(enc.escape) {
        return Cow::Borrowed(text);
    }

    let esc_len = enc.escape.len_utf8();
    let mut out = String::with_capacity(text.len());
    let mut literal = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find(enc.escape) {
        out.push_str(&rest[..start]);
        let after = &rest[start + esc_len..];

        let Some(end) = after.find(enc.escape) else {
            // Unterminated sequence stays literal
            rest = &rest[start..];
            break;
        };

        let sequence = &after[..end];
        match decode_sequence(sequence, enc) {
            Decoded::Char(c) => {
                if c == enc.escape {
                    literal.push(out.len());
                }
                out.push(c);
            }
            Decoded::Text(s) => out.push_str(&s),
            Decoded::Verbatim => {
                out.push(enc.escape);
                out.push_str(sequence);
                out.push(enc.escape);
            }
        }
        rest = &after[end + esc_len..];
    }

    out.push_str(rest);
    if !literal.is_empty() {
        mark_ambiguous(&mut out, &literal, enc);
    }
    Cow::Owned(out)
}

/// Replace each literal escape character that [`escape`] would take as the
/// opening of a preserved sequence with [`LITERAL_ESCAPE`]. The scan follows
/// the one in [`escape`] so both agree on which characters open a sequence.
fn mark_ambiguous(out: &mut String, literal: &[usize], enc: &EncodingCharacters) {
    let esc_len = enc.escape.len_utf8();
    let mut ambiguous = Vec::new();
    let mut index = 0;

    while let Some(offset) = out[index..].find(enc.escape) {
        let start = index + offset;
        let body = start + esc_len;
        match out[body..].find(enc.escape) {
            Some(len) if is_preserved(&out[body..body + len]) => {
                if literal.contains(&start) {
                    ambiguous.push(start);
                    index = body;
                } else {
                    index = body + len + esc_len;
                }
            }
            _ => index = body,
        }
    }

    let mut marker = [0u8; 4];
    let marker = LITERAL_ESCAPE.encode_utf8(&mut marker);
    for start in ambiguous.into_iter().rev() {
        out.replace_range(start..start + esc_len, marker);
    }
}

/// Encode delimiter characters in a value as escape sequences
pub fn escape<'a>(text: &'a str, enc: &EncodingCharacters) -> Cow<'a, str> {
    if !text.chars().any(|c| enc.is_delimiter(c) || c == LITERAL_ESCAPE) {
        return Cow::Borrowed(text);
    }

    let esc_len = enc.escape.len_utf8();
    let mut out = String::with_capacity(text.len() + 8);
    let mut iter = text.char_indices();

    while let Some((index, c)) = iter.next() {
        if c == enc.escape {
            // Keep formatting sequences that were preserved on the way in
            let after = &text[index + esc_len..];
            if let Some(end) = after.find(enc.escape)
                && is_preserved(&after[..end])
            {
                out.push(enc.escape);
                out.push_str(&after[..end]);
                out.push(enc.escape);
                let consumed = after[..end].chars().count() + 1;
                for _ in 0..consumed {
                    iter.next();
                }
                continue;
            }
            push_sequence(&mut out, 'E', enc);
        } else if c == LITERAL_ESCAPE {
            push_sequence(&mut out, 'E', enc);
        } else if c == enc.field {
            push_sequence(&mut out, 'F', enc);
        } else if c == enc.component {
            push_sequence(&mut out, 'S', enc);
        } else if c == enc.subcomponent {
            push_sequence(&mut out, 'T', enc);
        } else if c == enc.repetition {
            push_sequence(&mut out, 'R', enc);
        } else if Some(c) == enc.truncation {
            push_sequence(&mut out, 'P', enc);
        } else {
            out.push(c);
        }
    }

    Cow::Owned(out)
}

enum Decoded {
    Char(char),
    Text(String),
    Verbatim,
}

fn decode_sequence(sequence: &str, enc: &EncodingCharacters) -> Decoded {
    match sequence {
        "F" => Decoded::Char(enc.field),
        "S" => Decoded::Char(enc.component),
        "T" => Decoded::Char(enc.subcomponent),
        "R" => Decoded::Char(enc.repetition),
        "E" => Decoded::Char(enc.escape),
        "P" => match enc.truncation {
            Some(c) => Decoded::Char(c),
            None => Decoded::Verbatim,
        },
        _ => match sequence.strip_prefix('X').and_then(decode_hex) {
            Some(bytes) => Decoded::Text(String::from_utf8_lossy(&bytes).into_owned()),
            None => Decoded::Verbatim,
        },
    }
}

fn push_sequence(out: &mut String, code: char, enc: &EncodingCharacters) {
    out.push(enc.escape);
    out.push(code);
    out.push(enc.escape);
}

/// Sequences that pass through unescape and escape unchanged
fn is_preserved(sequence: &str) -> bool {
    if sequence.contains(LITERAL_ESCAPE) {
        return false;
    }
    let mut chars = sequence.chars();
    match chars.next() {
        Some('H') | Some('N') => sequence.len() == 1,
        Some('.') => {
            let command: String = chars.by_ref().take(2).collect();
            matches!(
                command.as_str(),
                "br" | "sp" | "fi" | "nf" | "in" | "ti" | "sk" | "ce"
            ) && chars.all(|c| c.is_ascii_digit() || c == '+' || c == '-')
        }
        Some('C') | Some('M') => {
            let hex = &sequence[1..];
            !hex.is_empty() && hex.len() % 2 == 0 && hex.chars().all(|c| c.is_ascii_hexdigit())
        }
        Some('Z') => sequence.len() > 1,
        _ => false,
    }
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.is_empty() || hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect()
}
