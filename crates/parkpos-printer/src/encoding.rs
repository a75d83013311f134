//! Single-byte text encoding for Spanish receipts.
//!
//! Thermal printers do not speak UTF-8. Receipts are printed with the
//! WPC1252 code page (`ESC t 16`), which covers every accented letter,
//! `ñ`, `¿`, `¡`, `º`, `ª` and `€`. This module:
//! - maps UTF-8 text to WPC1252 bytes one character at a time
//! - replaces anything outside the printable range with
//!   [`PLACEHOLDER_CHAR`] and counts the replacements
//! - measures, truncates, pads and wraps text in printer columns
//!
//! Every printable WPC1252 character occupies exactly one column, so column
//! arithmetic works on sanitized `char` counts.

use encoding_rs::WINDOWS_1252;
use parkpos_core::constants::PLACEHOLDER_CHAR;
use tracing::instrument;

/// `ESC t n` selector for the WPC1252 code page.
pub const CODE_PAGE_WPC1252: u8 = 16;

/// Text after sanitizing, with the number of substituted characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sanitized {
    pub text: String,
    pub substitutions: usize,
}

/// Encode one character as a WPC1252 byte, if it has a printable one.
///
/// # Examples
///
/// ```
/// use parkpos_printer::encoding::encode_char;
///
/// assert_eq!(encode_char('A'), Some(b'A'));
/// assert_eq!(encode_char('ñ'), Some(0xF1));
/// assert_eq!(encode_char('€'), Some(0x80));
/// assert_eq!(encode_char('你'), None);
/// assert_eq!(encode_char('\u{7}'), None);
/// ```
pub fn encode_char(c: char) -> Option<u8> {
    if c.is_control() {
        return None;
    }
    if c.is_ascii() {
        return Some(c as u8);
    }

    let mut utf8 = [0u8; 4];
    let (bytes, _, had_errors) = WINDOWS_1252.encode(c.encode_utf8(&mut utf8));
    if had_errors || bytes.len() != 1 {
        return None;
    }
    Some(bytes[0])
}

/// Replace unprintable characters with the placeholder.
///
/// Tabs and line breaks inside a field collapse to a single space; they are
/// layout, not content, and are not counted as substitutions.
pub fn sanitize(text: &str) -> Sanitized {
    let mut out = String::with_capacity(text.len());
    let mut substitutions = 0;

    for c in text.chars() {
        if matches!(c, '\t' | '\n' | '\r') {
            if !out.ends_with(' ') {
                out.push(' ');
            }
        } else if encode_char(c).is_some() {
            out.push(c);
        } else {
            out.push(PLACEHOLDER_CHAR);
            substitutions += 1;
        }
    }

    Sanitized {
        text: out,
        substitutions,
    }
}

/// Encode already-sanitized text.
///
/// Characters without a byte still map to the placeholder so the output
/// never loses a column.
#[instrument(level = "trace", skip(text), fields(len = text.len()))]
pub fn encode(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| encode_char(c).unwrap_or(PLACEHOLDER_CHAR as u8))
        .collect()
}

/// Width of a string in printer columns.
pub fn width(text: &str) -> usize {
    text.chars().count()
}

/// Cut `text` to at most `max` columns.
///
/// Returns the (possibly shortened) text and whether anything was cut.
pub fn truncate(text: &str, max: usize) -> (String, bool) {
    if width(text) <= max {
        return (text.to_string(), false);
    }
    (text.chars().take(max).collect(), true)
}

/// Horizontal placement inside a fixed-width line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    Left,
    Center,
    Right,
}

/// Pad `text` with spaces to exactly `columns`, truncating if longer.
///
/// # Examples
///
/// ```
/// use parkpos_printer::encoding::{pad, Alignment};
///
/// assert_eq!(pad("Año", 7, Alignment::Left), "Año    ");
/// assert_eq!(pad("Año", 7, Alignment::Center), "  Año  ");
/// assert_eq!(pad("Año", 7, Alignment::Right), "    Año");
/// ```
pub fn pad(text: &str, columns: usize, alignment: Alignment) -> String {
    let (text, _) = truncate(text, columns);
    let padding = columns - width(&text);

    match alignment {
        Alignment::Left => format!("{}{}", text, " ".repeat(padding)),
        Alignment::Right => format!("{}{}", " ".repeat(padding), text),
        Alignment::Center => {
            let left = padding / 2;
            format!("{}{}{}", " ".repeat(left), text, " ".repeat(padding - left))
        }
    }
}

/// Word-wrap `text` into lines of at most `columns`.
///
/// Words longer than a line are hard-broken. Never returns an empty vector.
pub fn wrap(text: &str, columns: usize) -> Vec<String> {
    let columns = columns.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();

        while word.len() > columns {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            let rest = word.split_off(columns);
            lines.push(word.into_iter().collect());
            word = rest;
        }

        let needed = if current.is_empty() {
            word.len()
        } else {
            width(&current) + 1 + word.len()
        };
        if needed > columns {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.extend(word);
    }

    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spanish_characters_encode_losslessly() {
        let text = "áéíóúÁÉÍÓÚñÑüÜ¿¡ºª€";
        let sanitized = sanitize(text);
        assert_eq!(sanitized.substitutions, 0);
        assert_eq!(sanitized.text, text);

        let bytes = encode(text);
        assert_eq!(bytes.len(), text.chars().count());
        let (decoded, _, had_errors) = WINDOWS_1252.decode(&bytes);
        assert!(!had_errors);
        assert_eq!(decoded, text);
    }

    #[test]
    fn test_unprintable_characters_use_placeholder() {
        let sanitized = sanitize("Plaza 你 \u{1F697}\u{7}");
        assert_eq!(sanitized.text, "Plaza ? ??");
        assert_eq!(sanitized.substitutions, 3);
    }

    #[test]
    fn test_line_breaks_collapse_to_space() {
        let sanitized = sanitize("Calle\r\nMayor\t12");
        assert_eq!(sanitized.text, "Calle Mayor 12");
        assert_eq!(sanitized.substitutions, 0);
    }

    #[test]
    fn test_truncate_reports_cut() {
        assert_eq!(truncate("ABC-123", 10), ("ABC-123".to_string(), false));
        assert_eq!(truncate("Matrícula larga", 9), ("Matrícula".to_string(), true));
    }

    #[test]
    fn test_pad_truncates_long_text() {
        assert_eq!(pad("ESTACIONAMIENTO", 5, Alignment::Center), "ESTAC");
    }

    #[test]
    fn test_wrap_words() {
        let lines = wrap("Conserve este ticket para salir del aparcamiento", 16);
        assert_eq!(
            lines,
            vec!["Conserve este", "ticket para", "salir del", "aparcamiento"]
        );
        assert!(lines.iter().all(|l| width(l) <= 16));
    }

    #[test]
    fn test_wrap_hard_breaks_long_words() {
        let lines = wrap("ABCDEFGHIJ KL", 4);
        assert_eq!(lines, vec!["ABCD", "EFGH", "IJ", "KL"]);
    }

    #[test]
    fn test_wrap_empty_text() {
        assert_eq!(wrap("", 32), vec![String::new()]);
    }
}
