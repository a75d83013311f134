//! Code validation against a configured symbology.
//!
//! Checks run in a fixed order so the reported reason is the most basic one
//! that applies: emptiness, alphabet, length, then check character.
//!
//! # Examples
//!
//! ```
//! use parkpos_core::SymbologyConfig;
//! use parkpos_scanner::{CodeValidator, ValidationError};
//!
//! let validator = CodeValidator::new(SymbologyConfig::code39());
//!
//! assert_eq!(validator.validate(" t-00099 "), Ok("T-00099".to_string()));
//! assert_eq!(validator.validate("   "), Err(ValidationError::EmptyInput));
//! assert!(matches!(
//!     validator.validate("T#1"),
//!     Err(ValidationError::InvalidCharacters { .. })
//! ));
//! ```

use parkpos_core::SymbologyConfig;
use parkpos_core::config::ChecksumRule;
use parkpos_core::constants::CODE39_ALPHABET;

use crate::error::ValidationError;

/// Validates raw codes against one symbology.
#[derive(Debug, Clone)]
pub struct CodeValidator {
    symbology: SymbologyConfig,
}

impl CodeValidator {
    pub fn new(symbology: SymbologyConfig) -> Self {
        Self { symbology }
    }

    pub fn symbology(&self) -> &SymbologyConfig {
        &self.symbology
    }

    /// Normalise `raw` and check it. Returns the normalised code.
    pub fn validate(&self, raw: &str) -> Result<String, ValidationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyInput);
        }

        let code = if self.symbology.normalize_case {
            trimmed.to_uppercase()
        } else {
            trimmed.to_string()
        };

        // Each offending character once, in order of first appearance
        let mut invalid = String::new();
        for c in code.chars() {
            if !self.symbology.alphabet.contains(c) && !invalid.contains(c) {
                invalid.push(c);
            }
        }
        if !invalid.is_empty() {
            return Err(ValidationError::InvalidCharacters { chars: invalid });
        }

        let len = code.chars().count();
        if len < self.symbology.min_length || len > self.symbology.max_length {
            return Err(ValidationError::LengthOutOfRange {
                len,
                min: self.symbology.min_length,
                max: self.symbology.max_length,
            });
        }

        check_digit(self.symbology.checksum, &code)?;
        Ok(code)
    }

    pub fn is_valid(&self, raw: &str) -> bool {
        self.validate(raw).is_ok()
    }
}

impl Default for CodeValidator {
    fn default() -> Self {
        Self::new(SymbologyConfig::default())
    }
}

fn check_digit(rule: ChecksumRule, code: &str) -> Result<(), ValidationError> {
    let expected = match rule {
        ChecksumRule::None => return Ok(()),
        ChecksumRule::Mod43 => split_check(code).and_then(|(payload, _)| mod43_check_char(payload)),
        ChecksumRule::Mod10 => split_check(code).and_then(|(payload, _)| luhn_check_digit(payload)),
    };
    let found = code.chars().last().unwrap_or('?');

    match expected {
        Some(expected) if expected == found => Ok(()),
        Some(expected) => Err(ValidationError::ChecksumMismatch { expected, found }),
        None => Err(ValidationError::ChecksumMismatch {
            expected: '?',
            found,
        }),
    }
}

fn split_check(code: &str) -> Option<(&str, char)> {
    let last = code.chars().last()?;
    let payload = &code[..code.len() - last.len_utf8()];
    (!payload.is_empty()).then_some((payload, last))
}

/// Code 39 modulo 43 check character for `payload`.
///
/// ```
/// assert_eq!(parkpos_scanner::validator::mod43_check_char("CODE39"), Some('W'));
/// ```
pub fn mod43_check_char(payload: &str) -> Option<char> {
    let mut sum = 0usize;
    for c in payload.chars() {
        sum += CODE39_ALPHABET.find(c)?;
    }
    CODE39_ALPHABET.chars().nth(sum % 43)
}

/// Luhn check digit for a numeric `payload`.
///
/// ```
/// assert_eq!(parkpos_scanner::validator::luhn_check_digit("7992739871"), Some('3'));
/// ```
pub fn luhn_check_digit(payload: &str) -> Option<char> {
    let mut sum = 0u32;
    for (i, c) in payload.chars().rev().enumerate() {
        let mut d = c.to_digit(10)?;
        // Double every second digit counting from the check position
        if i % 2 == 0 {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
    }
    char::from_digit((10 - sum % 10) % 10, 10)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn code39() -> CodeValidator {
        CodeValidator::new(SymbologyConfig::code39())
    }

    #[rstest]
    #[case("T-00099", "T-00099")]
    #[case("t-00099", "T-00099")]
    #[case("  TEST123\r\n", "TEST123")]
    #[case("AB C.D", "AB C.D")]
    fn test_valid_codes(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(code39().validate(raw), Ok(expected.to_string()));
    }

    #[rstest]
    #[case("T#00*99", "#*")]
    #[case("A#B#", "#")]
    #[case("T*0#0*9#9", "*#")]
    fn test_invalid_characters_are_listed_once(#[case] raw: &str, #[case] chars: &str) {
        assert_eq!(
            code39().validate(raw),
            Err(ValidationError::InvalidCharacters {
                chars: chars.to_string()
            })
        );
    }

    #[test]
    fn test_case_is_kept_when_not_normalised() {
        let mut symbology = SymbologyConfig::code39();
        symbology.normalize_case = false;
        let err = CodeValidator::new(symbology).validate("t-00099").unwrap_err();
        assert!(matches!(err, ValidationError::InvalidCharacters { .. }));
    }

    #[test]
    fn test_alphabet_checked_before_length() {
        let err = code39().validate("ñ").unwrap_err();
        assert!(matches!(err, ValidationError::InvalidCharacters { .. }));
    }

    #[test]
    fn test_length_bounds() {
        let validator = code39();
        assert!(validator.is_valid("ABCD"));
        assert!(validator.is_valid(&"A".repeat(20)));
        assert_eq!(
            validator.validate("ABC"),
            Err(ValidationError::LengthOutOfRange { len: 3, min: 4, max: 20 })
        );
        assert_eq!(
            validator.validate(&"A".repeat(21)),
            Err(ValidationError::LengthOutOfRange { len: 21, min: 4, max: 20 })
        );
    }

    #[test]
    fn test_mod43_checksum() {
        let mut symbology = SymbologyConfig::code39();
        symbology.checksum = ChecksumRule::Mod43;
        let validator = CodeValidator::new(symbology);

        assert_eq!(validator.validate("CODE39W"), Ok("CODE39W".to_string()));
        assert_eq!(
            validator.validate("CODE39X"),
            Err(ValidationError::ChecksumMismatch {
                expected: 'W',
                found: 'X'
            })
        );
    }

    #[test]
    fn test_luhn_checksum() {
        let validator = CodeValidator::new(SymbologyConfig::numeric_luhn(4, 16));
        assert!(validator.is_valid("79927398713"));
        assert_eq!(
            validator.validate("79927398710"),
            Err(ValidationError::ChecksumMismatch {
                expected: '3',
                found: '0'
            })
        );
    }

    #[test]
    fn test_check_digits() {
        assert_eq!(mod43_check_char("CODE39"), Some('W'));
        assert_eq!(mod43_check_char("abc"), None);
        assert_eq!(luhn_check_digit("7992739871"), Some('3'));
        assert_eq!(luhn_check_digit("0"), Some('0'));
        assert_eq!(luhn_check_digit("12a"), None);
    }
}
