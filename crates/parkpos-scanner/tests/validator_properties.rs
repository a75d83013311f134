//! Property-based tests for code validation.

use parkpos_core::SymbologyConfig;
use parkpos_core::config::ChecksumRule;
use parkpos_scanner::validator::{luhn_check_digit, mod43_check_char};
use parkpos_scanner::{CodeValidator, ValidationError};
use proptest::prelude::*;

fn digits(len: usize) -> impl Strategy<Value = String> {
    prop::collection::vec(0u8..10, len).prop_map(|ds| ds.iter().map(|d| char::from(b'0' + d)).collect())
}

fn bounded(min_length: usize, max_length: usize) -> CodeValidator {
    CodeValidator::new(SymbologyConfig {
        name: "digits".to_string(),
        alphabet: "0123456789".to_string(),
        min_length,
        max_length,
        checksum: ChecksumRule::None,
        normalize_case: false,
    })
}

proptest! {
    /// Property: both bounds are inclusive and one past either is rejected.
    #[test]
    fn prop_length_bounds_are_inclusive(
        (min, max, seed) in (1usize..10).prop_flat_map(|min| (Just(min), min..30, digits(31)))
    ) {
        let validator = bounded(min, max);
        let take = |n: usize| seed.chars().take(n).collect::<String>();

        prop_assert!(validator.validate(&take(min)).is_ok());
        prop_assert!(validator.validate(&take(max)).is_ok());
        prop_assert_eq!(
            validator.validate(&take(max + 1)),
            Err(ValidationError::LengthOutOfRange { len: max + 1, min, max })
        );
        if min > 1 {
            prop_assert_eq!(
                validator.validate(&take(min - 1)),
                Err(ValidationError::LengthOutOfRange { len: min - 1, min, max })
            );
        }
    }

    /// Property: a payload with its own Luhn digit appended always passes,
    /// and changing that digit always fails.
    #[test]
    fn prop_luhn_accepts_own_check_digit(payload in digits(9), delta in 1u32..10) {
        let validator = CodeValidator::new(SymbologyConfig::numeric_luhn(4, 20));
        let check = luhn_check_digit(&payload).unwrap();

        let code = format!("{payload}{check}");
        prop_assert_eq!(validator.validate(&code), Ok(code.clone()));

        let wrong = char::from_digit((check.to_digit(10).unwrap() + delta) % 10, 10).unwrap();
        let tampered = format!("{payload}{wrong}");
        let is_mismatch = matches!(
            validator.validate(&tampered),
            Err(ValidationError::ChecksumMismatch { .. })
        );
        prop_assert!(is_mismatch);
    }

    /// Property: the modulo 43 check character round-trips through the
    /// validator for any Code 39 payload.
    #[test]
    fn prop_mod43_accepts_own_check_char(payload in "[0-9A-Z]{3,15}") {
        let validator = CodeValidator::new(SymbologyConfig {
            checksum: ChecksumRule::Mod43,
            ..SymbologyConfig::code39()
        });
        let check = mod43_check_char(&payload).unwrap();
        // A trailing space check character would be trimmed away
        prop_assume!(check != ' ');
        let code = format!("{payload}{check}");
        prop_assert_eq!(validator.validate(&code.to_lowercase()), Ok(code));
    }

    /// Property: surrounding whitespace never changes the verdict.
    #[test]
    fn prop_whitespace_is_ignored(code in "[A-Z0-9]{1,24}", pad in "[ \t]{0,3}") {
        let validator = CodeValidator::default();
        prop_assert_eq!(
            validator.validate(&format!("{pad}{code}{pad}")),
            validator.validate(&code)
        );
    }
}
