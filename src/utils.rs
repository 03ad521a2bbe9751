//! Small helpers shared by the factories.

use rand::RngExt;

use crate::error::{FactoryError, Result};

const UPPERCASE: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LOWERCASE: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const DIGITS: &[u8] = b"0123456789";

/// `{prefix}` followed by six random characters drawn from uppercase,
/// lowercase and digit alphabets. Used to build unique daemon and fixture
/// ids.
pub fn random_string(prefix: &str) -> String {
    let mut alphabet = Vec::with_capacity(UPPERCASE.len() + LOWERCASE.len() + DIGITS.len());
    alphabet.extend_from_slice(UPPERCASE);
    alphabet.extend_from_slice(LOWERCASE);
    alphabet.extend_from_slice(DIGITS);
    format!("{prefix}{}", random_suffix(&alphabet, 6))
}

/// [`random_string`] with each alphabet individually selectable.
///
/// # Errors
///
/// Fails when all three alphabets are disabled.
pub fn random_string_with(
    prefix: &str,
    size: usize,
    uppercase: bool,
    lowercase: bool,
    digits: bool,
) -> Result<String> {
    let mut alphabet = Vec::new();
    if uppercase {
        alphabet.extend_from_slice(UPPERCASE);
    }
    if lowercase {
        alphabet.extend_from_slice(LOWERCASE);
    }
    if digits {
        alphabet.extend_from_slice(DIGITS);
    }
    if alphabet.is_empty() {
        return Err(FactoryError::InvalidArgument(
            "At least one of uppercase, lowercase or digits needs to be true".to_owned(),
        ));
    }
    Ok(format!("{prefix}{}", random_suffix(&alphabet, size)))
}

fn random_suffix(alphabet: &[u8], size: usize) -> String {
    let mut rng = rand::rng();
    (0..size)
        .map(|_| alphabet[rng.random_range(0..alphabet.len())] as char)
        .collect()
}

/// Name of the user running the test process.
pub fn running_username() -> String {
    let var = if cfg!(windows) { "USERNAME" } else { "USER" };
    std::env::var(var).unwrap_or_else(|_| "root".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_string_keeps_prefix_and_length() {
        let value = random_string("master-");
        assert!(value.starts_with("master-"));
        assert_eq!(value.len(), "master-".len() + 6);
    }

    #[test]
    fn random_string_with_restricts_the_alphabet() {
        let value = random_string_with("id-", 32, false, false, true).unwrap();
        assert!(value["id-".len()..].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn random_string_with_rejects_empty_alphabet() {
        let err = random_string_with("x", 6, false, false, false).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid argument: At least one of uppercase, lowercase or digits needs to be true"
        );
    }

    #[test]
    fn two_strings_differ() {
        // 62^16 possibilities; a collision here means the rng is broken.
        let first = random_string_with("", 16, true, true, true).unwrap();
        let second = random_string_with("", 16, true, true, true).unwrap();
        assert_ne!(first, second);
    }
}
