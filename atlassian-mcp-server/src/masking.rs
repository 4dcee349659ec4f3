//! Redaction helpers for credential values that reach the logs

use secrecy::{ExposeSecret, SecretString};

const VISIBLE_CHARS: usize = 4;

/// Mask a sensitive value, keeping only the first and last four characters.
///
/// Values too short to keep both ends hidden are fully starred.
pub fn mask_value(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= VISIBLE_CHARS * 2 {
        return "*".repeat(chars.len().max(VISIBLE_CHARS));
    }

    let head: String = chars[..VISIBLE_CHARS].iter().collect();
    let tail: String = chars[chars.len() - VISIBLE_CHARS..].iter().collect();
    let hidden = "*".repeat(chars.len() - VISIBLE_CHARS * 2);
    format!("{head}{hidden}{tail}")
}

/// Mask a secret for logging
pub fn mask_secret(secret: &SecretString) -> String {
    mask_value(secret.expose_secret())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_long_value() {
        assert_eq!(mask_value("abcdefghijkl"), "abcd****ijkl");
    }

    #[test]
    fn test_mask_short_value_is_fully_hidden() {
        assert_eq!(mask_value("abcdefgh"), "********");
        assert_eq!(mask_value("ab"), "****");
        assert_eq!(mask_value(""), "****");
    }

    #[test]
    fn test_mask_secret_never_contains_middle() {
        let secret = SecretString::from("tok-1234-SECRETPART-5678");
        let masked = mask_secret(&secret);
        assert!(!masked.contains("SECRETPART"));
        assert!(masked.starts_with("tok-"));
        assert!(masked.ends_with("5678"));
    }
}
