//! Lexical rules for identifiers, names, and reserved words

use once_cell::sync::Lazy;
use regex::Regex;

static IDENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[_A-Za-z][_A-Za-z0-9]*$").unwrap());

/// `[_A-Za-z][_A-Za-z0-9]*`, with no reservation or suffix rules applied
pub fn is_identifier_shape(s: &str) -> bool {
    IDENT_RE.is_match(s)
}

/// `self` and `_N` for any non-negative integer N are reserved
pub fn is_reserved(s: &str) -> bool {
    if s == "self" {
        return true;
    }
    match s.strip_prefix('_') {
        Some(digits) => !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

/// A legal identifier: correct shape, not reserved, no trailing underscore
pub fn is_identifier(s: &str) -> bool {
    is_identifier_shape(s) && !is_reserved(s) && !s.ends_with('_')
}

/// A legal record field name: the trailing-underscore rule does not apply
pub fn is_field_name(s: &str) -> bool {
    is_identifier_shape(s) && !is_reserved(s)
}

/// A dotted identifier (`package.sub.name`)
pub fn is_name(s: &str) -> bool {
    !s.is_empty() && s.split('.').all(is_identifier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_names() {
        assert!(is_reserved("self"));
        assert!(is_reserved("_0"));
        assert!(is_reserved("_12"));
        assert!(!is_reserved("_x"));
        assert!(!is_reserved("selfie"));
    }

    #[test]
    fn test_identifier_rules() {
        assert!(is_identifier("Item"));
        assert!(is_identifier("_private"));
        assert!(!is_identifier("trailing_"));
        assert!(!is_identifier("self"));
        assert!(!is_identifier("_3"));
        assert!(!is_identifier("9lives"));
    }

    #[test]
    fn test_field_name_allows_trailing_underscore() {
        assert!(is_field_name("type_"));
        assert!(!is_field_name("self"));
        assert!(!is_field_name("_1"));
    }

    #[test]
    fn test_dotted_names() {
        assert!(is_name("game.items"));
        assert!(is_name("core"));
        assert!(!is_name("game..items"));
        assert!(!is_name("game.items."));
        assert!(!is_name(""));
    }
}
