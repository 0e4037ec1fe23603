//! Allow-list checks for identifiers that end up in subprocess argument vectors.

use crate::{LxcError, Result};

pub const MAX_CONTAINER_NAME_LEN: usize = 64;
pub const MAX_RULE_NAME_LEN: usize = 64;
pub const MAX_IMAGE_NAME_LEN: usize = 128;

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn is_identifier(s: &str, max_len: usize) -> bool {
    !s.is_empty() && s.len() <= max_len && s.chars().all(is_identifier_char)
}

pub fn validate_container_name(name: &str) -> bool {
    is_identifier(name, MAX_CONTAINER_NAME_LEN)
}

/// Accepts `distro:version` style references, optionally with a remote prefix
/// (`images:debian:12`).
pub fn validate_image_name(image: &str) -> bool {
    let colons = image.matches(':').count();
    !image.is_empty() && image.len() <= MAX_IMAGE_NAME_LEN && (1..=2).contains(&colons)
}

pub fn validate_rule_name(name: &str) -> bool {
    is_identifier(name, MAX_RULE_NAME_LEN)
}

pub fn ensure_container_name(name: &str) -> Result<()> {
    if validate_container_name(name) {
        Ok(())
    } else {
        Err(LxcError::InvalidContainerName)
    }
}

pub fn ensure_image_name(image: &str) -> Result<()> {
    if validate_image_name(image) {
        Ok(())
    } else {
        Err(LxcError::InvalidImageName)
    }
}

pub fn ensure_rule_name(name: &str) -> Result<()> {
    if validate_rule_name(name) {
        Ok(())
    } else {
        Err(LxcError::InvalidRuleName)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_container_names() {
        for name in ["web1", "my-container", "db_primary", "A", "x-1_y"] {
            assert!(validate_container_name(name), "{name} should be valid");
        }
        assert!(validate_container_name(&"a".repeat(64)));
    }

    #[test]
    fn test_container_name_rejects_foreign_characters() {
        for name in [
            "bad name!",
            "semi;colon",
            "../etc",
            "dollar$",
            "tab\tname",
            "new\nline",
            "dot.name",
            "slash/name",
            "--flag=x ",
            "ünïcode",
            "",
        ] {
            assert!(!validate_container_name(name), "{name:?} should be rejected");
        }
    }

    #[test]
    fn test_container_name_length_cap() {
        assert!(!validate_container_name(&"a".repeat(65)));
        assert!(!validate_container_name(&"a-b_".repeat(40)));
    }

    #[test]
    fn test_image_name_colon_count() {
        assert!(validate_image_name("ubuntu:22.04"));
        assert!(validate_image_name("images:debian:12"));
        assert!(!validate_image_name("ubuntu"));
        assert!(!validate_image_name("a:b:c:d"));
        assert!(!validate_image_name(""));
        assert!(!validate_image_name(&format!("ubuntu:{}", "9".repeat(128))));
    }

    #[test]
    fn test_rule_name() {
        assert!(validate_rule_name("http-80"));
        assert!(validate_rule_name("ssh_22"));
        assert!(!validate_rule_name("80:8080"));
        assert!(!validate_rule_name("rule name"));
        assert!(!validate_rule_name(""));
    }

    #[test]
    fn test_rule_name_length_cap() {
        assert!(validate_rule_name(&"r".repeat(MAX_RULE_NAME_LEN)));
        assert!(!validate_rule_name(&"r".repeat(MAX_RULE_NAME_LEN + 1)));
    }

    #[test]
    fn test_ensure_maps_to_errors() {
        assert!(ensure_container_name("web1").is_ok());
        assert!(matches!(
            ensure_container_name("bad name!"),
            Err(LxcError::InvalidContainerName)
        ));
        assert!(matches!(ensure_image_name("ubuntu"), Err(LxcError::InvalidImageName)));
        assert!(matches!(ensure_rule_name("a b"), Err(LxcError::InvalidRuleName)));
    }
}
