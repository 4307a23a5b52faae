//! Target-valid identifiers.
//!
//! Target names are `[A-Za-z][A-Za-z0-9_]*` and at most 128 characters.
//! Tables, indexes, constraints and sequences share one namespace; columns
//! are unique per table.

use ahash::AHashSet;

pub const MAX_NAME_LENGTH: usize = 128;

/// Replace characters the target rejects and make sure the name starts
/// with a letter
pub fn sanitize_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if !out.starts_with(|c: char| c.is_ascii_alphabetic()) {
        out.insert(0, 'A');
    }
    out.truncate(MAX_NAME_LENGTH);
    out
}

/// Hands out sanitized names, suffixing `_1`, `_2`, ... on collision.
/// Comparison is case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct NameRegistry {
    used: AHashSet<String>,
}

impl NameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&mut self, name: &str) -> String {
        let base = sanitize_name(name);
        let mut candidate = base.clone();
        let mut n = 1;
        while !self.used.insert(candidate.to_lowercase()) {
            let suffix = format!("_{}", n);
            let keep = base.len().min(MAX_NAME_LENGTH - suffix.len());
            candidate = format!("{}{}", &base[..keep], suffix);
            n += 1;
        }
        candidate
    }

    pub fn contains(&self, name: &str) -> bool {
        self.used.contains(&name.to_lowercase())
    }

    pub fn release(&mut self, name: &str) {
        self.used.remove(&name.to_lowercase());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize_name("users"), "users");
        assert_eq!(sanitize_name("order-items"), "order_items");
        assert_eq!(sanitize_name("1st"), "A1st");
        assert_eq!(sanitize_name("_x"), "A_x");
        assert_eq!(sanitize_name("naïve"), "na_ve");
    }

    #[test]
    fn test_claim_suffixes_case_insensitively() {
        let mut names = NameRegistry::new();
        assert_eq!(names.claim("Users"), "Users");
        assert_eq!(names.claim("users"), "users_1");
        assert_eq!(names.claim("users"), "users_2");
        assert!(names.contains("USERS_1"));
    }

    #[test]
    fn test_long_names_are_truncated_before_suffix() {
        let mut names = NameRegistry::new();
        let long = "a".repeat(200);
        let first = names.claim(&long);
        let second = names.claim(&long);
        assert_eq!(first.len(), MAX_NAME_LENGTH);
        assert_eq!(second.len(), MAX_NAME_LENGTH);
        assert!(second.ends_with("_1"));
    }
}
