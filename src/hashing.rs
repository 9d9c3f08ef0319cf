//! Content and rule-set hashing for cache keys.

use sha2::{Digest, Sha256};

/// Hash file content for cache keying.
///
/// Trailing whitespace is stripped per line so a formatting-only save does
/// not invalidate the cache; leading indentation is preserved because it
/// changes meaning in whitespace-sensitive languages.
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    for line in content.lines() {
        hasher.update(line.trim_end().as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

/// Hash a set of rule identifiers.
///
/// Order independent: the ids are sorted and de-duplicated before hashing,
/// so the same applicable rule set always yields the same hash.
pub fn hash_rule_ids<I, S>(ids: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut sorted: Vec<String> = ids.into_iter().map(|s| s.as_ref().to_string()).collect();
    sorted.sort();
    sorted.dedup();

    let mut hasher = Sha256::new();
    for id in &sorted {
        hasher.update(id.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_content_consistency() {
        let content = "def foo():\n    pass";
        assert_eq!(hash_content(content), hash_content(content));
    }

    #[test]
    fn test_hash_content_trailing_whitespace_normalized() {
        assert_eq!(
            hash_content("def foo():    \n    pass"),
            hash_content("def foo():\n    pass")
        );
    }

    #[test]
    fn test_hash_content_preserves_indentation() {
        assert_ne!(
            hash_content("def foo():\n    pass"),
            hash_content("def foo():\n        pass")
        );
    }

    #[test]
    fn test_hash_content_single_byte_sensitivity() {
        assert_ne!(hash_content("def foo(): pass"), hash_content("def fpo(): pass"));
    }

    #[test]
    fn test_hash_rules_order_independent() {
        assert_eq!(
            hash_rule_ids(["django/a", "django/b"]),
            hash_rule_ids(["django/b", "django/a"])
        );
    }

    #[test]
    fn test_hash_rules_duplicates_collapse() {
        assert_eq!(
            hash_rule_ids(["python/x", "python/x", "python/y"]),
            hash_rule_ids(["python/y", "python/x"])
        );
    }

    #[test]
    fn test_hash_rules_sensitivity() {
        assert_ne!(hash_rule_ids(["python/x"]), hash_rule_ids(["python/y"]));
    }
}
