//! Versioned key layout: `{namespace}:v{version}:{key}`.

/// Physical store key for `key` under `namespace` at `version`.
pub fn versioned_key(namespace: &str, version: u32, key: &str) -> String {
    format!("{namespace}:v{version}:{key}")
}

/// Glob matching `key` under `namespace` at every version.
///
/// Glob metacharacters in the namespace and key are escaped so they only
/// match themselves.
pub fn all_versions_pattern(namespace: &str, key: &str) -> String {
    format!("{}:v*:{}", escape_glob(namespace), escape_glob(key))
}

/// Split a physical key back into `(namespace, version, key)`.
///
/// The namespace is everything before the first `:v<digits>:` segment, so keys
/// that themselves contain colons survive the round trip.
pub fn parse_versioned_key(raw: &str) -> Option<(&str, u32, &str)> {
    let mut search_from = 0;
    while let Some(offset) = raw[search_from..].find(":v") {
        let start = search_from + offset;
        let rest = &raw[start + 2..];
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits > 0 && rest.as_bytes().get(digits) == Some(&b':') {
            if let Ok(version) = rest[..digits].parse() {
                return Some((&raw[..start], version, &rest[digits + 1..]));
            }
        }
        search_from = start + 2;
    }
    None
}

/// Version of `raw` when it is exactly `key` under `namespace`, whatever
/// colons or `:v<digits>:` segments either side contains.
pub fn version_for(raw: &str, namespace: &str, key: &str) -> Option<u32> {
    let digits = raw
        .strip_prefix(namespace)?
        .strip_prefix(":v")?
        .strip_suffix(key)?
        .strip_suffix(':')?;
    if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::glob_match;

    #[test]
    fn builds_versioned_key() {
        assert_eq!(versioned_key("activity-feed", 2, "feed:all"), "activity-feed:v2:feed:all");
    }

    #[test]
    fn parses_keys_containing_colons() {
        assert_eq!(
            parse_versioned_key("activity-feed:v2:feed:all"),
            Some(("activity-feed", 2, "feed:all"))
        );
        assert_eq!(parse_versioned_key("plain-key"), None);
        assert_eq!(parse_versioned_key("ns:vx:key"), None);
    }

    #[test]
    fn parse_skips_non_numeric_version_segments() {
        assert_eq!(
            parse_versioned_key("ns:vault:v3:item"),
            Some(("ns:vault", 3, "item"))
        );
    }

    #[test]
    fn version_for_handles_versioned_looking_namespaces() {
        assert_eq!(version_for("site:v1:feed:v2:k", "site:v1:feed", "k"), Some(2));
        assert_eq!(version_for("site:v1:feed:v2:k", "site", "feed:v2:k"), Some(1));
        assert_eq!(version_for("site:v1:feed:v2:k", "site:v1:feed", "v2:k"), None);
    }

    #[test]
    fn version_for_rejects_lookalikes() {
        assert_eq!(version_for("pages:v3:home", "pages", "home"), Some(3));
        assert_eq!(version_for("pages:v1:x:v2:home", "pages", "home"), None);
        assert_eq!(version_for("pages:v:home", "pages", "home"), None);
        assert_eq!(version_for("pages-archive:v1:home", "pages", "home"), None);
        assert_eq!(version_for("pages:v1:home:extra", "pages", "home"), None);
    }

    #[test]
    fn pattern_escapes_glob_metacharacters() {
        let pattern = all_versions_pattern("ns", "odd*key?");
        assert_eq!(pattern, r"ns:v*:odd\*key\?");
        assert!(glob_match(&pattern, "ns:v1:odd*key?"));
        assert!(!glob_match(&pattern, "ns:v1:oddXkeyY"));
    }

    #[test]
    fn pattern_matches_every_version() {
        let pattern = all_versions_pattern("ns", "item");
        for version in [1, 2, 17] {
            assert!(glob_match(&pattern, &versioned_key("ns", version, "item")));
        }
        assert!(!glob_match(&pattern, "other:v1:item"));
    }
}
