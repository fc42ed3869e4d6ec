//! Glob pattern matching for wildcard config overrides (spec.md §4.4).
//! `*` is the only metacharacter; matching is anchored — the entire key
//! must match, not a substring.

/// `true` iff `pattern` anchors to the whole of `key`, with `*` matching
/// zero or more arbitrary characters and every other byte matching
/// literally.
pub fn matches(pattern: &str, key: &str) -> bool {
    match_from(pattern.as_bytes(), key.as_bytes())
}

fn match_from(pattern: &[u8], key: &[u8]) -> bool {
    match pattern.first() {
        None => key.is_empty(),
        Some(b'*') => {
            // Greedy-then-backtrack: try consuming 0..=len(key) bytes.
            for i in 0..=key.len() {
                if match_from(&pattern[1..], &key[i..]) {
                    return true;
                }
            }
            false
        }
        Some(&c) => key.first() == Some(&c) && match_from(&pattern[1..], &key[1..]),
    }
}

/// Longest literal prefix (bytes before the first `*`, or the whole
/// pattern if there is none) — the primary tie-break key decided for
/// this crate (spec.md §9c).
pub fn literal_prefix_len(pattern: &str) -> usize {
    pattern.find('*').unwrap_or(pattern.len())
}

/// Picks the best of several patterns that all match `key`: longest
/// literal prefix wins; ties broken by longer overall pattern length,
/// then lexicographically by pattern text, for a fully deterministic
/// order independent of input iteration order.
pub fn best_match<'a, I>(key: &str, patterns: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    patterns
        .into_iter()
        .filter(|p| matches(p, key))
        .max_by(|a, b| {
            literal_prefix_len(a)
                .cmp(&literal_prefix_len(b))
                .then(a.len().cmp(&b.len()))
                .then(a.cmp(b))
        })
}
