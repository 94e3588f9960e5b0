//! `*`-globbing over plain strings. `*` matches any run of characters,
//! including the empty run; there is no escaping and no other special
//! character — this is deliberately smaller than shell globbing.

/// `pattern` matches `s`. `*` alone matches anything including the empty
/// string; an empty pattern matches only the empty string.
pub fn matches(pattern: &str, s: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if pattern.is_empty() {
        return s.is_empty();
    }
    if !pattern.contains('*') {
        return pattern == s;
    }

    let pattern_bytes = pattern.as_bytes();
    let s_bytes = s.as_bytes();
    matches_from(pattern_bytes, s_bytes)
}

/// Standard backtracking glob match over bytes: `*` can expand to any
/// length, including zero, so on a `*` we try "consume nothing" first and
/// fall back to "consume one more byte of `s`" on failure.
fn matches_from(pattern: &[u8], s: &[u8]) -> bool {
    match pattern.split_first() {
        None => s.is_empty(),
        Some((b'*', rest)) => {
            matches_from(rest, s) || (!s.is_empty() && matches_from(pattern, &s[1..]))
        }
        Some((p, rest)) => match s.split_first() {
            Some((c, s_rest)) if c == p => matches_from(rest, s_rest),
            _ => false,
        },
    }
}

/// True iff every member in `members` matches at least one pattern in
/// `patterns`. An empty `patterns` makes this false for any non-empty
/// `members`, and true when `members` is itself empty (vacuous truth).
pub fn subset<P, M>(patterns: &[P], members: &[M]) -> bool
where
    P: AsRef<str>,
    M: AsRef<str>,
{
    members
        .iter()
        .all(|m| patterns.iter().any(|p| matches(p.as_ref(), m.as_ref())))
}
