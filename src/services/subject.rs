//! Subject pattern matching.
//!
//! Subjects are dot-delimited token strings. Patterns may use `*` to match
//! exactly one token and `>` to match one or more trailing tokens; `>` is
//! only legal as the final pattern token. Strict semantics:
//! `cell.default.>` matches `cell.default.foo` but not `cell.default`.

/// Whether `subject` is in the language of `pattern`.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    if pattern.is_empty() || subject.is_empty() {
        return false;
    }
    let pattern_tokens: Vec<&str> = pattern.split('.').collect();
    let subject_tokens: Vec<&str> = subject.split('.').collect();

    // Empty tokens (leading/trailing/double dots) never match.
    if subject_tokens.iter().any(|t| t.is_empty()) {
        return false;
    }

    for (i, token) in pattern_tokens.iter().enumerate() {
        match *token {
            ">" => {
                // Tail wildcard must be last and must consume at least one
                // subject token.
                return i == pattern_tokens.len() - 1 && subject_tokens.len() > i;
            }
            "*" => {
                if subject_tokens.len() <= i {
                    return false;
                }
            }
            literal => {
                if literal.is_empty() {
                    return false;
                }
                match subject_tokens.get(i) {
                    Some(s) if *s == literal => {}
                    _ => return false,
                }
            }
        }
    }

    subject_tokens.len() == pattern_tokens.len()
}

/// Whether `subject` matches any pattern in `patterns`.
pub fn matches_any<'a, I>(patterns: I, subject: &str) -> bool
where
    I: IntoIterator<Item = &'a str>,
{
    patterns.into_iter().any(|p| subject_matches(p, subject))
}
