//! Subject matcher grammar, exercised exhaustively and by property.

use cellplane::services::subject::subject_matches;
use proptest::prelude::*;

/// Reference implementation of the pattern language, structured directly
/// from the grammar rather than token-by-token scanning.
fn in_language(pattern: &str, subject: &str) -> bool {
    if pattern.is_empty() || subject.is_empty() {
        return false;
    }
    let pattern: Vec<&str> = pattern.split('.').collect();
    let subject: Vec<&str> = subject.split('.').collect();
    if subject.iter().any(|t| t.is_empty()) || pattern.iter().any(|t| t.is_empty()) {
        return false;
    }

    match pattern.split_last() {
        Some((&">", head)) => {
            // `>` consumes one or more tail tokens.
            subject.len() > head.len()
                && head
                    .iter()
                    .zip(&subject)
                    .all(|(p, s)| *p == "*" || (*p != ">" && p == s))
                && !head.contains(&">")
        }
        _ => {
            subject.len() == pattern.len()
                && pattern
                    .iter()
                    .zip(&subject)
                    .all(|(p, s)| *p == "*" || (*p != ">" && p == s))
        }
    }
}

fn token_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        4 => "[a-c]{1,3}",
        1 => Just("*".to_string()),
        1 => Just(">".to_string()),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2000))]

    #[test]
    fn prop_matches_language(
        pattern_tokens in proptest::collection::vec(token_strategy(), 1..5),
        subject_tokens in proptest::collection::vec("[a-c]{1,3}", 1..6),
    ) {
        let pattern = pattern_tokens.join(".");
        let subject = subject_tokens.join(".");
        prop_assert_eq!(
            subject_matches(&pattern, &subject),
            in_language(&pattern, &subject),
            "pattern={} subject={}", pattern, subject
        );
    }
}

#[test]
fn test_exhaustive_wildcard_placements() {
    // Every pattern of length <= 3 over {a, *, >} against every subject of
    // length <= 3 over {a, b}.
    let pattern_tokens = ["a", "b", "*", ">"];
    let subject_tokens = ["a", "b"];

    let mut patterns = Vec::new();
    let mut subjects = Vec::new();
    for len in 1..=3usize {
        let mut build = |alphabet: &[&str], out: &mut Vec<String>| {
            let mut stack: Vec<Vec<&str>> = vec![vec![]];
            for _ in 0..len {
                let mut next = Vec::new();
                for prefix in &stack {
                    for token in alphabet {
                        let mut extended = prefix.clone();
                        extended.push(token);
                        next.push(extended);
                    }
                }
                stack = next;
            }
            out.extend(stack.into_iter().map(|tokens| tokens.join(".")));
        };
        build(&pattern_tokens, &mut patterns);
        build(&subject_tokens, &mut subjects);
    }

    for pattern in &patterns {
        for subject in &subjects {
            assert_eq!(
                subject_matches(pattern, subject),
                in_language(pattern, subject),
                "pattern={} subject={}",
                pattern,
                subject
            );
        }
    }
}

#[test]
fn test_documented_strictness() {
    assert!(subject_matches("cell.default.>", "cell.default.foo"));
    assert!(!subject_matches("cell.default.>", "cell.default"));
    assert!(subject_matches("cell.*.a.inbox", "cell.default.a.inbox"));
    assert!(!subject_matches("cell.*.a.inbox", "cell.default.b.inbox"));
}
