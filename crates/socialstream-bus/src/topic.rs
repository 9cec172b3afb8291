//! AMQP topic pattern matching.
//!
//! Routing keys and patterns are dot-separated words. In a pattern `*`
//! matches exactly one word and `#` matches zero or more words.

/// Whether `routing_key` matches the binding `pattern`.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    matches_words(&pattern, &key)
}

fn matches_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| matches_words(rest, &key[skip..])),
        Some((&word, rest)) => match key.split_first() {
            Some((&head, tail)) if word == "*" || word == head => matches_words(rest, tail),
            _ => false,
        },
    }
}

/// Patterns must be non-empty and made of non-empty words.
pub fn validate_pattern(pattern: &str) -> bool {
    !pattern.is_empty() && pattern.split('.').all(|word| !word.is_empty())
}
