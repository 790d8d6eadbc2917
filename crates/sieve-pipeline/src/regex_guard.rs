//! Safety screen for user-supplied regular expressions used by `matches`.
//!
//! Patterns are rejected when they are too long, use backreferences, or
//! repeat a group that already contains a repetition (`(a+)+`, `(.*)*`,
//! `(\w+){2,}`). Rejected or invalid patterns never reach the matcher.

use regex::{Regex, RegexBuilder};

pub const MAX_PATTERN_LEN: usize = 512;

const COMPILED_SIZE_LIMIT: usize = 1 << 20;

/// Returns `true` if `pattern` passes the nested-quantifier screen.
pub fn is_safe_pattern(pattern: &str) -> bool {
    if pattern.len() > MAX_PATTERN_LEN {
        return false;
    }

    let chars: Vec<char> = pattern.chars().collect();
    // One flag per open group: does the group body contain a repetition?
    let mut frames: Vec<bool> = vec![false];
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\\' => {
                if chars.get(i + 1).is_some_and(|c| matches!(c, '1'..='9')) {
                    return false;
                }
                i += 2;
                continue;
            }
            '[' => {
                i = skip_class(&chars, i);
                continue;
            }
            '(' => frames.push(false),
            ')' => {
                let inner = frames.pop().unwrap_or(false);
                if frames.is_empty() {
                    frames.push(false);
                }
                let repeated = is_repeat_at(&chars, i + 1);
                if inner && repeated {
                    return false;
                }
                if let Some(top) = frames.last_mut() {
                    *top |= inner || repeated;
                }
            }
            '*' | '+' => mark_repeat(&mut frames),
            '{' if is_repeat_at(&chars, i) => mark_repeat(&mut frames),
            _ => {}
        }
        i += 1;
    }
    true
}

/// Compile `pattern` if it is safe and valid; otherwise log and return `None`.
pub fn safe_regex(pattern: &str) -> Option<Regex> {
    if !is_safe_pattern(pattern) {
        tracing::warn!(pattern = %pattern, "Rejected unsafe regular expression");
        return None;
    }
    match RegexBuilder::new(pattern)
        .size_limit(COMPILED_SIZE_LIMIT)
        .build()
    {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!(pattern = %pattern, error = %e, "Invalid regular expression");
            None
        }
    }
}

fn mark_repeat(frames: &mut [bool]) {
    if let Some(top) = frames.last_mut() {
        *top = true;
    }
}

fn is_repeat_at(chars: &[char], i: usize) -> bool {
    match chars.get(i) {
        Some('*') | Some('+') => true,
        Some('{') => chars.get(i + 1).is_some_and(|c| c.is_ascii_digit()),
        _ => false,
    }
}

/// Index just past the `]` closing the character class opened at `start`.
fn skip_class(chars: &[char], start: usize) -> usize {
    let mut j = start + 1;
    if chars.get(j) == Some(&'^') {
        j += 1;
    }
    if chars.get(j) == Some(&']') {
        j += 1;
    }
    while j < chars.len() && chars[j] != ']' {
        j += if chars[j] == '\\' { 2 } else { 1 };
    }
    j + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_patterns_are_safe() {
        assert!(is_safe_pattern("^climate"));
        assert!(is_safe_pattern(r"^\d{3}-\d{4}$"));
        assert!(is_safe_pattern("(foo|bar)+"));
        assert!(is_safe_pattern("[a-z]+@[a-z]+\\.org"));
        assert!(is_safe_pattern("(?i)budget"));
    }

    #[test]
    fn nested_quantifiers_are_unsafe() {
        assert!(!is_safe_pattern("(a+)+"));
        assert!(!is_safe_pattern("(.*)*$"));
        assert!(!is_safe_pattern(r"(\w+){2,}"));
        assert!(!is_safe_pattern("((ab)*c)+"));
    }

    #[test]
    fn quantifiers_inside_classes_do_not_count() {
        assert!(is_safe_pattern("([+*])+"));
    }

    #[test]
    fn backreferences_are_unsafe() {
        assert!(!is_safe_pattern(r"(a)\1"));
    }

    #[test]
    fn overlong_patterns_are_unsafe() {
        let long = "a".repeat(MAX_PATTERN_LEN + 1);
        assert!(!is_safe_pattern(&long));
    }

    #[test]
    fn safe_regex_rejects_invalid_syntax() {
        assert!(safe_regex("(unclosed").is_none());
        assert!(safe_regex("(a+)+").is_none());
        assert!(safe_regex("^ok$").is_some_and(|re| re.is_match("ok")));
    }
}
