//! Escaping of user input for generated Datalog text.

/// Escapes `s` for use inside a double-quoted Datalog string literal.
pub fn escape_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out
}

/// Escapes regex metacharacters so `s` only matches itself inside a pattern.
pub fn escape_regex_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(
            c,
            '.' | '*' | '+' | '?' | '^' | '$' | '{' | '}' | '(' | ')' | '|' | '[' | ']' | '\\'
        ) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Builds the body of a `re-pattern` string literal that matches `s` literally.
///
/// The regex escape is applied first so that the string literal decodes back to
/// the escaped pattern.
pub fn regex_pattern_literal(s: &str) -> String {
    escape_literal(&escape_regex_literal(s))
}
