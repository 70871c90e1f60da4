//! Best-effort repair of payloads written with Python-style quoting.
//!
//! Some exported logs carry payloads like `{'phase': 'TEST', 'correct': True}`.
//! The repair rewrites single-quoted strings as JSON strings and maps the bare
//! literals `True`, `False` and `None` outside strings. Text already inside
//! double-quoted strings is copied untouched.

use std::borrow::Cow;

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Bare,
    DoubleQuoted,
    SingleQuoted,
}

/// Returns the input unchanged when nothing needs rewriting.
pub fn sanitize_payload(raw: &str) -> Cow<'_, str> {
    if !raw.contains('\'') && !contains_python_literal(raw) {
        return Cow::Borrowed(raw);
    }

    let mut out = String::with_capacity(raw.len() + 8);
    let mut state = State::Bare;
    let mut chars = raw.chars().peekable();
    let mut word = String::new();

    while let Some(c) = chars.next() {
        match state {
            State::Bare => {
                if c.is_ascii_alphabetic() {
                    word.push(c);
                    continue;
                }
                flush_word(&mut word, &mut out);
                match c {
                    '"' => {
                        state = State::DoubleQuoted;
                        out.push('"');
                    }
                    '\'' => {
                        state = State::SingleQuoted;
                        out.push('"');
                    }
                    _ => out.push(c),
                }
            }
            State::DoubleQuoted => {
                out.push(c);
                if c == '\\' {
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                } else if c == '"' {
                    state = State::Bare;
                }
            }
            State::SingleQuoted => match c {
                '\\' => match chars.next() {
                    Some('\'') => out.push('\''),
                    Some(next) => {
                        out.push('\\');
                        out.push(next);
                    }
                    None => out.push_str("\\\\"),
                },
                '"' => out.push_str("\\\""),
                '\'' => {
                    state = State::Bare;
                    out.push('"');
                }
                _ => out.push(c),
            },
        }
    }
    flush_word(&mut word, &mut out);

    Cow::Owned(out)
}

fn flush_word(word: &mut String, out: &mut String) {
    if word.is_empty() {
        return;
    }
    match word.as_str() {
        "True" => out.push_str("true"),
        "False" => out.push_str("false"),
        "None" => out.push_str("null"),
        other => out.push_str(other),
    }
    word.clear();
}

fn contains_python_literal(raw: &str) -> bool {
    raw.contains("True") || raw.contains("False") || raw.contains("None")
}
