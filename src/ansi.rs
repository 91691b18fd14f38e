//! ANSI escape sequence removal.

/// Strip ANSI escape sequences (CSI, OSC, charset selection and two-byte
/// escapes) so pattern matching sees only printable device output.
pub fn strip_ansi(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\x1b' {
            result.push(c);
            continue;
        }
        match chars.peek() {
            Some('[') => {
                chars.next();
                while let Some(nc) = chars.next() {
                    if nc.is_ascii_alphabetic() || nc == '@' || nc == '`' || nc == '~' {
                        break;
                    }
                }
            }
            Some(']') => {
                chars.next();
                while let Some(nc) = chars.next() {
                    if nc == '\x07' {
                        break;
                    }
                    if nc == '\x1b' && chars.peek() == Some(&'\\') {
                        chars.next();
                        break;
                    }
                }
            }
            Some('(' | ')' | '*' | '+') => {
                chars.next();
                chars.next();
            }
            Some(nc) if ('0'..='~').contains(nc) => {
                chars.next();
            }
            _ => {}
        }
    }
    result
}

/// Longest unterminated escape held back between chunks.
const MAX_HELD_ESCAPE: usize = 64;

/// Split `text` before an escape sequence that is cut off at its end, so the
/// partial sequence can be joined with the next chunk before stripping.
pub fn split_trailing_escape(text: &str) -> (&str, &str) {
    let Some(start) = text.rfind('\x1b') else {
        return (text, "");
    };
    let rest = &text[start..];
    if rest.len() > MAX_HELD_ESCAPE || is_terminated(&rest[1..]) {
        return (text, "");
    }
    text.split_at(start)
}

fn is_terminated(body: &str) -> bool {
    let mut chars = body.chars();
    match chars.next() {
        None => false,
        Some('[') => chars.any(|c| ('@'..='~').contains(&c)),
        Some(']') => body.contains('\x07'),
        Some('(' | ')' | '*' | '+') => chars.next().is_some(),
        Some(_) => true,
    }
}

/// [`strip_ansi`] followed by removal of carriage returns.
pub fn clean(text: &str) -> String {
    strip_ansi(text).replace('\r', "")
}
