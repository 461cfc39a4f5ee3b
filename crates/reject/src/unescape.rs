/// Resolves one level of backslash escaping.
///
/// Rejection messages are often escaped twice on their way through the
/// transport (`\\"quota\\"`); callers that need the literal text run a
/// second pass when escapes remain. Supported: `\n \r \t \0 \\ \" \'`,
/// `\uXXXX` and `\u{X..}`. Unknown escapes are kept as written.
pub fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some('u') => {
                let braced = chars.peek() == Some(&'{');
                if braced {
                    chars.next();
                }
                let mut digits = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_hexdigit() && (braced || digits.len() < 4) {
                        digits.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let closed = !braced || chars.next_if_eq(&'}').is_some();
                let decoded = u32::from_str_radix(&digits, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .filter(|_| closed && (braced || digits.len() == 4));
                match decoded {
                    Some(ch) => out.push(ch),
                    None => {
                        out.push_str("\\u");
                        if braced {
                            out.push('{');
                        }
                        out.push_str(&digits);
                        if braced && closed {
                            out.push('}');
                        }
                    }
                }
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
