use serde_json::Value;
use vaultup_protocol::{RejectCode, RejectDetails};

use crate::unescape::unescape;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Canister,
    Method,
    RequestId,
    RejectCode,
    ErrorCode,
    RejectMessage,
}

fn field_for(key: &str) -> Option<Field> {
    let normalized: String = key
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    match normalized.as_str() {
        "canister" | "canisterid" => Some(Field::Canister),
        "method" | "methodname" => Some(Field::Method),
        "requestid" => Some(Field::RequestId),
        "rejectcode" => Some(Field::RejectCode),
        "errorcode" => Some(Field::ErrorCode),
        "rejectmessage" | "rejecttext" => Some(Field::RejectMessage),
        _ => None,
    }
}

/// Extracts the structured fields of a rejection payload.
///
/// Never fails: fields that cannot be found stay `None` and `raw` always
/// holds the input.
pub fn parse_rejection(text: &str) -> RejectDetails {
    let trimmed = text.trim();
    if trimmed.starts_with('{')
        && let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed)
    {
        let mut details = RejectDetails::raw(text);
        for (key, value) in &map {
            if let Some(field) = field_for(key) {
                let value = match value {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    _ => continue,
                };
                apply(&mut details, field, &value);
            }
        }
        return details;
    }

    parse_lines(text)
}

fn parse_lines(text: &str) -> RejectDetails {
    let mut details = RejectDetails::raw(text);
    let mut last_field = None;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parsed = split_key_value(line).and_then(|(k, v)| field_for(k).map(|f| (f, v)));
        match parsed {
            Some((field, value)) => {
                apply(&mut details, field, value);
                last_field = Some(field);
            }
            // Unescaped newlines inside a reject message spill onto following lines.
            None if last_field == Some(Field::RejectMessage) => {
                if let Some(message) = details.reject_message.as_mut() {
                    message.push('\n');
                    message.push_str(&decode_value(line));
                }
            }
            None => {}
        }
    }
    details
}

/// Splits `key: value` at the first colon outside double quotes.
fn split_key_value(line: &str) -> Option<(&str, &str)> {
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => in_quotes = !in_quotes,
            ':' if !in_quotes => {
                let key = strip_quotes(line[..i].trim());
                let value = line[i + 1..].trim();
                return Some((key, value));
            }
            _ => {}
        }
    }
    None
}

fn strip_quotes(s: &str) -> &str {
    let s = s.trim();
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

/// Removes the quoted-value layer, then a second escaping level if one is
/// still present (`\\"quota\\"` -> `"quota"`).
fn decode_value(raw_value: &str) -> String {
    let value = unescape(strip_quotes(raw_value));
    if has_escapes(&value) {
        unescape(&value)
    } else {
        value
    }
}

fn has_escapes(s: &str) -> bool {
    [r#"\""#, r"\\", r"\n", r"\u"].iter().any(|seq| s.contains(seq))
}

fn apply(details: &mut RejectDetails, field: Field, raw_value: &str) {
    let value = decode_value(raw_value);
    if value.is_empty() {
        return;
    }
    match field {
        Field::Canister => details.canister_id = Some(value),
        Field::Method => {
            let (method, call_type) = split_call_type(&value);
            details.method = Some(method.to_string());
            details.call_type = call_type.map(str::to_string);
        }
        Field::RequestId => details.request_id = Some(value),
        Field::RejectCode => details.reject_code = parse_reject_code(&value),
        Field::ErrorCode => details.error_code = Some(value.to_ascii_uppercase()),
        Field::RejectMessage => details.reject_message = Some(value),
    }
}

/// `upload_chunk (update)` -> (`upload_chunk`, Some(`update`)).
fn split_call_type(value: &str) -> (&str, Option<&str>) {
    if let Some(open) = value.rfind('(')
        && value.ends_with(')')
    {
        let kind = value[open + 1..value.len() - 1].trim();
        if kind.eq_ignore_ascii_case("update") || kind.eq_ignore_ascii_case("query") {
            return (value[..open].trim(), Some(kind));
        }
    }
    (value, None)
}

fn parse_reject_code(value: &str) -> Option<RejectCode> {
    if let Ok(n) = value.trim().parse::<u8>() {
        return RejectCode::from_code(n);
    }
    let normalized: String = value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    match normalized.as_str() {
        "sysfatal" => Some(RejectCode::SysFatal),
        "systransient" => Some(RejectCode::SysTransient),
        "destinationinvalid" => Some(RejectCode::DestinationInvalid),
        "canisterreject" => Some(RejectCode::CanisterReject),
        "canistererror" => Some(RejectCode::CanisterError),
        "sysunknown" => Some(RejectCode::SysUnknown),
        _ => None,
    }
}
