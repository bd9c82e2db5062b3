//! Request-body construction for the two supported API dialects.
//!
//! The bodies are assembled by hand rather than through a serializer so the
//! wire shape stays byte-for-byte what the endpoints expect; the message is
//! escaped for JSON string context first.

use crate::config::InterfaceType;

/// Escape a string for embedding in a JSON string literal. Covers the
/// characters prompt text actually contains: quote, backslash, newline,
/// carriage return, tab.
#[must_use]
pub fn sanitize_for_json(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '"' => output.push_str("\\\""),
            '\\' => output.push_str("\\\\"),
            '\n' => output.push_str("\\n"),
            '\r' => output.push_str("\\r"),
            '\t' => output.push_str("\\t"),
            _ => output.push(c),
        }
    }
    output
}

/// Build the POST body for a sanitized message in the given dialect.
#[must_use]
pub fn build_request_body(
    interface_type: InterfaceType,
    model: &str,
    sanitized_message: &str,
) -> String {
    match interface_type {
        InterfaceType::Api1 => format!(
            r#"{{"model":"{model}","messages":[{{"role":"user","content":"{sanitized_message}"}}]}}"#
        ),
        InterfaceType::Api2 => {
            let store = false;
            format!(r#"{{"model":"{model}","input":"{sanitized_message}","store":{store}}}"#)
        }
    }
}
