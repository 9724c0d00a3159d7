//! Removal of sensitive detail from failure text.
//!
//! Postgres attaches a `DETAIL:` section to many errors (constraint
//! violations, invalid input) that quotes the offending row values. Everything
//! from the first `DETAIL` marker onward is dropped before a failure can be
//! logged or rendered.

use serde_json::Value;

/// Marker after which failure text is discarded.
pub const DETAIL_MARKER: &str = "DETAIL";

/// Failures that carry text which may need sanitizing.
///
/// Sanitizing never changes the kind of a failure, only its message text.
pub trait Sanitize {
    fn sanitize(self) -> Self;
}

/// Truncate `text` at the first [`DETAIL_MARKER`], trimming surrounding whitespace.
pub fn strip_detail(text: &str) -> String {
    match text.find(DETAIL_MARKER) {
        Some(idx) => text[..idx].trim().to_owned(),
        None => text.trim().to_owned(),
    }
}

/// Sanitize one positional failure argument.
///
/// Textual arguments are truncated; anything else passes through unchanged.
pub fn sanitize_arg(arg: Value) -> Value {
    match arg {
        Value::String(text) => Value::String(strip_detail(&text)),
        other => other,
    }
}

/// Sanitize every positional argument of a failure.
pub fn sanitize_args(args: Vec<Value>) -> Vec<Value> {
    args.into_iter().map(sanitize_arg).collect()
}
