//! Client identifier resolution.
//!
//! Resolution is total: when no usable signal exists the caller falls back to a
//! shared sentinel identifier, which means all such callers share one bucket.

use serde_json::Value;

/// Identifier used for requests that carry no forwarded address.
pub const ANONYMOUS: &str = "anonymous";

/// Identifier used for operations whose first argument names nothing.
pub const SERVER_ACTION: &str = "server-action";

/// Where a client identifier comes from.
#[derive(Debug, Clone, Copy)]
pub enum ClientSource<'a> {
    /// Raw value of an inbound request's `x-forwarded-for` header, if present
    ForwardedFor(Option<&'a str>),
    /// First positional argument of an internal operation, if any
    FirstArgument(Option<&'a Value>),
}

impl ClientSource<'_> {
    /// Resolve to a non-empty identifier.
    pub fn resolve(&self) -> String {
        match *self {
            ClientSource::ForwardedFor(header) => header
                .and_then(first_forwarded_address)
                .unwrap_or(ANONYMOUS)
                .to_string(),
            ClientSource::FirstArgument(arg) => arg
                .and_then(argument_identity)
                .unwrap_or_else(|| SERVER_ACTION.to_string()),
        }
    }
}

/// The originating client is the first entry of the comma-separated list.
fn first_forwarded_address(header: &str) -> Option<&str> {
    header
        .split(',')
        .next()
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
}

/// A string argument is the identity itself; an object is identified by `id`, then `meetingId`.
fn argument_identity(arg: &Value) -> Option<String> {
    match arg {
        Value::Object(fields) => ["id", "meetingId"]
            .iter()
            .find_map(|field| fields.get(*field).and_then(scalar_identity)),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn scalar_identity(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_forwarded_for_first_entry() {
        let source = ClientSource::ForwardedFor(Some(" 203.0.113.7 , 10.0.0.1, 10.0.0.2"));
        assert_eq!(source.resolve(), "203.0.113.7");
    }

    #[test]
    fn test_forwarded_for_single_entry() {
        assert_eq!(ClientSource::ForwardedFor(Some("198.51.100.4")).resolve(), "198.51.100.4");
    }

    #[test]
    fn test_forwarded_for_missing_or_blank() {
        assert_eq!(ClientSource::ForwardedFor(None).resolve(), ANONYMOUS);
        assert_eq!(ClientSource::ForwardedFor(Some("")).resolve(), ANONYMOUS);
        assert_eq!(ClientSource::ForwardedFor(Some("  , 10.0.0.1")).resolve(), ANONYMOUS);
    }

    #[test]
    fn test_first_argument_string() {
        let arg = json!("mtg_8f2a");
        assert_eq!(ClientSource::FirstArgument(Some(&arg)).resolve(), "mtg_8f2a");
    }

    #[test]
    fn test_first_argument_object_prefers_id() {
        let arg = json!({ "meetingId": "mtg_1", "id": "participant_9" });
        assert_eq!(ClientSource::FirstArgument(Some(&arg)).resolve(), "participant_9");
    }

    #[test]
    fn test_first_argument_object_meeting_id() {
        let arg = json!({ "meetingId": "mtg_1", "name": "Ada" });
        assert_eq!(ClientSource::FirstArgument(Some(&arg)).resolve(), "mtg_1");
    }

    #[test]
    fn test_first_argument_numeric_id() {
        let arg = json!({ "id": 42 });
        assert_eq!(ClientSource::FirstArgument(Some(&arg)).resolve(), "42");
    }

    #[test]
    fn test_first_argument_fallbacks() {
        let cases = [
            json!({ "title": "Standup" }),
            json!({ "id": "" }),
            json!(""),
            json!(null),
            json!(true),
            json!(7),
            json!(["mtg_1"]),
        ];
        for arg in &cases {
            assert_eq!(
                ClientSource::FirstArgument(Some(arg)).resolve(),
                SERVER_ACTION,
                "argument {}",
                arg
            );
        }
        assert_eq!(ClientSource::FirstArgument(None).resolve(), SERVER_ACTION);
    }
}
