use faststr::FastStr;
use serde_json::Value;
use std::collections::HashMap;

/// One outbound call: where it goes, which headers it carries and the JSON it posts.
#[derive(Debug)]
pub struct RequestData {
    pub url:     FastStr,
    pub headers: HashMap<FastStr, FastStr>,
    pub body:    Value,
    pub stream:  bool,
}

impl RequestData {
    pub fn new<T>(url: T, body: Value) -> Self
    where
        T: Into<FastStr>,
    {
        let stream = body.get("stream").is_some_and(is_truthy);
        let mut headers = HashMap::new();
        headers.insert(
            FastStr::from_static_str("content-type"),
            FastStr::from_static_str("application/json"),
        );
        Self {
            url: url.into(),
            headers,
            body,
            stream,
        }
    }

    pub fn bearer_auth<T>(&mut self, auth: T)
    where
        T: Into<FastStr>,
    {
        self.headers.insert(
            FastStr::from_static_str("authorization"),
            format!("Bearer {}", auth.into()).into(),
        );
    }
}

/// JSON truthiness: `null`, `false`, zero, and empty strings/arrays/objects are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
