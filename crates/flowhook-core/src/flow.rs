//! Flow abstraction — the view of one intercepted exchange handed to handlers.
//!
//! The transport layer owns TLS and HTTP parsing; the engine only needs host,
//! method, path, headers and body. Handlers mutate headers and body in place,
//! and later handlers in the same phase see those mutations.

use serde::{Deserialize, Serialize};

/// Lifecycle point a hook is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookEventType {
    /// Client request, before it is forwarded upstream.
    Request,
    /// Upstream response, before it is returned to the client.
    Response,
}

impl HookEventType {
    /// Every event type, in phase order.
    pub const ALL: [HookEventType; 2] = [HookEventType::Request, HookEventType::Response];

    /// Dense index used by per-event tables.
    pub fn index(self) -> usize {
        match self {
            HookEventType::Request => 0,
            HookEventType::Response => 1,
        }
    }
}

impl std::fmt::Display for HookEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookEventType::Request => write!(f, "request"),
            HookEventType::Response => write!(f, "response"),
        }
    }
}

impl std::str::FromStr for HookEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "request" => Ok(HookEventType::Request),
            "response" => Ok(HookEventType::Response),
            other => Err(format!("unknown hook event type: {other}")),
        }
    }
}

/// Header list with case-insensitive keys. Insertion order is preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// First value stored under `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values stored under `name`.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replace every value of `name` with a single `value`.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.entries.iter().position(|(k, _)| k.eq_ignore_ascii_case(name)) {
            Some(first) => {
                self.entries[first].1 = value;
                let mut idx = 0;
                self.entries.retain(|(k, _)| {
                    let keep = idx <= first || !k.eq_ignore_ascii_case(name);
                    idx += 1;
                    keep
                });
            }
            None => self.entries.push((name.to_string(), value)),
        }
    }

    /// Append a value without touching existing ones.
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        self.entries.push((name.to_string(), value.into()));
    }

    /// Remove every value of `name`. Returns how many were removed.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        before - self.entries.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// One network exchange as seen by addon handlers.
///
/// Created once per flow by the host. `phase` tells handlers whether headers
/// and body currently belong to the request or the response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowView {
    pub host: String,
    pub port: u16,
    pub method: String,
    pub path: String,
    pub headers: Headers,
    pub body: Vec<u8>,
    pub phase: HookEventType,
}

impl FlowView {
    /// New request-phase flow with empty headers and body.
    pub fn new(host: &str, method: &str, path: &str) -> Self {
        Self {
            host: host.to_string(),
            port: 443,
            method: method.to_string(),
            path: path.to_string(),
            headers: Headers::new(),
            body: Vec::new(),
            phase: HookEventType::Request,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Host without IPv6 brackets or a trailing root dot.
    pub fn normalized_host(&self) -> &str {
        let host = self.host.trim_end_matches('.');
        host.strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host)
    }

    /// Body as UTF-8 text, lossily decoded.
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn set_text(&mut self, text: &str) {
        self.body = text.as_bytes().to_vec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_case_insensitive() {
        let mut headers = Headers::new();
        headers.append("Content-Type", "text/html");
        assert_eq!(headers.get("content-type"), Some("text/html"));
        assert!(headers.contains("CONTENT-TYPE"));
    }

    #[test]
    fn test_headers_set_collapses_duplicates() {
        let mut headers: Headers = [("X-A", "1"), ("Accept", "*/*"), ("x-a", "2")]
            .into_iter()
            .collect();
        headers.set("X-A", "3");
        assert_eq!(headers.get_all("x-a").collect::<Vec<_>>(), vec!["3"]);
        assert_eq!(headers.len(), 2);
        assert_eq!(headers.iter().next(), Some(("X-A", "3")));
    }

    #[test]
    fn test_headers_remove() {
        let mut headers = Headers::new();
        headers.append("Cookie", "a=1");
        headers.append("cookie", "b=2");
        assert_eq!(headers.remove("COOKIE"), 2);
        assert!(headers.is_empty());
    }

    #[test]
    fn test_normalized_host() {
        assert_eq!(FlowView::new("Example.com.", "GET", "/").normalized_host(), "Example.com");
        assert_eq!(FlowView::new("[::1]", "GET", "/").normalized_host(), "::1");
    }

    #[test]
    fn test_event_type_parse_and_display() {
        assert_eq!("Response".parse::<HookEventType>().unwrap(), HookEventType::Response);
        assert_eq!(HookEventType::Request.to_string(), "request");
        assert!("connect".parse::<HookEventType>().is_err());
    }
}
