use http::{header::CONTENT_LENGTH, Method};

/// A single webhook delivery, as it will be printed. Lives only for the
/// duration of one request/response exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedRequest {
    method: Method,
    /// The request target exactly as sent, query string included
    path: String,
    /// Every header the client sent, in wire order and with the original
    /// name casing. Kept as a list rather than a map so repeated names
    /// survive in place.
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl ReceivedRequest {
    /// Assemble a request from a parsed request head and whatever body bytes
    /// followed it. The body is cut down to the declared `Content-Length`,
    /// so a request without a usable one logs an empty body.
    pub fn new(
        method: Method,
        path: impl Into<String>,
        headers: Vec<(String, String)>,
        mut body: Vec<u8>,
    ) -> Self {
        body.truncate(body_length(&headers));

        Self {
            method,
            path: path.into(),
            headers,
            body,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Header pairs in the order they arrived
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

/// Number of body bytes the client declared with the first `Content-Length`
/// header. Anything other than a non-negative integer (absent, empty,
/// garbage, overflow) counts as zero.
pub fn body_length(headers: &[(String, String)]) -> usize {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(CONTENT_LENGTH.as_str()))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0)
}
