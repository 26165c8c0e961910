//! Request context seam between the HTTP layer and the engine.
//!
//! The engine never talks to a socket. The proxy buffers each incoming
//! request into an owned [`ProxyRequest`] and hands it to the evaluator;
//! actions write their response through the same object, and the proxy
//! flushes it once evaluation reports [`Served`](crate::ResponseState).

/// Attribute accessors the engine reads and the response sink it writes.
///
/// Lookup semantics follow the underlying request: a parameter or header
/// that exists with an empty value is *present* (`Some("")`), a missing key
/// is *absent* (`None`). Header names compare ASCII-case-insensitively.
pub trait RequestContext {
    /// Textual address of the remote peer.
    fn remote_addr(&self) -> &str;
    fn method(&self) -> &str;
    /// URL path without the query string.
    fn path(&self) -> &str;
    /// Full request URI: path plus query string, if any.
    fn uri(&self) -> &str;
    /// Value of the Host header.
    fn host(&self) -> &str;
    fn header(&self, name: &str) -> Option<&str>;
    fn query_param(&self, name: &str) -> Option<&str>;
    fn form_param(&self, name: &str) -> Option<&str>;
    fn body(&self) -> &[u8];

    fn set_status_code(&mut self, status: u16);
    fn write(&mut self, bytes: &[u8]);
}

/// Owned, fully buffered request plus the pending engine response.
///
/// One instance exists per request for the duration of an `evaluate` call;
/// it is never shared between requests.
#[derive(Debug, Default)]
pub struct ProxyRequest {
    remote_addr: String,
    method: String,
    path: String,
    uri: String,
    host: String,
    headers: Vec<(String, String)>,
    query: Vec<(String, String)>,
    form: Vec<(String, String)>,
    body: Vec<u8>,
    status: Option<u16>,
    response_body: Vec<u8>,
}

impl ProxyRequest {
    /// Creates a request context; the path is derived from `uri` by cutting
    /// at the first `?`. Headers and parameters are pushed separately by
    /// whoever parsed the raw request.
    pub fn new(remote_addr: &str, method: &str, uri: &str) -> ProxyRequest {
        let (path, _) = uri.split_once('?').unwrap_or((uri, ""));
        ProxyRequest {
            remote_addr: remote_addr.to_string(),
            method: method.to_string(),
            path: path.to_string(),
            uri: uri.to_string(),
            ..ProxyRequest::default()
        }
    }

    pub fn set_host(&mut self, host: &str) {
        self.host = host.to_string();
    }

    pub fn push_header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    pub fn push_query_param(&mut self, name: &str, value: &str) {
        self.query.push((name.to_string(), value.to_string()));
    }

    pub fn push_form_param(&mut self, name: &str, value: &str) {
        self.form.push((name.to_string(), value.to_string()));
    }

    pub fn set_body(&mut self, body: Vec<u8>) {
        self.body = body;
    }

    /// Status code set by a serving action, if any.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Body accumulated by serving actions.
    pub fn response_body(&self) -> &[u8] {
        &self.response_body
    }
}

fn first_value<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

impl RequestContext for ProxyRequest {
    fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    fn method(&self) -> &str {
        &self.method
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn uri(&self) -> &str {
        &self.uri
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    fn query_param(&self, name: &str) -> Option<&str> {
        first_value(&self.query, name)
    }

    fn form_param(&self, name: &str) -> Option<&str> {
        first_value(&self.form, name)
    }

    fn body(&self) -> &[u8] {
        &self.body
    }

    fn set_status_code(&mut self, status: u16) {
        self.status = Some(status);
    }

    fn write(&mut self, bytes: &[u8]) {
        self.response_body.extend_from_slice(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_split_from_uri() {
        let ctx = ProxyRequest::new("127.0.0.1", "GET", "/search?q=rust");
        assert_eq!(ctx.path(), "/search");
        assert_eq!(ctx.uri(), "/search?q=rust");
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let mut ctx = ProxyRequest::new("127.0.0.1", "GET", "/");
        ctx.push_header("User-Agent", "smith");
        assert_eq!(ctx.header("user-agent"), Some("smith"));
        assert_eq!(ctx.header("X-Missing"), None);
    }

    #[test]
    fn test_empty_param_is_present() {
        let mut ctx = ProxyRequest::new("127.0.0.1", "GET", "/?q=");
        ctx.push_query_param("q", "");
        assert_eq!(ctx.query_param("q"), Some(""));
        assert_eq!(ctx.query_param("r"), None);
    }

    #[test]
    fn test_response_sink_accumulates() {
        let mut ctx = ProxyRequest::new("127.0.0.1", "GET", "/");
        ctx.set_status_code(429);
        ctx.write(b"Blo");
        ctx.write(b"cked");
        assert_eq!(ctx.status(), Some(429));
        assert_eq!(ctx.response_body(), b"Blocked");
    }
}
