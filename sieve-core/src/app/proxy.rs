//! # Filtering Proxy
//!
//! The catch-all request handler of the proxy listener. Every incoming
//! request is buffered, run through the rule engine, and then either
//! answered directly (a rule action served a response, typically a `429`
//! rejection) or forwarded verbatim to the configured upstream target.
//!
//! ## Flow
//!
//! 1. Buffer the request body and capture peer address, method, URI, host,
//!    headers and parsed query/form parameters into a `ProxyRequest`
//! 2. Clone the current rule tree pointer and evaluate
//! 3. `Served` → flush the status and body the engine produced
//! 4. Anything below `Served` → forward upstream and relay the response
//! 5. Upstream unreachable → log and synthesize a `429`

use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse};

use sieve_rules::{evaluate, ProxyRequest, ResponseState, RuleStore};

/// Shared state of the proxy listener.
pub struct ProxyState {
    pub store: Arc<RuleStore>,
    pub target: String,
    pub client: reqwest::Client,
}

/// Handles one proxied request end to end.
pub async fn handle(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<ProxyState>,
) -> HttpResponse {
    let mut ctx = build_context(&req, &body);
    let rules = state.store.current();
    if evaluate(&rules, &mut ctx) == ResponseState::Served {
        let status = ctx
            .status()
            .and_then(|code| StatusCode::from_u16(code).ok())
            .unwrap_or(StatusCode::TOO_MANY_REQUESTS);
        return HttpResponse::build(status).body(ctx.response_body().to_vec());
    }
    forward(&req, body, &state).await
}

/// Path plus query string, as the client sent it.
fn original_uri(req: &HttpRequest) -> String {
    match req.query_string() {
        "" => req.path().to_string(),
        query => format!("{}?{}", req.path(), query),
    }
}

fn is_form(req: &HttpRequest) -> bool {
    req.headers()
        .get(actix_web::http::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("application/x-www-form-urlencoded"))
        .unwrap_or(false)
}

/// Captures the buffered request into the engine's owned context.
fn build_context(req: &HttpRequest, body: &web::Bytes) -> ProxyRequest {
    let remote = req
        .peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_default();
    let mut ctx = ProxyRequest::new(&remote, req.method().as_str(), &original_uri(req));

    let connection = req.connection_info().clone();
    ctx.set_host(connection.host());

    for (name, value) in req.headers() {
        ctx.push_header(name.as_str(), value.to_str().unwrap_or(""));
    }
    if let Ok(pairs) = serde_urlencoded::from_str::<Vec<(String, String)>>(req.query_string()) {
        for (name, value) in &pairs {
            ctx.push_query_param(name, value);
        }
    }
    if is_form(req) {
        if let Ok(pairs) = serde_urlencoded::from_bytes::<Vec<(String, String)>>(body) {
            for (name, value) in &pairs {
                ctx.push_form_param(name, value);
            }
        }
    }
    ctx.set_body(body.to_vec());
    ctx
}

/// Forwards the request to the upstream target and relays the response.
async fn forward(req: &HttpRequest, body: web::Bytes, state: &ProxyState) -> HttpResponse {
    let url = format!("{}{}", state.target.trim_end_matches('/'), original_uri(req));
    let method = reqwest::Method::from_bytes(req.method().as_str().as_bytes())
        .unwrap_or(reqwest::Method::GET);

    let mut upstream = state.client.request(method, &url);
    for (name, value) in req.headers() {
        // hop-by-hop; reqwest derives Host from the target URL
        if name == &actix_web::http::header::CONNECTION || name == &actix_web::http::header::HOST {
            continue;
        }
        upstream = upstream.header(name.as_str(), value.as_bytes());
    }
    if !body.is_empty() {
        upstream = upstream.body(body.to_vec());
    }

    let response = match upstream.send().await {
        Ok(response) => response,
        Err(err) => {
            log::error!("upstream request failed: {}", err);
            return HttpResponse::TooManyRequests().finish();
        }
    };

    let status =
        StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut reply = HttpResponse::build(status);
    for (name, value) in response.headers() {
        if name == &reqwest::header::CONNECTION
            || name == &reqwest::header::TRANSFER_ENCODING
            || name == &reqwest::header::CONTENT_LENGTH
        {
            continue;
        }
        reply.insert_header((name.as_str(), value.as_bytes()));
    }
    match response.bytes().await {
        Ok(bytes) => reply.body(bytes.to_vec()),
        Err(err) => {
            log::error!("upstream response failed: {}", err);
            HttpResponse::TooManyRequests().finish()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;
    use sieve_rules::RequestContext;

    #[test]
    fn test_build_context_captures_request_parts() {
        let req = TestRequest::with_uri("/search?q=rust&empty=")
            .insert_header(("User-Agent", "tester"))
            .insert_header(("Host", "example.com"))
            .to_http_request();
        let body = web::Bytes::new();
        let ctx = build_context(&req, &body);

        assert_eq!(ctx.path(), "/search");
        assert_eq!(ctx.uri(), "/search?q=rust&empty=");
        assert_eq!(ctx.query_param("q"), Some("rust"));
        assert_eq!(ctx.query_param("empty"), Some(""));
        assert_eq!(ctx.query_param("missing"), None);
        assert_eq!(ctx.header("user-agent"), Some("tester"));
        assert_eq!(ctx.host(), "example.com");
    }

    #[test]
    fn test_build_context_parses_form_bodies() {
        let req = TestRequest::post()
            .uri("/login")
            .insert_header(("Content-Type", "application/x-www-form-urlencoded"))
            .to_http_request();
        let body = web::Bytes::from_static(b"user=smith&password=hunter2");
        let ctx = build_context(&req, &body);

        assert_eq!(ctx.form_param("user"), Some("smith"));
        assert_eq!(ctx.form_param("password"), Some("hunter2"));
        assert_eq!(ctx.body(), b"user=smith&password=hunter2");
    }

    #[test]
    fn test_non_form_body_is_not_parsed() {
        let req = TestRequest::post()
            .uri("/api")
            .insert_header(("Content-Type", "application/json"))
            .to_http_request();
        let body = web::Bytes::from_static(b"{\"user\":\"smith\"}");
        let ctx = build_context(&req, &body);
        assert_eq!(ctx.form_param("user"), None);
    }
}
