//! Selector mini-language: compiled predicates over request attributes.
//!
//! A selector is a single line of the form
//!
//! ```text
//! ['!'] attr [':' sub] ['=' expr]
//! ```
//!
//! where `attr` names a request attribute (`IP`, `Method`, `Path`, `Host`,
//! `POST`, `GET`, `Param`, `Header`), `sub` is the key name for the keyed
//! attributes, and `expr` is a regex tested against the extracted value. A
//! leading `!` inverts the outcome. The expression may also be
//! `nslookup(HOST)`, which is resolved once at parse time and frozen into a
//! regex alternation over the returned addresses; re-resolution requires a
//! rule reload.

use std::fmt;

use regex::Regex;

use crate::context::RequestContext;
use crate::error::SelectorError;

/// A compiled predicate over one named attribute of a request. Immutable
/// after construction and safe to match from many threads at once.
#[derive(Debug, Clone)]
pub struct Selector {
    request_attr: String,
    sub_attr: String,
    pattern: Option<Regex>,
    negate: bool,
}

impl Selector {
    /// Compiles a selector string.
    pub fn parse(input: &str) -> Result<Selector, SelectorError> {
        let mut start = 0;
        let mut negate = false;
        if input.starts_with('!') {
            negate = true;
            start = 1;
        }

        let mut end = input.len();
        let mut pattern = None;
        if let Some(idx) = find_unescaped(input, '=') {
            let expr = expand_expression(&input[idx + 1..])?;
            pattern = Some(Regex::new(&expr).map_err(|_| SelectorError::InvalidRegex)?);
            end = idx;
        }

        let attr_half = &input[start..end];
        let (request_attr, sub_attr) = match attr_half.find(':') {
            Some(idx) => (&attr_half[..idx], &attr_half[idx + 1..]),
            None => (attr_half, ""),
        };
        if request_attr.is_empty() {
            return Err(SelectorError::MissingAttribute);
        }

        Ok(Selector {
            request_attr: request_attr.to_string(),
            sub_attr: sub_attr.to_string(),
            pattern,
            negate,
        })
    }

    /// Extracts the selected attribute from `ctx` and tests it.
    ///
    /// Returns the extracted value (empty when absent) and whether the
    /// selector matched after regex test and negation. No side effects.
    pub fn matches<C: RequestContext + ?Sized>(&self, ctx: &C) -> (String, bool) {
        let value: Option<String> = match self.request_attr.as_str() {
            "IP" => Some(ctx.remote_addr().to_string()),
            "Method" => Some(ctx.method().to_string()),
            "Path" => Some(ctx.path().to_string()),
            "Host" => Some(ctx.host().to_string()),
            "POST" => ctx.form_param(&self.sub_attr).map(str::to_string),
            "GET" => ctx.query_param(&self.sub_attr).map(str::to_string),
            "Param" => ctx
                .form_param(&self.sub_attr)
                .or_else(|| ctx.query_param(&self.sub_attr))
                .map(str::to_string),
            "Header" => ctx.header(&self.sub_attr).map(str::to_string),
            other => {
                log::warn!("unknown request attribute: {}", other);
                None
            }
        };

        let mut found = match &value {
            Some(v) => self.pattern.as_ref().map_or(true, |re| re.is_match(v)),
            None => false,
        };
        if self.negate {
            found = !found;
        }
        (value.unwrap_or_default(), found)
    }

    pub fn request_attr(&self) -> &str {
        &self.request_attr
    }

    pub fn sub_attr(&self) -> &str {
        &self.sub_attr
    }

    pub fn negate(&self) -> bool {
        self.negate
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negate {
            f.write_str("!")?;
        }
        f.write_str(&self.request_attr)?;
        if !self.sub_attr.is_empty() {
            write!(f, ":{}", self.sub_attr)?;
        }
        if let Some(re) = &self.pattern {
            write!(f, "={}", re.as_str())?;
        }
        Ok(())
    }
}

impl PartialEq for Selector {
    fn eq(&self, other: &Selector) -> bool {
        self.request_attr == other.request_attr
            && self.sub_attr == other.sub_attr
            && self.negate == other.negate
            && self.pattern.as_ref().map(Regex::as_str) == other.pattern.as_ref().map(Regex::as_str)
    }
}

/// First occurrence of `needle` not preceded by a backslash.
fn find_unescaped(s: &str, needle: char) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        if c == '\\' {
            escaped = true;
        } else if c == needle {
            return Some(i);
        }
    }
    None
}

/// Expands the `nslookup(HOST)` convenience form into an alternation of the
/// host's resolved addresses; any other expression passes through verbatim.
fn expand_expression(expr: &str) -> Result<String, SelectorError> {
    let host = match expr.strip_prefix("nslookup(").and_then(|rest| rest.strip_suffix(')')) {
        Some(host) => host,
        None => return Ok(expr.to_string()),
    };
    let addrs =
        dns_lookup::lookup_host(host).map_err(|_| SelectorError::Lookup(host.to_string()))?;
    if addrs.is_empty() {
        return Err(SelectorError::Lookup(host.to_string()));
    }
    Ok(addrs
        .iter()
        .map(|addr| regex::escape(&addr.to_string()))
        .collect::<Vec<_>>()
        .join("|"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ProxyRequest;

    #[test]
    fn test_parse() {
        let s = Selector::parse("GET:a=b").unwrap();
        assert_eq!(s.request_attr(), "GET");
        assert_eq!(s.sub_attr(), "a");
        assert!(!s.negate());
    }

    #[test]
    fn test_parse_negated() {
        let s = Selector::parse("!IP=^127\\.").unwrap();
        assert_eq!(s.request_attr(), "IP");
        assert!(s.negate());
    }

    #[test]
    fn test_parse_missing_attribute() {
        assert!(matches!(
            Selector::parse("=foo"),
            Err(SelectorError::MissingAttribute)
        ));
        assert!(matches!(
            Selector::parse("!=foo"),
            Err(SelectorError::MissingAttribute)
        ));
    }

    #[test]
    fn test_parse_invalid_regexp() {
        assert!(matches!(
            Selector::parse("Path=("),
            Err(SelectorError::InvalidRegex)
        ));
    }

    #[test]
    fn test_request_attr_match() {
        let s = Selector::parse("Path").unwrap();
        let ctx = ProxyRequest::new("127.0.0.1", "GET", "/x?y=z");
        let (path, found) = s.matches(&ctx);
        assert!(found);
        assert_eq!(path, "/x");
    }

    #[test]
    fn test_get_attr_match() {
        let s = Selector::parse("GET:x=(y|z)").unwrap();
        let mut ctx = ProxyRequest::new("127.0.0.1", "GET", "/?x=y");
        ctx.push_query_param("x", "y");
        let (attr, found) = s.matches(&ctx);
        assert!(found);
        assert_eq!(attr, "y");

        let mut ctx = ProxyRequest::new("127.0.0.1", "GET", "/?x=a");
        ctx.push_query_param("x", "a");
        let (_, found) = s.matches(&ctx);
        assert!(!found);
    }

    #[test]
    fn test_absent_key_does_not_match() {
        let s = Selector::parse("GET:x").unwrap();
        let ctx = ProxyRequest::new("127.0.0.1", "GET", "/");
        let (value, found) = s.matches(&ctx);
        assert!(!found);
        assert_eq!(value, "");
    }

    #[test]
    fn test_present_empty_key_matches_without_pattern() {
        let s = Selector::parse("GET:x").unwrap();
        let mut ctx = ProxyRequest::new("127.0.0.1", "GET", "/?x=");
        ctx.push_query_param("x", "");
        let (_, found) = s.matches(&ctx);
        assert!(found);
    }

    #[test]
    fn test_param_falls_back_to_query() {
        let s = Selector::parse("Param:q=v").unwrap();
        let mut ctx = ProxyRequest::new("127.0.0.1", "POST", "/?q=v");
        ctx.push_query_param("q", "v");
        assert!(s.matches(&ctx).1);

        // a form value shadows the query value
        ctx.push_form_param("q", "other");
        assert!(!s.matches(&ctx).1);
    }

    #[test]
    fn test_header_match() {
        let s = Selector::parse("Header:User-Agent=(?i)curl").unwrap();
        let mut ctx = ProxyRequest::new("127.0.0.1", "GET", "/");
        ctx.push_header("user-agent", "Curl/8.5");
        assert!(s.matches(&ctx).1);
    }

    #[test]
    fn test_negate_inverts_outcome() {
        let s = Selector::parse("!Method=GET").unwrap();
        let ctx = ProxyRequest::new("127.0.0.1", "GET", "/");
        assert!(!s.matches(&ctx).1);
        let ctx = ProxyRequest::new("127.0.0.1", "POST", "/");
        assert!(s.matches(&ctx).1);
    }

    #[test]
    fn test_unknown_attribute_is_absent() {
        let s = Selector::parse("Cookie:session").unwrap();
        let ctx = ProxyRequest::new("127.0.0.1", "GET", "/");
        let (value, found) = s.matches(&ctx);
        assert!(!found);
        assert_eq!(value, "");
    }

    #[test]
    fn test_escaped_equals_stays_in_attribute_half() {
        // the first unescaped '=' splits; an escaped one does not
        let s = Selector::parse("GET:a\\=b=c").unwrap();
        assert_eq!(s.sub_attr(), "a\\=b");
    }

    #[test]
    fn test_nslookup_is_frozen_at_parse_time() {
        let s = Selector::parse("IP=nslookup(localhost)").unwrap();
        let ctx = ProxyRequest::new("127.0.0.1", "GET", "/");
        assert!(s.matches(&ctx).1);
        let ctx = ProxyRequest::new("10.1.2.3", "GET", "/");
        assert!(!s.matches(&ctx).1);
    }

    #[test]
    fn test_nslookup_failure_fails_the_parse() {
        assert!(matches!(
            Selector::parse("IP=nslookup(no-such-host.invalid)"),
            Err(SelectorError::Lookup(_))
        ));
    }

    #[test]
    fn test_round_trip() {
        for raw in [
            "IP",
            "!IP",
            "Method=^POST$",
            "GET:q",
            "Header:User-Agent=(?i)(curl|wget)",
            "!POST:token=^$",
        ] {
            let parsed = Selector::parse(raw).unwrap();
            let reparsed = Selector::parse(&parsed.to_string()).unwrap();
            assert_eq!(parsed, reparsed);
            assert_eq!(parsed.to_string(), raw);
        }
    }
}
