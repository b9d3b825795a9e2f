//! Rule wire shape and compiled form.

use std::collections::HashSet;

use regex::Regex;
use serde::Deserialize;
use spac_core::RequestFingerprint;

use crate::error::RulesError;
use crate::filter::FilterRegistry;
use crate::pattern::{compile_patterns, match_any};

/// Attribute tag: inject a CRLF probe before forwarding.
pub const ATTR_CRLF: &str = "CRLF";
/// Attribute tag: bounce plain-HTTP requests to HTTPS before routing.
pub const ATTR_REDIRECT_HTTPS: &str = "REDIRECT_HTTPS";

/// Routing attributes propagated alongside a matched proxy list.
pub type AttrSet = HashSet<String>;

/// One rule as it appears in a rule file.
///
/// Every field may be omitted; an absent list matches that dimension
/// unconditionally. Unknown fields are ignored so that rule files can carry
/// annotations for other consumers.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleSpec {
    #[serde(default, rename = "Method")]
    pub method: Vec<String>,
    #[serde(default, rename = "Host")]
    pub host: Vec<String>,
    #[serde(default, rename = "URL")]
    pub url: Vec<String>,
    #[serde(default, rename = "Proxy")]
    pub proxy: Vec<String>,
    #[serde(default, rename = "Filter")]
    pub filter: Vec<String>,
    #[serde(default, rename = "Protocol")]
    pub protocol: String,
    #[serde(default, rename = "Attr")]
    pub attr: Vec<String>,
}

impl RuleSpec {
    /// Compile the pattern lists; any invalid pattern fails the rule.
    pub fn compile(self) -> Result<Rule, RulesError> {
        Ok(Rule {
            method_regex: compile_patterns(&self.method)?,
            host_regex: compile_patterns(&self.host)?,
            url_regex: compile_patterns(&self.url)?,
            filters: self.filter,
            protocol: self.protocol,
            proxy: self.proxy,
            attrs: self.attr,
        })
    }
}

/// A compiled classification rule.
#[derive(Debug)]
pub struct Rule {
    method_regex: Vec<Regex>,
    host_regex: Vec<Regex>,
    url_regex: Vec<Regex>,
    filters: Vec<String>,
    protocol: String,
    pub proxy: Vec<String>,
    pub attrs: Vec<String>,
}

impl Rule {
    /// Match order is fixed: filters, protocol, then method/host/URL regex
    /// lists, short-circuiting on the first miss.
    pub fn matches(&self, req: &RequestFingerprint, filters: &FilterRegistry) -> bool {
        self.match_filters(req, filters)
            && self.match_protocol(req)
            && match_any(&req.method, &self.method_regex)
            && match_any(&req.host, &self.host_regex)
            && match_any(&req.uri, &self.url_regex)
    }

    fn match_filters(&self, req: &RequestFingerprint, filters: &FilterRegistry) -> bool {
        self.filters.iter().all(|name| filters.invoke(name, req))
    }

    fn match_protocol(&self, req: &RequestFingerprint) -> bool {
        self.protocol.is_empty() || self.protocol.eq_ignore_ascii_case(req.protocol())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(json: &str) -> Rule {
        serde_json::from_str::<RuleSpec>(json).unwrap().compile().unwrap()
    }

    fn req(method: &str, host: &str, uri: &str, is_https: bool) -> RequestFingerprint {
        RequestFingerprint {
            method: method.into(),
            host: host.into(),
            port: 80,
            uri: uri.into(),
            is_https,
            peer: None,
        }
    }

    #[test]
    fn empty_lists_match_everything() {
        let rule = compile(r#"{"Proxy":["GAE"]}"#);
        let registry = FilterRegistry::new();
        assert!(rule.matches(&req("GET", "anything.com", "http://anything.com/", false), &registry));
    }

    #[test]
    fn host_list_requires_a_hit() {
        let rule = compile(r#"{"Host":["^example\\.com$"],"Proxy":["GAE"]}"#);
        let registry = FilterRegistry::new();
        assert!(rule.matches(&req("GET", "example.com", "/", false), &registry));
        assert!(rule.matches(&req("GET", "EXAMPLE.com", "/", false), &registry));
        assert!(!rule.matches(&req("GET", "other.com", "/", false), &registry));
    }

    #[test]
    fn protocol_gates_connect_and_upgraded() {
        let https_rule = compile(r#"{"Protocol":"https"}"#);
        let http_rule = compile(r#"{"Protocol":"http"}"#);
        let registry = FilterRegistry::new();

        let plain = req("GET", "example.com", "/", false);
        let connect = req("CONNECT", "example.com", "example.com:443", false);
        let upgraded = req("GET", "example.com", "/", true);

        assert!(!https_rule.matches(&plain, &registry));
        assert!(https_rule.matches(&connect, &registry));
        assert!(https_rule.matches(&upgraded, &registry));

        assert!(http_rule.matches(&plain, &registry));
        assert!(!http_rule.matches(&connect, &registry));
        assert!(!http_rule.matches(&upgraded, &registry));
    }

    #[test]
    fn filters_are_conjunctive_and_checked_first() {
        let rule = compile(r#"{"Filter":["Always","Never"],"Host":["example"]}"#);
        let mut registry = FilterRegistry::new();
        registry.register("Always", |_| true);
        registry.register("Never", |_| false);
        assert!(!rule.matches(&req("GET", "example.com", "/", false), &registry));

        let rule = compile(r#"{"Filter":["Always"],"Host":["example"]}"#);
        assert!(rule.matches(&req("GET", "example.com", "/", false), &registry));
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let spec: RuleSpec =
            serde_json::from_str(r#"{"Host":["x"],"Comment":"not a field"}"#).unwrap();
        assert_eq!(spec.host, vec!["x"]);
    }

    #[test]
    fn invalid_pattern_fails_compile() {
        let spec: RuleSpec = serde_json::from_str(r#"{"URL":["("]}"#).unwrap();
        assert!(spec.compile().is_err());
    }
}
