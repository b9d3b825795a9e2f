//! Rule-driven request classification for spac.
//!
//! A rule file is a JSON array of rule objects; each rule carries regex
//! lists over method/host/URL, an optional protocol gate, named filters,
//! and an outcome (ordered transport names plus attribute tags). Files load
//! in priority order (user rules first), first match wins, and the store
//! hot-reloads when a source file's mtime advances.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use spac_rules::{FilterRegistry, RuleDb, RuleSpec};
//! use spac_core::RequestFingerprint;
//!
//! let spec: RuleSpec =
//!     serde_json::from_str(r#"{"Host":["^example\\.com$"],"Proxy":["GAE"]}"#).unwrap();
//! let rule = spec.compile().unwrap();
//! let req = RequestFingerprint {
//!     method: "GET".into(),
//!     host: "example.com".into(),
//!     port: 80,
//!     uri: "http://example.com/".into(),
//!     is_https: false,
//!     peer: None,
//! };
//! assert!(rule.matches(&req, &FilterRegistry::new()));
//! ```

pub mod error;
pub mod filter;
pub mod pattern;
pub mod rule;
pub mod store;

pub use error::RulesError;
pub use filter::FilterRegistry;
pub use rule::{ATTR_CRLF, ATTR_REDIRECT_HTTPS, AttrSet, Rule, RuleSpec};
pub use store::{MatchOutcome, RuleDb};
