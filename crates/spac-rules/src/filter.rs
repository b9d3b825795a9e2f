//! Named request predicates referenced by rules.
//!
//! Filters let a rule gate on structural request properties the regex lists
//! cannot express (feature-gated hooks, listener-specific flags). The
//! registry is populated once at startup, before the first rule load, and is
//! handed explicitly to whoever evaluates rules.

use std::collections::HashMap;

use spac_core::RequestFingerprint;
use tracing::warn;

type FilterFn = Box<dyn Fn(&RequestFingerprint) -> bool + Send + Sync>;

/// Lookup table from filter name to request predicate.
#[derive(Default)]
pub struct FilterRegistry {
    filters: HashMap<String, FilterFn>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, filter: F)
    where
        F: Fn(&RequestFingerprint) -> bool + Send + Sync + 'static,
    {
        self.filters.insert(name.into(), Box::new(filter));
    }

    /// Evaluate a filter by name. Unknown names never match; loading is not
    /// aborted because filters may be feature-gated out of this build.
    pub fn invoke(&self, name: &str, req: &RequestFingerprint) -> bool {
        match self.filters.get(name) {
            Some(filter) => filter(req),
            None => {
                warn!(filter = %name, "unknown filter referenced by rule");
                false
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }
}

impl std::fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterRegistry")
            .field("filters", &self.filters.keys().collect::<Vec<_>>())
            .finish()
    }
}
