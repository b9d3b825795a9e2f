//! The layered rule store with hot reload.
//!
//! Rules load from an ordered list of files (user rules before cloud rules;
//! declaration order within a file). The whole snapshot is replaced
//! atomically via `ArcSwap`; readers take one pointer per query and never
//! observe a partially loaded store. A background ticker stats the source
//! files and reloads when a modification time advances.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use arc_swap::ArcSwap;
use spac_core::{RequestFingerprint, defaults};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::RulesError;
use crate::filter::FilterRegistry;
use crate::rule::{AttrSet, Rule, RuleSpec};

/// Result of a successful rule lookup.
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    /// Ordered transport names to try.
    pub proxy: Vec<String>,
    /// Routing attribute tags.
    pub attrs: AttrSet,
}

/// Ordered rule database backed by one or more JSON files.
pub struct RuleDb {
    sources: Vec<PathBuf>,
    filters: Arc<FilterRegistry>,
    rules: ArcSwap<Vec<Rule>>,
}

impl RuleDb {
    /// Create an empty store over the given source files, highest priority
    /// first. Call [`RuleDb::load`] before serving queries.
    pub fn new(sources: Vec<PathBuf>, filters: Arc<FilterRegistry>) -> Self {
        Self {
            sources,
            filters,
            rules: ArcSwap::new(Arc::new(Vec::new())),
        }
    }

    /// Load every source file and swap in the combined snapshot.
    ///
    /// A parse or pattern error aborts the load and retains the previous
    /// snapshot. Missing files are skipped: a fresh install has no cloud
    /// cache yet.
    pub fn load(&self) -> Result<usize, RulesError> {
        let mut rules = Vec::new();
        for path in &self.sources {
            let data = match fs::read_to_string(path) {
                Ok(data) => data,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(path = %path.display(), "rule file absent, skipping");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let specs: Vec<RuleSpec> =
                serde_json::from_str(&data).map_err(|source| RulesError::Parse {
                    path: path.clone(),
                    source,
                })?;
            for spec in specs {
                rules.push(spec.compile()?);
            }
        }
        let count = rules.len();
        self.rules.store(Arc::new(rules));
        Ok(count)
    }

    /// First matching rule wins; `None` when nothing matches.
    pub fn first_match(&self, req: &RequestFingerprint) -> Option<MatchOutcome> {
        let snapshot = self.rules.load();
        snapshot
            .iter()
            .find(|rule| rule.matches(req, &self.filters))
            .map(|rule| MatchOutcome {
                proxy: rule.proxy.clone(),
                attrs: rule.attrs.iter().cloned().collect(),
            })
    }

    pub fn rule_count(&self) -> usize {
        self.rules.load().len()
    }

    /// Stat every source and record its mtime. Returns true when at least
    /// one file moved past its previously *observed* time; the very first
    /// observation never triggers.
    fn observe_sources(&self, observed: &mut [Option<SystemTime>]) -> bool {
        let mut modified = false;
        for (slot, path) in observed.iter_mut().zip(&self.sources) {
            let Ok(meta) = fs::metadata(path) else { continue };
            let Ok(mtime) = meta.modified() else { continue };
            if slot.is_some_and(|prev| mtime > prev) {
                modified = true;
            }
            *slot = Some(mtime);
        }
        modified
    }

    /// Spawn the background reload ticker.
    pub fn spawn_reload(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let db = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(defaults::DEFAULT_RULE_RELOAD_SECS));
            let mut observed = vec![None; db.sources.len()];
            db.observe_sources(&mut observed);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        if db.observe_sources(&mut observed) {
                            match db.load() {
                                Ok(count) => info!(rules = count, "rule files reloaded"),
                                Err(e) => {
                                    warn!(error = %e, "rule reload failed, keeping previous rules");
                                }
                            }
                        }
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for RuleDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleDb")
            .field("sources", &self.sources)
            .field("rules", &self.rules.load().len())
            .finish()
    }
}
