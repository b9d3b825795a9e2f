//! The local agent's routing brain.
//!
//! Wires the rule store, transport registry, and background refreshers into
//! a [`ProxySelector`] the listener calls once per request. The listener,
//! HTTPS interception, and concrete transport managers are external; they
//! plug in through the traits in [`selector`] and [`transport`].

pub mod error;
pub mod refresh;
pub mod selector;
pub mod transport;

use std::sync::Arc;

use spac_config::{Config, SpacPaths};
use spac_rules::{FilterRegistry, RuleDb};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use error::AgentError;
pub use refresh::Refresher;
pub use selector::{
    HostsLookup, HttpsRedirector, ProxySelector, Selection, SelfRequestHandler,
};
pub use transport::{
    Forward, RemoteTransport, TransportKind, TransportRegistry, resolve_default_transport,
};

/// The assembled rule-selection runtime.
pub struct SpacRuntime<C> {
    pub rules: Arc<RuleDb>,
    pub selector: ProxySelector<C>,
}

/// Initialize rule-based selection.
///
/// Creates the on-disk layout, loads the rule files, resolves the `AUTO`
/// default against the registered transports, and spawns the reload ticker
/// and remote refreshers. With `spac.enable` off, the rule files are never
/// loaded and every request falls through to the default transport.
pub fn init_spac<C>(
    config: &Config,
    filters: Arc<FilterRegistry>,
    transports: Arc<TransportRegistry>,
    shutdown: CancellationToken,
) -> Result<SpacRuntime<C>, AgentError> {
    let paths = SpacPaths::new(&config.home);
    paths.ensure()?;

    let default_transport =
        resolve_default_transport(&config.spac.default_transport, &transports);

    let rules = Arc::new(RuleDb::new(paths.rule_sources(), filters));

    if config.spac.enable {
        match rules.load() {
            Ok(count) => info!(rules = count, "rule files loaded"),
            Err(e) => warn!(error = %e, "initial rule load failed, starting with no rules"),
        }
        rules.spawn_reload(shutdown.clone());

        if config.spac.gfwlist.is_some() || config.spac.cloud_rule.is_some() {
            Refresher::new(config)?.spawn(shutdown);
        }
    }

    let selector = ProxySelector::new(
        Arc::clone(&rules),
        transports,
        default_transport,
        config.proxy.port,
    );

    Ok(SpacRuntime { rules, selector })
}
