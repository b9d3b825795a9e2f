//! The front door: turn one request into an ordered list of transports.

use std::net::IpAddr;
use std::sync::Arc;

use spac_core::{RequestFingerprint, request::is_private_host};
use spac_rules::{ATTR_CRLF, ATTR_REDIRECT_HTTPS, AttrSet, RuleDb};
use tracing::warn;

use crate::transport::{
    Forward, NAME_DEFAULT, NAME_DIRECT, RemoteTransport, TransportKind, TransportRegistry,
};

/// Serves requests addressed to the agent itself (status pages, PAC file).
pub trait SelfRequestHandler<C>: Send + Sync {
    fn handle(&self, req: &RequestFingerprint, conn: &mut C);
}

/// Bounces plain-HTTP requests to their HTTPS form.
pub trait HttpsRedirector<C>: Send + Sync {
    fn redirect(&self, req: &RequestFingerprint, conn: &mut C);
}

/// The hosts layer: knows reachable direct mappings for some hosts.
pub trait HostsLookup: Send + Sync {
    fn reachable_mapping(&self, req: &RequestFingerprint, host_port: &str) -> bool;
}

/// Outcome of [`ProxySelector::select`].
pub enum Selection {
    /// The connection was handed to a hook; nothing left to route.
    Handled,
    /// Transports to try in order, plus routing attributes.
    Route {
        transports: Vec<Arc<dyn RemoteTransport>>,
        attrs: AttrSet,
    },
}

/// Per-request transport selection over the rule store.
pub struct ProxySelector<C> {
    rules: Arc<RuleDb>,
    transports: Arc<TransportRegistry>,
    /// Already resolved: never `AUTO` at this point.
    default_transport: String,
    proxy_port: u16,
    hosts: Option<Arc<dyn HostsLookup>>,
    self_handler: Option<Arc<dyn SelfRequestHandler<C>>>,
    https_redirector: Option<Arc<dyn HttpsRedirector<C>>>,
}

impl<C> ProxySelector<C> {
    pub fn new(
        rules: Arc<RuleDb>,
        transports: Arc<TransportRegistry>,
        default_transport: String,
        proxy_port: u16,
    ) -> Self {
        Self {
            rules,
            transports,
            default_transport,
            proxy_port,
            hosts: None,
            self_handler: None,
            https_redirector: None,
        }
    }

    pub fn with_hosts(mut self, hosts: Arc<dyn HostsLookup>) -> Self {
        self.hosts = Some(hosts);
        self
    }

    pub fn with_self_handler(mut self, handler: Arc<dyn SelfRequestHandler<C>>) -> Self {
        self.self_handler = Some(handler);
        self
    }

    pub fn with_https_redirector(mut self, redirector: Arc<dyn HttpsRedirector<C>>) -> Self {
        self.https_redirector = Some(redirector);
        self
    }

    /// Classify one request.
    ///
    /// Private addresses go direct without consulting rules; requests aimed
    /// at the agent's own port are handed to the self-request hook. A
    /// matching rule supplies the transport list and attributes, otherwise
    /// the hosts layer and finally the default transport decide.
    pub fn select(&self, req: &RequestFingerprint, conn: &mut C) -> Selection {
        let mut names = vec![self.default_transport.clone()];
        let mut attrs = AttrSet::new();
        let mut consult_rules = true;

        if is_private_host(&req.host) {
            consult_rules = false;
            names = vec![NAME_DIRECT.to_string()];
            if req.port == self.proxy_port && is_self_host(&req.host) {
                if let Some(handler) = &self.self_handler {
                    handler.handle(req, conn);
                }
                return Selection::Handled;
            }
        }

        if consult_rules {
            match self.rules.first_match(req) {
                Some(outcome) => {
                    names = outcome.proxy;
                    attrs = outcome.attrs;
                }
                None => {
                    // Hosts overrides apply only to requests no rule claimed.
                    let reachable = self
                        .hosts
                        .as_ref()
                        .is_some_and(|h| h.reachable_mapping(req, &req.host_port()));
                    if reachable {
                        if !req.method.eq_ignore_ascii_case("CONNECT") {
                            attrs.insert(ATTR_CRLF.to_string());
                        }
                        names = vec![NAME_DIRECT.to_string(), self.default_transport.clone()];
                    }
                }
            }
        }

        if req.protocol() == "http" && attrs.contains(ATTR_REDIRECT_HTTPS) {
            if let Some(redirector) = &self.https_redirector {
                redirector.redirect(req, conn);
                return Selection::Handled;
            }
        }

        Selection::Route {
            transports: self.resolve(&names, req),
            attrs,
        }
    }

    fn resolve(&self, names: &[String], req: &RequestFingerprint) -> Vec<Arc<dyn RemoteTransport>> {
        let mut out: Vec<Arc<dyn RemoteTransport>> = Vec::with_capacity(names.len());
        for raw in names {
            let name = if raw.eq_ignore_ascii_case(NAME_DEFAULT) {
                self.default_transport.as_str()
            } else {
                raw.as_str()
            };
            match TransportKind::parse(name) {
                TransportKind::Direct => {
                    out.push(Arc::new(Forward::direct(&req.host_port())));
                }
                TransportKind::Forward(upstream) => {
                    out.push(Arc::new(Forward::via(&upstream)));
                }
                kind => match self.transports.get(kind.name()) {
                    Some(transport) => out.push(transport),
                    None => {
                        warn!(transport = %name, host = %req.host, "transport not registered, skipping");
                    }
                },
            }
        }
        out
    }
}

/// True when `host` names this machine.
fn is_self_host(host: &str) -> bool {
    host.eq_ignore_ascii_case("localhost")
        || host
            .parse::<IpAddr>()
            .is_ok_and(|ip| ip.is_loopback() || ip.is_unspecified())
}
