//! Transport variants and the name registry.
//!
//! Rules and configuration refer to transports by string name; the names
//! survive only at that boundary. Inside the selector a name resolves either
//! to a registered manager handle (GAE-style, the relay, SSH-style, the
//! Google front-ends) or to an inline [`Forward`] for `DIRECT` and literal
//! upstream-proxy targets.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

/// Canonical transport names used at the configuration boundary.
pub const NAME_GAE: &str = "GAE";
pub const NAME_RELAY: &str = "C4";
pub const NAME_SSH: &str = "SSH";
pub const NAME_GOOGLE_HTTP: &str = "GOOGLEHTTP";
pub const NAME_GOOGLE_HTTPS: &str = "GOOGLEHTTPS";
pub const NAME_DIRECT: &str = "DIRECT";
pub const NAME_DEFAULT: &str = "DEFAULT";
pub const NAME_AUTO: &str = "AUTO";

/// A transport as named by rules and configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportKind {
    Gae,
    Relay,
    Ssh,
    GoogleHttp,
    GoogleHttps,
    Direct,
    /// Any unrecognized name: forward to that literal upstream proxy.
    Forward(String),
}

impl TransportKind {
    pub fn parse(name: &str) -> Self {
        let trimmed = name.trim();
        match trimmed.to_ascii_uppercase().as_str() {
            "GAE" => Self::Gae,
            "C4" | "RELAY" => Self::Relay,
            "SSH" => Self::Ssh,
            "GOOGLE" | "GOOGLEHTTP" => Self::GoogleHttp,
            "GOOGLEHTTPS" => Self::GoogleHttps,
            "DIRECT" => Self::Direct,
            _ => Self::Forward(trimmed.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Gae => NAME_GAE,
            Self::Relay => NAME_RELAY,
            Self::Ssh => NAME_SSH,
            Self::GoogleHttp => NAME_GOOGLE_HTTP,
            Self::GoogleHttps => NAME_GOOGLE_HTTPS,
            Self::Direct => NAME_DIRECT,
            Self::Forward(target) => target,
        }
    }
}

/// Handle to a remote connection manager.
///
/// The concrete managers are external collaborators; the selector only needs
/// a name for diagnostics and, for inline forwarders, the upstream target the
/// caller should dial.
pub trait RemoteTransport: Send + Sync {
    fn name(&self) -> &str;

    /// The upstream target of an inline forwarder; registered managers carry
    /// their own addressing and return `None`.
    fn target(&self) -> Option<&str> {
        None
    }
}

/// Inline forwarder produced for `DIRECT` routes and literal upstream names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Forward {
    /// False for a direct origin connection, true when relaying through
    /// another proxy.
    pub over_proxy: bool,
    pub target: String,
}

impl Forward {
    /// Direct forwarder to the request's own `host:port`.
    pub fn direct(host_port: &str) -> Self {
        let mut target = host_port.to_string();
        if !target.contains(':') {
            target.push_str(":80");
        }
        if !target.contains("://") {
            target = format!("http://{target}");
        }
        Self { over_proxy: false, target }
    }

    /// Forwarder through a literal upstream proxy.
    pub fn via(upstream: &str) -> Self {
        let mut target = upstream.trim().to_string();
        if !target.contains("://") {
            target = format!("http://{target}");
        }
        Self { over_proxy: true, target }
    }
}

impl RemoteTransport for Forward {
    fn name(&self) -> &str {
        if self.over_proxy { &self.target } else { NAME_DIRECT }
    }

    fn target(&self) -> Option<&str> {
        Some(&self.target)
    }
}

/// Registry of active transport managers, keyed by canonical name.
#[derive(Default)]
pub struct TransportRegistry {
    managers: HashMap<String, Arc<dyn RemoteTransport>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, transport: Arc<dyn RemoteTransport>) {
        self.managers
            .insert(transport.name().to_ascii_uppercase(), transport);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn RemoteTransport>> {
        self.managers.get(&name.to_ascii_uppercase()).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.managers.contains_key(&name.to_ascii_uppercase())
    }

    /// Resolve `AUTO` once at startup: the first enabled transport in
    /// preference order, falling back to direct connections.
    pub fn resolve_auto(&self) -> &'static str {
        [NAME_GAE, NAME_RELAY, NAME_SSH]
            .into_iter()
            .find(|name| self.managers.contains_key(*name))
            .unwrap_or(NAME_DIRECT)
    }
}

/// Map a configured default transport name to its startup-time value.
pub fn resolve_default_transport(configured: &str, registry: &TransportRegistry) -> String {
    if configured.eq_ignore_ascii_case(NAME_AUTO) {
        let resolved = registry.resolve_auto();
        info!(transport = %resolved, "resolved AUTO default transport");
        resolved.to_string()
    } else {
        configured.to_string()
    }
}

impl std::fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportRegistry")
            .field("managers", &self.managers.keys().collect::<Vec<_>>())
            .finish()
    }
}
