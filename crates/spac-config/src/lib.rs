//! Configuration loading and the on-disk home layout.

use std::{fs, path::Path, path::PathBuf};

use serde::{Deserialize, Serialize};
use spac_core::defaults;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Home directory holding the `spac/` state tree.
    #[serde(default = "default_home")]
    pub home: PathBuf,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub spac: SpacConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            home: default_home(),
            proxy: ProxyConfig::default(),
            spac: SpacConfig::default(),
            relay: RelayConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// The local agent listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_proxy_port")]
    pub port: u16,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self { port: default_proxy_port() }
    }
}

/// The `spac` section: rule engine and PAC generation switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpacConfig {
    /// Master switch for rule-based selection.
    #[serde(default = "default_true")]
    pub enable: bool,
    /// Default transport name; `AUTO` resolves at startup.
    #[serde(default = "default_transport", rename = "default")]
    pub default_transport: String,
    /// Block-list URL; enables periodic PAC refresh when set.
    #[serde(default)]
    pub gfwlist: Option<String>,
    /// Remote rule-file URL; enables periodic cloud-rule refresh when set.
    #[serde(default)]
    pub cloud_rule: Option<String>,
    /// The `PROXY host:port` target embedded in generated PAC scripts.
    #[serde(default = "default_pac_proxy")]
    pub pac_proxy: String,
}

impl Default for SpacConfig {
    fn default() -> Self {
        Self {
            enable: true,
            default_transport: default_transport(),
            gfwlist: None,
            cloud_rule: None,
            pac_proxy: default_pac_proxy(),
        }
    }
}

/// The relay server endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_relay_listen")]
    pub listen: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self { listen: default_relay_listen() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse config {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
    #[error("config {} has an unrecognized extension, expected json, yaml, or toml", path.display())]
    UnknownFormat { path: PathBuf },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Load a config file, picking the parser by file extension.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed: Result<Config, String> = match path.extension().and_then(|s| s.to_str()) {
        Some("json" | "jsonc") => {
            // Hand-edited JSON configs may carry // comments.
            let stripped = json_comments::StripComments::new(data.as_bytes());
            serde_json::from_reader(stripped).map_err(|e| e.to_string())
        }
        Some("yaml" | "yml") => serde_yaml::from_str(&data).map_err(|e| e.to_string()),
        Some("toml") => toml::from_str(&data).map_err(|e| e.to_string()),
        _ => {
            return Err(ConfigError::UnknownFormat {
                path: path.to_path_buf(),
            });
        }
    };
    parsed.map_err(|message| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    })
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.proxy.port == 0 {
        return Err(ConfigError::Invalid("proxy.port must be > 0".into()));
    }
    if config.relay.listen.trim().is_empty() {
        return Err(ConfigError::Invalid("relay.listen is empty".into()));
    }
    if config.spac.pac_proxy.trim().is_empty() {
        return Err(ConfigError::Invalid("spac.pac_proxy is empty".into()));
    }
    let (host, port) = config
        .spac
        .pac_proxy
        .rsplit_once(':')
        .ok_or_else(|| ConfigError::Invalid("spac.pac_proxy must be host:port".into()))?;
    if host.is_empty() || port.parse::<u16>().is_err() {
        return Err(ConfigError::Invalid("spac.pac_proxy must be host:port".into()));
    }
    if config.spac.default_transport.trim().is_empty() {
        return Err(ConfigError::Invalid("spac.default is empty".into()));
    }
    Ok(())
}

/// The state tree under the home directory.
#[derive(Debug, Clone)]
pub struct SpacPaths {
    root: PathBuf,
}

impl SpacPaths {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { root: home.into().join("spac") }
    }

    /// Create the state directory if it does not exist yet.
    pub fn ensure(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.root)
    }

    /// User rules, higher priority than the cloud file.
    pub fn user_rules(&self) -> PathBuf {
        self.root.join("user_spac.json")
    }

    /// Cloud-fetched rules cache.
    pub fn cloud_rules(&self) -> PathBuf {
        self.root.join("cloud_spac.json")
    }

    /// Decoded block-list cache.
    pub fn gfwlist(&self) -> PathBuf {
        self.root.join("snova-gfwlist.txt")
    }

    /// User block-list additions, appended before PAC generation.
    pub fn user_gfwlist(&self) -> PathBuf {
        self.root.join("user-gfwlist.txt")
    }

    /// Generated PAC output.
    pub fn pac_output(&self) -> PathBuf {
        self.root.join("snova-gfwlist.pac")
    }

    /// Rule sources for the store, priority order.
    pub fn rule_sources(&self) -> Vec<PathBuf> {
        vec![self.user_rules(), self.cloud_rules()]
    }
}

fn default_home() -> PathBuf {
    PathBuf::from(".")
}

fn default_true() -> bool {
    true
}

fn default_proxy_port() -> u16 {
    defaults::DEFAULT_PROXY_PORT
}

fn default_transport() -> String {
    defaults::DEFAULT_TRANSPORT.to_string()
}

fn default_pac_proxy() -> String {
    defaults::DEFAULT_PAC_PROXY.to_string()
}

fn default_relay_listen() -> String {
    defaults::DEFAULT_RELAY_LISTEN.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_sections() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.spac.enable);
        assert_eq!(config.spac.default_transport, "GAE");
        assert_eq!(config.spac.pac_proxy, "127.0.0.1:48100");
        assert_eq!(config.proxy.port, 48100);
        assert!(config.spac.gfwlist.is_none());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn toml_round_trip() {
        let config: Config = toml::from_str(
            r#"
            home = "/var/lib/spac"

            [spac]
            enable = true
            default = "AUTO"
            gfwlist = "https://example.com/gfwlist.txt"
            pac_proxy = "127.0.0.1:8118"

            [relay]
            listen = "0.0.0.0:9000"
            "#,
        )
        .unwrap();
        assert_eq!(config.spac.default_transport, "AUTO");
        assert_eq!(config.spac.gfwlist.as_deref(), Some("https://example.com/gfwlist.txt"));
        assert_eq!(config.relay.listen, "0.0.0.0:9000");
        assert_eq!(config.home, PathBuf::from("/var/lib/spac"));
    }

    #[test]
    fn json_section_names() {
        let config: Config = serde_json::from_str(
            r#"{"spac": {"default": "SSH", "cloud_rule": "http://rules.example/spac.json"}}"#,
        )
        .unwrap();
        assert_eq!(config.spac.default_transport, "SSH");
        assert_eq!(
            config.spac.cloud_rule.as_deref(),
            Some("http://rules.example/spac.json")
        );
    }

    #[test]
    fn load_config_picks_parser_by_extension() {
        let dir = std::env::temp_dir().join(format!("spac-config-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        let toml_path = dir.join("config.toml");
        fs::write(&toml_path, "[relay]\nlisten = \"127.0.0.1:9999\"\n").unwrap();
        let config = load_config(&toml_path).unwrap();
        assert_eq!(config.relay.listen, "127.0.0.1:9999");

        let jsonc_path = dir.join("config.jsonc");
        fs::write(&jsonc_path, "{\n  // local override\n  \"proxy\": {\"port\": 1234}\n}").unwrap();
        let config = load_config(&jsonc_path).unwrap();
        assert_eq!(config.proxy.port, 1234);

        let ini_path = dir.join("config.ini");
        fs::write(&ini_path, "").unwrap();
        assert!(matches!(
            load_config(&ini_path),
            Err(ConfigError::UnknownFormat { .. })
        ));

        let broken = dir.join("broken.toml");
        fs::write(&broken, "relay = not toml").unwrap();
        assert!(matches!(load_config(&broken), Err(ConfigError::Parse { .. })));

        assert!(matches!(
            load_config(dir.join("missing.toml")),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn validation_rejects_bad_pac_proxy() {
        let mut config = Config::default();
        config.spac.pac_proxy = "no-port-here".into();
        assert!(validate_config(&config).is_err());
        config.spac.pac_proxy = "127.0.0.1:notaport".into();
        assert!(validate_config(&config).is_err());
        config.spac.pac_proxy = "127.0.0.1:48100".into();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn paths_layout() {
        let paths = SpacPaths::new("/home/user");
        assert_eq!(paths.user_rules(), PathBuf::from("/home/user/spac/user_spac.json"));
        assert_eq!(paths.cloud_rules(), PathBuf::from("/home/user/spac/cloud_spac.json"));
        assert_eq!(paths.gfwlist(), PathBuf::from("/home/user/spac/snova-gfwlist.txt"));
        assert_eq!(paths.user_gfwlist(), PathBuf::from("/home/user/spac/user-gfwlist.txt"));
        assert_eq!(paths.pac_output(), PathBuf::from("/home/user/spac/snova-gfwlist.pac"));
        assert_eq!(paths.rule_sources(), vec![paths.user_rules(), paths.cloud_rules()]);
    }
}
