//! Periodic conditional fetch of remote rule files and the block-list.
//!
//! Fetches go through the local proxy itself, so they work from behind the
//! same network the agent is escaping. Each fetch sends `If-Modified-Since`
//! derived from the on-disk cache's mtime; a 304 or empty body is a no-op.
//! The rule store notices updated caches through its own mtime watcher.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header;
use spac_config::{Config, SpacPaths};
use spac_core::defaults;
use time::OffsetDateTime;
use time::macros::format_description;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::AgentError;

/// Background refresher for cloud rules and the GFWList-derived PAC.
pub struct Refresher {
    client: reqwest::Client,
    paths: SpacPaths,
    gfwlist_url: Option<String>,
    cloud_rule_url: Option<String>,
    pac_proxy: String,
}

impl Refresher {
    pub fn new(config: &Config) -> Result<Self, AgentError> {
        let proxy = reqwest::Proxy::all(format!("http://127.0.0.1:{}", config.proxy.port))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(defaults::DEFAULT_FETCH_TIMEOUT_SECS))
            .proxy(proxy)
            .build()?;
        Ok(Self {
            client,
            paths: SpacPaths::new(&config.home),
            gfwlist_url: config.spac.gfwlist.clone(),
            cloud_rule_url: config.spac.cloud_rule.clone(),
            pac_proxy: config.spac.pac_proxy.clone(),
        })
    }

    /// Spawn the refresh loop: a short delay after boot so the local
    /// listener is up, then one pass per refresh interval.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_secs(defaults::DEFAULT_FETCH_DELAY_SECS)) => {}
            }
            let mut interval =
                tokio::time::interval(Duration::from_secs(defaults::DEFAULT_FETCH_INTERVAL_SECS));
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => self.run_once().await,
                }
            }
        })
    }

    async fn run_once(&self) {
        if let Some(url) = self.cloud_rule_url.clone() {
            if let Err(e) = self.refresh_cloud_rules(&url).await {
                warn!(url = %url, error = %e, "cloud rule refresh failed");
            }
        }
        if let Some(url) = self.gfwlist_url.clone() {
            if let Err(e) = self.refresh_gfwlist(&url).await {
                warn!(url = %url, error = %e, "gfwlist refresh failed");
            }
        }
    }

    /// Fetch the remote rule file into the cloud cache. Returns true when
    /// the cache was updated.
    pub async fn refresh_cloud_rules(&self, url: &str) -> Result<bool, AgentError> {
        let cache = self.paths.cloud_rules();
        let Some((body, _)) = self.fetch_if_modified(url, &cache).await? else {
            return Ok(false);
        };
        atomic_write(&cache, &body).await?;
        info!(url = %url, bytes = body.len(), "cloud rules updated");
        Ok(true)
    }

    /// Fetch the block-list, decode it, and regenerate the PAC script.
    /// Returns true when the cache was updated.
    pub async fn refresh_gfwlist(&self, url: &str) -> Result<bool, AgentError> {
        let cache = self.paths.gfwlist();
        let Some((body, last_modified)) = self.fetch_if_modified(url, &cache).await? else {
            return Ok(false);
        };

        // Published lists are base64 with embedded newlines.
        let compact: Vec<u8> = body
            .iter()
            .copied()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        let decoded = BASE64.decode(&compact)?;
        atomic_write(&cache, &decoded).await?;

        let content = String::from_utf8_lossy(&decoded);
        let user = fs::read_to_string(self.paths.user_gfwlist()).ok();
        let pac =
            spac_pac::generate_pac(url, &last_modified, &content, user.as_deref(), &self.pac_proxy);
        atomic_write(&self.paths.pac_output(), pac.as_bytes()).await?;
        info!(url = %url, rules = decoded.len(), "gfwlist cache and PAC regenerated");
        Ok(true)
    }

    /// Conditional GET against the cache file's mtime.
    ///
    /// `Ok(None)` for 304 or an empty body; otherwise the body plus the
    /// `Last-Modified` header value for the PAC banner.
    async fn fetch_if_modified(
        &self,
        url: &str,
        cache: &Path,
    ) -> Result<Option<(Bytes, String)>, AgentError> {
        let mut request = self.client.get(url);
        if let Some(mtime) = fs::metadata(cache).ok().and_then(|m| m.modified().ok()) {
            request = request.header(header::IF_MODIFIED_SINCE, http_date(mtime));
        }

        let response = request.send().await?;
        if response.status() == StatusCode::NOT_MODIFIED {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(AgentError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let last_modified = response
            .headers()
            .get(header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.bytes().await?;
        if body.is_empty() {
            return Ok(None);
        }
        Ok(Some((body, last_modified)))
    }
}

/// Format a timestamp as an IMF-fixdate for conditional requests.
fn http_date(t: SystemTime) -> String {
    let format = format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    );
    OffsetDateTime::from(t).format(&format).unwrap_or_default()
}

/// Replace a cache file in one step. The content lands in a `.swap`
/// sibling first and is renamed over the target, so the rule store's mtime
/// watcher never reloads a half-written file.
async fn atomic_write(path: &Path, content: &[u8]) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let swap = swap_path(path);
    tokio::fs::write(&swap, content).await?;
    if cfg!(windows) {
        // rename cannot replace an existing file there
        let _ = tokio::fs::remove_file(path).await;
    }
    tokio::fs::rename(&swap, path).await
}

/// `foo.json` → `foo.json.swap`, keeping the real extension so sibling
/// caches with the same stem cannot collide.
fn swap_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".swap");
    PathBuf::from(os)
}
