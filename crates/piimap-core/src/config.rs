//! Worker configuration management.
//!
//! This module handles loading and saving the worker configuration: the site
//! origin, the cache namespace and version, the install manifest and the
//! classifier inputs (asset prefix, static hosts, data prefixes, API host).
//!
//! Configuration is stored at `~/.config/piimap/config.json`. Every field is
//! optional in the file; missing fields take the OpenPIIMap defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{CacheError, Result};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "piimap";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding the site origin
pub const ORIGIN_ENV: &str = "PIIMAP_ORIGIN";

/// Environment variable overriding the cache directory
pub const CACHE_DIR_ENV: &str = "PIIMAP_CACHE_DIR";

const DEFAULT_ORIGIN: &str = "https://openpiimap.org/";
const DEFAULT_NAMESPACE: &str = "openpiimap";

/// Shell pages, first-party bundles, the data indexes and the CDN assets the
/// site needs to render fully offline.
const DEFAULT_ASSETS: &[&str] = &[
    "/",
    "/index.html",
    "/map.html",
    "/compare.html",
    "/dashboard.html",
    "/api.html",
    "/integration.html",
    "/assets/css/style.css",
    "/assets/js/main.js",
    "/json/countries.json",
    "/json/frameworks.json",
    "https://cdn.jsdelivr.net/npm/bootstrap@5.3.2/dist/css/bootstrap.min.css",
    "https://cdn.jsdelivr.net/npm/bootstrap@5.3.2/dist/js/bootstrap.bundle.min.js",
    "https://cdn.jsdelivr.net/npm/bootstrap-icons@1.11.2/font/bootstrap-icons.css",
    "https://fonts.googleapis.com/css2?family=Inter:wght@300;400;500;600;700&display=swap",
    "https://unpkg.com/leaflet@1.9.4/dist/leaflet.css",
    "https://unpkg.com/leaflet@1.9.4/dist/leaflet.js",
    "https://cdn.jsdelivr.net/npm/chart.js",
    "https://cdn.jsdelivr.net/npm/prismjs@1.29.0/themes/prism-tomorrow.min.css",
    "https://cdn.jsdelivr.net/npm/prismjs@1.29.0/components/prism-core.min.js",
];

/// Countries index, frameworks index.
const DEFAULT_CRITICAL_DATA: &[&str] = &["/json/countries.json", "/json/frameworks.json"];

const DEFAULT_STATIC_EXTENSIONS: &[&str] = &["css", "js", "png", "jpg", "svg"];

const DEFAULT_STATIC_HOSTS: &[&str] = &[
    "cdn.jsdelivr.net",
    "unpkg.com",
    "fonts.googleapis.com",
    "fonts.gstatic.com",
];

const DEFAULT_DATA_PREFIXES: &[&str] = &["/json/", "/api/"];

const DEFAULT_API_HOST: &str = "api.openpiimap.org";

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Site origin that relative manifest entries and message keys resolve against.
    pub origin: String,
    /// Prefix shared by every partition this worker owns.
    pub namespace: String,
    /// Cache version; bumping it makes the next install populate fresh partitions.
    pub version: u32,
    pub assets: Vec<String>,
    pub critical_data: Vec<String>,
    pub assets_prefix: String,
    pub static_extensions: Vec<String>,
    pub static_hosts: Vec<String>,
    pub data_prefixes: Vec<String>,
    pub api_host: Option<String>,
    /// No timeout unless set; the network stack's own failure signalling applies.
    pub request_timeout_secs: Option<u64>,
    pub cache_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            origin: DEFAULT_ORIGIN.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            version: 1,
            assets: strings(DEFAULT_ASSETS),
            critical_data: strings(DEFAULT_CRITICAL_DATA),
            assets_prefix: "/assets/".to_string(),
            static_extensions: strings(DEFAULT_STATIC_EXTENSIONS),
            static_hosts: strings(DEFAULT_STATIC_HOSTS),
            data_prefixes: strings(DEFAULT_DATA_PREFIXES),
            api_host: Some(DEFAULT_API_HOST.to_string()),
            request_timeout_secs: None,
            cache_dir: None,
            log_dir: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| CacheError::Config(format!("{}: {}", path.display(), e)))?;
            let config: Config = serde_json::from_str(&contents)
                .map_err(|e| CacheError::Config(format!("{}: {}", path.display(), e)))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply `PIIMAP_ORIGIN` / `PIIMAP_CACHE_DIR` from the environment.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(origin) = std::env::var(ORIGIN_ENV) {
            self.origin = origin;
        }
        if let Ok(dir) = std::env::var(CACHE_DIR_ENV) {
            self.cache_dir = Some(PathBuf::from(dir));
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        self.origin_url()?;
        if self.namespace.is_empty() || self.namespace.contains(['/', '\\']) {
            return Err(CacheError::Config(format!(
                "invalid namespace '{}'",
                self.namespace
            )));
        }
        if self.version == 0 {
            return Err(CacheError::Config("version must be at least 1".to_string()));
        }
        if self.critical_data.is_empty() {
            return Err(CacheError::Config(
                "at least one critical data endpoint is required".to_string(),
            ));
        }
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| CacheError::Config("Could not find config directory".to_string()))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.cache_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| CacheError::Config("Could not find cache directory".to_string()))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn origin_url(&self) -> Result<Url> {
        Url::parse(&self.origin)
            .map_err(|e| CacheError::Config(format!("invalid origin '{}': {}", self.origin, e)))
    }

    /// Resolve an absolute or origin-relative URL.
    pub fn resolve(&self, url: &str) -> Result<Url> {
        self.origin_url()?
            .join(url)
            .map_err(|e| CacheError::Config(format!("invalid URL '{}': {}", url, e)))
    }

    pub fn asset_urls(&self) -> Result<Vec<Url>> {
        self.assets.iter().map(|a| self.resolve(a)).collect()
    }

    pub fn critical_data_urls(&self) -> Result<Vec<Url>> {
        self.critical_data.iter().map(|d| self.resolve(d)).collect()
    }
}
