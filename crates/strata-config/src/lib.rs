//! Declarative blueprint configuration: a sequence of component descriptors
//! (`name`, `type`, `config`) loaded from YAML or JSON, with typed per-type
//! config structs.

use std::path::Path as OsPath;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod duration_serde;

/// Known component types.
pub mod types {
    pub const BACKEND_LOCAL: &str = "backend.local";
    pub const BACKEND_MEMORY: &str = "backend.memory";
    pub const BACKEND_ALIAS: &str = "backend.alias";
    pub const BACKEND_UNION: &str = "backend.union";
    pub const BACKEND_WEBDAV: &str = "backend.webdav";
    pub const BACKEND_METADATA_CACHE: &str = "backend.metadata_cache";
    pub const BACKEND_BLOCK_CACHE: &str = "backend.block_cache";
    pub const FRONTEND_HTTP: &str = "frontend.http";
    pub const FRONTEND_WEBDAV: &str = "frontend.webdav";
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid blueprint: {0}")]
    Parse(String),
    #[error("component {name}: invalid config: {message}")]
    Component { name: String, message: String },
}

/// One component descriptor from the blueprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "empty_config")]
    pub config: serde_json::Value,
}

fn empty_config() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl ComponentSpec {
    /// Deserializes this component's config into its typed form. Unknown
    /// fields are rejected so typos surface at load time.
    pub fn parse_config<T: serde::de::DeserializeOwned>(&self) -> Result<T, ConfigError> {
        serde_json::from_value(self.config.clone()).map_err(|e| ConfigError::Component {
            name: self.name.clone(),
            message: e.to_string(),
        })
    }
}

/// Loads a blueprint from a YAML (`.yaml`/`.yml`) or JSON file.
pub fn load_blueprint_file(path: &OsPath) -> Result<Vec<ComponentSpec>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => parse_blueprint_yaml(&raw),
        _ => parse_blueprint_json(&raw),
    }
}

pub fn parse_blueprint_yaml(raw: &str) -> Result<Vec<ComponentSpec>, ConfigError> {
    serde_yaml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))
}

pub fn parse_blueprint_json(raw: &str) -> Result<Vec<ComponentSpec>, ConfigError> {
    serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LocalConfig {
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MemoryConfig {}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AliasConfig {
    /// Name of the inner backend component.
    pub backend: String,
    pub sub_directory: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UnionItemConfig {
    pub backend: String,
    pub mount_path: String,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UnionConfig {
    pub items: Vec<UnionItemConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HttpOptionsConfig {
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,
    #[serde(default = "default_io_timeout", with = "duration_serde")]
    pub send_timeout: Duration,
    #[serde(default = "default_io_timeout", with = "duration_serde")]
    pub receive_timeout: Duration,
}

impl Default for HttpOptionsConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            send_timeout: default_io_timeout(),
            receive_timeout: default_io_timeout(),
        }
    }
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_io_timeout() -> Duration {
    Duration::from_secs(60)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WebdavBackendConfig {
    pub base_url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default)]
    pub http_options: HttpOptionsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MetadataCacheConfig {
    pub origin_backend: String,
    pub cache_backend: String,
    pub cache_dir: String,
    #[serde(default = "default_max_cache_age", with = "duration_serde")]
    pub max_cache_age: Duration,
    #[serde(default = "default_large_directory_threshold")]
    pub large_directory_threshold: usize,
    #[serde(default = "default_max_cache_size")]
    pub max_cache_size: usize,
    #[serde(default = "default_cleanup_interval", with = "duration_serde")]
    pub cleanup_interval: Duration,
    #[serde(default = "default_cleanup_batch_size")]
    pub cleanup_batch_size: usize,
}

fn default_max_cache_age() -> Duration {
    Duration::from_secs(300)
}

fn default_large_directory_threshold() -> usize {
    1000
}

fn default_max_cache_size() -> usize {
    10_000
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_cleanup_batch_size() -> usize {
    100
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BlockCacheConfig {
    pub origin_backend: String,
    pub cache_backend: String,
    pub cache_dir: String,
    #[serde(default = "default_block_size")]
    pub block_size: u64,
    #[serde(default = "default_read_ahead_blocks")]
    pub read_ahead_blocks: u32,
    #[serde(default = "default_enable_read_ahead")]
    pub enable_read_ahead: bool,
}

fn default_block_size() -> u64 {
    4 * 1024 * 1024
}

fn default_read_ahead_blocks() -> u32 {
    2
}

fn default_enable_read_ahead() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HttpFrontendConfig {
    pub backend: String,
    #[serde(default = "default_address")]
    pub address: String,
    pub port: u16,
}

fn default_address() -> String {
    "127.0.0.1".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    Basic,
    Digest,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FrontendAuthConfig {
    pub username: String,
    pub password: String,
    #[serde(default = "default_auth_methods")]
    pub methods: Vec<AuthMethod>,
}

fn default_auth_methods() -> Vec<AuthMethod> {
    vec![AuthMethod::Basic, AuthMethod::Digest]
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WebdavFrontendConfig {
    pub backend: String,
    #[serde(default = "default_address")]
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub auth_config: Option<FrontendAuthConfig>,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn yaml_blueprint_round_trips() {
        let raw = r#"
- name: data
  type: backend.local
  config:
    baseDir: /srv/data
- name: cache
  type: backend.memory
- name: cached
  type: backend.metadata_cache
  config:
    originBackend: data
    cacheBackend: cache
    cacheDir: /meta
    maxCacheAge: 1h2m3s
- name: dav
  type: frontend.webdav
  config:
    backend: cached
    port: 8080
"#;
        let specs = parse_blueprint_yaml(raw).unwrap();
        assert_eq!(specs.len(), 4);
        assert_eq!(specs[0].kind, types::BACKEND_LOCAL);

        let local: LocalConfig = specs[0].parse_config().unwrap();
        assert_eq!(local.base_dir, std::path::PathBuf::from("/srv/data"));

        let _memory: MemoryConfig = specs[1].parse_config().unwrap();

        let cache: MetadataCacheConfig = specs[2].parse_config().unwrap();
        assert_eq!(cache.origin_backend, "data");
        assert_eq!(cache.max_cache_age, Duration::from_secs(3723));
        assert_eq!(cache.large_directory_threshold, 1000);

        let dav: WebdavFrontendConfig = specs[3].parse_config().unwrap();
        assert_eq!(dav.backend, "cached");
        assert_eq!(dav.port, 8080);
        assert!(dav.auth_config.is_none());
        assert_eq!(dav.address, "127.0.0.1");
    }

    #[test]
    fn json_blueprint_parses() {
        let raw = r#"[
          {"name": "mem", "type": "backend.memory", "config": {}},
          {"name": "web", "type": "frontend.http", "config": {"backend": "mem", "port": 9000}}
        ]"#;
        let specs = parse_blueprint_json(raw).unwrap();
        let http: HttpFrontendConfig = specs[1].parse_config().unwrap();
        assert_eq!(http.port, 9000);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let raw = r#"
- name: data
  type: backend.local
  config:
    baseDir: /srv/data
    basedir_typo: /oops
"#;
        let specs = parse_blueprint_yaml(raw).unwrap();
        let err = specs[0].parse_config::<LocalConfig>().unwrap_err();
        assert!(err.to_string().contains("data"), "{err}");
    }

    #[test]
    fn go_style_durations_parse() {
        let raw = r#"
- name: wd
  type: backend.webdav
  config:
    baseUrl: https://dav.example.com/
    username: u
    password: p
    httpOptions:
      connectTimeout: 500ms
      receiveTimeout: 2400h
"#;
        let specs = parse_blueprint_yaml(raw).unwrap();
        let config: WebdavBackendConfig = specs[0].parse_config().unwrap();
        assert_eq!(config.http_options.connect_timeout, Duration::from_millis(500));
        assert_eq!(
            config.http_options.receive_timeout,
            Duration::from_secs(2400 * 3600)
        );
        // sendTimeout keeps its default.
        assert_eq!(config.http_options.send_timeout, Duration::from_secs(60));
    }

    #[test]
    fn union_items_default_priority_and_read_only() {
        let raw = r#"
- name: u
  type: backend.union
  config:
    items:
      - backend: a
        mountPath: /
      - backend: b
        mountPath: /b
        priority: 7
        readOnly: true
"#;
        let specs = parse_blueprint_yaml(raw).unwrap();
        let config: UnionConfig = specs[0].parse_config().unwrap();
        assert_eq!(config.items[0].priority, 0);
        assert!(!config.items[0].read_only);
        assert_eq!(config.items[1].priority, 7);
        assert!(config.items[1].read_only);
    }
}
