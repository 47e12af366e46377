//! TOML configuration parsing.
//!
//! Every field has a default, so an empty file yields a working setup for a
//! local Elasticsearch and the default storage layout. Two environment
//! variables override the file: `ELASTIC_SEARCH_URL` replaces
//! `elasticsearch.location` and `FINDER_BIND` replaces `server.bind`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub elasticsearch: ElasticsearchConfig,
    #[serde(default)]
    pub collections: CollectionsConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub start: StartConfig,
    #[serde(default)]
    pub fs: FsConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub changes: ChangesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ElasticsearchConfig {
    #[serde(default = "default_location")]
    pub location: String,
    #[serde(default = "default_index")]
    pub index: String,
    #[serde(default = "default_true")]
    pub delete_index_on_startup: bool,
    #[serde(default = "default_true")]
    pub put_mapping_on_startup: bool,
    #[serde(default = "default_analyzer")]
    pub analyzer: String,
    #[serde(default = "default_special_char_field")]
    pub special_char_field: String,
    /// JSON file replacing the built-in compendium mapping.
    #[serde(default)]
    pub mapping_file: Option<PathBuf>,
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,
    #[serde(default)]
    pub types: MappingTypesConfig,
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            location: default_location(),
            index: default_index(),
            delete_index_on_startup: true,
            put_mapping_on_startup: true,
            analyzer: default_analyzer(),
            special_char_field: default_special_char_field(),
            mapping_file: None,
            ping_timeout_ms: default_ping_timeout_ms(),
            types: MappingTypesConfig::default(),
        }
    }
}

fn default_location() -> String {
    "http://localhost:9200".to_string()
}
fn default_index() -> String {
    "o2r".to_string()
}
fn default_true() -> bool {
    true
}
fn default_analyzer() -> String {
    "standard".to_string()
}
fn default_special_char_field() -> String {
    "_special".to_string()
}
fn default_ping_timeout_ms() -> u64 {
    2000
}

/// Legacy mapping types. Leave unset for typeless (7.x and later) clusters.
#[derive(Debug, Deserialize, Clone, Default, Serialize)]
pub struct MappingTypesConfig {
    #[serde(default)]
    pub compendia: Option<String>,
    #[serde(default)]
    pub jobs: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct CollectionsConfig {
    #[serde(default = "default_compendia_collection")]
    pub compendia: String,
    #[serde(default = "default_jobs_collection")]
    pub jobs: String,
}

impl Default for CollectionsConfig {
    fn default() -> Self {
        Self {
            compendia: default_compendia_collection(),
            jobs: default_jobs_collection(),
        }
    }
}

fn default_compendia_collection() -> String {
    "compendia".to_string()
}
fn default_jobs_collection() -> String {
    "jobs".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_log_size")]
    pub log_size: usize,
    #[serde(default)]
    pub fetch_existing: FetchExistingConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            log_size: default_log_size(),
            fetch_existing: FetchExistingConfig::default(),
        }
    }
}

fn default_log_size() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchExistingConfig {
    #[serde(default = "default_true")]
    pub compendia: bool,
    #[serde(default = "default_true")]
    pub jobs: bool,
}

impl Default for FetchExistingConfig {
    fn default() -> Self {
        Self {
            compendia: true,
            jobs: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StartConfig {
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_pause_seconds")]
    pub pause_seconds: u64,
}

impl Default for StartConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            pause_seconds: default_pause_seconds(),
        }
    }
}

fn default_attempts() -> u32 {
    12
}
fn default_pause_seconds() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct FsConfig {
    /// Storage root; compendium `abc12` lives in `<compendium>/abc12`.
    #[serde(default = "default_compendium_root")]
    pub compendium: PathBuf,
    #[serde(default = "default_id_length")]
    pub id_length: usize,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            compendium: default_compendium_root(),
            id_length: default_id_length(),
        }
    }
}

fn default_compendium_root() -> PathBuf {
    PathBuf::from("/tmp/o2r/compendium")
}
fn default_id_length() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_api_prefix")]
    pub prefix: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            prefix: default_api_prefix(),
        }
    }
}

fn default_api_prefix() -> String {
    "/api/v1/compendium".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8084".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct StatusConfig {
    /// Minimum user level allowed to read `/status`.
    #[serde(default = "default_view_level")]
    pub view_level: u32,
    #[serde(default)]
    pub users: Vec<StatusUser>,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            view_level: default_view_level(),
            users: Vec::new(),
        }
    }
}

fn default_view_level() -> u32 {
    1000
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct StatusUser {
    pub name: String,
    pub token: String,
    #[serde(default)]
    pub level: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChangesConfig {
    /// Change feed in JSON lines; `-` reads standard input.
    #[serde(default = "default_feed")]
    pub feed: String,
    /// Directory holding `<collection>.jsonl` snapshots for backfill.
    #[serde(default)]
    pub snapshot_dir: Option<PathBuf>,
}

impl Default for ChangesConfig {
    fn default() -> Self {
        Self {
            feed: default_feed(),
            snapshot_dir: None,
        }
    }
}

fn default_feed() -> String {
    "-".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config = parse_config(&content)?;
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse config file")
}

impl Config {
    pub fn apply_env_overrides(&mut self) {
        if let Ok(location) = std::env::var("ELASTIC_SEARCH_URL") {
            if !location.trim().is_empty() {
                self.elasticsearch.location = location;
            }
        }
        if let Ok(bind) = std::env::var("FINDER_BIND") {
            if !bind.trim().is_empty() {
                self.server.bind = bind;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.sync.log_size == 0 {
            anyhow::bail!("sync.log_size must be > 0");
        }

        if self.start.attempts == 0 {
            anyhow::bail!("start.attempts must be > 0");
        }

        if self.elasticsearch.index.trim().is_empty() {
            anyhow::bail!("elasticsearch.index must not be empty");
        }

        if self.fs.compendium.as_os_str().is_empty() {
            anyhow::bail!("fs.compendium must not be empty");
        }

        if !self.api.prefix.starts_with('/') {
            anyhow::bail!("api.prefix must start with '/'");
        }

        let mut seen = HashSet::new();
        for name in [&self.collections.compendia, &self.collections.jobs] {
            if name.trim().is_empty() {
                anyhow::bail!("collection names must not be empty");
            }
            if !seen.insert(name) {
                anyhow::bail!("collection '{}' is configured more than once", name);
            }
        }

        let mut tokens = HashSet::new();
        for user in &self.status.users {
            if user.token.is_empty() {
                anyhow::bail!("status user '{}' has an empty token", user.name);
            }
            if !tokens.insert(&user.token) {
                anyhow::bail!("status user '{}' reuses another user's token", user.name);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = parse_config("").unwrap();
        config.validate().unwrap();
        assert_eq!(config.elasticsearch.index, "o2r");
        assert_eq!(config.elasticsearch.ping_timeout_ms, 2000);
        assert!(config.elasticsearch.delete_index_on_startup);
        assert_eq!(config.sync.log_size, 20);
        assert_eq!(config.start.attempts, 12);
        assert_eq!(config.start.pause_seconds, 5);
        assert_eq!(config.api.prefix, "/api/v1/compendium");
        assert_eq!(config.collections.compendia, "compendia");
        assert!(config.sync.fetch_existing.jobs);
    }

    #[test]
    fn parses_full_file() {
        let config = parse_config(
            r#"
[elasticsearch]
location = "http://es:9200"
index = "finder-test"
delete_index_on_startup = false
put_mapping_on_startup = false

[elasticsearch.types]
compendia = "compendia"

[sync]
log_size = 5

[sync.fetch_existing]
jobs = false

[start]
attempts = 3
pause_seconds = 1

[fs]
compendium = "/data/compendium"
id_length = 6

[[status.users]]
name = "admin"
token = "s3cret"
level = 1000
"#,
        )
        .unwrap();
        config.validate().unwrap();

        assert_eq!(config.elasticsearch.location, "http://es:9200");
        assert!(!config.elasticsearch.delete_index_on_startup);
        assert_eq!(config.elasticsearch.types.compendia.as_deref(), Some("compendia"));
        assert_eq!(config.elasticsearch.types.jobs, None);
        assert_eq!(config.sync.log_size, 5);
        assert!(config.sync.fetch_existing.compendia);
        assert!(!config.sync.fetch_existing.jobs);
        assert_eq!(config.fs.compendium, PathBuf::from("/data/compendium"));
        assert_eq!(config.status.users.len(), 1);
    }

    #[test]
    fn example_config_is_valid() {
        let config = parse_config(include_str!("../config/finder.example.toml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.status.users[0].name, "admin");
        assert_eq!(config.changes.feed, "-");
    }

    #[test]
    fn rejects_invalid_values() {
        let zero_log = parse_config("[sync]\nlog_size = 0").unwrap();
        assert!(zero_log.validate().is_err());

        let zero_attempts = parse_config("[start]\nattempts = 0").unwrap();
        assert!(zero_attempts.validate().is_err());

        let same_collection =
            parse_config("[collections]\ncompendia = \"docs\"\njobs = \"docs\"").unwrap();
        assert!(same_collection.validate().is_err());

        let bad_prefix = parse_config("[api]\nprefix = \"api\"").unwrap();
        assert!(bad_prefix.validate().is_err());
    }
}
