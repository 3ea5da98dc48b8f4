//! Engine configuration that downstream crates can serialize/deserialize.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Alias bound to the root container in emitted dialect text.
    pub root_alias: String,

    /// Whether compiled templates are cached by structural signature.
    pub query_cache_enabled: bool,

    /// Upper bound on cached templates. The cache is flushed when full.
    pub query_cache_capacity: usize,

    /// Allow key-equality queries to bypass compilation as direct reads.
    pub point_reads_enabled: bool,

    /// Bind constant Skip/Take counts as parameters instead of inlining them.
    pub parameterize_paging: bool,

    /// Fail `to_page` for queries without an explicit ordering.
    pub reject_unordered_paging: bool,

    /// Page size used by callers that do not pick one.
    pub default_page_size: usize,

    /// Longest OR-equality chain folded into a single IN list.
    pub max_in_list_fold: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root_alias: "c".to_string(),
            query_cache_enabled: true,
            query_cache_capacity: 1024,
            point_reads_enabled: true,
            parameterize_paging: true,
            reject_unordered_paging: false,
            default_page_size: 100,
            max_in_list_fold: 64,
        }
    }
}

/// Partial configuration, as written in the `config` block of a query file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigOverrides {
    pub root_alias: Option<String>,
    pub query_cache_enabled: Option<bool>,
    pub query_cache_capacity: Option<usize>,
    pub point_reads_enabled: Option<bool>,
    pub parameterize_paging: Option<bool>,
    pub reject_unordered_paging: Option<bool>,
    pub default_page_size: Option<usize>,
    pub max_in_list_fold: Option<usize>,
}

impl EngineConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `DOCQL_ROOT_ALIAS`: alias of the root container
    /// - `DOCQL_QUERY_CACHE`: enable the compiled-query cache
    /// - `DOCQL_QUERY_CACHE_CAPACITY`: max cached templates
    /// - `DOCQL_POINT_READS`: enable the point-read short circuit
    /// - `DOCQL_PARAMETERIZE_PAGING`: bind Skip/Take counts as parameters
    /// - `DOCQL_REJECT_UNORDERED_PAGING`: refuse to page without ORDER BY
    /// - `DOCQL_DEFAULT_PAGE_SIZE`: default page size
    /// - `DOCQL_MAX_IN_LIST_FOLD`: longest folded IN list
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("DOCQL_ROOT_ALIAS") {
            if !s.trim().is_empty() {
                cfg.root_alias = s.trim().to_string();
            }
        }

        if let Some(v) = env_flag("DOCQL_QUERY_CACHE") {
            cfg.query_cache_enabled = v;
        }

        if let Ok(s) = std::env::var("DOCQL_QUERY_CACHE_CAPACITY") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.query_cache_capacity = v;
            }
        }

        if let Some(v) = env_flag("DOCQL_POINT_READS") {
            cfg.point_reads_enabled = v;
        }

        if let Some(v) = env_flag("DOCQL_PARAMETERIZE_PAGING") {
            cfg.parameterize_paging = v;
        }

        if let Some(v) = env_flag("DOCQL_REJECT_UNORDERED_PAGING") {
            cfg.reject_unordered_paging = v;
        }

        if let Ok(s) = std::env::var("DOCQL_DEFAULT_PAGE_SIZE") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.default_page_size = v;
            }
        }

        if let Ok(s) = std::env::var("DOCQL_MAX_IN_LIST_FOLD") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.max_in_list_fold = v;
            }
        }

        cfg
    }

    /// Apply a partial override block on top of this config.
    pub fn with_overrides(mut self, o: &ConfigOverrides) -> Self {
        if let Some(v) = &o.root_alias {
            self.root_alias = v.clone();
        }
        if let Some(v) = o.query_cache_enabled {
            self.query_cache_enabled = v;
        }
        if let Some(v) = o.query_cache_capacity {
            self.query_cache_capacity = v;
        }
        if let Some(v) = o.point_reads_enabled {
            self.point_reads_enabled = v;
        }
        if let Some(v) = o.parameterize_paging {
            self.parameterize_paging = v;
        }
        if let Some(v) = o.reject_unordered_paging {
            self.reject_unordered_paging = v;
        }
        if let Some(v) = o.default_page_size {
            self.default_page_size = v;
        }
        if let Some(v) = o.max_in_list_fold {
            self.max_in_list_fold = v;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        let alias_ok = self
            .root_alias
            .chars()
            .next()
            .map(|c| c.is_ascii_alphabetic() || c == '_')
            .unwrap_or(false)
            && self
                .root_alias
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !alias_ok {
            return Err(Error::Config(format!(
                "root_alias '{}' is not a valid identifier",
                self.root_alias
            )));
        }
        if self.query_cache_enabled && self.query_cache_capacity == 0 {
            return Err(Error::Config(
                "query_cache_capacity must be positive when the cache is enabled".into(),
            ));
        }
        if self.default_page_size == 0 {
            return Err(Error::Config("default_page_size must be positive".into()));
        }
        if self.max_in_list_fold < 2 {
            return Err(Error::Config("max_in_list_fold must be at least 2".into()));
        }
        Ok(())
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let s = std::env::var(name).ok()?;
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
