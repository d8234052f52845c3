//! Engine configuration.
//!
//! Configuration for the analysis engine, including:
//! - Result cache capacity, eviction policy and TTL
//! - Code-context enrichment limits
//! - Fallback repository for events that do not name one
//!
//! Configuration can be read from TOML or from the process environment.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use triage_cache::{CacheConfig, EvictionPolicy};

use crate::error::{EngineError, Result};

/// Environment variable for the result cache capacity.
pub const ENV_CACHE_MAX_SIZE: &str = "CACHE_MAX_SIZE";
/// Environment variable for the result cache eviction policy.
pub const ENV_CACHE_EVICTION_POLICY: &str = "CACHE_EVICTION_POLICY";
/// Environment variable for the result cache TTL in seconds.
pub const ENV_CACHE_TTL: &str = "CACHE_TTL";
/// Environment variable for the fallback repository URL.
pub const ENV_DEFAULT_REPOSITORY_URL: &str = "DEFAULT_REPOSITORY_URL";
/// Environment variable for lines of context on each side of a location.
pub const ENV_CODE_CONTEXT_LINES: &str = "CODE_CONTEXT_LINES";
/// Environment variable for the number of code locations to fetch.
pub const ENV_MAX_CODE_LOCATIONS: &str = "MAX_CODE_LOCATIONS";
/// Environment variable for the enrichment size limit.
pub const ENV_MAX_REPOSITORY_CONTEXT_CHARS: &str = "MAX_REPOSITORY_CONTEXT_CHARS";

/// Limits for code-context enrichment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Lines of source shown on each side of a referenced line.
    pub context_lines: usize,
    /// Maximum number of code locations fetched per error.
    pub max_locations: usize,
    /// Size at which the enrichment context is truncated.
    pub max_context_chars: usize,
    /// How long fetched files are cached (in seconds).
    pub file_cache_ttl_secs: u64,
    /// Maximum number of fetched files kept in memory.
    pub file_cache_entries: usize,
}

impl EnrichmentConfig {
    /// The file cache TTL as a duration.
    #[must_use]
    pub const fn file_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.file_cache_ttl_secs)
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            context_lines: 20,
            max_locations: 4,
            max_context_chars: 12_000,
            file_cache_ttl_secs: 3600,
            file_cache_entries: 256,
        }
    }
}

/// Main engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Result cache configuration.
    pub cache: CacheConfig,
    /// Enrichment configuration.
    pub enrichment: EnrichmentConfig,
    /// Repository used when an event does not carry one.
    pub default_repository_url: Option<String>,
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            EngineError::Config(format!(
                "failed to read config file '{}': {e}",
                path.as_ref().display()
            ))
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| EngineError::Config(format!("invalid TOML: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Build configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an unparseable value.
    pub fn from_env() -> Result<Self> {
        Self::from_env_vars(std::env::vars())
    }

    /// Build configuration from `(name, value)` pairs, starting from the
    /// defaults and overriding every recognized variable that is present.
    ///
    /// # Errors
    ///
    /// Returns an error if a recognized variable has an unparseable value.
    pub fn from_env_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let mut config = Self::default();

        if let Some(max) = parse_var::<usize>(&vars, ENV_CACHE_MAX_SIZE)? {
            config.cache.max_entries = max;
        }
        if let Some(policy) = vars.get(ENV_CACHE_EVICTION_POLICY) {
            config.cache.eviction_policy = EvictionPolicy::from_str(policy)?;
        }
        if let Some(ttl) = parse_var::<u64>(&vars, ENV_CACHE_TTL)? {
            config.cache.default_ttl_secs = ttl;
        }
        if let Some(url) = vars.get(ENV_DEFAULT_REPOSITORY_URL) {
            let url = url.trim();
            if !url.is_empty() {
                config.default_repository_url = Some(url.to_string());
            }
        }
        if let Some(lines) = parse_var::<usize>(&vars, ENV_CODE_CONTEXT_LINES)? {
            config.enrichment.context_lines = lines;
        }
        if let Some(max) = parse_var::<usize>(&vars, ENV_MAX_CODE_LOCATIONS)? {
            config.enrichment.max_locations = max;
        }
        if let Some(chars) = parse_var::<usize>(&vars, ENV_MAX_REPOSITORY_CONTEXT_CHARS)? {
            config.enrichment.max_context_chars = chars;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any limit is zero.
    pub fn validate(&self) -> Result<()> {
        if self.cache.max_entries == 0 {
            return Err(EngineError::Config(
                "cache.max_entries must be greater than 0".to_string(),
            ));
        }

        if self.cache.default_ttl_secs == 0 {
            return Err(EngineError::Config(
                "cache.default_ttl_secs must be greater than 0".to_string(),
            ));
        }

        if self.enrichment.max_locations == 0 {
            return Err(EngineError::Config(
                "enrichment.max_locations must be greater than 0".to_string(),
            ));
        }

        if self.enrichment.max_context_chars == 0 {
            return Err(EngineError::Config(
                "enrichment.max_context_chars must be greater than 0".to_string(),
            ));
        }

        if self.enrichment.file_cache_entries == 0 {
            return Err(EngineError::Config(
                "enrichment.file_cache_entries must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_var<T: FromStr>(vars: &HashMap<String, String>, name: &str) -> Result<Option<T>> {
    vars.get(name)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|_| {
                EngineError::Config(format!("{name} has an invalid value: '{raw}'"))
            })
        })
        .transpose()
}
