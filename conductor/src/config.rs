//! Conductor configuration.
//!
//! Numeric limits come from `CONDUCTOR_*` environment variables (a `.env` file
//! is honoured through [`load_dotenv`]); the routing tables come from a TOML
//! file so that keyword routes keep their declaration order.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub const DEFAULT_TERMINATION_MARKER: &str = "TERMINATE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Hard cap on turns per session
    pub max_turns: u32,
    /// How many turns in a row one actor may take before the session ends
    pub max_consecutive: u32,
    /// Messages kept in the conversation log
    pub max_log_length: usize,
    /// Case-insensitive strings that end the session when they appear in a message
    pub termination_markers: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_turns: 20,
            max_consecutive: 3,
            max_log_length: 200,
            termination_markers: vec![DEFAULT_TERMINATION_MARKER.to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub max_size: usize,
    pub default_ttl: Duration,
    /// Period of the background expiry sweep
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 512,
            default_ttl: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// One keyword route: any keyword found in the last message selects `actor`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeywordRoute {
    pub actor: String,
    pub keywords: Vec<String>,
}

/// Sequence fallback edge: after `from` has spoken, `to` goes next.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SequenceStep {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoutingConfig {
    /// Actor that opens a session when nothing else matches
    pub default_actor: Option<String>,
    /// Checked in declaration order; the first matching route wins
    #[serde(default)]
    pub keyword_routes: Vec<KeywordRoute>,
    #[serde(default)]
    pub sequence: Vec<SequenceStep>,
}

impl RoutingConfig {
    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        toml::from_str(raw).context("Failed to parse routing config")
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read routing config {}", path.display()))?;
        Self::from_toml_str(&raw)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConductorConfig {
    pub scheduler: SchedulerConfig,
    pub cache: CacheConfig,
    pub routing: RoutingConfig,
}

impl ConductorConfig {
    /// Read the `CONDUCTOR_*` variables. Call [`load_dotenv`] first for `.env` support.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = SchedulerConfig::default();
        let scheduler = SchedulerConfig {
            max_turns: env_parse("CONDUCTOR_MAX_TURNS", defaults.max_turns)?,
            max_consecutive: env_parse("CONDUCTOR_MAX_CONSECUTIVE", defaults.max_consecutive)?,
            max_log_length: env_parse("CONDUCTOR_MAX_LOG_LENGTH", defaults.max_log_length)?,
            termination_markers: env_csv(
                "CONDUCTOR_TERMINATION_MARKERS",
                &[DEFAULT_TERMINATION_MARKER],
            ),
        };

        let cache_defaults = CacheConfig::default();
        let cache = CacheConfig {
            max_size: env_parse("CONDUCTOR_CACHE_MAX_SIZE", cache_defaults.max_size)?,
            default_ttl: Duration::from_secs(env_parse(
                "CONDUCTOR_CACHE_TTL_SECS",
                cache_defaults.default_ttl.as_secs(),
            )?),
            sweep_interval: Duration::from_secs(env_parse(
                "CONDUCTOR_CACHE_SWEEP_SECS",
                cache_defaults.sweep_interval.as_secs(),
            )?),
        };

        let routing = match std::env::var("CONDUCTOR_ROUTING_FILE") {
            Ok(path) => RoutingConfig::load(Path::new(&path))?,
            Err(_) => RoutingConfig::default(),
        };

        let config = Self {
            scheduler,
            cache,
            routing,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.cache.max_size == 0 {
            anyhow::bail!("CONDUCTOR_CACHE_MAX_SIZE must be at least 1");
        }
        if self.cache.sweep_interval.is_zero() {
            anyhow::bail!("CONDUCTOR_CACHE_SWEEP_SECS must be at least 1");
        }
        if self.scheduler.max_log_length == 0 {
            anyhow::bail!("CONDUCTOR_MAX_LOG_LENGTH must be at least 1");
        }
        Ok(())
    }
}

/// Load the nearest `.env` (current directory or an ancestor) into the process
/// environment without overriding variables that are already set.
///
/// Returns the file that was loaded. Runs before logging is initialised, so it
/// does not log; `RUST_LOG` set in `.env` then applies to the subscriber.
pub fn load_dotenv() -> Result<Option<PathBuf>, dotenvy::Error> {
    let cwd = std::env::current_dir().map_err(dotenvy::Error::Io)?;
    load_dotenv_from(&cwd)
}

/// [`load_dotenv`] starting the search at `dir`.
pub fn load_dotenv_from(dir: &Path) -> Result<Option<PathBuf>, dotenvy::Error> {
    for candidate in dir.ancestors().map(|ancestor| ancestor.join(".env")) {
        if candidate.is_file() {
            dotenvy::from_path(&candidate)?;
            return Ok(Some(candidate));
        }
    }
    Ok(None)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        Err(_) => Ok(default),
    }
}

fn env_csv(key: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect(),
        Err(_) => default.iter().map(|s| (*s).to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_config_keeps_declaration_order() {
        let raw = r#"
            default_actor = "planner"

            [[keyword_routes]]
            actor = "reviewer"
            keywords = ["review", "audit"]

            [[keyword_routes]]
            actor = "coder"
            keywords = ["implement", "code"]

            [[sequence]]
            from = "planner"
            to = "coder"
        "#;

        let routing = RoutingConfig::from_toml_str(raw).unwrap();
        assert_eq!(routing.default_actor.as_deref(), Some("planner"));
        let order: Vec<&str> = routing
            .keyword_routes
            .iter()
            .map(|r| r.actor.as_str())
            .collect();
        assert_eq!(order, vec!["reviewer", "coder"]);
        assert_eq!(
            routing.sequence,
            vec![SequenceStep {
                from: "planner".to_string(),
                to: "coder".to_string()
            }]
        );
    }

    #[test]
    fn test_routing_config_tables_are_optional() {
        let routing = RoutingConfig::from_toml_str("default_actor = \"lead\"").unwrap();
        assert!(routing.keyword_routes.is_empty());
        assert!(routing.sequence.is_empty());
    }

    #[test]
    fn test_malformed_routing_config_is_rejected() {
        assert!(RoutingConfig::from_toml_str("keyword_routes = 3").is_err());
    }

    #[test]
    fn test_validate_rejects_zero_cache_size() {
        let mut config = ConductorConfig::default();
        assert!(config.validate().is_ok());
        config.cache.max_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_dotenv_found_in_ancestor_directory() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(
            root.path().join(".env"),
            "CONDUCTOR_TEST_DOTENV_TURNS=7\n",
        )
        .unwrap();

        let loaded = load_dotenv_from(&nested).unwrap();
        assert_eq!(loaded, Some(root.path().join(".env")));
        assert_eq!(
            env_parse("CONDUCTOR_TEST_DOTENV_TURNS", 0u32).unwrap(),
            7
        );
        std::env::remove_var("CONDUCTOR_TEST_DOTENV_TURNS");
    }

    #[test]
    fn test_env_csv_trims_and_drops_blanks() {
        std::env::set_var("CONDUCTOR_TEST_MARKERS", " DONE , ,TERMINATE ");
        assert_eq!(
            env_csv("CONDUCTOR_TEST_MARKERS", &["x"]),
            vec!["DONE".to_string(), "TERMINATE".to_string()]
        );
        std::env::remove_var("CONDUCTOR_TEST_MARKERS");
        assert_eq!(env_csv("CONDUCTOR_TEST_MARKERS", &["x"]), vec!["x".to_string()]);
    }
}
