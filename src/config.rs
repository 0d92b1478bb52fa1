//! Configuration - all tunable parameters in one place.
//!
//! `ConfigFile` is what a TOML file (or the CLI) provides, every field
//! optional. `resolve()` turns it into a `Config` where every field is
//! concrete.

use crate::error::ConfigError;
use log::{debug, info, warn};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Master configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Prefetch engine
    pub preload: PreloadConfig,
    /// Simulated reader used by the demo binary
    pub demo: DemoConfig,
}

/// Prefetch engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreloadConfig {
    /// Worker threads; bounds concurrent pipeline calls across all sessions
    pub max_workers: usize,
    /// How many items ahead of the current one to prefetch
    pub lookahead_depth: usize,
    /// Give up on a single pipeline call after this long (None = wait forever)
    pub item_timeout: Option<Duration>,
    /// Language used when the caller does not pick one
    pub default_language: String,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            max_workers: 2,
            lookahead_depth: 2,
            item_timeout: None,
            default_language: "en-US".to_string(),
        }
    }
}

/// Demo reader configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoConfig {
    /// Simulated cost of analyzing one page
    pub analyze_time: Duration,
    /// Simulated time the reader spends on each page
    pub read_time: Duration,
    /// Fail every Nth page (0 = never)
    pub fail_every: usize,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            analyze_time: Duration::from_millis(300),
            read_time: Duration::from_millis(250),
            fail_every: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// ConfigFile: deserialized from TOML (all fields optional)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub preload: PreloadConfigFile,
    pub demo: DemoConfigFile,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PreloadConfigFile {
    pub max_workers: Option<usize>,
    pub lookahead_depth: Option<usize>,
    pub item_timeout_ms: Option<u64>,
    pub language: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DemoConfigFile {
    pub analyze_ms: Option<u64>,
    pub read_ms: Option<u64>,
    pub fail_every: Option<usize>,
}

/// Values the CLI may override.
#[derive(Debug, Default)]
pub struct CliOverrides {
    pub max_workers: Option<usize>,
    pub lookahead_depth: Option<usize>,
    pub item_timeout_ms: Option<u64>,
    pub language: Option<String>,
    pub analyze_ms: Option<u64>,
    pub read_ms: Option<u64>,
    pub fail_every: Option<usize>,
}

impl ConfigFile {
    /// Parse TOML text.
    pub fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Read and parse a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file = Self::parse(&text, path)?;
        info!("config: loaded {}", path.display());
        Ok(file)
    }

    /// Load the explicit path if given, else the default location.
    /// A missing default file yields an empty config.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                debug!("config: no config file, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Merge CLI values (overwrites non-None fields).
    pub fn merge_cli(&mut self, cli: CliOverrides) {
        fn merge<T: std::fmt::Debug>(name: &str, slot: &mut Option<T>, value: Option<T>) {
            if let Some(v) = value {
                debug!("config: CLI override {name}={v:?}");
                *slot = Some(v);
            }
        }
        merge("max_workers", &mut self.preload.max_workers, cli.max_workers);
        merge("lookahead_depth", &mut self.preload.lookahead_depth, cli.lookahead_depth);
        merge("item_timeout_ms", &mut self.preload.item_timeout_ms, cli.item_timeout_ms);
        merge("language", &mut self.preload.language, cli.language);
        merge("analyze_ms", &mut self.demo.analyze_ms, cli.analyze_ms);
        merge("read_ms", &mut self.demo.read_ms, cli.read_ms);
        merge("fail_every", &mut self.demo.fail_every, cli.fail_every);
    }

    /// Resolve to a Config by applying defaults to missing fields.
    pub fn resolve(self) -> Config {
        let preload_defaults = PreloadConfig::default();
        let demo_defaults = DemoConfig::default();

        let mut max_workers = self.preload.max_workers.unwrap_or(preload_defaults.max_workers);
        if max_workers == 0 {
            warn!("config: max_workers must be at least 1, using 1");
            max_workers = 1;
        }

        let config = Config {
            preload: PreloadConfig {
                max_workers,
                lookahead_depth: self
                    .preload
                    .lookahead_depth
                    .unwrap_or(preload_defaults.lookahead_depth),
                item_timeout: self
                    .preload
                    .item_timeout_ms
                    .map(Duration::from_millis)
                    .or(preload_defaults.item_timeout),
                default_language: self
                    .preload
                    .language
                    .unwrap_or(preload_defaults.default_language),
            },
            demo: DemoConfig {
                analyze_time: self
                    .demo
                    .analyze_ms
                    .map(Duration::from_millis)
                    .unwrap_or(demo_defaults.analyze_time),
                read_time: self
                    .demo
                    .read_ms
                    .map(Duration::from_millis)
                    .unwrap_or(demo_defaults.read_time),
                fail_every: self.demo.fail_every.unwrap_or(demo_defaults.fail_every),
            },
        };
        info!(
            "config: resolved max_workers={}, lookahead_depth={}, item_timeout={:?}, \
             language={}, analyze_time={}ms, read_time={}ms, fail_every={}",
            config.preload.max_workers,
            config.preload.lookahead_depth,
            config.preload.item_timeout,
            config.preload.default_language,
            config.demo.analyze_time.as_millis(),
            config.demo.read_time.as_millis(),
            config.demo.fail_every,
        );
        config
    }
}

/// Resolve the XDG config path.
fn config_path() -> Option<PathBuf> {
    let config_dir = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))?;
    Some(config_dir.join("pageahead").join("config.toml"))
}
