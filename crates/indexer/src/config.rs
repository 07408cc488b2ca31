//! Configuration management for the issue-tracker indexer.
//!
//! This module handles loading configuration from:
//! - TOML files
//! - Environment variables referenced as `${VAR}` inside the file
//! - Default values (fallbacks)

use alloy::primitives::Address;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::iter::Peekable;
use std::path::Path;
use std::str::CharIndices;
use std::time::Duration;

use crate::engine::RetryPolicy;

/// Main configuration for the indexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Network configuration
    pub network: NetworkConfig,

    /// Contract addresses
    pub contracts: ContractsConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Live pipeline configuration
    #[serde(default)]
    pub listener: ListenerConfig,

    /// Dependency retry configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// WebSocket RPC endpoint (ws:// or wss://)
    pub ws_url: String,

    /// Chain ID (e.g., 80002 for Polygon Amoy)
    pub chain_id: u64,
}

/// Contract addresses configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractsConfig {
    /// IssueTracker contract address
    pub issue_tracker: Address,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL (e.g., "sqlite://issuetrack.db")
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Live pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Capacity of the queue between subscriptions and the dispatcher
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Upper bound on concurrently running event handlers (1 serialises them)
    #[serde(default = "default_max_concurrent_handlers")]
    pub max_concurrent_handlers: usize,

    /// Number of block timestamps kept in the LRU cache
    #[serde(default = "default_timestamp_cache_size")]
    pub timestamp_cache_size: usize,

    /// Replay the full history before listening, when the store holds no
    /// issues yet
    #[serde(default)]
    pub resync_on_start: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            max_concurrent_handlers: default_max_concurrent_handlers(),
            timestamp_cache_size: default_timestamp_cache_size(),
            resync_on_start: false,
        }
    }
}

/// Retry configuration for stacks whose project is not visible yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between attempts in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            interval_ms: default_interval_ms(),
        }
    }
}

impl RetryConfig {
    /// Fixed-interval policy on the tokio clock.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.max_attempts, Duration::from_millis(self.interval_ms))
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    1
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_max_concurrent_handlers() -> usize {
    16
}

fn default_timestamp_cache_size() -> usize {
    crate::listener::timestamp::DEFAULT_CACHE_SIZE
}

fn default_max_attempts() -> u32 {
    5
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// Where the scanner is inside the TOML text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Region {
    Bare,
    Comment,
    Basic,
    Literal,
    MultilineBasic,
    MultilineLiteral,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables can be referenced using `${VAR_NAME}` syntax.
    /// For example: `ws_url = "wss://polygon-amoy.infura.io/ws/v3/${INFURA_KEY}"`
    ///
    /// # Example
    /// ```no_run
    /// # use issuetrack_indexer::config::Config;
    /// let config = Config::from_file("indexer.toml")?;
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let expanded = Self::expand_env_vars(&contents)?;

        let config: Config = toml::from_str(&expanded)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: Config = toml::from_str(toml).context("Failed to parse TOML configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        let ws_url = self.network.ws_url.trim();
        if ws_url.is_empty() {
            anyhow::bail!("Network ws_url cannot be empty");
        }
        if !(ws_url.starts_with("ws://") || ws_url.starts_with("wss://")) {
            anyhow::bail!("Network ws_url must start with ws:// or wss://");
        }

        if self.network.chain_id == 0 {
            anyhow::bail!("Chain ID must be non-zero");
        }

        if self.contracts.issue_tracker.is_zero() {
            anyhow::bail!("Contracts issue_tracker must be a non-zero address");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }
        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be > 0");
        }
        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot exceed max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.listener.queue_capacity == 0 {
            anyhow::bail!("Listener queue_capacity must be > 0");
        }
        if self.listener.max_concurrent_handlers == 0 {
            anyhow::bail!("Listener max_concurrent_handlers must be > 0");
        }
        if self.listener.timestamp_cache_size == 0 {
            anyhow::bail!("Listener timestamp_cache_size must be > 0");
        }

        if self.retry.max_attempts == 0 {
            anyhow::bail!("Retry max_attempts must be > 0");
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            anyhow::bail!(
                "Logging level must be one of: {} (got '{}')",
                valid_levels.join(", "),
                self.logging.level
            );
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            anyhow::bail!(
                "Logging format must be one of: {} (got '{}')",
                valid_formats.join(", "),
                self.logging.format
            );
        }

        Ok(())
    }

    /// Expand `${VAR_NAME}` placeholders with environment variable values.
    /// `${VAR_NAME:-default}` falls back to `default` when the variable is
    /// unset or empty.
    ///
    /// Placeholders are expanded in bare values and in all four TOML string
    /// forms, but never inside `#` comments, so commented examples do not need
    /// their variables set.
    ///
    /// # Errors
    /// Returns an error for an unset variable, an empty name or a placeholder
    /// without a closing brace.
    fn expand_env_vars(input: &str) -> Result<String> {
        let mut out = String::with_capacity(input.len());
        let mut chars = input.char_indices().peekable();
        let mut region = Region::Bare;
        let mut escaped = false;

        while let Some((pos, ch)) = chars.next() {
            if escaped {
                escaped = false;
                out.push(ch);
                continue;
            }

            match (region, ch) {
                (Region::Comment, '\n') => {
                    region = Region::Bare;
                    out.push(ch);
                }
                (Region::Comment, _) => out.push(ch),
                (Region::Basic | Region::MultilineBasic, '\\') => {
                    escaped = true;
                    out.push(ch);
                }
                (_, '$') if matches!(chars.peek(), Some((_, '{'))) => {
                    chars.next();
                    let value = Self::read_placeholder(&mut chars, pos)?;
                    out.push_str(&value);
                }
                (Region::Bare, '#') => {
                    region = Region::Comment;
                    out.push(ch);
                }
                (Region::Bare, '"' | '\'') => {
                    let multiline = Self::take_triple(&mut chars, ch);
                    region = match (ch, multiline) {
                        ('"', true) => Region::MultilineBasic,
                        ('"', false) => Region::Basic,
                        (_, true) => Region::MultilineLiteral,
                        (_, false) => Region::Literal,
                    };
                    Self::push_quotes(&mut out, ch, multiline);
                }
                (Region::Basic, '"') | (Region::Literal, '\'') => {
                    region = Region::Bare;
                    out.push(ch);
                }
                (Region::MultilineBasic, '"') | (Region::MultilineLiteral, '\'') => {
                    let closing = Self::take_triple(&mut chars, ch);
                    if closing {
                        region = Region::Bare;
                    }
                    Self::push_quotes(&mut out, ch, closing);
                }
                _ => out.push(ch),
            }
        }

        Ok(out)
    }

    /// Read `NAME}` or `NAME:-default}` after a consumed `${` and look the
    /// variable up.
    fn read_placeholder(chars: &mut Peekable<CharIndices<'_>>, start: usize) -> Result<String> {
        let mut body = String::new();
        let mut closed = false;
        for (_, c) in chars.by_ref() {
            if c == '}' {
                closed = true;
                break;
            }
            body.push(c);
        }

        if !closed {
            anyhow::bail!(
                "Unclosed environment variable placeholder at position {}",
                start
            );
        }

        let (name, default) = match body.split_once(":-") {
            Some((name, default)) => (name, Some(default)),
            None => (body.as_str(), None),
        };
        if name.is_empty() {
            anyhow::bail!("Empty environment variable name at position {}", start);
        }

        match (std::env::var(name), default) {
            (Ok(value), Some(default)) if value.is_empty() => Ok(default.to_string()),
            (Ok(value), _) => Ok(value),
            (Err(_), Some(default)) => Ok(default.to_string()),
            (Err(_), None) => Err(anyhow::anyhow!(
                "Environment variable '{}' is not set (referenced at position {})",
                name,
                start
            )),
        }
    }

    /// If the next two characters are `quote`, consume them and return true.
    fn take_triple(chars: &mut Peekable<CharIndices<'_>>, quote: char) -> bool {
        let mut ahead = chars.clone();
        let triple = matches!(
            (ahead.next(), ahead.next()),
            (Some((_, a)), Some((_, b))) if a == quote && b == quote
        );
        if triple {
            chars.next();
            chars.next();
        }
        triple
    }

    fn push_quotes(out: &mut String, quote: char, triple: bool) {
        let count = if triple { 3 } else { 1 };
        out.extend(std::iter::repeat(quote).take(count));
    }
}
