//! Configuration for the Civitas indexer.
//!
//! Loaded from a TOML file. Values may reference environment variables with
//! `${VAR_NAME}`; references inside TOML comments are left untouched.

use alloy::primitives::Address;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration for the indexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Network configuration
    pub network: NetworkConfig,

    /// Contract addresses
    pub contracts: ContractsConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Sync configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// Reconciliation configuration
    #[serde(default)]
    pub reconcile: ReconcileConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Ethereum JSON-RPC URL
    pub rpc_url: String,

    /// Chain ID (e.g., 11155111 for Sepolia)
    pub chain_id: u64,
}

/// Contract addresses configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractsConfig {
    /// WelfareBenefit contract address
    pub welfare_benefit: Address,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite URL (e.g., "sqlite://civitas.db")
    pub url: String,

    /// Maximum pool connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum pool connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Sync configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// First block to index (contract deployment block)
    #[serde(default)]
    pub start_block: u64,

    /// Seconds between polls once caught up
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Maximum blocks per log query
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,

    /// Blocks to wait before treating a block as final
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            start_block: 0,
            poll_interval_secs: default_poll_interval_secs(),
            batch_size: default_batch_size(),
            confirmations: default_confirmations(),
        }
    }
}

/// Reconciliation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Run the periodic reconciler alongside the supervisor
    #[serde(default = "default_reconcile_enabled")]
    pub enabled: bool,

    /// Seconds between reconciliation passes
    #[serde(default = "default_reconcile_interval_secs")]
    pub interval_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            enabled: default_reconcile_enabled(),
            interval_secs: default_reconcile_interval_secs(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty)
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

fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    1
}

fn default_poll_interval_secs() -> u64 {
    12
}

fn default_batch_size() -> u64 {
    1000
}

fn default_confirmations() -> u64 {
    6
}

fn default_reconcile_enabled() -> bool {
    true
}

fn default_reconcile_interval_secs() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Example
    /// ```no_run
    /// # use civitas_indexer::config::Config;
    /// let config = Config::from_file("indexer.toml")?;
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let expanded = expand_env_vars(&contents)
            .with_context(|| format!("Failed to expand config file: {}", path.display()))?;

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
        if self.network.rpc_url.trim().is_empty() {
            bail!("Network RPC URL cannot be empty");
        }
        if self.network.chain_id == 0 {
            bail!("Chain ID must be non-zero");
        }

        if self.contracts.welfare_benefit.is_zero() {
            bail!("Contracts welfare_benefit must be a non-zero address");
        }

        if self.database.url.trim().is_empty() {
            bail!("Database URL cannot be empty");
        }
        if self.database.max_connections == 0 {
            bail!("Database max_connections must be > 0");
        }
        if self.database.min_connections > self.database.max_connections {
            bail!(
                "Database min_connections ({}) cannot exceed max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.sync.poll_interval_secs == 0 {
            bail!("Sync poll_interval_secs must be > 0");
        }
        if self.sync.batch_size == 0 {
            bail!("Sync batch_size must be > 0");
        }

        if self.reconcile.interval_secs == 0 {
            bail!("Reconcile interval_secs must be > 0");
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            bail!(
                "Logging level must be one of: {} (got '{}')",
                valid_levels.join(", "),
                self.logging.level
            );
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            bail!(
                "Logging format must be one of: {} (got '{}')",
                valid_formats.join(", "),
                self.logging.format
            );
        }

        Ok(())
    }
}

/// TOML lexical context of the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scan {
    Bare,
    Comment,
    Basic,
    Literal,
    MultiBasic,
    MultiLiteral,
}

/// Replace `${VAR_NAME}` with the value of `VAR_NAME`.
///
/// Placeholders are expanded in values and strings of every TOML kind, but
/// not in comments. A `#` inside a string does not start a comment.
fn expand_env_vars(input: &str) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut scan = Scan::Bare;
    let mut rest = input;
    let mut line = 1;

    while let Some(ch) = rest.chars().next() {
        // Quote delimiters, longest match first
        let opens_or_closes = |delim: &str| rest.starts_with(delim);
        let next = match scan {
            Scan::Bare if opens_or_closes("\"\"\"") => Some((Scan::MultiBasic, 3)),
            Scan::Bare if opens_or_closes("'''") => Some((Scan::MultiLiteral, 3)),
            Scan::Bare if ch == '"' => Some((Scan::Basic, 1)),
            Scan::Bare if ch == '\'' => Some((Scan::Literal, 1)),
            Scan::Bare if ch == '#' => Some((Scan::Comment, 1)),
            Scan::MultiBasic if opens_or_closes("\"\"\"") => Some((Scan::Bare, 3)),
            Scan::MultiLiteral if opens_or_closes("'''") => Some((Scan::Bare, 3)),
            Scan::Basic if ch == '"' => Some((Scan::Bare, 1)),
            Scan::Literal if ch == '\'' => Some((Scan::Bare, 1)),
            _ => None,
        };
        if let Some((state, len)) = next {
            out.push_str(&rest[..len]);
            rest = &rest[len..];
            scan = state;
            continue;
        }

        // Escapes keep the escaped character out of the delimiter check
        if ch == '\\' && matches!(scan, Scan::Basic | Scan::MultiBasic) {
            let escaped: String = rest.chars().take(2).collect();
            out.push_str(&escaped);
            rest = &rest[escaped.len()..];
            continue;
        }

        if ch == '\n' {
            line += 1;
            if scan == Scan::Comment {
                scan = Scan::Bare;
            }
        }

        if scan != Scan::Comment && rest.starts_with("${") {
            let close = rest
                .find('}')
                .with_context(|| format!("Unclosed environment variable placeholder on line {}", line))?;
            let name = &rest[2..close];
            if name.is_empty() {
                bail!("Empty environment variable name on line {}", line);
            }
            if name.contains('\n') {
                bail!("Unclosed environment variable placeholder on line {}", line);
            }
            let value = std::env::var(name).with_context(|| {
                format!(
                    "Environment variable '{}' is not set (referenced on line {})",
                    name, line
                )
            })?;
            out.push_str(&value);
            rest = &rest[close + 1..];
            continue;
        }

        out.push(ch);
        rest = &rest[ch.len_utf8()..];
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
[network]
rpc_url = "https://sepolia.infura.io/v3/YOUR_API_KEY"
chain_id = 11155111

[contracts]
welfare_benefit = "0x1111111111111111111111111111111111111111"

[database]
url = "sqlite://civitas.db"
max_connections = 5

[sync]
start_block = 4500000
poll_interval_secs = 12
batch_size = 1000
confirmations = 6

[reconcile]
enabled = true
interval_secs = 300

[logging]
level = "info"
format = "json"
"#;

    #[test]
    fn test_load_example_config() {
        let config = Config::from_toml_str(EXAMPLE).unwrap();
        assert_eq!(config.network.chain_id, 11155111);
        assert_eq!(config.sync.start_block, 4500000);
        assert_eq!(config.sync.confirmations, 6);
        assert!(config.reconcile.enabled);
        assert_eq!(config.logging.format, "json");
        assert_eq!(
            config.contracts.welfare_benefit,
            "0x1111111111111111111111111111111111111111"
                .parse::<Address>()
                .unwrap()
        );
    }

    #[test]
    fn test_default_values() {
        let toml = r#"
[network]
rpc_url = "http://localhost:8545"
chain_id = 31337

[contracts]
welfare_benefit = "0x1111111111111111111111111111111111111111"

[database]
url = "sqlite://civitas.db"
"#;

        let config = Config::from_toml_str(toml).unwrap();
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.database.min_connections, 1);
        assert_eq!(config.sync.start_block, 0);
        assert_eq!(config.sync.poll_interval_secs, 12);
        assert_eq!(config.sync.batch_size, 1000);
        assert_eq!(config.sync.confirmations, 6);
        assert!(config.reconcile.enabled);
        assert_eq!(config.reconcile.interval_secs, 300);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_validation_errors() {
        let cases = [
            ("rpc_url = \"https://sepolia.infura.io/v3/YOUR_API_KEY\"", "rpc_url = \"\"", "RPC URL"),
            ("chain_id = 11155111", "chain_id = 0", "Chain ID"),
            (
                "0x1111111111111111111111111111111111111111",
                "0x0000000000000000000000000000000000000000",
                "welfare_benefit",
            ),
            ("max_connections = 5", "max_connections = 5\nmin_connections = 6", "min_connections"),
            ("batch_size = 1000", "batch_size = 0", "batch_size"),
            ("interval_secs = 300", "interval_secs = 0", "interval_secs"),
            ("level = \"info\"", "level = \"loud\"", "Logging level"),
            ("format = \"json\"", "format = \"xml\"", "Logging format"),
        ];

        for (from, to, expected) in cases {
            let toml = EXAMPLE.replace(from, to);
            let err = Config::from_toml_str(&toml).unwrap_err();
            assert!(
                err.to_string().contains(expected),
                "expected '{}' in '{}'",
                expected,
                err
            );
        }
    }

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("CIVITAS_TEST_RPC", "http://rpc.local:8545");
        let out = expand_env_vars("rpc_url = \"${CIVITAS_TEST_RPC}\"").unwrap();
        assert_eq!(out, "rpc_url = \"http://rpc.local:8545\"");
    }

    #[test]
    fn test_expand_env_vars_errors() {
        let err = expand_env_vars("x = \"${CIVITAS_TEST_SURELY_UNSET}\"").unwrap_err();
        assert!(err.to_string().contains("CIVITAS_TEST_SURELY_UNSET"));

        let err = expand_env_vars("x = \"${}\"").unwrap_err();
        assert!(err.to_string().contains("Empty"));

        let err = expand_env_vars("x = \"${OPEN\ny = 1").unwrap_err();
        assert!(err.to_string().contains("Unclosed"));
    }

    #[test]
    fn test_expand_env_vars_ignores_comments() {
        let input = "# rpc_url = \"${CIVITAS_TEST_SURELY_UNSET}\"\nchain_id = 1 # ${ALSO_UNSET}\n";
        assert_eq!(expand_env_vars(input).unwrap(), input);
    }

    #[test]
    fn test_expand_env_vars_hash_inside_strings() {
        std::env::set_var("CIVITAS_TEST_KEY", "abc");
        let input = r#"a = "x#${CIVITAS_TEST_KEY}"
b = 'y#${CIVITAS_TEST_KEY}'
c = """
# ${CIVITAS_TEST_KEY}
"""
d = "quote \" # ${CIVITAS_TEST_KEY}"
"#;
        let expected = r#"a = "x#abc"
b = 'y#abc'
c = """
# abc
"""
d = "quote \" # abc"
"#;
        assert_eq!(expand_env_vars(input).unwrap(), expected);
    }

    #[test]
    fn test_config_from_file_with_env_vars() {
        std::env::set_var("CIVITAS_TEST_CONTRACT", "0x2222222222222222222222222222222222222222");
        let toml = EXAMPLE.replace(
            "\"0x1111111111111111111111111111111111111111\"",
            "\"${CIVITAS_TEST_CONTRACT}\" # ${NOT_EXPANDED}",
        );

        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), toml).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(
            config.contracts.welfare_benefit,
            "0x2222222222222222222222222222222222222222"
                .parse::<Address>()
                .unwrap()
        );
    }

    #[test]
    fn test_shipped_sample_config_loads() {
        std::env::set_var("RPC_URL", "http://localhost:8545");
        std::env::set_var(
            "WELFARE_BENEFIT_ADDRESS",
            "0x3333333333333333333333333333333333333333",
        );
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../indexer.example.toml");

        let config = Config::from_file(path).unwrap();
        assert_eq!(config.network.chain_id, 11155111);
        assert_eq!(
            config.contracts.welfare_benefit,
            "0x3333333333333333333333333333333333333333"
                .parse::<Address>()
                .unwrap()
        );
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let err = Config::from_file("/nonexistent/civitas-indexer.toml").unwrap_err();
        let is_not_found = err.chain().any(|cause| {
            cause
                .downcast_ref::<std::io::Error>()
                .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound)
        });
        assert!(is_not_found);
    }
}
