use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub postgres: PostgresConfig,
    pub redis: RedisConfig,
    pub llm: LlmConfig,
    pub schema: SchemaConfig,
    pub sql_guardrails: SqlGuardrailConfig,
    pub security: SecurityConfig,
    pub prompts: PromptsConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    /// Connection string for the target database
    pub dsn: String,
    pub min_pool_size: u32,
    pub max_pool_size: u32,
    /// Also bounds pool acquisition and query execution
    pub statement_timeout_ms: u64,
    /// Rows kept in the response sample
    pub sample_limit: usize,
    /// Hard LIMIT ceiling enforced by the validator
    pub max_limit: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    pub schema_cache_ttl_s: u64,
    pub embedding_cache_ttl_s: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub rate_limit_per_minute: u32,
    pub reasoner_retry_config: RetryConfig,
    pub synthesizer_retry_config: RetryConfig,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub attempts: u32,
    pub backoff_seconds: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// Snapshot staleness threshold and cache TTL, seconds
    pub refresh_interval_s: u64,
    pub max_schema_slice_bytes: usize,
    pub ranker_top_n: usize,
    pub fk_depth: u8,
    /// Optional precomputed TF-IDF model for the ranker's embedding mode
    pub embedding_store_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SqlGuardrailConfig {
    pub row_threshold: f64,
    pub cost_threshold: f64,
    pub max_estimated_time_ms: u64,
    pub require_where_for_large_tables: bool,
    pub disallowed_functions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub enforce_read_only_role: bool,
    pub enable_rate_limiting: bool,
    pub max_requests_per_minute: usize,
    pub ip_whitelist: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    pub examples_path: String,
    pub reasoner_schema: String,
    pub synthesizer_schema: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub audit_log_path: String,
}

/// Command line arguments for configuration overrides
#[derive(Parser, Debug, Clone)]
#[command(name = "isaqe")]
#[command(version, about = "ISAQE - Intelligent Schema-Aware Query Engine")]
pub struct CommandLineArgs {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Server host (overrides config file)
    #[arg(long, value_name = "HOST")]
    pub server_host: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Postgres DSN (overrides config file)
    #[arg(long, value_name = "DSN")]
    pub postgres_dsn: Option<String>,

    /// Redis URL (overrides config file)
    #[arg(long, value_name = "URL")]
    pub redis_url: Option<String>,

    /// Logging level (overrides config file, e.g., "info,isaqe=debug")
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Audit log path (overrides config file)
    #[arg(long, value_name = "PATH")]
    pub audit_log_path: Option<String>,
}

impl Config {
    /// Load configuration with command line, environment variable, and file support
    ///
    /// Loading order (priority from highest to lowest):
    /// 1. Command line arguments
    /// 2. Environment variables (prefixed with APP_)
    /// 3. Configuration file (config.toml)
    /// 4. Default values
    pub fn load() -> Result<Self, anyhow::Error> {
        let cli_args = CommandLineArgs::parse();

        let config_path = cli_args.config.clone().or_else(Self::find_config_file);
        let mut config = if let Some(config_path) = config_path {
            Self::from_toml(&config_path)?
        } else {
            tracing::warn!("Configuration file not found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        config.apply_cli_overrides(&cli_args);
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - APP_SERVER_HOST: Server host (default: 0.0.0.0)
    /// - APP_SERVER_PORT: Server port (default: 8000)
    /// - APP_POSTGRES_DSN: Target database connection string
    /// - APP_REDIS_URL: Schema cache URL
    /// - APP_LOG_LEVEL: Logging level (e.g., "info,isaqe=debug")
    /// - APP_AUDIT_LOG_PATH: Audit log file path
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("APP_SERVER_HOST") {
            self.server.host = host;
            tracing::info!("Override server.host from env: {}", self.server.host);
        }

        if let Ok(port) = std::env::var("APP_SERVER_PORT")
            && let Ok(port) = port.parse()
        {
            self.server.port = port;
            tracing::info!("Override server.port from env: {}", self.server.port);
        }

        if let Ok(dsn) = std::env::var("APP_POSTGRES_DSN") {
            self.postgres.dsn = dsn;
            tracing::info!("Override postgres.dsn from env");
        }

        if let Ok(url) = std::env::var("APP_REDIS_URL") {
            self.redis.url = url;
            tracing::info!("Override redis.url from env");
        }

        if let Ok(level) = std::env::var("APP_LOG_LEVEL") {
            self.logging.level = level;
            tracing::info!("Override logging.level from env: {}", self.logging.level);
        }

        if let Ok(path) = std::env::var("APP_AUDIT_LOG_PATH") {
            self.observability.audit_log_path = path;
            tracing::info!(
                "Override observability.audit_log_path from env: {}",
                self.observability.audit_log_path
            );
        }
    }

    /// Apply command line argument overrides (highest priority)
    fn apply_cli_overrides(&mut self, args: &CommandLineArgs) {
        if let Some(host) = &args.server_host {
            self.server.host = host.clone();
            tracing::info!("Override server.host from CLI: {}", self.server.host);
        }

        if let Some(port) = args.server_port {
            self.server.port = port;
            tracing::info!("Override server.port from CLI: {}", self.server.port);
        }

        if let Some(dsn) = &args.postgres_dsn {
            self.postgres.dsn = dsn.clone();
            tracing::info!("Override postgres.dsn from CLI");
        }

        if let Some(url) = &args.redis_url {
            self.redis.url = url.clone();
            tracing::info!("Override redis.url from CLI");
        }

        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
            tracing::info!("Override logging.level from CLI: {}", self.logging.level);
        }

        if let Some(path) = &args.audit_log_path {
            self.observability.audit_log_path = path.clone();
            tracing::info!(
                "Override observability.audit_log_path from CLI: {}",
                self.observability.audit_log_path
            );
        }
    }

    /// Validate configuration; construction fails early on violation
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        if self.postgres.dsn.is_empty() {
            anyhow::bail!("postgres.dsn cannot be empty");
        }
        if self.postgres.min_pool_size == 0 {
            anyhow::bail!("postgres.min_pool_size must be >= 1");
        }
        if self.postgres.max_pool_size < self.postgres.min_pool_size {
            anyhow::bail!("postgres.max_pool_size must be >= postgres.min_pool_size");
        }
        if self.postgres.statement_timeout_ms < 100 {
            anyhow::bail!("postgres.statement_timeout_ms must be >= 100");
        }
        if self.postgres.sample_limit == 0 || self.postgres.max_limit == 0 {
            anyhow::bail!("postgres.sample_limit and postgres.max_limit must be >= 1");
        }

        if !(0.0..=1.0).contains(&self.llm.temperature) {
            anyhow::bail!("llm.temperature must be within [0, 1]");
        }
        if self.llm.max_tokens == 0 {
            anyhow::bail!("llm.max_tokens must be >= 1");
        }
        if self.llm.reasoner_retry_config.attempts == 0
            || self.llm.synthesizer_retry_config.attempts == 0
        {
            anyhow::bail!("llm retry attempts must be >= 1");
        }

        if self.schema.refresh_interval_s < 60 {
            anyhow::bail!("schema.refresh_interval_s must be >= 60");
        }
        if self.schema.max_schema_slice_bytes < 1024 {
            anyhow::bail!("schema.max_schema_slice_bytes must be >= 1024");
        }
        if self.schema.ranker_top_n == 0 {
            anyhow::bail!("schema.ranker_top_n must be >= 1");
        }
        if self.schema.fk_depth > 4 {
            anyhow::bail!("schema.fk_depth must be within [0, 4]");
        }

        if self.sql_guardrails.row_threshold < 1.0 || self.sql_guardrails.cost_threshold < 1.0 {
            anyhow::bail!("sql_guardrails thresholds must be >= 1");
        }

        if self.redis.schema_cache_ttl_s < 60 || self.redis.embedding_cache_ttl_s < 60 {
            anyhow::bail!("redis cache TTLs must be >= 60");
        }

        if self.security.max_requests_per_minute == 0 {
            anyhow::bail!("security.max_requests_per_minute must be >= 1");
        }

        Ok(())
    }

    fn find_config_file() -> Option<String> {
        let possible_paths =
            ["conf/config.toml", "config.toml", "./conf/config.toml", "./config.toml"];

        for path in &possible_paths {
            if Path::new(path).exists() {
                return Some(path.to_string());
            }
        }
        None
    }

    fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8000 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info,isaqe=debug".to_string(), file: Some("logs/isaqe.log".to_string()) }
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            dsn: "postgres://localhost:5432/isaqe".to_string(),
            min_pool_size: 5,
            max_pool_size: 20,
            statement_timeout_ms: 5000,
            sample_limit: 500,
            max_limit: 1000,
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            schema_cache_ttl_s: 7200,
            embedding_cache_ttl_s: 86400,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            max_tokens: 1200,
            rate_limit_per_minute: 100,
            reasoner_retry_config: RetryConfig::default(),
            synthesizer_retry_config: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { attempts: 3, backoff_seconds: 1.0 }
    }
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            refresh_interval_s: 3600,
            max_schema_slice_bytes: 8192,
            ranker_top_n: 8,
            fk_depth: 2,
            embedding_store_path: None,
        }
    }
}

impl Default for SqlGuardrailConfig {
    fn default() -> Self {
        Self {
            row_threshold: 500_000.0,
            cost_threshold: 100_000.0,
            max_estimated_time_ms: 2000,
            require_where_for_large_tables: true,
            disallowed_functions: Vec::new(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enforce_read_only_role: true,
            enable_rate_limiting: true,
            max_requests_per_minute: 60,
            ip_whitelist: Vec::new(),
        }
    }
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            examples_path: "prompts/examples.json".to_string(),
            reasoner_schema: "prompts/reasoner_schema.json".to_string(),
            synthesizer_schema: "prompts/synthesizer_schema.json".to_string(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { audit_log_path: "logs/audit.log".to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_inverted_pool_sizes() {
        let mut config = Config::default();
        config.postgres.min_pool_size = 30;
        config.postgres.max_pool_size = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_temperature() {
        let mut config = Config::default();
        config.llm.temperature = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_excessive_fk_depth() {
        let mut config = Config::default();
        config.schema.fk_depth = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_spec_sections_from_toml() {
        let raw = r#"
            [postgres]
            dsn = "postgres://app:app@db:5432/claims"
            max_limit = 100

            [sql_guardrails]
            disallowed_functions = ["pg_sleep", "pg_read_file"]

            [security]
            max_requests_per_minute = 2
        "#;
        let config: Config = toml::from_str(raw).expect("valid TOML");
        assert_eq!(config.postgres.max_limit, 100);
        assert_eq!(config.postgres.sample_limit, 500);
        assert_eq!(config.sql_guardrails.disallowed_functions.len(), 2);
        assert_eq!(config.security.max_requests_per_minute, 2);
        assert!(config.validate().is_ok());
    }
}
