use crate::error::{HarvestError, Result};
use crate::models::ValidityPolicy;
use std::env;
use std::time::Duration;
use url::Url;

/// Default liveness targets, tried in order
pub const DEFAULT_TEST_URLS: &[&str] = &[
    "http://httpbin.org/ip",
    "http://icanhazip.com/",
    "http://ipinfo.io/ip",
];

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Pool policy
    pub pool: PoolConfig,
    /// Health checker configuration
    pub checker: CheckerConfig,
    /// Outbound HTTP configuration for sources and sync
    pub request: RequestConfig,
    /// Local files
    pub storage: StorageConfig,
    /// Remote list synchronization
    pub sync: SyncConfig,
    /// Read-only API server
    pub api: ApiServerConfig,
    /// Logging configuration
    pub log: LogConfig,
    /// Hours between cycles in continuous mode
    pub run_interval_hours: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Maximum number of active entries (default: 1000)
    pub max_size: usize,
    /// Minimum score for an entry to count as valid (default: 0.3)
    pub min_score: f64,
    /// Minimum success rate for an entry to count as valid (default: 0.5)
    pub min_success_rate: f64,
    /// Failure count at which an entry is banned (default: 3)
    pub ban_threshold: u64,
    /// Multiplicative decay applied by `decay_scores` (default: 0.95)
    pub score_decay: f64,
    /// Seconds between decay/recheck rounds in serve mode (default: 300)
    pub health_check_interval: u64,
}

impl PoolConfig {
    pub fn validity(&self) -> ValidityPolicy {
        ValidityPolicy {
            min_score: self.min_score,
            min_success_rate: self.min_success_rate,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        let validity = ValidityPolicy::default();
        Self {
            max_size: 1000,
            min_score: validity.min_score,
            min_success_rate: validity.min_success_rate,
            ban_threshold: 3,
            score_decay: 0.95,
            health_check_interval: 300,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Timeout for each probe attempt against one target
    pub timeout: Duration,
    /// Maximum probes in flight
    pub max_concurrent: usize,
    /// Targets tried in order until one responds
    pub test_urls: Vec<Url>,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_concurrent: 30,
            test_urls: DEFAULT_TEST_URLS
                .iter()
                .filter_map(|u| Url::parse(u).ok())
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestConfig {
    /// Per-attempt request timeout
    pub timeout: Duration,
    /// Attempts per request
    pub retries: u32,
    /// Base delay between attempts
    pub retry_interval: Duration,
    /// Concurrent page fetches per source
    pub fetch_concurrency: usize,
    /// Overall deadline for one source adapter
    pub source_timeout: Duration,
    /// Source adapter names to skip
    pub disabled_sources: Vec<String>,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            retries: 3,
            retry_interval: Duration::from_secs(2),
            fetch_concurrency: 5,
            source_timeout: Duration::from_secs(60),
            disabled_sources: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Structured pool snapshot
    pub pool_file: String,
    /// Flat `host:port` export
    pub export_file: String,
    /// Number of best entries exported and synced
    pub export_limit: usize,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Access token; sync is skipped without one
    pub token: Option<String>,
    pub owner: String,
    pub repo: String,
    pub path: String,
    pub commit_message: String,
    pub api_url: String,
}

#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Start the API alongside the harvester
    pub enabled: bool,
    /// Port for the API server (default: 8001)
    pub port: u16,
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Allowed CORS origins (comma-separated, empty = localhost only)
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let config = Config {
            pool: PoolConfig {
                max_size: parse_env("POOL_MAX_SIZE", "1000")?,
                min_score: parse_env("POOL_MIN_SCORE", "0.3")?,
                min_success_rate: parse_env("POOL_MIN_SUCCESS_RATE", "0.5")?,
                ban_threshold: parse_env("POOL_BAN_THRESHOLD", "3")?,
                score_decay: parse_env("POOL_SCORE_DECAY", "0.95")?,
                health_check_interval: get_env_or("POOL_HEALTH_CHECK_INTERVAL", "300")
                    .parse()
                    .unwrap_or(300),
            },
            checker: CheckerConfig {
                timeout: Duration::from_secs(
                    get_env_or("CHECK_TIMEOUT", "5").parse().unwrap_or(5),
                ),
                max_concurrent: parse_env("CHECK_MAX_CONCURRENT", "30")?,
                test_urls: parse_test_urls(&get_env_or(
                    "CHECK_TEST_URLS",
                    &DEFAULT_TEST_URLS.join(","),
                ))?,
            },
            request: RequestConfig {
                timeout: Duration::from_secs(
                    get_env_or("REQUEST_TIMEOUT", "10").parse().unwrap_or(10),
                ),
                retries: get_env_or("REQUEST_RETRIES", "3").parse().unwrap_or(3),
                retry_interval: Duration::from_secs(
                    get_env_or("REQUEST_RETRY_INTERVAL", "2")
                        .parse()
                        .unwrap_or(2),
                ),
                fetch_concurrency: get_env_or("FETCH_MAX_CONCURRENT", "5")
                    .parse()
                    .unwrap_or(5),
                source_timeout: Duration::from_secs(
                    get_env_or("SOURCE_TIMEOUT", "60").parse().unwrap_or(60),
                ),
                disabled_sources: split_list(&get_env_or("SOURCES_DISABLED", "")),
            },
            storage: StorageConfig {
                pool_file: get_env_or("POOL_FILE", "proxy_pool.json"),
                export_file: get_env_or("EXPORT_FILE", "valid_proxies.txt"),
                export_limit: get_env_or("EXPORT_LIMIT", "1000").parse().unwrap_or(1000),
            },
            sync: SyncConfig {
                token: env::var("GITHUB_TOKEN")
                    .ok()
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty()),
                owner: get_env_or("GITHUB_OWNER", "parserpp"),
                repo: get_env_or("GITHUB_REPO", "ip_ports"),
                path: get_env_or("GITHUB_PATH", "/proxyinfo.txt"),
                commit_message: get_env_or("GITHUB_COMMIT_MSG", "Update proxy list"),
                api_url: get_env_or("GITHUB_API_URL", "https://api.github.com"),
            },
            api: ApiServerConfig {
                enabled: get_env_or("API_ENABLED", "false").parse().unwrap_or(false),
                port: get_env_or("API_PORT", "8001").parse().map_err(|_| {
                    HarvestError::InvalidConfig("API_PORT must be a valid port number".into())
                })?,
                host: get_env_or("API_HOST", "0.0.0.0"),
                cors_origins: split_list(&get_env_or("CORS_ORIGINS", "")),
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
            run_interval_hours: get_env_or("RUN_INTERVAL_HOURS", "6").parse().unwrap_or(6),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        let pool = &self.pool;
        if pool.max_size == 0 {
            return Err(HarvestError::InvalidConfig(
                "POOL_MAX_SIZE must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&pool.min_score) {
            return Err(HarvestError::InvalidConfig(
                "POOL_MIN_SCORE must be within [0, 1]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&pool.min_success_rate) {
            return Err(HarvestError::InvalidConfig(
                "POOL_MIN_SUCCESS_RATE must be within [0, 1]".into(),
            ));
        }
        if !(pool.score_decay > 0.0 && pool.score_decay <= 1.0) {
            return Err(HarvestError::InvalidConfig(
                "POOL_SCORE_DECAY must be within (0, 1]".into(),
            ));
        }
        if pool.ban_threshold == 0 {
            return Err(HarvestError::InvalidConfig(
                "POOL_BAN_THRESHOLD must be at least 1".into(),
            ));
        }
        if self.checker.max_concurrent == 0 {
            return Err(HarvestError::InvalidConfig(
                "CHECK_MAX_CONCURRENT must be at least 1".into(),
            ));
        }
        if self.checker.test_urls.is_empty() {
            return Err(HarvestError::InvalidConfig(
                "CHECK_TEST_URLS must name at least one URL".into(),
            ));
        }
        Ok(())
    }

    /// Get the API server address
    pub fn api_addr(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }

    /// Delay between continuous-mode cycles
    pub fn run_interval(&self) -> Duration {
        Duration::from_secs(self.run_interval_hours.max(1).saturating_mul(3600))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            checker: CheckerConfig::default(),
            request: RequestConfig::default(),
            storage: StorageConfig {
                pool_file: "proxy_pool.json".to_string(),
                export_file: "valid_proxies.txt".to_string(),
                export_limit: 1000,
            },
            sync: SyncConfig {
                token: None,
                owner: "parserpp".to_string(),
                repo: "ip_ports".to_string(),
                path: "/proxyinfo.txt".to_string(),
                commit_message: "Update proxy list".to_string(),
                api_url: "https://api.github.com".to_string(),
            },
            api: ApiServerConfig {
                enabled: false,
                port: 8001,
                host: "0.0.0.0".to_string(),
                cors_origins: Vec::new(),
            },
            log: LogConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
            run_interval_hours: 6,
        }
    }
}

fn parse_test_urls(raw: &str) -> Result<Vec<Url>> {
    split_list(raw)
        .into_iter()
        .map(|raw| {
            let url = Url::parse(&raw).map_err(|e| {
                HarvestError::InvalidConfig(format!("CHECK_TEST_URLS entry {} is invalid: {}", raw, e))
            })?;
            match url.scheme() {
                "http" | "https" if url.host_str().is_some() => Ok(url),
                _ => Err(HarvestError::InvalidConfig(format!(
                    "CHECK_TEST_URLS entry {} must be an http(s) URL with a host",
                    raw
                ))),
            }
        })
        .collect()
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse a required-valid environment variable
fn parse_env<T: std::str::FromStr>(key: &str, default: &str) -> Result<T> {
    get_env_or(key, default)
        .trim()
        .parse()
        .map_err(|_| HarvestError::InvalidConfig(format!("{} has an invalid value", key)))
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const CONFIG_ENV_KEYS: &[&str] = &[
        "POOL_MAX_SIZE",
        "POOL_MIN_SCORE",
        "POOL_MIN_SUCCESS_RATE",
        "POOL_BAN_THRESHOLD",
        "POOL_SCORE_DECAY",
        "POOL_HEALTH_CHECK_INTERVAL",
        "CHECK_TIMEOUT",
        "CHECK_MAX_CONCURRENT",
        "CHECK_TEST_URLS",
        "REQUEST_TIMEOUT",
        "REQUEST_RETRIES",
        "REQUEST_RETRY_INTERVAL",
        "FETCH_MAX_CONCURRENT",
        "SOURCE_TIMEOUT",
        "SOURCES_DISABLED",
        "POOL_FILE",
        "EXPORT_FILE",
        "EXPORT_LIMIT",
        "GITHUB_TOKEN",
        "GITHUB_OWNER",
        "GITHUB_REPO",
        "GITHUB_PATH",
        "GITHUB_COMMIT_MSG",
        "GITHUB_API_URL",
        "API_ENABLED",
        "API_HOST",
        "API_PORT",
        "CORS_ORIGINS",
        "LOG_LEVEL",
        "LOG_FORMAT",
        "RUN_INTERVAL_HOURS",
    ];

    struct EnvGuard {
        saved: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(keys: &[&str]) -> Self {
            let saved = keys
                .iter()
                .map(|&key| {
                    let old = env::var(key).ok();
                    env::remove_var(key);
                    (key.to_string(), old)
                })
                .collect();

            Self { saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.saved.drain(..) {
                match value {
                    Some(v) => env::set_var(key, v),
                    None => env::remove_var(key),
                }
            }
        }
    }

    #[test]
    fn test_config_from_env_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        let config = Config::from_env().unwrap();

        assert_eq!(config.pool, PoolConfig::default());
        assert_eq!(config.checker.max_concurrent, 30);
        assert_eq!(config.checker.timeout, Duration::from_secs(5));
        assert_eq!(config.checker.test_urls.len(), 3);
        assert_eq!(config.checker.test_urls[0].as_str(), "http://httpbin.org/ip");
        assert_eq!(config.storage.pool_file, "proxy_pool.json");
        assert_eq!(config.storage.export_limit, 1000);
        assert!(config.sync.token.is_none());
        assert_eq!(config.sync.path, "/proxyinfo.txt");
        assert!(!config.api.enabled);
        assert_eq!(config.run_interval(), Duration::from_secs(6 * 3600));
    }

    #[test]
    fn test_config_from_env_overrides() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("POOL_MAX_SIZE", "50");
        env::set_var("POOL_BAN_THRESHOLD", "5");
        env::set_var("CHECK_TEST_URLS", "https://example.com/, http://example.org/ip");
        env::set_var("SOURCES_DISABLED", "kuaidaili, qiyun");
        env::set_var("GITHUB_TOKEN", "  secret ");
        env::set_var("API_PORT", "9001");
        env::set_var("CORS_ORIGINS", "https://a.example, https://b.example");

        let config = Config::from_env().unwrap();

        assert_eq!(config.pool.max_size, 50);
        assert_eq!(config.pool.ban_threshold, 5);
        assert_eq!(config.checker.test_urls.len(), 2);
        assert_eq!(config.checker.test_urls[1].host_str(), Some("example.org"));
        assert_eq!(
            config.request.disabled_sources,
            vec!["kuaidaili".to_string(), "qiyun".to_string()]
        );
        assert_eq!(config.sync.token.as_deref(), Some("secret"));
        assert_eq!(config.api.port, 9001);
        assert_eq!(config.api.cors_origins.len(), 2);
    }

    #[test]
    fn test_config_rejects_out_of_range_policy() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("POOL_MIN_SCORE", "1.5");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, HarvestError::InvalidConfig(_)));

        env::set_var("POOL_MIN_SCORE", "0.3");
        env::set_var("POOL_SCORE_DECAY", "0");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, HarvestError::InvalidConfig(_)));

        env::set_var("POOL_SCORE_DECAY", "0.9");
        env::set_var("POOL_MAX_SIZE", "0");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, HarvestError::InvalidConfig(_)));
    }

    #[test]
    fn test_config_rejects_unparseable_numbers() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("POOL_MAX_SIZE", "lots");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, HarvestError::InvalidConfig(_)));
    }

    #[test]
    fn test_config_rejects_bad_test_urls() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("CHECK_TEST_URLS", "ftp://example.com/file");
        assert!(matches!(
            Config::from_env().unwrap_err(),
            HarvestError::InvalidConfig(_)
        ));

        env::set_var("CHECK_TEST_URLS", "not a url");
        assert!(matches!(
            Config::from_env().unwrap_err(),
            HarvestError::InvalidConfig(_)
        ));

        env::set_var("CHECK_TEST_URLS", " , ");
        assert!(matches!(
            Config::from_env().unwrap_err(),
            HarvestError::InvalidConfig(_)
        ));
    }

    #[test]
    fn test_config_formatters() {
        let config = Config::default();
        assert_eq!(config.api_addr(), "0.0.0.0:8001");

        let config = Config {
            run_interval_hours: 0,
            ..Config::default()
        };
        assert_eq!(config.run_interval(), Duration::from_secs(3600));
    }

    #[test]
    fn test_run_interval_saturates_on_huge_hours() {
        let config = Config {
            run_interval_hours: u64::MAX,
            ..Config::default()
        };
        assert_eq!(config.run_interval(), Duration::from_secs(u64::MAX));

        let config = Config {
            run_interval_hours: u64::MAX / 3600 + 1,
            ..Config::default()
        };
        assert_eq!(config.run_interval(), Duration::from_secs(u64::MAX));
    }
}
