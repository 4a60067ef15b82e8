use std::env;
use std::time::Duration;

/// Smallest part the destination store accepts (except the last one).
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Maximum number of parts in a single multipart upload.
pub const MAX_PART_COUNT: i32 = 10_000;

/// Tuning for the streaming transfer engine
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Bytes buffered per upload part (default: 50 MB)
    pub part_size: usize,

    /// Part uploads allowed in flight at once (default: 4)
    pub part_concurrency: usize,

    /// Attempts per part before the failure is fatal (default: 3)
    pub part_max_attempts: u32,

    /// Base delay of the exponential part retry backoff (default: 500 ms)
    pub part_retry_base_delay: Duration,

    /// Persist progress at least this often in bytes, even without a percentage change
    /// (default: 64 MB)
    pub progress_byte_threshold: u64,

    /// Upper bound on waiting for the last progress write (default: 5 s)
    pub progress_flush_timeout: Duration,

    /// Upper bound on the best-effort abort call (default: 30 s)
    pub abort_timeout: Duration,

    /// Source connect timeout (default: 30 s)
    pub connect_timeout: Duration,

    /// Source idle read timeout (default: 5 min)
    pub read_timeout: Duration,

    /// How long terminal records are kept before the purge worker deletes them (default: 7 days)
    pub record_ttl_hours: i64,

    /// Reject non-HTTPS source URLs (default: true)
    pub require_https: bool,

    /// Interval between purge runs (default: 1 hour)
    pub purge_interval: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            part_size: 50 * 1024 * 1024, // 50 MB
            part_concurrency: 4,
            part_max_attempts: 3,
            part_retry_base_delay: Duration::from_millis(500),
            progress_byte_threshold: 64 * 1024 * 1024, // 64 MB
            progress_flush_timeout: Duration::from_secs(5),
            abort_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(300),
            record_ttl_hours: 7 * 24,
            require_https: true,
            purge_interval: Duration::from_secs(3600),
        }
    }
}

impl TransferConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            part_size: env_parse("PART_SIZE")
                .unwrap_or(default.part_size)
                .max(MIN_PART_SIZE),

            part_concurrency: env_parse("PART_CONCURRENCY")
                .unwrap_or(default.part_concurrency)
                .max(1),

            part_max_attempts: env_parse("PART_MAX_ATTEMPTS")
                .unwrap_or(default.part_max_attempts)
                .max(1),

            part_retry_base_delay: env_parse("PART_RETRY_BASE_MS")
                .map(Duration::from_millis)
                .unwrap_or(default.part_retry_base_delay),

            progress_byte_threshold: env_parse("PROGRESS_BYTE_THRESHOLD")
                .unwrap_or(default.progress_byte_threshold),

            progress_flush_timeout: env_parse("PROGRESS_FLUSH_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(default.progress_flush_timeout),

            abort_timeout: env_parse("ABORT_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(default.abort_timeout),

            connect_timeout: env_parse("CONNECT_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(default.connect_timeout),

            read_timeout: env_parse("READ_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(default.read_timeout),

            record_ttl_hours: env_parse("RECORD_TTL_HOURS").unwrap_or(default.record_ttl_hours),

            require_https: env::var("REQUIRE_HTTPS")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(default.require_https),

            purge_interval: env_parse("PURGE_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(default.purge_interval),
        }
    }

    /// Create config for development (plain HTTP sources, minimum part size, fast retries)
    pub fn development() -> Self {
        Self {
            part_size: MIN_PART_SIZE,
            part_retry_base_delay: Duration::from_millis(10),
            require_https: false,
            record_ttl_hours: 24,
            ..Self::default()
        }
    }

    /// Create config for production (HTTPS only, env overrides honoured)
    pub fn production() -> Self {
        Self {
            require_https: true,
            ..Self::from_env()
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}
