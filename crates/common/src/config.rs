use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Redis connection string. When set, idempotency keys are shared across instances.
    pub redis_url: Option<String>,

    /// JWT secret used to verify bearer tokens
    pub jwt_secret: String,

    /// Port the API server listens on (default: 3000)
    pub api_port: u16,

    /// Shared secret guarding the cron trigger endpoint
    pub cron_secret: Option<String>,

    /// Dispatch settings shared by the API and the worker
    pub dispatch: DispatchConfig,

    /// Firebase Cloud Messaging settings
    pub fcm: FcmConfig,

    /// Per-user limit on test pushes
    pub rate_limit: RateLimitConfig,
}

/// Tuning knobs for the dispatch cycle.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Interval between worker cycles in milliseconds (default: 5000)
    pub interval_ms: u64,

    /// Maximum jobs selected per cycle (default: 10)
    pub batch_size: u32,

    /// Failed attempts before a job is dead-lettered (default: 5)
    pub max_retries: u32,

    /// How long a claim stays valid before another cycle may take the job over (default: 60)
    pub claim_lease_secs: u64,

    /// Run one cycle right after enqueueing to cut delivery latency (default: true)
    pub run_after_enqueue: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5000,
            batch_size: 10,
            max_retries: 5,
            claim_lease_secs: 60,
            run_after_enqueue: true,
        }
    }
}

/// Largest batch a dispatch cycle may select.
pub const MAX_BATCH_SIZE: u32 = 10;

/// Fixed-window limit on test pushes per user.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Window length in milliseconds (default: 15 minutes)
    pub window_ms: u64,

    /// Requests admitted per window (default: 5)
    pub max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: 15 * 60 * 1000,
            max_requests: 5,
        }
    }
}

/// Credentials for the FCM HTTP v1 API.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FcmConfig {
    /// Firebase project id; push delivery is disabled when unset
    pub project_id: Option<String>,

    /// OAuth2 access token with the `firebase.messaging` scope
    pub access_token: Option<String>,

    /// Base URL of the FCM API (default: https://fcm.googleapis.com)
    pub endpoint: String,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DB_MAX_CONNECTIONS must be a valid u32"))?,
            redis_url: std::env::var("REDIS_URL").ok(),
            jwt_secret: std::env::var("JWT_SECRET")
                .map_err(|_| anyhow::anyhow!("JWT_SECRET environment variable is required"))?,
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("API_PORT must be a valid u16"))?,
            cron_secret: std::env::var("CRON_SECRET").ok(),
            dispatch: DispatchConfig::from_env()?,
            fcm: FcmConfig {
                project_id: std::env::var("FCM_PROJECT_ID").ok(),
                access_token: std::env::var("FCM_ACCESS_TOKEN").ok(),
                endpoint: std::env::var("FCM_ENDPOINT")
                    .unwrap_or_else(|_| "https://fcm.googleapis.com".to_string()),
            },
            rate_limit: RateLimitConfig::from_env()?,
        })
    }
}

impl DispatchConfig {
    fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        Self {
            interval_ms: std::env::var("DISPATCH_INTERVAL_MS")
                .map(|v| v.parse())
                .unwrap_or(Ok(defaults.interval_ms))
                .map_err(|_| anyhow::anyhow!("DISPATCH_INTERVAL_MS must be a valid u64"))?,
            batch_size: std::env::var("DISPATCH_BATCH_SIZE")
                .map(|v| v.parse())
                .unwrap_or(Ok(defaults.batch_size))
                .map_err(|_| anyhow::anyhow!("DISPATCH_BATCH_SIZE must be a valid u32"))?,
            max_retries: std::env::var("DISPATCH_MAX_RETRIES")
                .map(|v| v.parse())
                .unwrap_or(Ok(defaults.max_retries))
                .map_err(|_| anyhow::anyhow!("DISPATCH_MAX_RETRIES must be a valid u32"))?,
            claim_lease_secs: std::env::var("DISPATCH_CLAIM_LEASE_SECS")
                .map(|v| v.parse())
                .unwrap_or(Ok(defaults.claim_lease_secs))
                .map_err(|_| anyhow::anyhow!("DISPATCH_CLAIM_LEASE_SECS must be a valid u64"))?,
            run_after_enqueue: std::env::var("DISPATCH_AFTER_ENQUEUE")
                .map(|v| v.parse())
                .unwrap_or(Ok(defaults.run_after_enqueue))
                .map_err(|_| anyhow::anyhow!("DISPATCH_AFTER_ENQUEUE must be true or false"))?,
        }
        .validate()
    }

    /// Reject settings the dispatcher cannot honour.
    pub fn validate(self) -> anyhow::Result<Self> {
        if !(1..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            anyhow::bail!(
                "DISPATCH_BATCH_SIZE must be between 1 and {}, got {}",
                MAX_BATCH_SIZE,
                self.batch_size
            );
        }
        if self.max_retries == 0 {
            anyhow::bail!("DISPATCH_MAX_RETRIES must be at least 1");
        }
        if self.claim_lease_secs == 0 {
            anyhow::bail!("DISPATCH_CLAIM_LEASE_SECS must be at least 1");
        }
        Ok(self)
    }
}

impl RateLimitConfig {
    fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let config = Self {
            window_ms: std::env::var("RATE_LIMIT_WINDOW_MS")
                .map(|v| v.parse())
                .unwrap_or(Ok(defaults.window_ms))
                .map_err(|_| anyhow::anyhow!("RATE_LIMIT_WINDOW_MS must be a valid u64"))?,
            max_requests: std::env::var("RATE_LIMIT_MAX_REQUESTS")
                .map(|v| v.parse())
                .unwrap_or(Ok(defaults.max_requests))
                .map_err(|_| anyhow::anyhow!("RATE_LIMIT_MAX_REQUESTS must be a valid u32"))?,
        };

        if config.window_ms == 0 {
            anyhow::bail!("RATE_LIMIT_WINDOW_MS must be at least 1");
        }
        Ok(config)
    }
}
