use clap::{Args, Parser, ValueEnum};

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Config {
    #[command(flatten)]
    pub server: ServerConfig,

    #[command(flatten)]
    pub database: DatabaseConfig,

    #[command(flatten)]
    pub auth: AuthConfig,

    #[command(flatten)]
    pub messaging: MessagingConfig,

    #[command(flatten)]
    pub realtime: RealtimeConfig,

    #[command(flatten)]
    pub pubsub: PubSubConfig,

    #[command(flatten)]
    pub storage: StorageConfig,

    #[command(flatten)]
    pub health: HealthConfig,

    #[command(flatten)]
    pub telemetry: TelemetryConfig,
}

#[derive(Clone, Debug, Args)]
pub struct ServerConfig {
    /// Host to listen on
    #[arg(long, env = "MENTORLINK_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port for the public API
    #[arg(long, env = "MENTORLINK_PORT", default_value_t = 5000)]
    pub port: u16,

    /// Port for the management server (health probes)
    #[arg(long, env = "MENTORLINK_MGMT_PORT", default_value_t = 9090)]
    pub mgmt_port: u16,

    /// Upper bound for a single HTTP request
    #[arg(long, env = "MENTORLINK_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,

    /// How long to wait for background tasks during shutdown
    #[arg(long, env = "MENTORLINK_SHUTDOWN_TIMEOUT_SECS", default_value_t = 5)]
    pub shutdown_timeout_secs: u64,
}

#[derive(Clone, Debug, Args)]
pub struct DatabaseConfig {
    /// Database connection URL
    #[arg(long = "database-url", env = "MENTORLINK_DATABASE_URL")]
    pub url: String,

    #[arg(long = "db-max-connections", env = "MENTORLINK_DB_MAX_CONNECTIONS", default_value_t = 20)]
    pub max_connections: u32,

    #[arg(long = "db-min-connections", env = "MENTORLINK_DB_MIN_CONNECTIONS", default_value_t = 2)]
    pub min_connections: u32,

    #[arg(long = "db-acquire-timeout-secs", env = "MENTORLINK_DB_ACQUIRE_TIMEOUT_SECS", default_value_t = 5)]
    pub acquire_timeout_secs: u64,

    #[arg(long = "db-idle-timeout-secs", env = "MENTORLINK_DB_IDLE_TIMEOUT_SECS", default_value_t = 600)]
    pub idle_timeout_secs: u64,

    #[arg(long = "db-max-lifetime-secs", env = "MENTORLINK_DB_MAX_LIFETIME_SECS", default_value_t = 1800)]
    pub max_lifetime_secs: u64,
}

#[derive(Clone, Debug, Args)]
pub struct AuthConfig {
    /// Secret used to verify bearer tokens issued by the account service
    #[arg(long, env = "MENTORLINK_JWT_SECRET")]
    pub jwt_secret: String,
}

#[derive(Clone, Debug, Args)]
pub struct MessagingConfig {
    /// Page size used when a client does not ask for one
    #[arg(long, env = "MENTORLINK_DEFAULT_PAGE_SIZE", default_value_t = 50)]
    pub default_page_size: i64,

    /// Largest page a client may request
    #[arg(long, env = "MENTORLINK_MAX_PAGE_SIZE", default_value_t = 100)]
    pub max_page_size: i64,

    /// Maximum number of conversations returned by the conversation list
    #[arg(long, env = "MENTORLINK_CONVERSATION_LIST_LIMIT", default_value_t = 50)]
    pub conversation_list_limit: i64,

    /// Maximum number of search hits
    #[arg(long, env = "MENTORLINK_SEARCH_LIMIT", default_value_t = 50)]
    pub search_limit: i64,

    /// Maximum length of a text message in characters
    #[arg(long, env = "MENTORLINK_MAX_CONTENT_LENGTH", default_value_t = 5000)]
    pub max_content_length: usize,

    /// Length of the last-message preview stored on a conversation
    #[arg(long, env = "MENTORLINK_SNIPPET_LENGTH", default_value_t = 100)]
    pub snippet_length: usize,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            default_page_size: 50,
            max_page_size: 100,
            conversation_list_limit: 50,
            search_limit: 50,
            max_content_length: 5000,
            snippet_length: 100,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum RealtimeBackend {
    /// In-process presence and delivery; valid for a single instance only
    #[default]
    Local,
    /// Redis-backed presence with pub/sub fan-out across instances
    Shared,
}

#[derive(Clone, Debug, Args)]
pub struct RealtimeConfig {
    /// Presence and delivery backend
    #[arg(long = "realtime-backend", env = "MENTORLINK_REALTIME_BACKEND", value_enum, default_value_t = RealtimeBackend::Local)]
    pub backend: RealtimeBackend,

    /// Time-to-live for presence entries; sessions refresh at half this interval
    #[arg(long, env = "MENTORLINK_PRESENCE_TTL_SECS", default_value_t = 60)]
    pub presence_ttl_secs: u64,

    /// Upper bound for a presence lookup before the user is treated as offline
    #[arg(long, env = "MENTORLINK_PRESENCE_LOOKUP_TIMEOUT_MS", default_value_t = 250)]
    pub presence_lookup_timeout_ms: u64,

    /// Size of the per-connection outbound event buffer
    #[arg(long, env = "MENTORLINK_WS_OUTBOUND_BUFFER_SIZE", default_value_t = 64)]
    pub outbound_buffer_size: usize,

    /// How often to reclaim closed connection channels
    #[arg(long, env = "MENTORLINK_RELAY_GC_INTERVAL_SECS", default_value_t = 60)]
    pub gc_interval_secs: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            backend: RealtimeBackend::Local,
            presence_ttl_secs: 60,
            presence_lookup_timeout_ms: 250,
            outbound_buffer_size: 64,
            gc_interval_secs: 60,
        }
    }
}

#[derive(Clone, Debug, Args)]
pub struct PubSubConfig {
    /// Redis URL; required when the realtime backend is `shared`
    #[arg(long = "redis-url", env = "MENTORLINK_REDIS_URL")]
    pub url: Option<String>,

    /// Key prefix for presence entries
    #[arg(long, env = "MENTORLINK_PRESENCE_PREFIX", default_value = "mentorlink:presence:")]
    pub presence_prefix: String,

    /// Channel prefix for relayed realtime events
    #[arg(long, env = "MENTORLINK_CHANNEL_PREFIX", default_value = "mentorlink:realtime:")]
    pub channel_prefix: String,

    /// Capacity of the in-process channel fed by the pub/sub listener
    #[arg(long, env = "MENTORLINK_PUBSUB_CHANNEL_CAPACITY", default_value_t = 1024)]
    pub channel_capacity: usize,

    #[arg(long, env = "MENTORLINK_PUBSUB_MIN_BACKOFF_SECS", default_value_t = 1)]
    pub min_backoff_secs: u64,

    #[arg(long, env = "MENTORLINK_PUBSUB_MAX_BACKOFF_SECS", default_value_t = 30)]
    pub max_backoff_secs: u64,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            url: Some("redis://localhost:6379".to_string()),
            presence_prefix: "mentorlink:presence:".to_string(),
            channel_prefix: "mentorlink:realtime:".to_string(),
            channel_capacity: 1024,
            min_backoff_secs: 1,
            max_backoff_secs: 30,
        }
    }
}

#[derive(Clone, Debug, Args)]
pub struct StorageConfig {
    /// Bucket that receives message attachments
    #[arg(long = "storage-bucket", env = "MENTORLINK_STORAGE_BUCKET", default_value = "mentorlink-attachments")]
    pub bucket: String,

    #[arg(long = "storage-region", env = "MENTORLINK_STORAGE_REGION", default_value = "us-east-1")]
    pub region: String,

    /// Custom S3 endpoint (useful for MinIO)
    #[arg(long = "storage-endpoint", env = "MENTORLINK_STORAGE_ENDPOINT")]
    pub endpoint: Option<String>,

    #[arg(long = "storage-access-key", env = "MENTORLINK_STORAGE_ACCESS_KEY")]
    pub access_key: Option<String>,

    #[arg(long = "storage-secret-key", env = "MENTORLINK_STORAGE_SECRET_KEY")]
    pub secret_key: Option<String>,

    /// Force path style (http://host/bucket/key)
    #[arg(long = "storage-force-path-style", env = "MENTORLINK_STORAGE_FORCE_PATH_STYLE", default_value_t = false)]
    pub force_path_style: bool,

    /// Base URL clients use to fetch uploaded objects
    #[arg(
        long = "storage-public-url",
        env = "MENTORLINK_STORAGE_PUBLIC_URL",
        default_value = "https://mentorlink-attachments.s3.amazonaws.com"
    )]
    pub public_base_url: String,

    /// Max attachment size in bytes (Default: 10MB)
    #[arg(long = "storage-max-size-bytes", env = "MENTORLINK_STORAGE_MAX_SIZE_BYTES", default_value_t = 10_485_760)]
    pub max_size_bytes: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: "mentorlink-attachments".to_string(),
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key: None,
            secret_key: None,
            force_path_style: false,
            public_base_url: "https://mentorlink-attachments.s3.amazonaws.com".to_string(),
            max_size_bytes: 10_485_760,
        }
    }
}

#[derive(Clone, Debug, Args)]
pub struct HealthConfig {
    #[arg(long, env = "MENTORLINK_HEALTH_DB_TIMEOUT_MS", default_value_t = 2000)]
    pub db_timeout_ms: u64,

    #[arg(long, env = "MENTORLINK_HEALTH_PUBSUB_TIMEOUT_MS", default_value_t = 2000)]
    pub pubsub_timeout_ms: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Debug, Default, Args)]
pub struct TelemetryConfig {
    /// OTLP collector endpoint; exporting is disabled when unset
    #[arg(long, env = "MENTORLINK_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    #[arg(long, env = "MENTORLINK_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Config {
    #[must_use]
    pub fn load() -> Self {
        Self::parse()
    }
}
