use anyhow::{bail, Context};
use chrono::{FixedOffset, Offset, Utc};
use ipnet::IpNet;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub api_server: ServerConfig,
    pub auth: AuthConfig,
    pub stats: StatsConfig,
    pub views: ViewsConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// Bearer tokens accepted on admin routes. Empty disables the check.
    pub admin_tokens: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct StatsConfig {
    pub cache_ttl_ms: u64,
    /// Number of entries in the dashboard's most-viewed list
    pub top_properties: i64,
}

impl StatsConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 4000,
            top_properties: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrustedProxyMode {
    /// Only the socket peer address is used
    #[default]
    None,
    /// RFC 7239 `Forwarded`, then `X-Forwarded-For`
    Standard,
    /// `CF-Connecting-IP`
    Cloudflare,
}

#[derive(Debug, Clone)]
pub struct ViewsConfig {
    /// Offset used to derive the calendar day of a view
    pub timezone_offset: FixedOffset,
    pub trusted_proxy_mode: TrustedProxyMode,
    pub trusted_proxies: Vec<IpNet>,
    pub num_trusted_proxies: Option<usize>,
}

impl Default for ViewsConfig {
    fn default() -> Self {
        Self {
            timezone_offset: utc_offset(),
            trusted_proxy_mode: TrustedProxyMode::None,
            trusted_proxies: vec![],
            num_trusted_proxies: None,
        }
    }
}

fn utc_offset() -> FixedOffset {
    Utc.fix()
}

/// Parse a UTC offset of the form `+HH:MM`, `-HH:MM`, `+HHMM` or `Z`.
pub fn parse_utc_offset(value: &str) -> anyhow::Result<FixedOffset> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("z") || value.eq_ignore_ascii_case("utc") {
        return Ok(utc_offset());
    }

    let (sign, rest) = match value.as_bytes().first() {
        Some(b'+') => (1, &value[1..]),
        Some(b'-') => (-1, &value[1..]),
        _ => bail!("offset '{value}' must start with '+' or '-'"),
    };

    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        bail!("offset '{value}' must look like +HH:MM");
    }

    let hours: i32 = digits[..2].parse()?;
    let minutes: i32 = digits[2..].parse()?;
    if hours > 23 || minutes > 59 {
        bail!("offset '{value}' is out of range");
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .with_context(|| format!("offset '{value}' is out of range"))
}

fn parse_trusted_proxy_mode(value: &str) -> TrustedProxyMode {
    match value.to_lowercase().as_str() {
        "none" | "" => TrustedProxyMode::None,
        "standard" => TrustedProxyMode::Standard,
        "cloudflare" => TrustedProxyMode::Cloudflare,
        other => {
            tracing::warn!(
                "Unknown TRUSTED_PROXY_MODE '{other}', falling back to 'none'. Supported values: none, standard, cloudflare"
            );
            TrustedProxyMode::None
        }
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// Parse a numeric env var. Unset yields `None`; a malformed value is an error.
fn env_number<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(v) => v
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("{name} must be a number, got '{v}'")),
        Err(_) => Ok(None),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let backend_str =
            std::env::var("DATABASE_BACKEND").unwrap_or_else(|_| "sqlite".to_string());

        let backend = match backend_str.to_lowercase().as_str() {
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            _ => DatabaseBackend::Sqlite,
        };

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./homestead.db?mode=rwc".to_string());

        let max_connections = env_number::<u32>("DATABASE_MAX_CONNECTIONS")?.unwrap_or(10);

        let api_host = std::env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let api_port = env_number::<u16>("API_PORT")?.unwrap_or(8080);

        let admin_tokens = std::env::var("ADMIN_API_TOKENS")
            .map(|v| split_list(&v).map(str::to_string).collect::<Vec<_>>())
            .unwrap_or_default();

        let stats_defaults = StatsConfig::default();
        let cache_ttl_ms =
            env_number::<u64>("STATS_CACHE_TTL_MS")?.unwrap_or(stats_defaults.cache_ttl_ms);
        let top_properties = env_number::<i64>("DASHBOARD_TOP_PROPERTIES")?
            .map(|n| n.clamp(1, 100))
            .unwrap_or(stats_defaults.top_properties);

        let timezone_offset = match std::env::var("VIEW_TIMEZONE_OFFSET") {
            Ok(v) => parse_utc_offset(&v).context("invalid VIEW_TIMEZONE_OFFSET")?,
            Err(_) => utc_offset(),
        };

        let trusted_proxy_mode = std::env::var("TRUSTED_PROXY_MODE")
            .map(|v| parse_trusted_proxy_mode(&v))
            .unwrap_or_default();

        let trusted_proxies = match std::env::var("TRUSTED_PROXIES") {
            Ok(v) => split_list(&v)
                .map(|cidr| {
                    cidr.parse::<IpNet>()
                        .with_context(|| format!("invalid CIDR '{cidr}' in TRUSTED_PROXIES"))
                })
                .collect::<anyhow::Result<Vec<_>>>()?,
            Err(_) => vec![],
        };

        let num_trusted_proxies = env_number::<usize>("NUM_TRUSTED_PROXIES")?;

        Ok(Config {
            database: DatabaseConfig {
                backend,
                url: database_url,
                max_connections,
            },
            api_server: ServerConfig {
                host: api_host,
                port: api_port,
            },
            auth: AuthConfig { admin_tokens },
            stats: StatsConfig {
                cache_ttl_ms,
                top_properties,
            },
            views: ViewsConfig {
                timezone_offset,
                trusted_proxy_mode,
                trusted_proxies,
                num_trusted_proxies,
            },
        })
    }
}
