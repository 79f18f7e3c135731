use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Secrets that ship in sample `.env` files and must never be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me", "change-me-to-a-random-string", "dev-secret-change-me"];

/// Upper bounds on token lifetimes: one day for access, one year for refresh.
pub const MAX_ACCESS_TTL_MIN: u64 = 24 * 60;
pub const MAX_REFRESH_TTL_DAYS: u64 = 365;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is empty")]
    MissingSecret(&'static str),
    #[error("{0} is still a placeholder value")]
    PlaceholderSecret(&'static str),
    #[error("JWT_ACCESS_SECRET and JWT_REFRESH_SECRET must differ")]
    SharedSecret,
    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },
    #[error("{0} must be greater than zero")]
    ZeroTtl(&'static str),
}

/// Process configuration, read once at startup and handed to each component.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub db_readers: usize,
    pub db_busy_timeout: Duration,
    pub request_timeout: Duration,
    pub cors_origin: String,
    pub cookie: CookieConfig,
    pub tokens: TokenConfig,
    pub seed: SeedConfig,
}

#[derive(Debug, Clone, Default)]
pub struct CookieConfig {
    pub secure: bool,
    pub domain: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct SeedAccount {
    pub login: String,
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub dept: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SeedConfig {
    pub depts: bool,
    /// Support accounts (`SEED_ADMIN*`, `SEED_ADMIN2*`) that are enabled.
    pub support: Vec<SeedAccount>,
    pub user: Option<SeedAccount>,
    pub tickets: bool,
    pub tickets_per_user: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let access_minutes: u64 = env.parse("JWT_ACCESS_TTL_MIN", 15)?;
        let refresh_days: u64 = env.parse("JWT_REFRESH_TTL_DAYS", 14)?;
        if access_minutes == 0 {
            return Err(ConfigError::ZeroTtl("JWT_ACCESS_TTL_MIN"));
        }
        if refresh_days == 0 {
            return Err(ConfigError::ZeroTtl("JWT_REFRESH_TTL_DAYS"));
        }
        if access_minutes > MAX_ACCESS_TTL_MIN {
            return Err(ConfigError::InvalidValue {
                key: "JWT_ACCESS_TTL_MIN",
                value: access_minutes.to_string(),
            });
        }
        if refresh_days > MAX_REFRESH_TTL_DAYS {
            return Err(ConfigError::InvalidValue {
                key: "JWT_REFRESH_TTL_DAYS",
                value: refresh_days.to_string(),
            });
        }

        let mut support = Vec::new();
        if env.flag("SEED_ADMIN", true)? {
            support.push(env.account(
                "SEED_ADMIN",
                ["admin", "admin@local.test", "admin12345", "Marina", "Shpegel", "+7 (495) 123-45-67", ""],
            ));
        }
        if env.flag("SEED_ADMIN2", false)? {
            support.push(env.account(
                "SEED_ADMIN2",
                ["support", "support@local.test", "support12345", "Sergey", "Ivanov", "+7 (495) 999-88-88", "IT Support"],
            ));
        }
        let user = if env.flag("SEED_USER", true)? {
            Some(env.account(
                "SEED_USER",
                ["user1", "user1@local.test", "user12345", "Ivan", "Petrov", "+7 (495) 999-88-77", ""],
            ))
        } else {
            None
        };

        Ok(Self {
            host: env.string("HELPDESK_HOST", "0.0.0.0"),
            port: env.parse("HELPDESK_PORT", 8080)?,
            db_path: env.string("HELPDESK_DB_PATH", "helpdesk.db").into(),
            db_readers: env.parse("HELPDESK_DB_READERS", 4)?,
            db_busy_timeout: Duration::from_millis(env.parse("HELPDESK_DB_BUSY_TIMEOUT_MS", 5000)?),
            request_timeout: Duration::from_secs(env.parse("HELPDESK_REQUEST_TIMEOUT_SECS", 30)?),
            cors_origin: env.string("CORS_ORIGIN", "http://localhost:5173"),
            cookie: CookieConfig {
                secure: env.flag("COOKIE_SECURE", false)?,
                domain: env.get("COOKIE_DOMAIN"),
            },
            tokens: TokenConfig {
                access_secret: env.string("JWT_ACCESS_SECRET", ""),
                refresh_secret: env.string("JWT_REFRESH_SECRET", ""),
                access_ttl: Duration::from_secs(access_minutes * 60),
                refresh_ttl: Duration::from_secs(refresh_days * 24 * 60 * 60),
            },
            seed: SeedConfig {
                depts: env.flag("SEED_DEPTS", true)?,
                support,
                user,
                tickets: env.flag("SEED_TICKETS", true)?,
                tickets_per_user: env.parse("SEED_TICKETS_PER_USER", 6)?,
            },
        })
    }
}

impl TokenConfig {
    /// Reject secrets that would make every token forgeable or interchangeable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_secret("JWT_ACCESS_SECRET", &self.access_secret)?;
        check_secret("JWT_REFRESH_SECRET", &self.refresh_secret)?;
        if self.access_secret == self.refresh_secret {
            return Err(ConfigError::SharedSecret);
        }
        if self.access_ttl.is_zero() {
            return Err(ConfigError::ZeroTtl("JWT_ACCESS_TTL_MIN"));
        }
        if self.refresh_ttl.is_zero() {
            return Err(ConfigError::ZeroTtl("JWT_REFRESH_TTL_DAYS"));
        }
        if self.access_ttl > Duration::from_secs(MAX_ACCESS_TTL_MIN * 60) {
            return Err(ConfigError::InvalidValue {
                key: "JWT_ACCESS_TTL_MIN",
                value: (self.access_ttl.as_secs() / 60).to_string(),
            });
        }
        if self.refresh_ttl > Duration::from_secs(MAX_REFRESH_TTL_DAYS * 24 * 60 * 60) {
            return Err(ConfigError::InvalidValue {
                key: "JWT_REFRESH_TTL_DAYS",
                value: (self.refresh_ttl.as_secs() / (24 * 60 * 60)).to_string(),
            });
        }
        Ok(())
    }
}

fn check_secret(name: &'static str, secret: &str) -> Result<(), ConfigError> {
    if secret.trim().is_empty() {
        return Err(ConfigError::MissingSecret(name));
    }
    if PLACEHOLDER_SECRETS.contains(&secret) {
        return Err(ConfigError::PlaceholderSecret(name));
    }
    Ok(())
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T: std::str::FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        match self.get(key) {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue { key, value }),
            None => Ok(default),
        }
    }

    fn flag(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key).as_deref() {
            None => Ok(default),
            Some("true") | Some("1") => Ok(true),
            Some("false") | Some("0") => Ok(false),
            Some(other) => Err(ConfigError::InvalidValue {
                key,
                value: other.to_string(),
            }),
        }
    }

    /// Read `<prefix>_LOGIN`, `_EMAIL`, `_PASSWORD`, `_FIRST`, `_LAST`, `_PHONE`, `_DEPT`.
    fn account(&self, prefix: &str, defaults: [&str; 7]) -> SeedAccount {
        let [login, email, password, first, last, phone, dept] = defaults;
        let optional = |suffix: &str, default: &str| {
            self.get(&format!("{prefix}_{suffix}"))
                .or_else(|| (!default.is_empty()).then(|| default.to_string()))
        };

        SeedAccount {
            login: self.string(&format!("{prefix}_LOGIN"), login),
            email: self.string(&format!("{prefix}_EMAIL"), email),
            password: self.string(&format!("{prefix}_PASSWORD"), password),
            first_name: self.string(&format!("{prefix}_FIRST"), first),
            last_name: self.string(&format!("{prefix}_LAST"), last),
            phone: optional("PHONE", phone),
            dept: optional("DEPT", dept),
        }
    }
}
