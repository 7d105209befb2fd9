use anyhow::Context;
use std::{env::var, str::FromStr};

const MAX_LOAN_DAYS: i64 = 365;
const MAX_SESSION_TTL_HOURS: i64 = 24 * 366;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    // in-memory store when unset
    pub database_url: Option<String>,
    pub library: LibraryConfig,
    pub admin: Option<AdminSeed>,
}

#[derive(Debug, Clone)]
pub struct LibraryConfig {
    pub loan_days: i64,
    pub session_ttl_hours: i64,
    pub bcrypt_cost: u32,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            loan_days: 15,
            session_ttl_hours: 24 * 7,
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }
}

// Admin account created at startup if its email is not registered yet.
#[derive(Debug, Clone)]
pub struct AdminSeed {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = LibraryConfig::default();

        let library = LibraryConfig {
            loan_days: parse_or(&lookup, "LOAN_DAYS", defaults.loan_days)?,
            session_ttl_hours: parse_or(&lookup, "SESSION_TTL_HOURS", defaults.session_ttl_hours)?,
            bcrypt_cost: parse_or(&lookup, "BCRYPT_COST", defaults.bcrypt_cost)?,
        };
        anyhow::ensure!(
            (1..=MAX_LOAN_DAYS).contains(&library.loan_days),
            "LOAN_DAYS must be between 1 and {MAX_LOAN_DAYS}"
        );
        anyhow::ensure!(
            (1..=MAX_SESSION_TTL_HOURS).contains(&library.session_ttl_hours),
            "SESSION_TTL_HOURS must be between 1 and {MAX_SESSION_TTL_HOURS}"
        );
        anyhow::ensure!(
            (4..=31).contains(&library.bcrypt_cost),
            "BCRYPT_COST must be between 4 and 31"
        );

        let admin = match (lookup("ADMIN_EMAIL"), lookup("ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some(AdminSeed {
                name: lookup("ADMIN_NAME").unwrap_or_else(|| "Administrator".to_string()),
                email,
                password,
            }),
            (None, None) => None,
            _ => anyhow::bail!("ADMIN_EMAIL and ADMIN_PASSWORD must be set together"),
        };

        Ok(Config {
            port: parse_or(&lookup, "PORT", 3000)?,
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            library,
            admin,
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(text) => text
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {name}: {text:?}")),
        None => Ok(default),
    }
}
