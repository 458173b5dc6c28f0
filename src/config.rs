use std::str::FromStr;

use anyhow::{bail, Context};
use chrono::Duration;

use crate::auth::jwt::TokenSettings;
use crate::repository::InvalidationMode;

#[derive(Clone)]
pub struct Config {
    pub db_path: String,
    pub bind_addr: String,
    pub tokens: TokenSettings,
    pub verification_code_ttl: Duration,
    pub access_token: Option<String>,
    pub invalidation: InvalidationMode,
}

impl FromStr for InvalidationMode {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "detached" => Ok(InvalidationMode::Detached),
            "awaited" => Ok(InvalidationMode::Awaited),
            other => bail!("unknown invalidation mode {other:?}"),
        }
    }
}

fn var_or(key: &str, default: &str) -> String {
    dotenvy::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match dotenvy::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|err| anyhow::anyhow!("{err}"))
            .with_context(|| format!("invalid {key}")),
        Err(_) => Ok(default),
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    let value = dotenvy::var(key).with_context(|| format!("{key} must be set"))?;
    if value.trim().is_empty() {
        bail!("{key} must not be empty");
    }
    Ok(value)
}

/// Build a TTL from a configured count, rejecting non-positive or overflowing values.
fn positive_ttl(
    key: &str,
    amount: i64,
    unit: fn(i64) -> Option<Duration>,
) -> anyhow::Result<Duration> {
    if amount <= 0 {
        bail!("{key} must be positive, got {amount}");
    }
    unit(amount).with_context(|| format!("{key} is out of range: {amount}"))
}

impl Config {
    /// Read the process environment, after loading an optional `.env`.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let refresh_secret = required("REFRESH_TOKEN_SECRET")?;
        let authorization_secret = required("AUTHORIZATION_TOKEN_SECRET")?;
        if refresh_secret == authorization_secret {
            bail!("REFRESH_TOKEN_SECRET and AUTHORIZATION_TOKEN_SECRET must differ");
        }

        let tokens = TokenSettings {
            refresh_secret,
            authorization_secret,
            refresh_ttl: positive_ttl(
                "REFRESH_TOKEN_TTL_DAYS",
                parse_var("REFRESH_TOKEN_TTL_DAYS", 30)?,
                Duration::try_days,
            )?,
            authorization_ttl: positive_ttl(
                "AUTHORIZATION_TOKEN_TTL_MINUTES",
                parse_var("AUTHORIZATION_TOKEN_TTL_MINUTES", 60)?,
                Duration::try_minutes,
            )?,
        };

        Ok(Self {
            db_path: var_or("SESSION_DB_PATH", "sessiondb"),
            bind_addr: var_or("SESSION_BIND_ADDR", "0.0.0.0:3000"),
            tokens,
            verification_code_ttl: positive_ttl(
                "VERIFICATION_CODE_TTL_MINUTES",
                parse_var("VERIFICATION_CODE_TTL_MINUTES", 10)?,
                Duration::try_minutes,
            )?,
            access_token: dotenvy::var("SERVICE_ACCESS_TOKEN")
                .ok()
                .filter(|token| !token.is_empty()),
            invalidation: parse_var("CACHE_INVALIDATION", InvalidationMode::Detached)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalidation_mode_parses_case_insensitively() {
        assert_eq!(
            "Awaited".parse::<InvalidationMode>().unwrap(),
            InvalidationMode::Awaited
        );
        assert_eq!(
            " detached ".parse::<InvalidationMode>().unwrap(),
            InvalidationMode::Detached
        );
        assert!("eventually".parse::<InvalidationMode>().is_err());
    }

    #[test]
    fn ttl_must_be_positive_and_in_range() {
        assert_eq!(
            positive_ttl("TTL_DAYS", 30, Duration::try_days).unwrap(),
            Duration::days(30)
        );
        assert!(positive_ttl("TTL_DAYS", 0, Duration::try_days).is_err());
        assert!(positive_ttl("TTL_MINUTES", -5, Duration::try_minutes).is_err());

        let err = positive_ttl("TTL_DAYS", i64::MAX, Duration::try_days).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }
}
