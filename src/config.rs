//! Environment-driven application configuration.

use anyhow::Context;
use chrono_tz::Tz;
use figment::Figment;
use figment::providers::Env;
use fundu::{DurationParser, TimeUnit};
use serde::{Deserialize, Deserializer};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub database_url: String,
    #[serde(
        default = "default_shutdown_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub shutdown_timeout: Duration,
    /// Origin used to build checkout return URLs, e.g. `https://play.example.com`.
    #[serde(default = "default_public_origin")]
    pub public_origin: String,

    #[serde(default = "default_facility_timezone", deserialize_with = "deserialize_tz")]
    pub facility_timezone: Tz,
    #[serde(default = "default_opening_hour")]
    pub opening_hour: u32,
    #[serde(default = "default_closing_hour")]
    pub closing_hour: u32,

    /// How long a pending booking or registration holds its slot while payment completes.
    #[serde(default = "default_booking_hold", deserialize_with = "deserialize_duration")]
    pub booking_hold: Duration,
    #[serde(default = "default_session_ttl", deserialize_with = "deserialize_duration")]
    pub session_ttl: Duration,
    #[serde(
        default = "default_maintenance_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub maintenance_interval: Duration,

    pub stripe_secret_key: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    #[serde(default = "default_stripe_api_base")]
    pub stripe_api_base: String,
    pub stripe_price_basic: Option<String>,
    pub stripe_price_premium: Option<String>,
    pub stripe_price_elite: Option<String>,

    /// Account that is granted the `admin` role on startup, if it exists.
    pub seed_admin_email: Option<String>,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn load() -> anyhow::Result<Self> {
        Self::from_figment(Figment::new().merge(Env::raw()))
    }

    pub fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        let config: Config = figment.extract().context("Failed to load config")?;
        if config.opening_hour >= config.closing_hour || config.closing_hour > 24 {
            anyhow::bail!(
                "invalid opening hours: {}..{}",
                config.opening_hour,
                config.closing_hour
            );
        }
        Ok(config)
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(8)
}

fn default_public_origin() -> String {
    "http://localhost:8080".to_string()
}

fn default_facility_timezone() -> Tz {
    chrono_tz::America::Chicago
}

fn default_opening_hour() -> u32 {
    6
}

fn default_closing_hour() -> u32 {
    22
}

fn default_booking_hold() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_session_ttl() -> Duration {
    Duration::from_secs(30 * 24 * 60 * 60)
}

fn default_maintenance_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_stripe_api_base() -> String {
    "https://api.stripe.com".to_string()
}

/// Parse a human duration such as `15m`, `8s`, `30d` or a bare number of seconds.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let parser = DurationParser::with_time_units(&[
        TimeUnit::MilliSecond,
        TimeUnit::Second,
        TimeUnit::Minute,
        TimeUnit::Hour,
        TimeUnit::Day,
    ]);
    let parsed = parser
        .parse(value.trim())
        .map_err(|e| format!("invalid duration '{value}': {e}"))?;
    Duration::try_from(parsed).map_err(|e| format!("invalid duration '{value}': {e}"))
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

fn deserialize_tz<'de, D>(deserializer: D) -> Result<Tz, D::Error>
where
    D: Deserializer<'de>,
{
    let name = String::deserialize(deserializer)?;
    name.parse::<Tz>()
        .map_err(|e| serde::de::Error::custom(format!("unknown time zone '{name}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::providers::Serialized;

    fn base() -> Figment {
        Figment::new().merge(Serialized::default(
            "database_url",
            "postgres://localhost/rally",
        ))
    }

    #[test]
    fn defaults_apply() {
        let config = Config::from_figment(base()).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.booking_hold, Duration::from_secs(900));
        assert_eq!(config.facility_timezone, chrono_tz::America::Chicago);
        assert!(config.stripe_secret_key.is_none());
    }

    #[test]
    fn durations_accept_units_and_seconds() {
        let config = Config::from_figment(
            base()
                .merge(Serialized::default("booking_hold", "10m"))
                .merge(Serialized::default("shutdown_timeout", 3))
                .merge(Serialized::default("session_ttl", "7d")),
        )
        .unwrap();
        assert_eq!(config.booking_hold, Duration::from_secs(600));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(3));
        assert_eq!(config.session_ttl, Duration::from_secs(7 * 86400));
    }

    #[test]
    fn rejects_unknown_timezone() {
        let result =
            Config::from_figment(base().merge(Serialized::default("facility_timezone", "Mars/Base")));
        assert!(result.is_err());
    }

    #[test]
    fn rejects_inverted_opening_hours() {
        let result = Config::from_figment(
            base()
                .merge(Serialized::default("opening_hour", 20))
                .merge(Serialized::default("closing_hour", 8)),
        );
        assert!(result.is_err());
    }

    #[test]
    fn parse_duration_rejects_garbage() {
        assert!(parse_duration("soon").is_err());
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
    }
}
