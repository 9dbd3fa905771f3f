//! Application configuration.
//!
//! Values come from the process environment, optionally seeded from a `.env`
//! file by `dotenvy` in `main`. Every key has a default except `DATABASE_URL`;
//! without it the service runs on the in-memory store.
//!
//! | Key | Default |
//! |---|---|
//! | `HOST` | `0.0.0.0` |
//! | `PORT` | `8083` |
//! | `DATABASE_URL` | unset (in-memory store) |
//! | `DATABASE_MAX_CONNECTIONS` | `10` |
//! | `NATS_URL` | unset (events are only logged) |
//! | `JWT_SECRET` | random per process |
//! | `JWT_EXPIRY_MINUTES` | `60` |
//! | `CURRENCY` | `USD` |
//! | `TAX_RATE` | `0` |
//! | `SHIPPING_FLAT_FEE` | `5.00` |
//! | `FREE_SHIPPING_THRESHOLD` | `50.00` (empty disables) |
//! | `ADMIN_EMAIL` / `ADMIN_PASSWORD` | unset |
//! | `LOG_FORMAT` | `pretty` (`json` for JSON lines) |

use std::str::FromStr;

use rand::{distributions::Alphanumeric, Rng};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::pricing::PricingPolicy;
use crate::domain::value_objects::Money;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub nats_url: Option<String>,
    pub jwt_secret: String,
    pub jwt_expiry_minutes: i64,
    pub currency: String,
    pub pricing: PricingPolicy,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8083,
            database_url: None,
            database_max_connections: 10,
            nats_url: None,
            jwt_secret: random_secret(),
            jwt_expiry_minutes: 60,
            currency: "USD".to_string(),
            pricing: PricingPolicy::default(),
            admin_email: None,
            admin_password: None,
            log_format: LogFormat::Pretty,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Config::default();

        if let Some(host) = get("HOST") {
            config.host = host;
        }
        if let Some(port) = get("PORT") {
            config.port = parse("PORT", &port)?;
        }
        config.database_url = get("DATABASE_URL");
        if let Some(max) = get("DATABASE_MAX_CONNECTIONS") {
            config.database_max_connections = parse("DATABASE_MAX_CONNECTIONS", &max)?;
        }
        config.nats_url = get("NATS_URL");
        match get("JWT_SECRET") {
            Some(secret) => config.jwt_secret = secret,
            None => tracing::warn!("JWT_SECRET not set, tokens will not survive a restart"),
        }
        if let Some(minutes) = get("JWT_EXPIRY_MINUTES") {
            config.jwt_expiry_minutes = parse("JWT_EXPIRY_MINUTES", &minutes)?;
        }
        if let Some(currency) = get("CURRENCY") {
            config.currency = currency.to_uppercase();
        }
        if let Some(rate) = get("TAX_RATE") {
            let rate: Decimal = parse("TAX_RATE", &rate)?;
            if rate.is_sign_negative() || rate >= Decimal::ONE {
                return Err(ConfigError::Invalid {
                    key: "TAX_RATE",
                    value: rate.to_string(),
                });
            }
            config.pricing.tax_rate = rate;
        }
        if let Some(fee) = get("SHIPPING_FLAT_FEE") {
            config.pricing.shipping_flat_fee = Money::new(parse("SHIPPING_FLAT_FEE", &fee)?);
        }
        match lookup("FREE_SHIPPING_THRESHOLD").map(|v| v.trim().to_string()) {
            Some(v) if v.is_empty() => config.pricing.free_shipping_threshold = None,
            Some(v) => {
                config.pricing.free_shipping_threshold = Some(Money::new(parse("FREE_SHIPPING_THRESHOLD", &v)?))
            }
            None => {}
        }
        config.admin_email = get("ADMIN_EMAIL").map(|e| e.to_lowercase());
        config.admin_password = get("ADMIN_PASSWORD");
        config.log_format = match get("LOG_FORMAT").as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "LOG_FORMAT",
                    value: other.to_string(),
                })
            }
        };

        Ok(config)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}

fn random_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(48)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert_eq!(config.port, 8083);
        assert!(config.database_url.is_none());
        assert_eq!(config.pricing.shipping_flat_fee, Money::new(Decimal::new(500, 2)));
        assert_eq!(config.jwt_secret.len(), 48);
    }

    #[test]
    fn reads_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("PORT", "9000"),
            ("TAX_RATE", "0.08"),
            ("FREE_SHIPPING_THRESHOLD", ""),
            ("LOG_FORMAT", "json"),
            ("ADMIN_EMAIL", "Owner@Shop.test"),
        ]))
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.pricing.tax_rate, Decimal::new(8, 2));
        assert!(config.pricing.free_shipping_threshold.is_none());
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.admin_email.as_deref(), Some("owner@shop.test"));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(Config::from_lookup(lookup(&[("PORT", "eighty")])).is_err());
        assert!(Config::from_lookup(lookup(&[("TAX_RATE", "1.5")])).is_err());
        assert!(Config::from_lookup(lookup(&[("LOG_FORMAT", "xml")])).is_err());
    }
}
