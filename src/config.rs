//! Negotiation policy configuration.

use crate::error::ConfigError;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const CONFIG_FILE: &str = "offers.toml";
const ENV_PREFIX: &str = "OFFERS_";
/// Longest lifetime or window accepted for any of the hour settings.
pub const MAX_WINDOW_HOURS: u32 = 24 * 365;

/// Tunables for offer validation, lifetimes and reservations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationConfig {
    /// Currency used when a draft does not name one.
    #[serde(default = "default_currency")]
    pub default_currency: String,

    /// Lifetime of an initial offer.
    #[serde(default = "default_ttl_hours")]
    pub offer_ttl_hours: u32,

    /// Lifetime of a counter-offer.
    #[serde(default = "default_ttl_hours")]
    pub counter_ttl_hours: u32,

    /// How long an accepted offer holds the listing.
    #[serde(default = "default_reservation_hours")]
    pub reservation_hours: u32,

    /// Window before expiry in which an offer counts as expiring soon.
    #[serde(default = "default_warning_hours")]
    pub expiry_warning_hours: u32,

    /// Offer ceiling relative to the listing price, in basis points.
    #[serde(default = "default_ceiling_bps")]
    pub ceiling_bps: u32,

    /// Offers a buyer may open on one listing.
    #[serde(default = "default_max_offers")]
    pub max_offers_per_listing: usize,

    /// Offers a single negotiation chain may hold.
    #[serde(default = "default_max_rounds")]
    pub max_counter_rounds: usize,
}

fn default_currency() -> String {
    "GHS".to_string()
}

fn default_ttl_hours() -> u32 {
    72
}

fn default_reservation_hours() -> u32 {
    48
}

fn default_warning_hours() -> u32 {
    24
}

// 150% of the listing price
fn default_ceiling_bps() -> u32 {
    15_000
}

fn default_max_offers() -> usize {
    3
}

fn default_max_rounds() -> usize {
    5
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            default_currency: default_currency(),
            offer_ttl_hours: default_ttl_hours(),
            counter_ttl_hours: default_ttl_hours(),
            reservation_hours: default_reservation_hours(),
            expiry_warning_hours: default_warning_hours(),
            ceiling_bps: default_ceiling_bps(),
            max_offers_per_listing: default_max_offers(),
            max_counter_rounds: default_max_rounds(),
        }
    }
}

impl NegotiationConfig {
    /// Loads configuration: defaults, then `<dir>/offers.toml` if present,
    /// then `OFFERS_*` environment variables, then validation.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if any value
    /// fails validation.
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let config_path = dir.join(CONFIG_FILE);
        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    /// Applies overrides from a key lookup. Keys are the field names
    /// upper-cased with the `OFFERS_` prefix, e.g. `OFFERS_CEILING_BPS`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(val) = var("DEFAULT_CURRENCY") {
            self.default_currency = val;
        }
        if let Some(val) = var("OFFER_TTL_HOURS") {
            self.offer_ttl_hours = parse_number("OFFER_TTL_HOURS", &val)?;
        }
        if let Some(val) = var("COUNTER_TTL_HOURS") {
            self.counter_ttl_hours = parse_number("COUNTER_TTL_HOURS", &val)?;
        }
        if let Some(val) = var("RESERVATION_HOURS") {
            self.reservation_hours = parse_number("RESERVATION_HOURS", &val)?;
        }
        if let Some(val) = var("EXPIRY_WARNING_HOURS") {
            self.expiry_warning_hours = parse_number("EXPIRY_WARNING_HOURS", &val)?;
        }
        if let Some(val) = var("CEILING_BPS") {
            self.ceiling_bps = parse_number("CEILING_BPS", &val)?;
        }
        if let Some(val) = var("MAX_OFFERS_PER_LISTING") {
            self.max_offers_per_listing = parse_number("MAX_OFFERS_PER_LISTING", &val)?;
        }
        if let Some(val) = var("MAX_COUNTER_ROUNDS") {
            self.max_counter_rounds = parse_number("MAX_COUNTER_ROUNDS", &val)?;
        }

        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if a lifetime is zero or longer than a year, the ceiling is below the
    /// listing price, a limit is zero, or the currency code is not three
    /// ASCII letters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.offer_ttl_hours == 0 || self.counter_ttl_hours == 0 {
            return Err(ConfigError::Invalid(
                "offer lifetimes must be greater than 0".to_string(),
            ));
        }
        if self.reservation_hours == 0 {
            return Err(ConfigError::Invalid(
                "reservation_hours must be greater than 0".to_string(),
            ));
        }
        let windows = [
            ("offer_ttl_hours", self.offer_ttl_hours),
            ("counter_ttl_hours", self.counter_ttl_hours),
            ("reservation_hours", self.reservation_hours),
            ("expiry_warning_hours", self.expiry_warning_hours),
        ];
        if let Some((name, hours)) = windows.iter().find(|(_, h)| *h > MAX_WINDOW_HOURS) {
            return Err(ConfigError::Invalid(format!(
                "{name} must be at most {MAX_WINDOW_HOURS}, got {hours}"
            )));
        }
        if self.ceiling_bps < 10_000 {
            return Err(ConfigError::Invalid(format!(
                "ceiling_bps must be at least 10000, got {}",
                self.ceiling_bps
            )));
        }
        if self.max_offers_per_listing == 0 || self.max_counter_rounds == 0 {
            return Err(ConfigError::Invalid(
                "offer limits must be greater than 0".to_string(),
            ));
        }
        let code = self.default_currency.as_bytes();
        if code.len() != 3 || !code.iter().all(u8::is_ascii_alphabetic) {
            return Err(ConfigError::Invalid(format!(
                "default_currency must be a three letter code, got {:?}",
                self.default_currency
            )));
        }

        Ok(())
    }

    pub fn save(&self, dir: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(dir.join(CONFIG_FILE), content)?;
        Ok(())
    }

    pub fn offer_ttl(&self) -> Duration {
        Duration::hours(i64::from(self.offer_ttl_hours))
    }
    pub fn counter_ttl(&self) -> Duration {
        Duration::hours(i64::from(self.counter_ttl_hours))
    }
    pub fn reservation_window(&self) -> Duration {
        Duration::hours(i64::from(self.reservation_hours))
    }
    pub fn warning_window(&self) -> Duration {
        Duration::hours(i64::from(self.expiry_warning_hours))
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, val: &str) -> Result<T, ConfigError> {
    val.trim().parse().map_err(|_| {
        ConfigError::Invalid(format!("{ENV_PREFIX}{name} must be a number, got {val:?}"))
    })
}
