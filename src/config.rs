// Broker configuration: service endpoints, retry policy, cache and rate-limit
// tunables. Loading the values from disk is the caller's business; this
// module only gives them a shape, defaults and validation.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{error::ClientError, model::ServiceKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub url: String,
    pub key: String,
}

impl ServiceConfig {
    pub fn new(url: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key: key.into(),
        }
    }
}

// Which service gets reserved first during a booking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationOrder {
    #[default]
    HotelFirst,
    BandFirst,
}

impl ReservationOrder {
    // (first, second)
    pub fn sequence(&self) -> (ServiceKind, ServiceKind) {
        match self {
            ReservationOrder::HotelFirst => (ServiceKind::Hotel, ServiceKind::Band),
            ReservationOrder::BandFirst => (ServiceKind::Band, ServiceKind::Hotel),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    #[default]
    Fixed,
    Exponential,
}

// All durations are in (fractional) seconds, matching the api.ini style
// configuration the services are usually deployed with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub hotel: ServiceConfig,
    pub band: ServiceConfig,
    pub retries: u32,
    pub delay: f64,
    pub backoff: BackoffKind,
    pub backoff_multiplier: f64,
    pub max_delay: f64,
    pub jitter_factor: f64,
    pub cache_ttl: f64,
    pub rate_limit_interval: f64,
    pub request_timeout: f64,
    pub order: ReservationOrder,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            hotel: ServiceConfig::new("http://localhost:5000", "dummy"),
            band: ServiceConfig::new("http://localhost:5001", "dummy"),
            retries: 3,
            delay: 0.1,
            backoff: BackoffKind::Fixed,
            backoff_multiplier: 2.0,
            max_delay: 10.0,
            jitter_factor: 0.0,
            cache_ttl: 60.0,
            rate_limit_interval: 1.0,
            request_timeout: 10.0,
            order: ReservationOrder::HotelFirst,
        }
    }
}

impl BrokerConfig {
    pub fn from_json(raw: &str) -> Result<Self, ClientError> {
        let config: BrokerConfig = serde_json::from_str(raw)
            .map_err(|e| ClientError::ConfigError(format!("invalid broker config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn service(&self, service: ServiceKind) -> &ServiceConfig {
        match service {
            ServiceKind::Hotel => &self.hotel,
            ServiceKind::Band => &self.band,
        }
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        for service in ServiceKind::ALL {
            if self.service(service).url.trim().is_empty() {
                return Err(ClientError::ConfigError(format!(
                    "{service} url must not be empty"
                )));
            }
        }

        let seconds = [
            ("delay", self.delay),
            ("max_delay", self.max_delay),
            ("cache_ttl", self.cache_ttl),
            ("rate_limit_interval", self.rate_limit_interval),
            ("request_timeout", self.request_timeout),
        ];
        for (name, value) in seconds {
            seconds_to_duration(name, value)?;
        }

        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ClientError::ConfigError(format!(
                "backoff_multiplier must be >= 1, got {}",
                self.backoff_multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ClientError::ConfigError(format!(
                "jitter_factor must be within 0..=1, got {}",
                self.jitter_factor
            )));
        }

        Ok(())
    }

    pub fn retry_config(&self) -> Result<RetryConfig, ClientError> {
        let backoff = match self.backoff {
            BackoffKind::Fixed => Backoff::Fixed,
            BackoffKind::Exponential => Backoff::Exponential {
                multiplier: self.backoff_multiplier,
            },
        };

        Ok(RetryConfig {
            max_retries: self.retries,
            delay: seconds_to_duration("delay", self.delay)?,
            backoff,
            max_delay: seconds_to_duration("max_delay", self.max_delay)?,
            jitter_factor: self.jitter_factor,
        })
    }

    pub fn cache_ttl(&self) -> Result<Duration, ClientError> {
        seconds_to_duration("cache_ttl", self.cache_ttl)
    }

    pub fn rate_limit_interval(&self) -> Result<Duration, ClientError> {
        seconds_to_duration("rate_limit_interval", self.rate_limit_interval)
    }

    pub fn request_timeout(&self) -> Result<Duration, ClientError> {
        seconds_to_duration("request_timeout", self.request_timeout)
    }
}

// One day; anything longer is a unit mistake
const MAX_SECONDS: f64 = 86_400.0;

fn seconds_to_duration(name: &str, seconds: f64) -> Result<Duration, ClientError> {
    if seconds > MAX_SECONDS {
        return Err(ClientError::ConfigError(format!(
            "{name} must be at most {MAX_SECONDS} seconds, got {seconds}"
        )));
    }

    Duration::try_from_secs_f64(seconds).map_err(|_| {
        ClientError::ConfigError(format!(
            "{name} must be a non-negative number of seconds, got {seconds}"
        ))
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    Fixed,
    Exponential { multiplier: f64 },
}

// Retry policy applied uniformly by every service client
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub delay: Duration,
    pub backoff: Backoff,
    pub max_delay: Duration,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_millis(100),
            backoff: Backoff::Fixed,
            max_delay: Duration::from_secs(10),
            jitter_factor: 0.0,
        }
    }
}

impl RetryConfig {
    // Delay to sleep before retry number `retry_attempt` (0 = first retry)
    pub fn backoff_for(&self, retry_attempt: u32) -> Duration {
        let base_ns = self.delay.as_nanos() as f64;
        let backoff_ns = match self.backoff {
            Backoff::Fixed => base_ns,
            Backoff::Exponential { multiplier } => (base_ns
                * multiplier.powf(retry_attempt as f64))
            .min(self.max_delay.as_nanos() as f64),
        };

        if self.jitter_factor <= 0.0 {
            return Duration::from_nanos(backoff_ns.round() as u64);
        }

        // Spread retries around the nominal delay so callers don't stampede
        let jitter = rand::random::<f64>() * self.jitter_factor * backoff_ns;
        let jittered_ns = backoff_ns * (1.0 - self.jitter_factor / 2.0) + jitter;

        Duration::from_nanos(jittered_ns.max(0.0).round() as u64)
    }
}
