use std::env;

use crate::error::AppError;

const MAX_TIMEOUT_SECS: i64 = 7 * 24 * 60 * 60;
const MAX_CACHE_TTL_SECS: i64 = 24 * 60 * 60;
const MAX_WINDOW_DAYS: i64 = 3_650;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub event_queue_size: usize,
    pub event_buffer_size: usize,
    pub booking_timeout_secs: i64,
    pub match_radius_m: f64,
    pub match_candidate_limit: usize,
    pub location_cache_ttl_secs: i64,
    pub location_retention_days: i64,
    pub surge_cache_ttl_secs: i64,
    pub surge_jitter_max: f64,
    pub surge_utc_offset_minutes: i32,
    pub expiry_sweep_interval_secs: u64,
    pub location_purge_interval_secs: u64,
    pub rating_recompute_interval_secs: u64,
    pub rating_window_days: i64,
    pub sweep_page_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
            event_queue_size: 1024,
            event_buffer_size: 256,
            booking_timeout_secs: 600,
            match_radius_m: 10_000.0,
            match_candidate_limit: 10,
            location_cache_ttl_secs: 60,
            location_retention_days: 30,
            surge_cache_ttl_secs: 300,
            surge_jitter_max: 0.3,
            surge_utc_offset_minutes: 0,
            expiry_sweep_interval_secs: 60,
            location_purge_interval_secs: 3_600,
            rating_recompute_interval_secs: 86_400,
            rating_window_days: 30,
            sweep_page_size: 200,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let log_format = match env::var("LOG_FORMAT") {
            Ok(raw) if raw.eq_ignore_ascii_case("json") => LogFormat::Json,
            Ok(raw) if raw.eq_ignore_ascii_case("compact") => LogFormat::Compact,
            Ok(raw) => {
                return Err(AppError::Internal(format!(
                    "invalid LOG_FORMAT: {raw}, expected json or compact"
                )));
            }
            Err(_) => defaults.log_format,
        };

        let config = Self {
            http_port: parse_or_default("HTTP_PORT", defaults.http_port)?,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format,
            event_queue_size: parse_or_default("EVENT_QUEUE_SIZE", defaults.event_queue_size)?,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", defaults.event_buffer_size)?,
            booking_timeout_secs: parse_or_default(
                "BOOKING_TIMEOUT_SECS",
                defaults.booking_timeout_secs,
            )?,
            match_radius_m: parse_or_default("MATCH_RADIUS_M", defaults.match_radius_m)?,
            match_candidate_limit: parse_or_default(
                "MATCH_CANDIDATE_LIMIT",
                defaults.match_candidate_limit,
            )?,
            location_cache_ttl_secs: parse_or_default(
                "LOCATION_CACHE_TTL_SECS",
                defaults.location_cache_ttl_secs,
            )?,
            location_retention_days: parse_or_default(
                "LOCATION_RETENTION_DAYS",
                defaults.location_retention_days,
            )?,
            surge_cache_ttl_secs: parse_or_default(
                "SURGE_CACHE_TTL_SECS",
                defaults.surge_cache_ttl_secs,
            )?,
            surge_jitter_max: parse_or_default("SURGE_JITTER_MAX", defaults.surge_jitter_max)?,
            surge_utc_offset_minutes: parse_or_default(
                "SURGE_UTC_OFFSET_MINUTES",
                defaults.surge_utc_offset_minutes,
            )?,
            expiry_sweep_interval_secs: parse_or_default(
                "EXPIRY_SWEEP_INTERVAL_SECS",
                defaults.expiry_sweep_interval_secs,
            )?,
            location_purge_interval_secs: parse_or_default(
                "LOCATION_PURGE_INTERVAL_SECS",
                defaults.location_purge_interval_secs,
            )?,
            rating_recompute_interval_secs: parse_or_default(
                "RATING_RECOMPUTE_INTERVAL_SECS",
                defaults.rating_recompute_interval_secs,
            )?,
            rating_window_days: parse_or_default(
                "RATING_WINDOW_DAYS",
                defaults.rating_window_days,
            )?,
            sweep_page_size: parse_or_default("SWEEP_PAGE_SIZE", defaults.sweep_page_size)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.event_queue_size == 0 || self.event_buffer_size == 0 {
            return Err(AppError::Internal(
                "EVENT_QUEUE_SIZE and EVENT_BUFFER_SIZE must be > 0".to_string(),
            ));
        }
        if self.sweep_page_size == 0 || self.match_candidate_limit == 0 {
            return Err(AppError::Internal(
                "SWEEP_PAGE_SIZE and MATCH_CANDIDATE_LIMIT must be > 0".to_string(),
            ));
        }
        if !(self.match_radius_m.is_finite() && self.match_radius_m > 0.0) {
            return Err(AppError::Internal("MATCH_RADIUS_M must be > 0".to_string()));
        }
        if !(0.0..=2.0).contains(&self.surge_jitter_max) {
            return Err(AppError::Internal(
                "SURGE_JITTER_MAX must be within [0, 2]".to_string(),
            ));
        }
        if self.surge_utc_offset_minutes.abs() >= 24 * 60 {
            return Err(AppError::Internal(
                "SURGE_UTC_OFFSET_MINUTES must be within one day".to_string(),
            ));
        }
        for (key, value, max) in [
            ("BOOKING_TIMEOUT_SECS", self.booking_timeout_secs, MAX_TIMEOUT_SECS),
            ("LOCATION_CACHE_TTL_SECS", self.location_cache_ttl_secs, MAX_CACHE_TTL_SECS),
            ("SURGE_CACHE_TTL_SECS", self.surge_cache_ttl_secs, MAX_CACHE_TTL_SECS),
            ("LOCATION_RETENTION_DAYS", self.location_retention_days, MAX_WINDOW_DAYS),
            ("RATING_WINDOW_DAYS", self.rating_window_days, MAX_WINDOW_DAYS),
        ] {
            if !(1..=max).contains(&value) {
                return Err(AppError::Internal(format!(
                    "{key} must be within [1, {max}], got {value}"
                )));
            }
        }
        if self.expiry_sweep_interval_secs == 0
            || self.location_purge_interval_secs == 0
            || self.rating_recompute_interval_secs == 0
        {
            return Err(AppError::Internal(
                "scheduler intervals must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
