//! Configuration module - environment variable parsing and match tuning

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Supabase project URL and service role key (both or neither)
    pub supabase: Option<SupabaseConfig>,
    /// Supabase JWT secret for token verification
    pub supabase_jwt_secret: String,

    /// Allowed client origins for CORS (comma-separated)
    pub client_origin: String,
    /// Season tag used for per-season stat subtotals
    pub current_season: String,

    /// Match configuration applied when a create request doesn't carry one
    pub default_match: MatchConfig,
}

/// Supabase connection settings
#[derive(Clone, Debug)]
pub struct SupabaseConfig {
    pub url: String,
    /// Service role key (bypasses RLS - server only!)
    pub service_role_key: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Render provides PORT env var, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let supabase = match (env::var("SUPABASE_URL"), env::var("SUPABASE_SERVICE_ROLE_KEY")) {
            (Ok(url), Ok(service_role_key)) => Some(SupabaseConfig {
                url,
                service_role_key,
            }),
            (Ok(_), Err(_)) => return Err(ConfigError::Missing("SUPABASE_SERVICE_ROLE_KEY")),
            (Err(_), Ok(_)) => return Err(ConfigError::Missing("SUPABASE_URL")),
            (Err(_), Err(_)) => None,
        };

        let defaults = MatchConfig::default();
        let default_match = MatchConfig {
            zone_shrink_interval_secs: env_or(
                "MATCH_ZONE_SHRINK_INTERVAL_SECS",
                defaults.zone_shrink_interval_secs,
            )?,
            zone_damage_per_second: env_or(
                "MATCH_ZONE_DAMAGE_PER_SECOND",
                defaults.zone_damage_per_second,
            )?,
            max_zone_radius: env_or("MATCH_MAX_ZONE_RADIUS", defaults.max_zone_radius)?,
            min_zone_radius: env_or("MATCH_MIN_ZONE_RADIUS", defaults.min_zone_radius)?,
            loot_spawn_interval_secs: env_or(
                "MATCH_LOOT_SPAWN_INTERVAL_SECS",
                defaults.loot_spawn_interval_secs,
            )?,
            vehicle_respawn_time_secs: env_or(
                "MATCH_VEHICLE_RESPAWN_TIME_SECS",
                defaults.vehicle_respawn_time_secs,
            )?,
            match_duration_secs: env_or("MATCH_DURATION_SECS", defaults.match_duration_secs)?,
            ..defaults
        };
        default_match.validate().map_err(ConfigError::Match)?;

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            supabase,
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .map_err(|_| ConfigError::Missing("SUPABASE_JWT_SECRET"))?,

            client_origin: env::var("CLIENT_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            current_season: env::var("CURRENT_SEASON").unwrap_or_else(|_| "season-1".to_string()),

            default_match,
        })
    }
}

/// Read and parse an optional environment variable
fn env_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => parse_value(name, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T: FromStr>(name: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(name))
}

/// Per-match tuning, supplied when a match is created and persisted with it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Seconds between zone shrinks
    pub zone_shrink_interval_secs: u64,
    /// Base zone damage, applied once per shrink interval
    pub zone_damage_per_second: f32,
    /// Zone radius at match start
    pub max_zone_radius: f32,
    /// Zone never shrinks below this radius
    pub min_zone_radius: f32,
    /// Seconds between loot batches
    pub loot_spawn_interval_secs: u64,
    /// Carried for clients; vehicles are not respawned by the orchestrator
    pub vehicle_respawn_time_secs: u64,
    /// Configured match length
    pub match_duration_secs: u64,

    /// Side length of the square map centered at the origin
    pub map_size: f32,
    /// Loot generated at match start
    pub initial_loot_count: usize,
    /// Loot generated per loot tick
    pub loot_batch_size: usize,
    /// Vehicles generated at match start
    pub vehicle_count: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            zone_shrink_interval_secs: 60,
            zone_damage_per_second: 5.0,
            max_zone_radius: 1000.0,
            min_zone_radius: 50.0,
            loot_spawn_interval_secs: 45,
            vehicle_respawn_time_secs: 120,
            match_duration_secs: 1800,
            map_size: 2000.0,
            initial_loot_count: 100,
            loot_batch_size: 10,
            vehicle_count: 10,
        }
    }
}

impl MatchConfig {
    /// Reject configurations the orchestrator can't run
    pub fn validate(&self) -> Result<(), MatchConfigError> {
        if self.zone_shrink_interval_secs == 0 {
            return Err(MatchConfigError::NotPositive("zone_shrink_interval_secs"));
        }
        if self.loot_spawn_interval_secs == 0 {
            return Err(MatchConfigError::NotPositive("loot_spawn_interval_secs"));
        }
        if self.match_duration_secs == 0 {
            return Err(MatchConfigError::NotPositive("match_duration_secs"));
        }
        if !(self.max_zone_radius > 0.0) {
            return Err(MatchConfigError::NotPositive("max_zone_radius"));
        }
        if !(self.min_zone_radius > 0.0) {
            return Err(MatchConfigError::NotPositive("min_zone_radius"));
        }
        if !(self.map_size > 0.0) {
            return Err(MatchConfigError::NotPositive("map_size"));
        }
        if !(self.zone_damage_per_second >= 0.0) {
            return Err(MatchConfigError::NegativeDamage);
        }
        if self.min_zone_radius > self.max_zone_radius {
            return Err(MatchConfigError::RadiusOrder {
                min: self.min_zone_radius,
                max: self.max_zone_radius,
            });
        }
        Ok(())
    }

    pub fn shrink_interval(&self) -> Duration {
        Duration::from_secs(self.zone_shrink_interval_secs)
    }

    pub fn loot_interval(&self) -> Duration {
        Duration::from_secs(self.loot_spawn_interval_secs)
    }

    pub fn match_duration(&self) -> Duration {
        Duration::from_secs(self.match_duration_secs)
    }

    /// Half the map side: positions lie in [-half_extent, half_extent]
    pub fn half_extent(&self) -> f32 {
        self.map_size / 2.0
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),

    #[error("Invalid default match configuration: {0}")]
    Match(MatchConfigError),
}

/// Match configuration errors (the match stays `waiting`)
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MatchConfigError {
    #[error("{0} must be positive")]
    NotPositive(&'static str),

    #[error("zone damage must not be negative")]
    NegativeDamage,

    #[error("min zone radius {min} exceeds max zone radius {max}")]
    RadiusOrder { min: f32, max: f32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_match_config_is_valid() {
        assert_eq!(MatchConfig::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_min_radius_above_max() {
        let config = MatchConfig {
            min_zone_radius: 1200.0,
            max_zone_radius: 1000.0,
            ..MatchConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(MatchConfigError::RadiusOrder {
                min: 1200.0,
                max: 1000.0
            })
        );
    }

    #[test]
    fn rejects_zero_intervals() {
        let config = MatchConfig {
            zone_shrink_interval_secs: 0,
            ..MatchConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(MatchConfigError::NotPositive("zone_shrink_interval_secs"))
        );

        let config = MatchConfig {
            loot_spawn_interval_secs: 0,
            ..MatchConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_nan_radius() {
        let config = MatchConfig {
            max_zone_radius: f32::NAN,
            ..MatchConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(MatchConfigError::NotPositive("max_zone_radius"))
        );
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: MatchConfig =
            serde_json::from_str(r#"{"zone_shrink_interval_secs": 30, "min_zone_radius": 25.0}"#)
                .unwrap();
        assert_eq!(config.zone_shrink_interval_secs, 30);
        assert_eq!(config.min_zone_radius, 25.0);
        assert_eq!(config.max_zone_radius, 1000.0);
    }

    #[test]
    fn parse_value_reports_variable_name() {
        let parsed: Result<u64, _> = parse_value("MATCH_DURATION_SECS", "abc");
        assert!(matches!(
            parsed,
            Err(ConfigError::InvalidValue("MATCH_DURATION_SECS"))
        ));
        let parsed: u64 = parse_value("MATCH_DURATION_SECS", " 900 ").unwrap();
        assert_eq!(parsed, 900);
    }
}
