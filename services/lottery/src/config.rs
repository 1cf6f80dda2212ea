use serde::Deserialize;
use shared::{DEV_ROUND_MINUTES, PRODUCTION_ROUND_MINUTES};
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api_port: u16,
    pub metrics_port: u16,
    pub app_env: String,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub lottery: LotteryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Unset runs on the in-memory store
    pub url: Option<String>,
    pub pool_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Unset means static settings and no event stream
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LotteryConfig {
    pub round_duration_minutes: i64,
    pub lottery_tick_seconds: u64,
    pub autobet_tick_seconds: u64,
    pub betting_paused: bool,
    pub new_rounds_paused: bool,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let default_round_minutes = if app_env.eq_ignore_ascii_case("production") {
            PRODUCTION_ROUND_MINUTES
        } else {
            DEV_ROUND_MINUTES
        };

        let config = Config {
            api_port: env::var("API_PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()?,
            metrics_port: env::var("METRICS_PORT")
                .unwrap_or_else(|_| "9090".to_string())
                .parse()?,
            database: DatabaseConfig {
                url: non_empty_var("DATABASE_URL"),
                pool_size: env::var("DATABASE_POOL_SIZE")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()?,
            },
            redis: RedisConfig {
                url: non_empty_var("REDIS_URL"),
            },
            lottery: LotteryConfig {
                round_duration_minutes: match non_empty_var("ROUND_DURATION_MINUTES") {
                    Some(minutes) => minutes.parse()?,
                    None => default_round_minutes,
                },
                lottery_tick_seconds: env::var("LOTTERY_TICK_SECONDS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()?,
                autobet_tick_seconds: env::var("AUTOBET_TICK_SECONDS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()?,
                betting_paused: parse_bool("BETTING_PAUSED")?,
                new_rounds_paused: parse_bool("NEW_ROUNDS_PAUSED")?,
            },
            app_env,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.lottery.round_duration_minutes < 1 {
            anyhow::bail!("ROUND_DURATION_MINUTES must be at least 1");
        }
        if self.lottery.lottery_tick_seconds == 0 || self.lottery.autobet_tick_seconds == 0 {
            anyhow::bail!("tick intervals must be at least one second");
        }
        if self.database.pool_size == 0 {
            anyhow::bail!("DATABASE_POOL_SIZE must be positive");
        }
        Ok(())
    }

    pub fn round_duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.lottery.round_duration_minutes)
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(key: &str) -> anyhow::Result<bool> {
    match non_empty_var(key) {
        None => Ok(false),
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => anyhow::bail!("{} must be a boolean, got {:?}", key, other),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            api_port: 3001,
            metrics_port: 9090,
            app_env: "development".to_string(),
            database: DatabaseConfig {
                url: None,
                pool_size: 5,
            },
            redis: RedisConfig { url: None },
            lottery: LotteryConfig {
                round_duration_minutes: 1,
                lottery_tick_seconds: 30,
                autobet_tick_seconds: 30,
                betting_paused: false,
                new_rounds_paused: false,
            },
        }
    }

    #[test]
    fn test_validate_rejects_zero_durations() {
        assert!(config().validate().is_ok());

        let mut bad = config();
        bad.lottery.round_duration_minutes = 0;
        assert!(bad.validate().is_err());

        let mut bad = config();
        bad.lottery.autobet_tick_seconds = 0;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_round_duration() {
        let mut c = config();
        c.lottery.round_duration_minutes = PRODUCTION_ROUND_MINUTES;
        assert_eq!(c.round_duration(), chrono::Duration::minutes(60));
    }
}
