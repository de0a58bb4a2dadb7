use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use std::str::FromStr;

use super::amount::Amount;
use super::pow::MAX_DIFFICULTY;

pub const ENV_FEE: &str = "LEDGER_FEE";
pub const ENV_BASE_REWARD: &str = "LEDGER_BASE_REWARD";
pub const ENV_DIFFICULTY: &str = "LEDGER_DIFFICULTY";
pub const ENV_GENESIS_AMOUNT: &str = "LEDGER_GENESIS_AMOUNT";

/// Errors raised while loading or checking ledger configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Economic and mining parameters of a ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LedgerConfig {
    /// Flat fee charged on every standard transfer
    #[schema(value_type = String, example = "0.50000000")]
    pub fee: Amount,

    /// Reward minted for each mined block, before fees
    #[schema(value_type = String, example = "3.00000000")]
    pub base_reward: Amount,

    /// Leading zero hex digits required of a block hash
    pub difficulty: u32,

    /// Value minted to the first account by the genesis block
    #[schema(value_type = String, example = "1000.00000000")]
    pub genesis_amount: Amount,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            fee: Amount::from_minor(50_000_000),
            base_reward: Amount::from_minor(300_000_000),
            difficulty: 4,
            genesis_amount: Amount::from_minor(100_000_000_000),
        }
    }
}

impl LedgerConfig {
    /// Loads the configuration from `LEDGER_*` environment variables,
    /// keeping defaults for anything unset
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = LedgerConfig {
            fee: parse_or(&lookup, ENV_FEE, defaults.fee)?,
            base_reward: parse_or(&lookup, ENV_BASE_REWARD, defaults.base_reward)?,
            difficulty: parse_or(&lookup, ENV_DIFFICULTY, defaults.difficulty)?,
            genesis_amount: parse_or(&lookup, ENV_GENESIS_AMOUNT, defaults.genesis_amount)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_reward.is_zero() {
            return Err(ConfigError::Invalid(
                "base reward must be positive".to_string(),
            ));
        }
        if self.genesis_amount.is_zero() {
            return Err(ConfigError::Invalid(
                "genesis amount must be positive".to_string(),
            ));
        }
        if self.difficulty > MAX_DIFFICULTY {
            return Err(ConfigError::Invalid(format!(
                "difficulty {} exceeds maximum {}",
                self.difficulty, MAX_DIFFICULTY
            )));
        }

        Ok(())
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.clone(),
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}
