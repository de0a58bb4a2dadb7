use crate::blockchain::config::ConfigError;

pub const ENV_HOST: &str = "LEDGER_HOST";
pub const ENV_PORT: &str = "LEDGER_PORT";

/// Where the HTTP server listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".to_owned(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let port = match lookup(ENV_PORT) {
            Some(value) => value.parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::InvalidValue {
                    key: ENV_PORT.to_owned(),
                    value: value.clone(),
                    reason: e.to_string(),
                }
            })?,
            None => defaults.port,
        };

        Ok(ServerConfig {
            host: lookup(ENV_HOST).unwrap_or(defaults.host),
            port,
        })
    }
}
