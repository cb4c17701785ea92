use std::{env, fmt::Display, path::PathBuf, str::FromStr};

use anyhow::{anyhow, Result};
use tracing::{info, warn};

const DEFAULT_TOKEN_EXPIRY_SECS: u64 = 86_400;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    /// When unset a random signing key is generated, so tokens die with the process.
    pub token_secret: Option<String>,
    pub token_expiry_secs: u64,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Ok(Self {
            host: try_load("KONNECT_HOST", "127.0.0.1")?,
            port: try_load("KONNECT_PORT", "8000")?,
            db_path: try_load("KONNECT_DB_PATH", "konnect.sled")?,
            token_secret: var("KONNECT_TOKEN_SECRET").ok().filter(|s| !s.trim().is_empty()),
            token_expiry_secs: try_load("KONNECT_TOKEN_EXPIRY_SECS", &DEFAULT_TOKEN_EXPIRY_SECS.to_string())?,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            db_path: PathBuf::from("konnect.sled"),
            token_secret: None,
            token_expiry_secs: DEFAULT_TOKEN_EXPIRY_SECS,
        }
    }
}

fn var(key: &str) -> std::result::Result<String, ()> {
    env::var(key).map_err(|_| {
        warn!("Environment variable {key} not found, using default");
    })
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: Display,
{
    parse_or_default(key, var(key).ok(), default)
}

fn parse_or_default<T: FromStr>(key: &str, value: Option<String>, default: &str) -> Result<T>
where
    T::Err: Display,
{
    let raw = value.unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });
    raw.trim()
        .parse()
        .map_err(|e| anyhow!("Invalid {key} value {raw:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_default() {
        let port: u16 = parse_or_default("PORT", None, "8000").unwrap();
        assert_eq!(port, 8000);
    }

    #[test]
    fn parses_provided_value() {
        let port: u16 = parse_or_default("PORT", Some(" 9100 ".into()), "8000").unwrap();
        assert_eq!(port, 9100);
    }

    #[test]
    fn rejects_unparseable_value() {
        let err = parse_or_default::<u16>("PORT", Some("eighty".into()), "8000").unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn bind_address_joins_host_and_port() {
        let config = Config { port: 9000, ..Config::default() };
        assert_eq!(config.bind_address(), "127.0.0.1:9000");
    }
}
