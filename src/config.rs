use std::env;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::{Context, Result};

const DEFAULT_MODEL_PATH: &str = "model.json";
const DEFAULT_DB_PATH: &str = "players.sqlite";
const DEFAULT_BIND_ADDR: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 5000;

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub model_path: PathBuf,
    pub db_path: PathBuf,
    pub bind_addr: IpAddr,
    pub port: u16,
    pub cors_permissive: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            bind_addr: IpAddr::from([127, 0, 0, 1]),
            port: DEFAULT_PORT,
            cors_permissive: true,
        }
    }
}

impl ServiceConfig {
    /// Reads `.env.local` / `.env` (if present) and then the process environment.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::from_filename(".env.local");
        let _ = dotenvy::from_filename(".env");
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind_raw = get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_raw
            .trim()
            .parse::<IpAddr>()
            .with_context(|| format!("BIND_ADDR is not an ip address: {bind_raw}"))?;
        let port = match get("PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .with_context(|| format!("PORT is not a valid port: {raw}"))?,
            None => DEFAULT_PORT,
        };
        let cors_permissive = get("CORS_PERMISSIVE")
            .map(|raw| parse_flag(&raw))
            .unwrap_or(true);

        Ok(Self {
            model_path: get("MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
            db_path: get("PLAYERS_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
            bind_addr,
            port,
            cors_permissive,
        })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }
}

fn parse_flag(raw: &str) -> bool {
    !matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}
