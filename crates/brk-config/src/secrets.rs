//! Database credentials.
//!
//! Config YAML names the env var (`database.url_env`); the URL itself is read
//! from the environment once at startup and never logged.

use anyhow::{bail, Result};

use crate::engine::EngineConfig;

pub const DEFAULT_DATABASE_URL_ENV: &str = "BRK_DATABASE_URL";

/// Connection settings resolved from the environment.
/// **The URL is redacted in `Debug` output.**
#[derive(Clone)]
pub struct ResolvedDatabase {
    pub url: String,
    pub url_env: String,
    pub max_connections: u32,
}

impl std::fmt::Debug for ResolvedDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedDatabase")
            .field("url", &"<REDACTED>")
            .field("url_env", &self.url_env)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// Errors mention the env var NAME only.
pub fn resolve_database_url(cfg: &EngineConfig) -> Result<ResolvedDatabase> {
    let name = cfg.database.url_env.trim();
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(ResolvedDatabase {
            url: v,
            url_env: name.to_string(),
            max_connections: cfg.database.max_connections,
        }),
        _ => bail!("SECRETS_MISSING: required env var '{name}' (database url) is not set or empty"),
    }
}
