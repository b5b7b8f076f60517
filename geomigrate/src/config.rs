//! Connection settings from the environment.
//!
//! Variables are read with a prefix, so the same loader serves the CLI (`DB_HOST`, `DB_PORT`, ...)
//! and the test suite (`TEST_DB_HOST`, ...):
//!
//! | Variable             | Default     |
//! |----------------------|-------------|
//! | `<PREFIX>_HOST`      | `localhost` |
//! | `<PREFIX>_PORT`      | `5432`      |
//! | `<PREFIX>_USER`      | `postgres`  |
//! | `<PREFIX>_PASSWORD`  | `postgres`  |
//! | `<PREFIX>_NAME`      | `postgres`  |
//! | `<PREFIX>_SSLMODE`   | `disable`   |
//!
//! Connections are made without TLS, so only `disable` and `prefer` are accepted as ssl modes.

use std::path::PathBuf;

use postgres::config::SslMode;
use postgres::{Client, NoTls};

use crate::error::Error;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 5432;
pub const DEFAULT_USER: &str = "postgres";
pub const DEFAULT_PASSWORD: &str = "postgres";
pub const DEFAULT_DATABASE: &str = "postgres";
pub const DEFAULT_SSLMODE: SslMode = SslMode::Disable;

/// Prefix used by [resolve_connection].
pub const ENV_PREFIX: &str = "DB";

#[cfg(test)]
pub(crate) static CURRENT_DIR_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub sslmode: SslMode,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            user: DEFAULT_USER.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            sslmode: DEFAULT_SSLMODE,
        }
    }
}

impl DatabaseConfig {
    /// Read `<prefix>_HOST`, `<prefix>_PORT`, ... from the process environment.
    pub fn from_env(prefix: &str) -> Result<Self, Error> {
        Self::from_lookup(prefix, |key| std::env::var(key).ok())
    }

    /// Like [from_env](Self::from_env), with variables supplied by `lookup`.
    /// Empty values count as unset; an unparsable port falls back to the default.
    /// An ssl mode that needs TLS is an error.
    pub fn from_lookup<F>(prefix: &str, lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |suffix: &str| {
            lookup(&format!("{}_{}", prefix, suffix)).filter(|value| !value.is_empty())
        };

        let port = match get("PORT") {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                #[cfg(feature = "tracing")]
                tracing::warn!(value = %raw, default = DEFAULT_PORT, "Invalid port, using default");
                DEFAULT_PORT
            }),
            None => DEFAULT_PORT,
        };

        let sslmode = match get("SSLMODE") {
            Some(raw) => parse_sslmode(raw.trim())?,
            None => DEFAULT_SSLMODE,
        };

        Ok(Self {
            host: get("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            user: get("USER").unwrap_or_else(|| DEFAULT_USER.to_string()),
            password: get("PASSWORD").unwrap_or_else(|| DEFAULT_PASSWORD.to_string()),
            database: get("NAME").unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
            sslmode,
        })
    }

    /// The same server, a different database.
    pub fn with_database(&self, database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..self.clone()
        }
    }

    /// The connection settings for this database.
    pub fn postgres_config(&self) -> postgres::Config {
        let mut config = postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .user(&self.user)
            .password(&self.password)
            .dbname(&self.database)
            .ssl_mode(self.sslmode);
        config
    }

    pub fn connect(&self) -> Result<Client, Error> {
        Ok(self.postgres_config().connect(NoTls)?)
    }

    /// `postgres://user@host:port/database?sslmode=...`, for logs and messages. The password is
    /// left out.
    pub fn display_url(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        format!(
            "postgres://{}@{}:{}/{}?sslmode={}",
            self.user,
            host,
            self.port,
            self.database,
            sslmode_name(self.sslmode)
        )
    }
}

/// Parse a libpq `sslmode` value. Modes that require TLS are rejected.
pub fn parse_sslmode(value: &str) -> Result<SslMode, Error> {
    match value {
        "disable" => Ok(SslMode::Disable),
        "prefer" => Ok(SslMode::Prefer),
        "require" | "verify-ca" | "verify-full" => Err(Error::Generic(format!(
            "sslmode '{}' needs TLS, which is not supported; use 'disable' or 'prefer'",
            value
        ))),
        other => Err(Error::Generic(format!("Unknown sslmode '{}'", other))),
    }
}

fn sslmode_name(mode: SslMode) -> &'static str {
    match mode {
        SslMode::Disable => "disable",
        SslMode::Prefer => "prefer",
        _ => "require",
    }
}

/// Load `.env` from the current directory or the nearest ancestor that has one.
/// Variables already set in the environment win. Returns the file that was loaded.
pub fn load_dotenv() -> Option<PathBuf> {
    dotenvy::dotenv().ok()
}

/// An explicit URL or key/value string (from a flag or `DATABASE_URL`) wins; otherwise the
/// settings come from `DB_*`.
pub fn resolve_connection(explicit: Option<&str>) -> Result<postgres::Config, Error> {
    match explicit {
        Some(raw) if !raw.trim().is_empty() => {
            let config: postgres::Config = raw.parse()?;
            if config.get_ssl_mode() == SslMode::Require {
                return Err(Error::Generic(
                    "sslmode 'require' needs TLS, which is not supported; use 'disable' or 'prefer'"
                        .to_string(),
                ));
            }
            Ok(config)
        }
        _ => Ok(DatabaseConfig::from_env(ENV_PREFIX)?.postgres_config()),
    }
}
