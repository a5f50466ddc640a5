use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Bootstrap administrator, created at startup if both variables are set
    pub admin: Option<AdminConfig>,
    pub password: PasswordConfig,
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub tokens: TokenConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Login, account and refresh endpoints
    pub public_bind_address: SocketAddr,
    /// Token resolution and introspection; keep this one firewalled
    pub private_bind_address: SocketAddr,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StorageBackend {
    #[default]
    Memory,
    Sqlite,
    Redb,
}

impl FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "sqlite" => Ok(Self::Sqlite),
            "redb" => Ok(Self::Redb),
            other => Err(ConfigError::ValidationError(format!(
                "STORAGE_BACKEND must be memory, sqlite or redb, got {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub data_dir: PathBuf,
}

#[derive(Clone)]
pub struct AdminConfig {
    pub login: String,
    pub password: String,
}

impl std::fmt::Debug for AdminConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminConfig")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct PasswordConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

/// Upper bound for ACCESS_TTL_SECONDS (one year)
pub const MAX_ACCESS_TTL_SECONDS: i64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub access_ttl_seconds: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            public_bind_address: SocketAddr::from(([0, 0, 0, 0], 8080)),
            private_bind_address: SocketAddr::from(([127, 0, 0, 1], 8081)),
            request_timeout_ms: 5000,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            memory_kib: 19456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            access_ttl_seconds: 600, // 10 minutes
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            admin: None,
            password: PasswordConfig::default(),
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            tokens: TokenConfig::default(),
        }
    }
}

/// Parse an optional variable, keeping `default` when unset.
fn parse_var<T: FromStr>(
    vars: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::ValidationError(format!("{name} is not valid: {raw:?}"))),
        None => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Build a configuration from a variable lookup.
    pub fn from_vars(vars: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let server = ServerConfig {
            public_bind_address: parse_var(
                &vars,
                "PUBLIC_BIND_ADDRESS",
                defaults.server.public_bind_address,
            )?,
            private_bind_address: parse_var(
                &vars,
                "PRIVATE_BIND_ADDRESS",
                defaults.server.private_bind_address,
            )?,
            request_timeout_ms: parse_var(
                &vars,
                "REQUEST_TIMEOUT_MS",
                defaults.server.request_timeout_ms,
            )?,
        };

        let storage = StorageConfig {
            backend: parse_var(&vars, "STORAGE_BACKEND", defaults.storage.backend)?,
            data_dir: vars("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage.data_dir),
        };

        let admin = match (vars("ADMIN_LOGIN"), vars("ADMIN_PASSWORD")) {
            (Some(login), Some(password)) => Some(AdminConfig { login, password }),
            (None, None) => None,
            _ => {
                return Err(ConfigError::ValidationError(
                    "ADMIN_LOGIN and ADMIN_PASSWORD must be set together".to_string(),
                ))
            }
        };

        let password = PasswordConfig {
            memory_kib: parse_var(&vars, "ARGON2_MEMORY_KIB", defaults.password.memory_kib)?,
            iterations: parse_var(&vars, "ARGON2_ITERATIONS", defaults.password.iterations)?,
            parallelism: parse_var(&vars, "ARGON2_PARALLELISM", defaults.password.parallelism)?,
        };

        let tokens = TokenConfig {
            access_ttl_seconds: parse_var(
                &vars,
                "ACCESS_TTL_SECONDS",
                defaults.tokens.access_ttl_seconds,
            )?,
        };

        let config = Config {
            admin,
            password,
            server,
            storage,
            tokens,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.public_bind_address == self.server.private_bind_address {
            return Err(ConfigError::ValidationError(
                "PUBLIC_BIND_ADDRESS and PRIVATE_BIND_ADDRESS must differ".to_string(),
            ));
        }

        let ttl = self.tokens.access_ttl_seconds;
        if !(1..=MAX_ACCESS_TTL_SECONDS).contains(&ttl) {
            return Err(ConfigError::ValidationError(format!(
                "ACCESS_TTL_SECONDS must be between 1 and {MAX_ACCESS_TTL_SECONDS}, got {ttl}"
            )));
        }

        if self.server.request_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "REQUEST_TIMEOUT_MS must be positive".to_string(),
            ));
        }

        if let Some(admin) = &self.admin {
            if admin.login.trim().is_empty() || admin.password.is_empty() {
                return Err(ConfigError::ValidationError(
                    "ADMIN_LOGIN and ADMIN_PASSWORD cannot be empty".to_string(),
                ));
            }
        }

        if !self.server.private_bind_address.ip().is_loopback() {
            tracing::warn!(
                address = %self.server.private_bind_address,
                "Private listener is not bound to loopback. \
                 Make sure it is not reachable from untrusted networks."
            );
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.server.request_timeout_ms)
    }

    pub fn access_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.tokens.access_ttl_seconds.clamp(0, MAX_ACCESS_TTL_SECONDS))
    }
}
