//! Server configuration for the carenet REST API.
//!
//! Configuration is resolved once at startup from command line flags and
//! `CARENET_*` environment variables and then passed explicitly into
//! [`AppState`](crate::AppState). Nothing reads the environment afterwards.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `CARENET_SERVER_PORT` | 8080 | Server port |
//! | `CARENET_SERVER_HOST` | 127.0.0.1 | Host to bind |
//! | `CARENET_LOG_LEVEL` | info | Log level |
//! | `CARENET_ENVIRONMENT` | development | `development` or `production` |
//! | `CARENET_MAX_BODY_SIZE` | 10485760 | Max JSON request body (bytes) |
//! | `CARENET_MAX_UPLOAD_SIZE` | 10485760 | Max uploaded file (bytes) |
//! | `CARENET_REQUEST_TIMEOUT` | 30 | Request timeout (seconds) |
//! | `CARENET_ENABLE_CORS` | true | Enable CORS |
//! | `CARENET_CORS_ORIGINS` | * | Allowed origins |
//! | `CARENET_DATABASE_URL` | carenet.db | SQLite path or `:memory:` |
//! | `CARENET_JWT_SECRET` | (dev secret) | HMAC key for tokens and presigned URLs |
//! | `CARENET_ACCESS_TOKEN_TTL` | 900 | Access token lifetime (seconds) |
//! | `CARENET_REFRESH_TOKEN_TTL` | 604800 | Refresh token lifetime (seconds) |
//! | `CARENET_BLOB_ROOT` | (unset) | Directory for uploaded files; in-memory when unset |
//! | `CARENET_PUBLIC_BASE_URL` | http://localhost:8080 | Base of file URLs |
//! | `CARENET_PRESIGN_TTL` | 900 | Presigned URL lifetime (seconds) |
//! | `CARENET_PASSWORD_ROUNDS` | 100000 | PBKDF2 iterations for new credential hashes |
//! | `CARENET_SUBSCRIPTION_DAYS` | 365 | Length of a subscription term |
//!
//! # Example
//!
//! ```rust
//! use carenet_rest::ServerConfig;
//!
//! let config = ServerConfig {
//!     port: 3000,
//!     host: "0.0.0.0".to_string(),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use std::fmt;
use std::str::FromStr;

use clap::Parser;

/// Secret used when none is configured. Only acceptable in development.
pub const DEVELOPMENT_JWT_SECRET: &str = "carenet-development-secret-change-me-please";

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Error responses include internal detail.
    #[default]
    Development,
    /// Internal errors are reported generically.
    Production,
}

impl Environment {
    /// Returns true for [`Environment::Development`].
    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!("unknown environment '{}'", other)),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// Server configuration for the carenet REST API.
#[derive(Debug, Clone, Parser)]
#[command(name = "carenet")]
#[command(about = "Multi-tenant hospital records API server")]
pub struct ServerConfig {
    /// Port to listen on.
    #[arg(short, long, env = "CARENET_SERVER_PORT", default_value = "8080")]
    pub port: u16,

    /// Host address to bind to.
    #[arg(long, env = "CARENET_SERVER_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, env = "CARENET_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Deployment environment (development, production).
    #[arg(long, env = "CARENET_ENVIRONMENT", default_value = "development")]
    pub environment: Environment,

    /// Maximum JSON request body size in bytes.
    #[arg(long, env = "CARENET_MAX_BODY_SIZE", default_value = "10485760")]
    pub max_body_size: usize,

    /// Maximum uploaded file size in bytes.
    #[arg(long, env = "CARENET_MAX_UPLOAD_SIZE", default_value = "10485760")]
    pub max_upload_size: usize,

    /// Request timeout in seconds.
    #[arg(long, env = "CARENET_REQUEST_TIMEOUT", default_value = "30")]
    pub request_timeout: u64,

    /// Enable CORS.
    #[arg(long, env = "CARENET_ENABLE_CORS", default_value = "true")]
    pub enable_cors: bool,

    /// Allowed CORS origins (comma-separated, or * for all).
    #[arg(long, env = "CARENET_CORS_ORIGINS", default_value = "*")]
    pub cors_origins: String,

    /// Allowed CORS methods (comma-separated, or * for all).
    #[arg(
        long,
        env = "CARENET_CORS_METHODS",
        default_value = "GET,POST,PUT,DELETE,OPTIONS"
    )]
    pub cors_methods: String,

    /// Allowed CORS headers (comma-separated, or * for all).
    #[arg(
        long,
        env = "CARENET_CORS_HEADERS",
        default_value = "Content-Type,Authorization,Accept,X-Request-Id"
    )]
    pub cors_headers: String,

    /// SQLite database path, or `:memory:`.
    #[arg(long, env = "CARENET_DATABASE_URL", default_value = "carenet.db")]
    pub database_url: String,

    /// Secret for signing tokens and presigned file URLs.
    #[arg(long, env = "CARENET_JWT_SECRET", default_value = DEVELOPMENT_JWT_SECRET, hide_env_values = true)]
    pub jwt_secret: String,

    /// Access token lifetime in seconds.
    #[arg(long, env = "CARENET_ACCESS_TOKEN_TTL", default_value = "900")]
    pub access_token_ttl: u64,

    /// Refresh token lifetime in seconds.
    #[arg(long, env = "CARENET_REFRESH_TOKEN_TTL", default_value = "604800")]
    pub refresh_token_ttl: u64,

    /// Directory for uploaded files. Files are kept in memory when unset.
    #[arg(long, env = "CARENET_BLOB_ROOT")]
    pub blob_root: Option<String>,

    /// Public base URL used to build file URLs.
    #[arg(
        long,
        env = "CARENET_PUBLIC_BASE_URL",
        default_value = "http://localhost:8080"
    )]
    pub public_base_url: String,

    /// Presigned file URL lifetime in seconds.
    #[arg(long, env = "CARENET_PRESIGN_TTL", default_value = "900")]
    pub presign_ttl: u64,

    /// PBKDF2 iterations for new credential hashes.
    #[arg(long, env = "CARENET_PASSWORD_ROUNDS", default_value = "100000")]
    pub password_rounds: u32,

    /// Length of a hospital subscription term in days.
    #[arg(long, env = "CARENET_SUBSCRIPTION_DAYS", default_value = "365")]
    pub subscription_days: u32,

    /// Email of a platform super admin created at startup if missing.
    #[arg(long, env = "CARENET_BOOTSTRAP_ADMIN_EMAIL")]
    pub bootstrap_admin_email: Option<String>,

    /// Password of the bootstrap super admin.
    #[arg(long, env = "CARENET_BOOTSTRAP_ADMIN_PASSWORD", hide_env_values = true)]
    pub bootstrap_admin_password: Option<String>,

    /// Default page size for list endpoints.
    #[arg(long, env = "CARENET_DEFAULT_PAGE_SIZE", default_value = "20")]
    pub default_page_size: u32,

    /// Maximum page size for list endpoints.
    #[arg(long, env = "CARENET_MAX_PAGE_SIZE", default_value = "100")]
    pub max_page_size: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "127.0.0.1".to_string(),
            log_level: "info".to_string(),
            environment: Environment::Development,
            max_body_size: 10 * 1024 * 1024, // 10MB
            max_upload_size: 10 * 1024 * 1024,
            request_timeout: 30,
            enable_cors: true,
            cors_origins: "*".to_string(),
            cors_methods: "GET,POST,PUT,DELETE,OPTIONS".to_string(),
            cors_headers: "Content-Type,Authorization,Accept,X-Request-Id".to_string(),
            database_url: "carenet.db".to_string(),
            jwt_secret: DEVELOPMENT_JWT_SECRET.to_string(),
            access_token_ttl: 900,
            refresh_token_ttl: 7 * 24 * 3600,
            blob_root: None,
            public_base_url: "http://localhost:8080".to_string(),
            presign_ttl: 900,
            password_rounds: 100_000,
            subscription_days: 365,
            bootstrap_admin_email: None,
            bootstrap_admin_password: None,
            default_page_size: 20,
            max_page_size: 100,
        }
    }
}

impl ServerConfig {
    /// Creates a new ServerConfig from environment variables.
    ///
    /// Parses environment variables without requiring command line arguments.
    pub fn from_env() -> Self {
        Self::try_parse_from(["carenet"]).unwrap_or_default()
    }

    /// Returns the socket address to bind to.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns true when the database lives in memory.
    pub fn is_memory_database(&self) -> bool {
        self.database_url == ":memory:"
    }

    /// Clamps a requested page size into the configured bounds.
    pub fn page_size(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size)
    }

    /// Validates the configuration and returns errors if any.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.port == 0 {
            errors.push("Port cannot be 0".to_string());
        }

        if self.max_body_size == 0 {
            errors.push("Max body size cannot be 0".to_string());
        }

        if self.max_upload_size == 0 {
            errors.push("Max upload size cannot be 0".to_string());
        }

        if self.request_timeout == 0 {
            errors.push("Request timeout cannot be 0".to_string());
        }

        if self.access_token_ttl == 0 || self.refresh_token_ttl == 0 {
            errors.push("Token lifetimes cannot be 0".to_string());
        }

        if self.access_token_ttl >= self.refresh_token_ttl {
            errors.push("Access token lifetime must be shorter than refresh token lifetime".to_string());
        }

        if self.presign_ttl == 0 {
            errors.push("Presigned URL lifetime cannot be 0".to_string());
        }

        if self.password_rounds < 1_000 {
            errors.push("Password rounds must be at least 1000".to_string());
        }

        if self.subscription_days == 0 {
            errors.push("Subscription term cannot be 0 days".to_string());
        }

        if self.jwt_secret.is_empty() {
            errors.push("JWT secret cannot be empty".to_string());
        }

        if self.environment == Environment::Production
            && (self.jwt_secret.len() < 32 || self.jwt_secret == DEVELOPMENT_JWT_SECRET)
        {
            errors.push(
                "Production requires a JWT secret of at least 32 bytes that is not the development default"
                    .to_string(),
            );
        }

        if self.bootstrap_admin_email.is_some() != self.bootstrap_admin_password.is_some() {
            errors.push(
                "Bootstrap admin email and password must be given together".to_string(),
            );
        }

        if self.default_page_size == 0 {
            errors.push("Default page size cannot be 0".to_string());
        }

        if self.default_page_size > self.max_page_size {
            errors.push("Default page size cannot exceed max page size".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Creates a configuration suitable for testing.
    ///
    /// Uses an in-memory database and in-memory file storage.
    pub fn for_testing() -> Self {
        Self {
            port: 0, // Let OS assign port
            host: "127.0.0.1".to_string(),
            log_level: "debug".to_string(),
            environment: Environment::Development,
            max_body_size: 10 * 1024 * 1024,
            max_upload_size: 10 * 1024 * 1024,
            request_timeout: 5, // Shorter timeout for tests
            enable_cors: false,
            cors_origins: "*".to_string(),
            cors_methods: "*".to_string(),
            cors_headers: "*".to_string(),
            database_url: ":memory:".to_string(),
            jwt_secret: "test-secret-0123456789abcdef0123456789".to_string(),
            access_token_ttl: 900,
            refresh_token_ttl: 3600,
            blob_root: None,
            public_base_url: "http://localhost".to_string(),
            presign_ttl: 300,
            password_rounds: 1_000, // Cheap hashing for tests
            subscription_days: 365,
            bootstrap_admin_email: None,
            bootstrap_admin_password: None,
            default_page_size: 10,
            max_page_size: 50,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.access_token_ttl, 900);
        assert_eq!(config.max_upload_size, 10 * 1024 * 1024);
        assert!(config.enable_cors);
    }

    #[test]
    fn test_socket_addr() {
        let config = ServerConfig {
            port: 3000,
            host: "0.0.0.0".to_string(),
            ..Default::default()
        };
        assert_eq!(config.socket_addr(), "0.0.0.0:3000");
    }

    #[test]
    fn test_validate_valid() {
        assert!(ServerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_invalid_port() {
        let config = ServerConfig {
            port: 0,
            ..Default::default()
        };
        let result = config.validate();
        assert!(result.unwrap_err().iter().any(|e| e.contains("Port")));
    }

    #[test]
    fn test_validate_invalid_page_sizes() {
        let config = ServerConfig {
            default_page_size: 100,
            max_page_size: 50,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_production_rejects_development_secret() {
        let config = ServerConfig {
            environment: Environment::Production,
            ..Default::default()
        };
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("JWT secret")));

        let config = ServerConfig {
            environment: Environment::Production,
            jwt_secret: "x".repeat(48),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bootstrap_admin_requires_both_fields() {
        let config = ServerConfig {
            bootstrap_admin_email: Some("root@example.org".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_environment_parse() {
        assert_eq!(
            "prod".parse::<Environment>().unwrap(),
            Environment::Production
        );
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn test_page_size_clamped() {
        let config = ServerConfig::for_testing();
        assert_eq!(config.page_size(None), 10);
        assert_eq!(config.page_size(Some(0)), 1);
        assert_eq!(config.page_size(Some(500)), 50);
    }

    #[test]
    fn test_for_testing() {
        let config = ServerConfig::for_testing();
        assert_eq!(config.port, 0);
        assert!(!config.enable_cors);
        assert!(config.is_memory_database());
    }
}
