use axum_extra::extract::cookie::SameSite;
use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::collections::HashMap;
use std::env;

use crate::models::OrgRole;

/// Header fields the auth proxy may forward besides the main header, in the
/// order they are applied and folded into the cache key.
pub const PROXY_HEADER_FIELDS: [&str; 5] = ["Name", "Email", "Login", "Groups", "Role"];

#[derive(Debug, Clone)]
pub struct AuthContextConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    /// Keys the server-side hash of session tokens.
    pub secret_key: Secret<String>,
    pub redis: RedisConfig,
    pub session: SessionConfig,
    pub cookie: CookieConfig,
    pub basic_auth: BasicAuthConfig,
    pub auth_proxy: AuthProxyConfig,
    pub directory: DirectoryConfig,
    pub anonymous: AnonymousConfig,
    pub login_attempts: LoginAttemptConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Default)]
pub struct RedisConfig {
    /// In-memory cache when unset.
    pub url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub max_lifetime: chrono::Duration,
    pub max_inactive_lifetime: chrono::Duration,
    pub rotation_interval: chrono::Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "auth_session".to_string(),
            max_lifetime: chrono::Duration::days(30),
            max_inactive_lifetime: chrono::Duration::days(7),
            rotation_interval: chrono::Duration::minutes(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CookieConfig {
    pub secure: bool,
    /// `None` omits the SameSite attribute.
    pub same_site: Option<SameSite>,
    pub sub_path: String,
}

impl CookieConfig {
    pub fn path(&self) -> String {
        let trimmed = self.sub_path.trim_end_matches('/');
        if trimmed.is_empty() {
            "/".to_string()
        } else {
            trimmed.to_string()
        }
    }
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            secure: false,
            same_site: Some(SameSite::Lax),
            sub_path: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BasicAuthConfig {
    pub enabled: bool,
}

impl Default for BasicAuthConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderProperty {
    Username,
    Email,
}

#[derive(Debug, Clone)]
pub struct AuthProxyConfig {
    pub enabled: bool,
    pub header_name: String,
    pub header_property: HeaderProperty,
    pub auto_sign_up: bool,
    pub sync_ttl_minutes: i64,
    /// Comma separated networks; empty allows every address.
    pub whitelist: String,
    /// Field (see [`PROXY_HEADER_FIELDS`]) to request header name.
    pub headers: HashMap<String, String>,
}

impl Default for AuthProxyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            header_name: "X-WEBAUTH-USER".to_string(),
            header_property: HeaderProperty::Username,
            auto_sign_up: true,
            sync_ttl_minutes: 60,
            whitelist: String::new(),
            headers: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    pub enabled: bool,
    pub config_file: String,
    pub allow_sign_up: bool,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            config_file: "directory.toml".to_string(),
            allow_sign_up: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnonymousConfig {
    pub enabled: bool,
    pub org_name: String,
    pub org_role: OrgRole,
}

impl Default for AnonymousConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            org_name: "Main Org.".to_string(),
            org_role: OrgRole::Viewer,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoginAttemptConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub window_seconds: u64,
}

impl Default for LoginAttemptConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            window_seconds: 300,
        }
    }
}

impl Default for AuthContextConfig {
    fn default() -> Self {
        Self {
            common: core_config::Config::default(),
            environment: Environment::Dev,
            service_name: "auth-context".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            secret_key: Secret::new("dev-secret-key-change-me".to_string()),
            redis: RedisConfig::default(),
            session: SessionConfig::default(),
            cookie: CookieConfig::default(),
            basic_auth: BasicAuthConfig::default(),
            auth_proxy: AuthProxyConfig::default(),
            directory: DirectoryConfig::default(),
            anonymous: AnonymousConfig::default(),
            login_attempts: LoginAttemptConfig::default(),
        }
    }
}

impl AuthContextConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;
        let defaults = AuthContextConfig::default();

        let config = AuthContextConfig {
            common: common_config,
            environment,
            service_name: get_env("SERVICE_NAME", Some("auth-context"), false)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), false)?,
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            secret_key: Secret::new(get_env(
                "SECRET_KEY",
                Some("dev-secret-key-change-me"),
                is_prod,
            )?),
            redis: RedisConfig {
                url: env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
            },
            session: SessionConfig {
                cookie_name: get_env(
                    "LOGIN_COOKIE_NAME",
                    Some(defaults.session.cookie_name.as_str()),
                    false,
                )?,
                max_lifetime: chrono::Duration::days(parse_env(
                    "LOGIN_MAXIMUM_LIFETIME_DAYS",
                    defaults.session.max_lifetime.num_days(),
                )?),
                max_inactive_lifetime: chrono::Duration::days(parse_env(
                    "LOGIN_MAXIMUM_INACTIVE_LIFETIME_DAYS",
                    defaults.session.max_inactive_lifetime.num_days(),
                )?),
                rotation_interval: chrono::Duration::minutes(parse_env(
                    "TOKEN_ROTATION_INTERVAL_MINUTES",
                    defaults.session.rotation_interval.num_minutes(),
                )?),
            },
            cookie: CookieConfig {
                secure: parse_env("COOKIE_SECURE", is_prod)?,
                same_site: parse_same_site(&get_env("COOKIE_SAMESITE", Some("lax"), false)?)?,
                sub_path: get_env("APP_SUB_URL", Some(""), false)?,
            },
            basic_auth: BasicAuthConfig {
                enabled: parse_env("BASIC_AUTH_ENABLED", defaults.basic_auth.enabled)?,
            },
            auth_proxy: AuthProxyConfig {
                enabled: parse_env("AUTH_PROXY_ENABLED", false)?,
                header_name: get_env(
                    "AUTH_PROXY_HEADER_NAME",
                    Some(defaults.auth_proxy.header_name.as_str()),
                    false,
                )?,
                header_property: get_env("AUTH_PROXY_HEADER_PROPERTY", Some("username"), false)?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
                auto_sign_up: parse_env("AUTH_PROXY_AUTO_SIGN_UP", true)?,
                sync_ttl_minutes: parse_env(
                    "AUTH_PROXY_SYNC_TTL_MINUTES",
                    defaults.auth_proxy.sync_ttl_minutes,
                )?,
                whitelist: get_env("AUTH_PROXY_WHITELIST", Some(""), false)?,
                headers: parse_proxy_headers(&get_env("AUTH_PROXY_HEADERS", Some(""), false)?),
            },
            directory: DirectoryConfig {
                enabled: parse_env("DIRECTORY_ENABLED", false)?,
                config_file: get_env(
                    "DIRECTORY_CONFIG_FILE",
                    Some(defaults.directory.config_file.as_str()),
                    false,
                )?,
                allow_sign_up: parse_env("DIRECTORY_ALLOW_SIGN_UP", true)?,
            },
            anonymous: AnonymousConfig {
                enabled: parse_env("ANONYMOUS_ENABLED", false)?,
                org_name: get_env("ANONYMOUS_ORG_NAME", Some(defaults.anonymous.org_name.as_str()), false)?,
                org_role: get_env("ANONYMOUS_ORG_ROLE", Some("viewer"), false)?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
            },
            login_attempts: LoginAttemptConfig {
                enabled: parse_env("LOGIN_ATTEMPTS_ENABLED", true)?,
                max_attempts: parse_env(
                    "LOGIN_ATTEMPTS_MAX",
                    defaults.login_attempts.max_attempts,
                )?,
                window_seconds: parse_env(
                    "LOGIN_ATTEMPTS_WINDOW_SECONDS",
                    defaults.login_attempts.window_seconds,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.session.rotation_interval <= chrono::Duration::zero() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "TOKEN_ROTATION_INTERVAL_MINUTES must be positive"
            )));
        }

        if self.auth_proxy.enabled {
            if self.auth_proxy.header_name.trim().is_empty() {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "AUTH_PROXY_HEADER_NAME must be set when the auth proxy is enabled"
                )));
            }

            crate::utils::net::parse_allow_list(&self.auth_proxy.whitelist).map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("AUTH_PROXY_WHITELIST is invalid: {}", e))
            })?;

            if let Some(field) = self
                .auth_proxy
                .headers
                .keys()
                .find(|field| !PROXY_HEADER_FIELDS.contains(&field.as_str()))
            {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "AUTH_PROXY_HEADERS contains unsupported field '{}'",
                    field
                )));
            }
        }

        if self.environment == Environment::Prod && !self.cookie.secure {
            tracing::warn!("Session cookies are not marked Secure in production");
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(val) => val.trim().parse().map_err(|e: T::Err| {
            AppError::ConfigError(anyhow::anyhow!("{} has an invalid value: {}", key, e))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_same_site(value: &str) -> Result<Option<SameSite>, AppError> {
    match value.trim().to_lowercase().as_str() {
        "lax" => Ok(Some(SameSite::Lax)),
        "strict" => Ok(Some(SameSite::Strict)),
        "none" => Ok(Some(SameSite::None)),
        "disabled" | "" => Ok(None),
        other => Err(AppError::ConfigError(anyhow::anyhow!(
            "Invalid COOKIE_SAMESITE value: {}",
            other
        ))),
    }
}

/// Parses `Field:Header` pairs separated by whitespace or commas, e.g.
/// `Name:X-WEBAUTH-NAME Groups:X-WEBAUTH-GROUPS`.
pub fn parse_proxy_headers(value: &str) -> HashMap<String, String> {
    value
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter_map(|pair| pair.split_once(':'))
        .filter(|(field, header)| !field.is_empty() && !header.is_empty())
        .map(|(field, header)| (field.to_string(), header.to_string()))
        .collect()
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl std::str::FromStr for HeaderProperty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "username" => Ok(HeaderProperty::Username),
            "email" => Ok(HeaderProperty::Email),
            _ => Err(format!("Invalid auth proxy header property: {}", s)),
        }
    }
}
