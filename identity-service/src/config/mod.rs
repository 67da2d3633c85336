use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub mongodb: MongoConfig,
    pub cookie: CookieConfig,
    pub grant: GrantConfig,
    pub attempt: AttemptConfig,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

/// Session cookie material. One signing key, per-type keys are derived
/// from it by the session manager.
#[derive(Debug, Clone, Deserialize)]
pub struct CookieConfig {
    pub secret: String,
    pub session_lifetime_hours: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GrantConfig {
    pub signing_secret: String,
    /// System-wide ceiling on grant lifetime, seconds.
    pub max_seconds_validity: i64,
}

/// Lifetimes and budgets for login/registration attempts.
#[derive(Debug, Clone, Deserialize)]
pub struct AttemptConfig {
    pub attempt_lifetime_seconds: i64,
    pub sms_code_lifetime_seconds: i64,
    pub max_code_retries: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub login_attempts: u32,
    pub login_window_seconds: u64,
    pub register_attempts: u32,
    pub register_window_seconds: u64,
    pub global_ip_limit: u32,
    pub global_ip_window_seconds: u64,
}

impl IdentityConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = IdentityConfig {
            common: common_config,
            environment,
            service_name: get_env("SERVICE_NAME", Some("identity-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            mongodb: MongoConfig {
                uri: get_env("MONGODB_URI", Some("mongodb://localhost:27017"), is_prod)?,
                database: get_env("MONGODB_DATABASE", Some("identityserver"), is_prod)?,
            },
            cookie: CookieConfig {
                secret: get_env("COOKIE_SECRET", None, is_prod).or_else(|e| {
                    if is_prod {
                        Err(e)
                    } else {
                        Ok("dev-cookie-secret-not-for-production".to_string())
                    }
                })?,
                session_lifetime_hours: parse_env("SESSION_LIFETIME_HOURS", "12", is_prod)?,
            },
            grant: GrantConfig {
                signing_secret: get_env("GRANT_SIGNING_SECRET", None, is_prod).or_else(|e| {
                    if is_prod {
                        Err(e)
                    } else {
                        Ok("dev-grant-secret-not-for-production".to_string())
                    }
                })?,
                max_seconds_validity: parse_env("GRANT_MAX_SECONDS_VALIDITY", "86400", is_prod)?,
            },
            attempt: AttemptConfig {
                attempt_lifetime_seconds: parse_env("ATTEMPT_LIFETIME_SECONDS", "600", is_prod)?,
                sms_code_lifetime_seconds: parse_env("SMS_CODE_LIFETIME_SECONDS", "300", is_prod)?,
                max_code_retries: parse_env("MAX_CODE_RETRIES", "3", is_prod)?,
            },
            security: SecurityConfig {
                allowed_origins: get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            },
            rate_limit: RateLimitConfig {
                login_attempts: parse_env("RATE_LIMIT_LOGIN_ATTEMPTS", "5", is_prod)?,
                login_window_seconds: parse_env("RATE_LIMIT_LOGIN_WINDOW_SECONDS", "900", is_prod)?,
                register_attempts: parse_env("RATE_LIMIT_REGISTER_ATTEMPTS", "3", is_prod)?,
                register_window_seconds: parse_env(
                    "RATE_LIMIT_REGISTER_WINDOW_SECONDS",
                    "3600",
                    is_prod,
                )?,
                global_ip_limit: parse_env("RATE_LIMIT_GLOBAL_IP_LIMIT", "100", is_prod)?,
                global_ip_window_seconds: parse_env(
                    "RATE_LIMIT_GLOBAL_IP_WINDOW_SECONDS",
                    "60",
                    is_prod,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.grant.max_seconds_validity <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "GRANT_MAX_SECONDS_VALIDITY must be positive"
            )));
        }

        if self.attempt.attempt_lifetime_seconds <= 0
            || self.attempt.sms_code_lifetime_seconds <= 0
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "attempt and sms code lifetimes must be positive"
            )));
        }

        if self.environment == Environment::Prod {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if self.cookie.secret.len() < 32 {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "COOKIE_SECRET must be at least 32 bytes in production"
                )));
            }
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

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
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
