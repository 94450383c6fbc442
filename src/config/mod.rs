use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub api: ApiConfig,
    pub security: SecurityConfig,
    pub realtime: RealtimeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub port: u16,
    pub enable_request_logging: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub jwt_secret: String,
    pub jwt_expiry_hours: u64,
    pub enable_cors: bool,
    pub cors_origins: Vec<String>,
    /// Log tenant mismatches as security events
    pub enable_audit_logging: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    pub handshake_timeout_ms: u64,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub channel_namespace: Option<String>,
    /// Per-channel broadcast buffer on the gateway side
    pub channel_capacity: usize,
}

impl RealtimeConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Capped exponential delay before reconnect attempt `attempt` (0-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        let delay = self.backoff_initial_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.backoff_max_ms))
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: 10_000,
            backoff_initial_ms: 500,
            backoff_max_ms: 30_000,
            channel_namespace: None,
            channel_capacity: 256,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        // API overrides
        if let Some(v) = env::var("CAREWATCH_PORT").ok().or_else(|| env::var("PORT").ok()) {
            self.api.port = v.parse().unwrap_or(self.api.port);
        }
        if let Ok(v) = env::var("API_ENABLE_REQUEST_LOGGING") {
            self.api.enable_request_logging = v.parse().unwrap_or(self.api.enable_request_logging);
        }

        // Security overrides
        if let Ok(v) = env::var("JWT_SECRET") {
            self.security.jwt_secret = v;
        }
        if let Ok(v) = env::var("SECURITY_JWT_EXPIRY_HOURS") {
            self.security.jwt_expiry_hours = v.parse().unwrap_or(self.security.jwt_expiry_hours);
        }
        if let Ok(v) = env::var("SECURITY_ENABLE_CORS") {
            self.security.enable_cors = v.parse().unwrap_or(self.security.enable_cors);
        }
        if let Ok(v) = env::var("SECURITY_CORS_ORIGINS") {
            self.security.cors_origins = v.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(v) = env::var("SECURITY_ENABLE_AUDIT_LOGGING") {
            self.security.enable_audit_logging = v.parse().unwrap_or(self.security.enable_audit_logging);
        }

        // Realtime overrides
        if let Ok(v) = env::var("REALTIME_HANDSHAKE_TIMEOUT_MS") {
            self.realtime.handshake_timeout_ms = v.parse().unwrap_or(self.realtime.handshake_timeout_ms);
        }
        if let Ok(v) = env::var("REALTIME_BACKOFF_INITIAL_MS") {
            self.realtime.backoff_initial_ms = v.parse().unwrap_or(self.realtime.backoff_initial_ms);
        }
        if let Ok(v) = env::var("REALTIME_BACKOFF_MAX_MS") {
            self.realtime.backoff_max_ms = v.parse().unwrap_or(self.realtime.backoff_max_ms);
        }
        if let Ok(v) = env::var("REALTIME_CHANNEL_NAMESPACE") {
            self.realtime.channel_namespace = Some(v).filter(|s| !s.trim().is_empty());
        }
        if let Ok(v) = env::var("REALTIME_CHANNEL_CAPACITY") {
            self.realtime.channel_capacity = v.parse().unwrap_or(self.realtime.channel_capacity);
        }

        self
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            api: ApiConfig {
                port: 3000,
                enable_request_logging: true,
            },
            security: SecurityConfig {
                jwt_secret: "carewatch-development-secret".to_string(),
                jwt_expiry_hours: 24 * 7, // 1 week
                enable_cors: true,
                cors_origins: vec!["http://localhost:3000".to_string(), "http://localhost:5173".to_string()],
                enable_audit_logging: false,
            },
            realtime: RealtimeConfig {
                handshake_timeout_ms: 10_000,
                backoff_initial_ms: 250,
                backoff_max_ms: 5_000,
                channel_namespace: None,
                channel_capacity: 256,
            },
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            api: ApiConfig {
                port: 3000,
                enable_request_logging: true,
            },
            security: SecurityConfig {
                // Must come from JWT_SECRET
                jwt_secret: String::new(),
                jwt_expiry_hours: 24,
                enable_cors: true,
                cors_origins: vec!["https://staging.example.com".to_string()],
                enable_audit_logging: true,
            },
            realtime: RealtimeConfig {
                handshake_timeout_ms: 10_000,
                backoff_initial_ms: 500,
                backoff_max_ms: 30_000,
                channel_namespace: None,
                channel_capacity: 512,
            },
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            api: ApiConfig {
                port: 3000,
                enable_request_logging: false,
            },
            security: SecurityConfig {
                jwt_secret: String::new(),
                jwt_expiry_hours: 4,
                enable_cors: true,
                cors_origins: vec!["https://app.example.com".to_string()],
                enable_audit_logging: true,
            },
            realtime: RealtimeConfig {
                handshake_timeout_ms: 5_000,
                backoff_initial_ms: 1_000,
                backoff_max_ms: 60_000,
                channel_namespace: None,
                channel_capacity: 1024,
            },
        }
    }
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_development_config() {
        let config = AppConfig::development();
        assert!(!config.security.jwt_secret.is_empty());
        assert_eq!(config.api.port, 3000);
        assert!(!config.security.enable_audit_logging);
    }

    #[test]
    fn test_default_production_config() {
        let config = AppConfig::production();
        assert!(config.security.jwt_secret.is_empty());
        assert!(config.security.enable_audit_logging);
        assert_eq!(config.realtime.backoff_max_ms, 60_000);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let realtime = RealtimeConfig {
            backoff_initial_ms: 100,
            backoff_max_ms: 1_000,
            ..RealtimeConfig::default()
        };
        assert_eq!(realtime.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(realtime.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(realtime.backoff_delay(3), Duration::from_millis(800));
        assert_eq!(realtime.backoff_delay(4), Duration::from_millis(1_000));
        assert_eq!(realtime.backoff_delay(200), Duration::from_millis(1_000));
    }
}
