use std::env;
use std::str::FromStr;

use crate::state::PushConfig;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    pub settings_ttl_secs: i64,
    pub provider_test_pass_ratio: f64,
    pub cors_origin: Option<String>,
    pub static_dir: String,
    pub admin: AdminSeed,
    pub push: PushConfig,
}

#[derive(Clone, Debug)]
pub struct AdminSeed {
    pub email: String,
    pub password: String,
    pub name: String,
}

impl Config {
    /// Reads the process environment. `.env` is loaded earlier, together with logging.
    pub fn from_env() -> Self {
        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| "change-me".to_string());
        if jwt_secret == "change-me" {
            log::warn!("JWT_SECRET not set. Using an insecure default. Set JWT_SECRET in production.");
        }

        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://./data/voltcare.db".to_string()),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parsed("PORT", 8080),
            jwt_secret,
            token_ttl_hours: parsed("TOKEN_TTL_HOURS", 24),
            settings_ttl_secs: parsed("SETTINGS_TTL_SECS", 86_400),
            provider_test_pass_ratio: parsed("PROVIDER_TEST_PASS_RATIO", 0.6),
            cors_origin: env::var("CORS_ORIGIN")
                .ok()
                .filter(|value| !value.trim().is_empty()),
            static_dir: env::var("STATIC_DIR").unwrap_or_else(|_| "./static".to_string()),
            admin: AdminSeed {
                email: env::var("ADMIN_EMAIL").unwrap_or_else(|_| "admin@voltcare.local".to_string()),
                password: env::var("ADMIN_PASSWORD").unwrap_or_else(|_| "admin".to_string()),
                name: env::var("ADMIN_NAME").unwrap_or_else(|_| "Super Admin".to_string()),
            },
            push: PushConfig {
                public_key: env::var("VAPID_PUBLIC_KEY").unwrap_or_default(),
                private_key: env::var("VAPID_PRIVATE_KEY").unwrap_or_default(),
                subject: env::var("VAPID_SUBJECT")
                    .unwrap_or_else(|_| "mailto:support@voltcare.local".to_string()),
            },
        }
    }
}

fn parsed<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(value) => match value.trim().parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                log::warn!("{key}={value} is not valid, falling back to the default.");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
impl Config {
    pub fn for_tests() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
            jwt_secret: "test-secret".to_string(),
            token_ttl_hours: 1,
            settings_ttl_secs: 86_400,
            provider_test_pass_ratio: 0.6,
            cors_origin: None,
            static_dir: "./static".to_string(),
            admin: AdminSeed {
                email: "admin@test.local".to_string(),
                password: "admin-pass".to_string(),
                name: "Test Admin".to_string(),
            },
            push: PushConfig {
                public_key: String::new(),
                private_key: String::new(),
                subject: String::new(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        env::set_var("VOLTCARE_TEST_BAD_PORT", "eighty");
        env::set_var("VOLTCARE_TEST_GOOD_PORT", " 9090 ");
        assert_eq!(parsed("VOLTCARE_TEST_BAD_PORT", 8080u16), 8080);
        assert_eq!(parsed("VOLTCARE_TEST_GOOD_PORT", 8080u16), 9090);
        assert_eq!(parsed("VOLTCARE_TEST_UNSET_PORT", 8080u16), 8080);
    }
}
