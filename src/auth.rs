use actix_web::{dev::ServiceRequest, web, Error, HttpMessage};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use argon2::{
    password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    config::Config,
    error::{AppError, AppResult},
    models::{Role, UserRow},
    state::AppState,
};

/// Token payload. `exp` doubles as the session expiry handed to clients.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub name: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct AuthUser {
    pub id: String,
    pub name: String,
    pub role: Role,
}

impl AuthUser {
    pub fn require(&self, role: Role) -> AppResult<()> {
        if self.role == role {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "Only {} accounts can do this.",
                role.as_str()
            )))
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

pub fn hash_password(password: &str) -> Result<String, password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

fn verify_password(password: &str, password_hash: &str) -> bool {
    let parsed_hash = PasswordHash::new(password_hash);
    match parsed_hash {
        Ok(hash) => Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok(),
        Err(_) => false,
    }
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn issue_token(config: &Config, user_id: &str, role: Role, name: &str) -> AppResult<Session> {
    let issued_at = Utc::now();
    let expires_at = issued_at + Duration::hours(config.token_ttl_hours);
    let claims = Claims {
        sub: user_id.to_string(),
        role,
        name: name.to_string(),
        iat: issued_at.timestamp(),
        exp: expires_at.timestamp(),
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|err| AppError::Internal(format!("token encoding failed: {err}")))?;
    Ok(Session { token, expires_at })
}

pub fn decode_token(secret: &str, token: &str) -> AppResult<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| AppError::Unauthorized("Invalid or expired token.".to_string()))
}

pub async fn authenticate_credentials(
    pool: &SqlitePool,
    email: &str,
    password: &str,
) -> AppResult<Option<UserRow>> {
    let user = sqlx::query_as::<_, UserRow>(
        r#"SELECT id, email, name, phone, role, password_hash, active, created_at
           FROM users
           WHERE email = ? AND active = 1
           LIMIT 1"#,
    )
    .bind(email.trim().to_lowercase())
    .fetch_optional(pool)
    .await?;

    Ok(user.filter(|user| verify_password(password, &user.password_hash)))
}

async fn authenticate(req: &ServiceRequest, credentials: &BearerAuth) -> AppResult<AuthUser> {
    let state = req
        .app_data::<web::Data<AppState>>()
        .ok_or_else(|| AppError::Internal("application state missing".to_string()))?;
    let claims = decode_token(&state.config.jwt_secret, credentials.token())?;

    let active = sqlx::query_as::<_, (bool,)>("SELECT active FROM users WHERE id = ?")
        .bind(&claims.sub)
        .fetch_optional(&state.db)
        .await?;

    match active {
        Some((true,)) => Ok(AuthUser {
            id: claims.sub,
            name: claims.name,
            role: claims.role,
        }),
        _ => Err(AppError::Unauthorized(
            "Account is disabled or no longer exists.".to_string(),
        )),
    }
}

async fn validate_role(
    req: ServiceRequest,
    credentials: BearerAuth,
    role: Option<Role>,
) -> Result<ServiceRequest, (Error, ServiceRequest)> {
    match authenticate(&req, &credentials).await {
        Ok(user) => {
            if let Some(role) = role {
                if let Err(err) = user.require(role) {
                    return Err((err.into(), req));
                }
            }
            req.extensions_mut().insert(user);
            Ok(req)
        }
        Err(err) => Err((err.into(), req)),
    }
}

pub async fn any_validator(
    req: ServiceRequest,
    credentials: BearerAuth,
) -> Result<ServiceRequest, (Error, ServiceRequest)> {
    validate_role(req, credentials, None).await
}

pub async fn admin_validator(
    req: ServiceRequest,
    credentials: BearerAuth,
) -> Result<ServiceRequest, (Error, ServiceRequest)> {
    validate_role(req, credentials, Some(Role::Admin)).await
}

pub async fn provider_validator(
    req: ServiceRequest,
    credentials: BearerAuth,
) -> Result<ServiceRequest, (Error, ServiceRequest)> {
    validate_role(req, credentials, Some(Role::Provider)).await
}

pub async fn customer_validator(
    req: ServiceRequest,
    credentials: BearerAuth,
) -> Result<ServiceRequest, (Error, ServiceRequest)> {
    validate_role(req, credentials, Some(Role::Customer)).await
}

pub async fn touch_customer(pool: &SqlitePool, user_id: &str) {
    let result = sqlx::query("UPDATE customers SET last_active_at = ? WHERE user_id = ?")
        .bind(Utc::now().to_rfc3339())
        .bind(user_id)
        .execute(pool)
        .await;
    if let Err(err) = result {
        log::warn!("Failed to update activity for {user_id}: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashed_password_verifies_only_with_the_original() {
        let hash = hash_password("s3cret-pass").unwrap();
        assert!(verify_password("s3cret-pass", &hash));
        assert!(!verify_password("wrong", &hash));
        assert!(!verify_password("s3cret-pass", "not-a-hash"));
    }

    #[test]
    fn token_round_trips_claims_and_expiry() {
        let config = Config::for_tests();
        let session = issue_token(&config, "user-1", Role::Provider, "Asha").unwrap();
        let claims = decode_token(&config.jwt_secret, &session.token).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.role, Role::Provider);
        assert_eq!(claims.exp, session.expires_at.timestamp());
    }

    #[test]
    fn token_signed_with_another_secret_is_rejected() {
        let config = Config::for_tests();
        let session = issue_token(&config, "user-1", Role::Admin, "Root").unwrap();
        let err = decode_token("other-secret", &session.token).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[test]
    fn require_rejects_other_roles() {
        let user = AuthUser {
            id: "c1".into(),
            name: "Cara".into(),
            role: Role::Customer,
        };
        assert!(user.require(Role::Customer).is_ok());
        assert!(matches!(user.require(Role::Admin), Err(AppError::Forbidden(_))));
    }
}
