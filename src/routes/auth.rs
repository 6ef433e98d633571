use actix_web::{web, HttpResponse};
use actix_web_httpauth::middleware::HttpAuthentication;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    auth::{
        any_validator, authenticate_credentials, hash_password, issue_token, new_id,
        touch_customer, AuthUser,
    },
    customer,
    db::log_activity,
    error::{AppError, AppResult},
    models::{Role, UserRow},
    provider,
    state::AppState,
};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/auth")
            .service(web::resource("/register").route(web::post().to(register)))
            .service(web::resource("/login").route(web::post().to(login)))
            .service(
                web::resource("/me")
                    .wrap(HttpAuthentication::bearer(any_validator))
                    .route(web::get().to(me)),
            ),
    );
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    name: String,
    email: String,
    password: String,
    phone: Option<String>,
    city: Option<String>,
    role: Option<Role>,
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserView {
    id: String,
    name: String,
    email: String,
    phone: Option<String>,
    role: String,
}

impl From<UserRow> for UserView {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            email: row.email,
            phone: row.phone,
            role: row.role,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    token: String,
    user: UserView,
    expires_at: DateTime<Utc>,
}

fn session_for(state: &AppState, user: UserRow) -> AppResult<SessionResponse> {
    let role = Role::parse(&user.role)
        .ok_or_else(|| AppError::Internal(format!("unknown role '{}'", user.role)))?;
    let session = issue_token(&state.config, &user.id, role, &user.name)?;
    Ok(SessionResponse {
        token: session.token,
        expires_at: session.expires_at,
        user: user.into(),
    })
}

async fn register(
    state: web::Data<AppState>,
    body: web::Json<RegisterRequest>,
) -> AppResult<HttpResponse> {
    let input = body.into_inner();
    let role = input.role.unwrap_or(Role::Customer);
    if role == Role::Admin {
        return Err(AppError::Forbidden("Admin accounts cannot be registered.".into()));
    }
    let name = input.name.trim().to_string();
    let email = input.email.trim().to_lowercase();
    if name.is_empty() {
        return Err(AppError::validation("Name is required."));
    }
    if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
        return Err(AppError::validation("Please enter a valid email address."));
    }
    if input.password.len() < 8 {
        return Err(AppError::validation("Password must be at least 8 characters."));
    }
    let phone = input
        .phone
        .map(|phone| phone.trim().to_string())
        .filter(|phone| !phone.is_empty());
    let city = input
        .city
        .map(|city| city.trim().to_string())
        .filter(|city| !city.is_empty());

    let taken = sqlx::query_as::<_, (String,)>("SELECT id FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(&state.db)
        .await?;
    if taken.is_some() {
        return Err(AppError::Conflict("An account with this email already exists.".into()));
    }

    let password_hash = hash_password(&input.password)
        .map_err(|err| AppError::Internal(format!("password hashing failed: {err}")))?;
    let user = UserRow {
        id: new_id(),
        email,
        name,
        phone,
        role: role.as_str().to_string(),
        password_hash,
        active: true,
        created_at: Utc::now().to_rfc3339(),
    };

    let mut tx = state.db.begin().await?;
    sqlx::query(
        r#"INSERT INTO users (id, email, name, phone, role, password_hash, active, created_at)
           VALUES (?, ?, ?, ?, ?, ?, 1, ?)"#,
    )
    .bind(&user.id)
    .bind(&user.email)
    .bind(&user.name)
    .bind(&user.phone)
    .bind(&user.role)
    .bind(&user.password_hash)
    .bind(&user.created_at)
    .execute(&mut *tx)
    .await?;
    match role {
        Role::Provider => {
            sqlx::query("INSERT INTO providers (user_id, city) VALUES (?, ?)")
                .bind(&user.id)
                .bind(&city)
                .execute(&mut *tx)
                .await?;
        }
        _ => {
            sqlx::query("INSERT INTO customers (user_id, city, last_active_at) VALUES (?, ?, ?)")
                .bind(&user.id)
                .bind(&city)
                .bind(&user.created_at)
                .execute(&mut *tx)
                .await?;
        }
    }
    tx.commit().await?;

    log_activity(
        &state.db,
        "user_registered",
        &format!("New {} account: {}", user.role, user.name),
        Some(&user.id),
        None,
    )
    .await;
    log::info!("Registered {} account {}", user.role, user.id);

    Ok(HttpResponse::Created().json(session_for(&state, user)?))
}

async fn login(
    state: web::Data<AppState>,
    body: web::Json<LoginRequest>,
) -> AppResult<HttpResponse> {
    let Some(user) = authenticate_credentials(&state.db, &body.email, &body.password).await? else {
        return Err(AppError::Unauthorized("Invalid email or password.".into()));
    };
    if user.role == Role::Customer.as_str() {
        touch_customer(&state.db, &user.id).await;
    }
    Ok(HttpResponse::Ok().json(session_for(&state, user)?))
}

async fn me(state: web::Data<AppState>, auth: web::ReqData<AuthUser>) -> AppResult<HttpResponse> {
    let user = sqlx::query_as::<_, UserRow>(
        "SELECT id, email, name, phone, role, password_hash, active, created_at FROM users WHERE id = ?",
    )
    .bind(&auth.id)
    .fetch_optional(&state.db)
    .await?
    .ok_or(AppError::NotFound("User"))?;

    let profile = match auth.role {
        Role::Customer => {
            touch_customer(&state.db, &auth.id).await;
            serde_json::to_value(customer::fetch(&state.db, &auth.id).await?)
        }
        Role::Provider => serde_json::to_value(provider::view(&state.db, &auth.id).await?),
        Role::Admin => Ok(serde_json::Value::Null),
    }
    .map_err(|err| AppError::Internal(format!("profile serialization failed: {err}")))?;

    Ok(HttpResponse::Ok().json(json!({
        "user": UserView::from(user),
        "profile": profile,
    })))
}

#[cfg(test)]
mod tests {
    use actix_web::{http::StatusCode, test};
    use serde_json::Value;

    use crate::{
        routes::testing::{app, bearer},
        test_support::Fixture,
    };

    #[actix_web::test]
    async fn register_login_and_me() {
        let fx = Fixture::new().await;
        let app = test::init_service(app(fx.state.clone())).await;

        let req = test::TestRequest::post()
            .uri("/auth/register")
            .set_json(serde_json::json!({
                "name": "Meera",
                "email": "Meera@Example.com",
                "password": "long-enough",
                "role": "provider",
                "city": "Pune"
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["user"]["email"], "meera@example.com");
        assert_eq!(body["user"]["role"], "provider");
        assert!(body["expiresAt"].is_string());

        let req = test::TestRequest::post()
            .uri("/auth/login")
            .set_json(serde_json::json!({"email": "meera@example.com", "password": "long-enough"}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let token = body["token"].as_str().unwrap().to_string();

        let req = test::TestRequest::get()
            .uri("/auth/me")
            .insert_header(bearer(&token))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["profile"]["kyc"]["status"], "pending");
        assert_eq!(body["profile"]["eligible"], false);
    }

    #[actix_web::test]
    async fn rejects_admin_self_registration_and_bad_password() {
        let fx = Fixture::new().await;
        let app = test::init_service(app(fx.state.clone())).await;

        let req = test::TestRequest::post()
            .uri("/auth/register")
            .set_json(serde_json::json!({
                "name": "Eve", "email": "eve@example.com", "password": "long-enough", "role": "admin"
            }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::post()
            .uri("/auth/login")
            .set_json(serde_json::json!({"email": "cara@test.local", "password": "wrong"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["code"], "Unauthorized");
    }

    #[actix_web::test]
    async fn malformed_json_is_a_validation_error() {
        let fx = Fixture::new().await;
        let app = test::init_service(app(fx.state.clone())).await;
        let req = test::TestRequest::post()
            .uri("/auth/login")
            .insert_header(("Content-Type", "application/json"))
            .set_payload("{not json")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["code"], "ValidationError");
    }
}
