use std::{env, fs, path::Path};

use chrono::Utc;
use sqlx::SqlitePool;

use crate::{
    auth::{hash_password, new_id},
    config::AdminSeed,
    models::Role,
    settings,
};

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

pub fn ensure_sqlite_dir(db_url: &str) -> std::io::Result<()> {
    let path = if let Some(path) = db_url.strip_prefix("sqlite://") {
        Some(path)
    } else if let Some(path) = db_url.strip_prefix("sqlite:") {
        Some(path)
    } else {
        None
    };

    let Some(path) = path else {
        return Ok(());
    };

    let path = path.split('?').next().unwrap_or(path);
    if path == ":memory:" || path.is_empty() {
        return Ok(());
    }

    let path = path.strip_prefix("file:").unwrap_or(path);
    let db_path = Path::new(path);
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

pub async fn seed_defaults(pool: &SqlitePool, admin: &AdminSeed) -> Result<(), sqlx::Error> {
    seed_admin(pool, admin).await?;
    seed_settings(pool).await?;
    seed_catalog(pool).await?;
    Ok(())
}

pub async fn log_activity(
    pool: &SqlitePool,
    kind: &str,
    message: &str,
    user_id: Option<&str>,
    booking_id: Option<&str>,
) {
    let result = sqlx::query(
        r#"INSERT INTO activities (id, kind, message, created_at, user_id, booking_id)
           VALUES (?, ?, ?, ?, ?, ?)"#,
    )
    .bind(new_id())
    .bind(kind)
    .bind(message)
    .bind(Utc::now().to_rfc3339())
    .bind(user_id)
    .bind(booking_id)
    .execute(pool)
    .await;

    if let Err(err) = result {
        log::warn!("Failed to record activity {kind}: {err}");
    }
}

async fn seed_admin(pool: &SqlitePool, admin: &AdminSeed) -> Result<(), sqlx::Error> {
    let existing = sqlx::query_as::<_, (String,)>("SELECT id FROM users WHERE role = ? LIMIT 1")
        .bind(Role::Admin.as_str())
        .fetch_optional(pool)
        .await?;

    if existing.is_some() {
        return Ok(());
    }

    if admin.password == "admin" {
        log::warn!("ADMIN_PASSWORD not set. Using default password 'admin'. Set ADMIN_PASSWORD in production.");
    }

    let password_hash = hash_password(&admin.password)
        .map_err(|_| sqlx::Error::Protocol("password hash failed".into()))?;

    sqlx::query(
        r#"INSERT INTO users (id, email, name, phone, role, password_hash, active, created_at)
           VALUES (?, ?, ?, NULL, ?, ?, 1, ?)"#,
    )
    .bind(new_id())
    .bind(admin.email.trim().to_lowercase())
    .bind(&admin.name)
    .bind(Role::Admin.as_str())
    .bind(password_hash)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    log::info!("Seeded admin account {}", admin.email);
    Ok(())
}

pub async fn seed_settings(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let now = Utc::now().to_rfc3339();
    for (key, value) in settings::DEFAULTS {
        sqlx::query("INSERT OR IGNORE INTO settings (key, value, updated_at) VALUES (?, ?, ?)")
            .bind(*key)
            .bind(*value)
            .bind(&now)
            .execute(pool)
            .await?;
    }
    Ok(())
}

async fn seed_catalog(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let seed = env::var("SEED_CATALOG").unwrap_or_else(|_| "false".to_string());
    if seed != "true" {
        return Ok(());
    }

    let (existing,) = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM services")
        .fetch_one(pool)
        .await?;
    if existing > 0 {
        return Ok(());
    }

    let services = [
        ("Fan Installation", "installation", "Ceiling or wall fan fitting with wiring check.", 299.0, 1.0),
        ("Switchboard Repair", "repair", "Diagnose and fix faulty switches and sockets.", 199.0, 0.5),
        ("Full House Wiring Inspection", "inspection", "Load test, earthing check and safety report.", 999.0, 3.0),
        ("Inverter Setup", "installation", "Inverter and battery installation with changeover.", 649.0, 2.0),
    ];

    let now = Utc::now().to_rfc3339();
    for (title, category, description, price, duration) in services {
        sqlx::query(
            r#"INSERT INTO services (id, title, category, description, base_price, duration, image, is_active, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, NULL, 1, ?, ?)"#,
        )
        .bind(new_id())
        .bind(title)
        .bind(category)
        .bind(description)
        .bind(price)
        .bind(duration)
        .bind(&now)
        .bind(&now)
        .execute(pool)
        .await?;
    }

    log::info!("Seeded {} catalog services", services.len());
    Ok(())
}
