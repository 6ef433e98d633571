//! Shared fixtures for database-backed tests.

use std::str::FromStr;

use chrono::{Duration, Local, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::{
    auth::{issue_token, new_id},
    config::Config,
    db,
    models::Role,
    settings::SettingsSnapshot,
    state::AppState,
};

/// In-memory database with migrations and default settings. One connection,
/// kept alive for the whole test, so every query sees the same database.
pub async fn pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .unwrap();
    db::run_migrations(&pool).await.unwrap();
    db::seed_settings(&pool).await.unwrap();
    pool
}

pub fn future_date() -> String {
    (Local::now().date_naive() + Duration::days(7))
        .format("%Y-%m-%d")
        .to_string()
}

pub struct Fixture {
    pub pool: SqlitePool,
    pub state: AppState,
    pub admin: String,
    pub customer: String,
    /// KYC-approved provider in Pune who passed the test.
    pub provider: String,
}

impl Fixture {
    pub async fn new() -> Self {
        let pool = pool().await;
        let state = AppState::new(pool.clone(), Config::for_tests());
        let admin = insert_user(&pool, "admin@test.local", "Test Admin", Role::Admin).await;
        let customer = insert_user(&pool, "cara@test.local", "Cara Customer", Role::Customer).await;
        sqlx::query("INSERT INTO customers (user_id, city) VALUES (?, 'Pune')")
            .bind(&customer)
            .execute(&pool)
            .await
            .unwrap();
        let provider = insert_user(&pool, "pavan@test.local", "Pavan Provider", Role::Provider).await;
        sqlx::query(
            r#"INSERT INTO providers (user_id, city, service_area, kyc_status, approved, test_passed, test_score)
               VALUES (?, 'Pune', 'Kothrud, Baner', 'approved', 1, 1, 0.9)"#,
        )
        .bind(&provider)
        .execute(&pool)
        .await
        .unwrap();
        Self {
            pool,
            state,
            admin,
            customer,
            provider,
        }
    }

    pub async fn settings(&self) -> SettingsSnapshot {
        self.state.settings.snapshot(&self.pool).await.unwrap()
    }

    pub fn token(&self, user_id: &str, role: Role) -> String {
        issue_token(&self.state.config, user_id, role, "Tester")
            .unwrap()
            .token
    }

    /// Provider that registered but has not been vetted yet.
    pub async fn new_provider(&self, email: &str, city: &str) -> String {
        let id = insert_user(&self.pool, email, "Nina Newcomer", Role::Provider).await;
        sqlx::query("INSERT INTO providers (user_id, city) VALUES (?, ?)")
            .bind(&id)
            .bind(city)
            .execute(&self.pool)
            .await
            .unwrap();
        id
    }

    pub async fn new_customer(&self, email: &str) -> String {
        let id = insert_user(&self.pool, email, "Other Customer", Role::Customer).await;
        sqlx::query("INSERT INTO customers (user_id) VALUES (?)")
            .bind(&id)
            .execute(&self.pool)
            .await
            .unwrap();
        id
    }

    pub async fn service(&self, title: &str, price: f64) -> String {
        let id = new_id();
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"INSERT INTO services (id, title, category, description, base_price, duration, is_active, created_at, updated_at)
               VALUES (?, ?, 'installation', '', ?, 1.0, 1, ?, ?)"#,
        )
        .bind(&id)
        .bind(title)
        .bind(price)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .unwrap();
        id
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn coupon(
        &self,
        code: &str,
        discount_type: &str,
        value: f64,
        audience: &str,
        assigned_to: Option<&str>,
        usage_limit: Option<i64>,
        min_booking_value: f64,
    ) -> String {
        let id = new_id();
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"INSERT INTO coupons (id, code, discount_type, discount_value, expiry_date, min_booking_value,
                                    usage_limit, used_count, audience, assigned_to, is_active, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?, 1, ?, ?)"#,
        )
        .bind(&id)
        .bind(code)
        .bind(discount_type)
        .bind(value)
        .bind((Utc::now() + Duration::days(30)).to_rfc3339())
        .bind(min_booking_value)
        .bind(usage_limit)
        .bind(audience)
        .bind(assigned_to)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .unwrap();
        id
    }

    /// Pending, unassigned booking for the fixture customer at 500.
    pub async fn booking(&self) -> String {
        let service = self.service("Fan Installation", 500.0).await;
        let id = new_id();
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"INSERT INTO bookings (id, customer_id, address_line, city, pincode, date, time, status,
                                     subtotal, discount, total_amount, payment_method, payment_status,
                                     created_at, updated_at)
               VALUES (?, ?, '12 MG Road, Kothrud', 'Pune', '411038', ?, '10:00', 'pending',
                       500, 0, 500, 'cash', 'pending', ?, ?)"#,
        )
        .bind(&id)
        .bind(&self.customer)
        .bind(future_date())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO booking_items (id, booking_id, service_id, title, quantity, price) VALUES (?, ?, ?, 'Fan Installation', 1, 500)",
        )
        .bind(new_id())
        .bind(&id)
        .bind(&service)
        .execute(&self.pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO booking_status_history (id, booking_id, status, changed_by, changed_at) VALUES (?, ?, 'pending', ?, ?)",
        )
        .bind(new_id())
        .bind(&id)
        .bind(&self.customer)
        .bind(&now)
        .execute(&self.pool)
        .await
        .unwrap();
        id
    }
}

async fn insert_user(pool: &SqlitePool, email: &str, name: &str, role: Role) -> String {
    let id = new_id();
    sqlx::query(
        r#"INSERT INTO users (id, email, name, phone, role, password_hash, active, created_at)
           VALUES (?, ?, ?, '9800000000', ?, 'not-a-hash', 1, ?)"#,
    )
    .bind(&id)
    .bind(email)
    .bind(name)
    .bind(role.as_str())
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await
    .unwrap();
    id
}
