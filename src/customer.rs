use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::{
    error::{AppError, AppResult},
    models::CustomerRow,
    pagination::{like_pattern, Page, Paginated},
};

/// Customers count as active when seen within this many days.
pub const ACTIVE_WINDOW_DAYS: i64 = 30;

const CUSTOMER_SELECT: &str = r#"SELECT u.id, u.name, u.email, u.phone, c.address, c.city,
       c.total_bookings, c.first_booking_used, c.custom_discount, c.is_verified,
       c.last_active_at, u.created_at
FROM customers c
JOIN users u ON u.id = c.user_id"#;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerView {
    #[serde(flatten)]
    pub customer: CustomerRow,
    pub is_active: bool,
}

fn active_cutoff() -> String {
    (Utc::now() - Duration::days(ACTIVE_WINDOW_DAYS)).to_rfc3339()
}

impl CustomerView {
    fn new(customer: CustomerRow, cutoff: &str) -> Self {
        let is_active = customer
            .last_active_at
            .as_deref()
            .is_some_and(|seen| seen >= cutoff);
        Self {
            customer,
            is_active,
        }
    }
}

pub async fn fetch(pool: &SqlitePool, customer_id: &str) -> AppResult<CustomerView> {
    let row = sqlx::query_as::<_, CustomerRow>(&format!("{CUSTOMER_SELECT} WHERE c.user_id = ?"))
        .bind(customer_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Customer"))?;
    Ok(CustomerView::new(row, &active_cutoff()))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerFilter {
    pub search: Option<String>,
    /// `active`, `inactive` or `all`, by recent activity.
    pub status: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, active: Option<bool>, cutoff: &str, filter: &CustomerFilter) {
    match active {
        Some(true) => {
            qb.push(" AND c.last_active_at >= ").push_bind(cutoff.to_string());
        }
        Some(false) => {
            qb.push(" AND (c.last_active_at IS NULL OR c.last_active_at < ")
                .push_bind(cutoff.to_string())
                .push(")");
        }
        None => {}
    }
    if let Some(pattern) = like_pattern(filter.search.as_deref()) {
        qb.push(" AND (LOWER(u.name) LIKE ")
            .push_bind(pattern.clone())
            .push(" OR LOWER(u.email) LIKE ")
            .push_bind(pattern.clone())
            .push(" OR LOWER(COALESCE(u.phone, '')) LIKE ")
            .push_bind(pattern.clone())
            .push(" OR LOWER(COALESCE(c.city, '')) LIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

pub async fn list(pool: &SqlitePool, filter: &CustomerFilter) -> AppResult<Paginated<CustomerView>> {
    let page = Page::resolve(filter.page, filter.limit)?;
    let active = match filter.status.as_deref().map(str::trim) {
        None | Some("") | Some("all") => None,
        Some("active") => Some(true),
        Some("inactive") => Some(false),
        Some(other) => {
            return Err(AppError::validation(format!(
                "Unknown customer status '{other}'."
            )))
        }
    };
    let cutoff = active_cutoff();

    let mut count = QueryBuilder::<Sqlite>::new(
        "SELECT COUNT(*) FROM customers c JOIN users u ON u.id = c.user_id WHERE 1 = 1",
    );
    push_filters(&mut count, active, &cutoff, filter);
    let (total,) = count.build_query_as::<(i64,)>().fetch_one(pool).await?;

    let mut select = QueryBuilder::<Sqlite>::new(format!("{CUSTOMER_SELECT} WHERE 1 = 1"));
    push_filters(&mut select, active, &cutoff, filter);
    select
        .push(" ORDER BY u.created_at DESC LIMIT ")
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset());
    let rows = select.build_query_as::<CustomerRow>().fetch_all(pool).await?;

    Ok(Paginated::new(rows, total, page).map(|row| CustomerView::new(row, &cutoff)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerUpdate {
    pub custom_discount: Option<f64>,
    pub is_verified: Option<bool>,
    /// Disabling the account also rejects its existing tokens.
    pub active: Option<bool>,
}

pub async fn update(pool: &SqlitePool, customer_id: &str, input: CustomerUpdate) -> AppResult<CustomerView> {
    if let Some(discount) = input.custom_discount {
        if !discount.is_finite() || !(0.0..=100.0).contains(&discount) {
            return Err(AppError::validation("Custom discount must be between 0 and 100."));
        }
    }
    fetch(pool, customer_id).await?;

    let mut tx = pool.begin().await?;
    sqlx::query(
        r#"UPDATE customers
           SET custom_discount = COALESCE(?, custom_discount), is_verified = COALESCE(?, is_verified)
           WHERE user_id = ?"#,
    )
    .bind(input.custom_discount)
    .bind(input.is_verified)
    .bind(customer_id)
    .execute(&mut *tx)
    .await?;
    if let Some(active) = input.active {
        sqlx::query("UPDATE users SET active = ? WHERE id = ?")
            .bind(active)
            .bind(customer_id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    fetch(pool, customer_id).await
}

pub async fn first_booking_used(pool: &SqlitePool, customer_id: &str) -> AppResult<bool> {
    let (used,) = sqlx::query_as::<_, (bool,)>(
        "SELECT first_booking_used FROM customers WHERE user_id = ?",
    )
    .bind(customer_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Customer"))?;
    Ok(used)
}

pub async fn count(pool: &SqlitePool) -> AppResult<i64> {
    let (count,) = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM customers")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
