//! Bookable services.

use chrono::Utc;
use serde::Deserialize;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::{
    auth::new_id,
    coupon::{round_money, Removal},
    error::{AppError, AppResult},
    models::ServiceRow,
    pagination::{like_pattern, Page, Paginated},
};

const SERVICE_COLUMNS: &str = "id, title, category, description, base_price, duration, image, \
     is_active, average_rating, rating_count, created_at, updated_at";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInput {
    pub title: String,
    pub category: String,
    #[serde(default)]
    pub description: String,
    pub base_price: f64,
    pub duration: f64,
    pub image: Option<String>,
    pub is_active: Option<bool>,
}

impl ServiceInput {
    fn validate(&self) -> AppResult<()> {
        if self.title.trim().is_empty() {
            return Err(AppError::validation("Service title is required."));
        }
        if self.category.trim().is_empty() {
            return Err(AppError::validation("Service category is required."));
        }
        if !self.base_price.is_finite() || self.base_price < 0.0 {
            return Err(AppError::validation("Base price cannot be negative."));
        }
        if !self.duration.is_finite() || self.duration <= 0.0 {
            return Err(AppError::validation("Duration must be greater than zero."));
        }
        Ok(())
    }
}

pub async fn fetch(pool: &SqlitePool, id: &str) -> AppResult<ServiceRow> {
    sqlx::query_as::<_, ServiceRow>(&format!(
        "SELECT {SERVICE_COLUMNS} FROM services WHERE id = ? LIMIT 1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Service"))
}

/// Inactive services stay hidden from customers.
pub async fn fetch_active(pool: &SqlitePool, id: &str) -> AppResult<ServiceRow> {
    let service = fetch(pool, id).await?;
    if service.is_active {
        Ok(service)
    } else {
        Err(AppError::NotFound("Service"))
    }
}

pub async fn insert(pool: &SqlitePool, input: ServiceInput) -> AppResult<ServiceRow> {
    input.validate()?;
    let id = new_id();
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"INSERT INTO services
           (id, title, category, description, base_price, duration, image, is_active, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&id)
    .bind(input.title.trim())
    .bind(input.category.trim().to_lowercase())
    .bind(input.description.trim())
    .bind(round_money(input.base_price))
    .bind(input.duration)
    .bind(input.image.as_deref().map(str::trim).filter(|image| !image.is_empty()))
    .bind(input.is_active.unwrap_or(true))
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;
    fetch(pool, &id).await
}

/// Existing bookings keep the title and price they were made with.
pub async fn update(pool: &SqlitePool, id: &str, input: ServiceInput) -> AppResult<ServiceRow> {
    input.validate()?;
    let updated = sqlx::query(
        r#"UPDATE services
           SET title = ?, category = ?, description = ?, base_price = ?, duration = ?,
               image = ?, is_active = COALESCE(?, is_active), updated_at = ?
           WHERE id = ?"#,
    )
    .bind(input.title.trim())
    .bind(input.category.trim().to_lowercase())
    .bind(input.description.trim())
    .bind(round_money(input.base_price))
    .bind(input.duration)
    .bind(input.image.as_deref().map(str::trim).filter(|image| !image.is_empty()))
    .bind(input.is_active)
    .bind(Utc::now().to_rfc3339())
    .bind(id)
    .execute(pool)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(AppError::NotFound("Service"));
    }
    fetch(pool, id).await
}

pub async fn set_active(pool: &SqlitePool, id: &str, is_active: bool) -> AppResult<ServiceRow> {
    let updated = sqlx::query("UPDATE services SET is_active = ?, updated_at = ? WHERE id = ?")
        .bind(is_active)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(pool)
        .await?;
    if updated.rows_affected() == 0 {
        return Err(AppError::NotFound("Service"));
    }
    fetch(pool, id).await
}

/// Services referenced by a booking are switched off; unused ones are removed.
pub async fn remove(pool: &SqlitePool, id: &str) -> AppResult<Removal> {
    fetch(pool, id).await?;
    let (references,) = sqlx::query_as::<_, (i64,)>(
        "SELECT COUNT(*) FROM booking_items WHERE service_id = ?",
    )
    .bind(id)
    .fetch_one(pool)
    .await?;

    if references > 0 {
        set_active(pool, id, false).await?;
        return Ok(Removal::Deactivated);
    }
    sqlx::query("DELETE FROM services WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(Removal::Deleted)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceFilter {
    /// `active`, `inactive` or `all`.
    pub status: Option<String>,
    pub category: Option<String>,
    pub search: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, active: Option<bool>, filter: &ServiceFilter) {
    if let Some(active) = active {
        qb.push(" AND is_active = ").push_bind(active);
    }
    if let Some(category) = filter
        .category
        .as_deref()
        .map(str::trim)
        .filter(|category| !category.is_empty() && *category != "all")
    {
        qb.push(" AND category = ").push_bind(category.to_lowercase());
    }
    if let Some(pattern) = like_pattern(filter.search.as_deref()) {
        qb.push(" AND (LOWER(title) LIKE ")
            .push_bind(pattern.clone())
            .push(" OR LOWER(description) LIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

/// Admin listing. Public callers always pass `public_only`, which pins the
/// status to active whatever the query says.
pub async fn list(
    pool: &SqlitePool,
    filter: &ServiceFilter,
    public_only: bool,
) -> AppResult<Paginated<ServiceRow>> {
    let page = Page::resolve(filter.page, filter.limit)?;
    let active = if public_only {
        Some(true)
    } else {
        match filter.status.as_deref().map(str::trim) {
            None | Some("") | Some("all") => None,
            Some("active") => Some(true),
            Some("inactive") => Some(false),
            Some(other) => {
                return Err(AppError::validation(format!(
                    "Unknown service status '{other}'."
                )))
            }
        }
    };

    let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM services WHERE 1 = 1");
    push_filters(&mut count, active, filter);
    let (total,) = count.build_query_as::<(i64,)>().fetch_one(pool).await?;

    let mut select = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {SERVICE_COLUMNS} FROM services WHERE 1 = 1"
    ));
    push_filters(&mut select, active, filter);
    select
        .push(" ORDER BY title LIMIT ")
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset());
    let rows = select.build_query_as::<ServiceRow>().fetch_all(pool).await?;
    Ok(Paginated::new(rows, total, page))
}
