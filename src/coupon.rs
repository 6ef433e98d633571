//! Coupon eligibility rules, discount math and redemption.
//!
//! Validation is side-effect free. The only mutation, recording a use, happens
//! in [`redeem`] inside the booking transaction and relies on a conditional
//! increment so concurrent bookings cannot push a coupon past its limit.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};

use crate::{
    auth::new_id,
    error::{AppError, AppResult},
    models::{CouponRow, CouponUsageRow, Role},
    pagination::{like_pattern, Page, Paginated},
};

const COUPON_COLUMNS: &str = "id, code, discount_type, discount_value, expiry_date, min_booking_value, \
     usage_limit, used_count, audience, assigned_to, is_active, created_at, updated_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    Flat,
    Percent,
}

impl DiscountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountType::Flat => "flat",
            DiscountType::Percent => "percent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "flat" => Some(DiscountType::Flat),
            "percent" => Some(DiscountType::Percent),
            _ => None,
        }
    }
}

/// Who may redeem a coupon. Exactly one mode applies to a coupon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    Global,
    FirstBooking,
    Assigned(String),
    Standard,
}

impl Audience {
    pub fn from_flags(
        is_global: bool,
        is_first_booking: bool,
        assigned_to: Option<String>,
    ) -> AppResult<Self> {
        let assigned_to = assigned_to
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        match (is_global, is_first_booking, assigned_to) {
            (false, false, None) => Ok(Audience::Standard),
            (true, false, None) => Ok(Audience::Global),
            (false, true, None) => Ok(Audience::FirstBooking),
            (false, false, Some(user)) => Ok(Audience::Assigned(user)),
            _ => Err(AppError::validation(
                "A coupon can target only one audience: global, first booking, or a single customer.",
            )),
        }
    }

    fn from_stored(kind: &str, assigned_to: Option<String>) -> AppResult<Self> {
        match (kind, assigned_to) {
            ("global", _) => Ok(Audience::Global),
            ("first_booking", _) => Ok(Audience::FirstBooking),
            ("assigned", Some(user)) => Ok(Audience::Assigned(user)),
            // The assigned customer was removed; nobody can redeem it any more.
            ("assigned", None) | ("standard", _) => Ok(Audience::Standard),
            (other, _) => Err(AppError::Internal(format!("unknown coupon audience '{other}'"))),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Audience::Global => "global",
            Audience::FirstBooking => "first_booking",
            Audience::Assigned(_) => "assigned",
            Audience::Standard => "standard",
        }
    }

    pub fn assigned_to(&self) -> Option<&str> {
        match self {
            Audience::Assigned(user) => Some(user),
            _ => None,
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Audience::Global)
    }

    pub fn is_first_booking(&self) -> bool {
        matches!(self, Audience::FirstBooking)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum CouponError {
    #[error("Coupon code not found.")]
    NotFound,
    #[error("This coupon has expired.")]
    Expired,
    #[error("This coupon is no longer active.")]
    Inactive,
    #[error("This coupon needs a booking value of at least {minimum:.2}.")]
    BelowMinimum { minimum: f64 },
    #[error("This coupon has reached its usage limit.")]
    UsageExhausted,
    #[error("You are not eligible for this coupon.")]
    NotEligible,
}

impl CouponError {
    pub fn code(&self) -> &'static str {
        match self {
            CouponError::NotFound => "NotFound",
            CouponError::Expired => "Expired",
            CouponError::Inactive => "Inactive",
            CouponError::BelowMinimum { .. } => "BelowMinimum",
            CouponError::UsageExhausted => "UsageExhausted",
            CouponError::NotEligible => "NotEligible",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Coupon {
    pub id: String,
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: f64,
    pub expiry_date: DateTime<Utc>,
    pub min_booking_value: f64,
    pub usage_limit: Option<i64>,
    pub used_count: i64,
    pub audience: Audience,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl TryFrom<CouponRow> for Coupon {
    type Error = AppError;

    fn try_from(row: CouponRow) -> AppResult<Self> {
        let discount_type = DiscountType::parse(&row.discount_type).ok_or_else(|| {
            AppError::Internal(format!("unknown discount type '{}'", row.discount_type))
        })?;
        let expiry_date = DateTime::parse_from_rfc3339(&row.expiry_date)
            .map_err(|err| AppError::Internal(format!("bad coupon expiry: {err}")))?
            .with_timezone(&Utc);
        Ok(Self {
            id: row.id,
            code: row.code,
            discount_type,
            discount_value: row.discount_value,
            expiry_date,
            min_booking_value: row.min_booking_value,
            usage_limit: row.usage_limit,
            used_count: row.used_count,
            audience: Audience::from_stored(&row.audience, row.assigned_to)?,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// The customer a coupon is being checked for.
#[derive(Debug, Clone, Copy)]
pub struct Redeemer<'a> {
    pub user_id: &'a str,
    pub first_booking_used: bool,
}

impl Coupon {
    /// Checks every redemption rule in order and returns the discount.
    pub fn evaluate(
        &self,
        redeemer: &Redeemer<'_>,
        subtotal: f64,
        now: DateTime<Utc>,
    ) -> Result<f64, CouponError> {
        if self.expiry_date < now {
            return Err(CouponError::Expired);
        }
        if !self.is_active {
            return Err(CouponError::Inactive);
        }
        if subtotal < self.min_booking_value {
            return Err(CouponError::BelowMinimum {
                minimum: self.min_booking_value,
            });
        }
        if let Some(limit) = self.usage_limit {
            if self.used_count >= limit {
                return Err(CouponError::UsageExhausted);
            }
        }
        let eligible = match &self.audience {
            Audience::Global => true,
            Audience::FirstBooking => !redeemer.first_booking_used,
            Audience::Assigned(user) => user == redeemer.user_id,
            Audience::Standard => false,
        };
        if !eligible {
            return Err(CouponError::NotEligible);
        }
        Ok(discount_for(self.discount_type, self.discount_value, subtotal))
    }
}

pub fn round_money(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Discount for a subtotal, never more than the subtotal itself.
pub fn discount_for(discount_type: DiscountType, value: f64, subtotal: f64) -> f64 {
    let raw = match discount_type {
        DiscountType::Flat => value,
        DiscountType::Percent => subtotal * value / 100.0,
    };
    round_money(raw.min(subtotal).max(0.0))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponInput {
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: f64,
    pub expiry_date: String,
    pub min_booking_value: Option<f64>,
    pub usage_limit: Option<i64>,
    #[serde(default)]
    pub is_global: bool,
    #[serde(default)]
    pub is_first_booking: bool,
    pub assigned_to: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct CouponDraft {
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: f64,
    pub expiry_date: DateTime<Utc>,
    pub min_booking_value: f64,
    pub usage_limit: Option<i64>,
    pub audience: Audience,
    pub is_active: bool,
}

impl CouponInput {
    pub fn into_draft(self) -> AppResult<CouponDraft> {
        let code = normalize_code(&self.code)?;
        validate_value(self.discount_type, self.discount_value)?;

        let min_booking_value = self.min_booking_value.unwrap_or(0.0);
        if !min_booking_value.is_finite() || min_booking_value < 0.0 {
            return Err(AppError::validation("Minimum booking value cannot be negative."));
        }
        if matches!(self.usage_limit, Some(limit) if limit < 1) {
            return Err(AppError::validation("Usage limit must be at least 1, or empty for unlimited."));
        }

        Ok(CouponDraft {
            code,
            discount_type: self.discount_type,
            discount_value: self.discount_value,
            expiry_date: parse_expiry(&self.expiry_date)?,
            min_booking_value,
            usage_limit: self.usage_limit,
            audience: Audience::from_flags(self.is_global, self.is_first_booking, self.assigned_to)?,
            is_active: self.is_active.unwrap_or(true),
        })
    }
}

pub fn normalize_code(code: &str) -> AppResult<String> {
    let code = code.trim().to_uppercase();
    let valid_chars = code
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');
    if !(5..=20).contains(&code.len()) || !valid_chars {
        return Err(AppError::validation(
            "Coupon code must be 5-20 characters of A-Z, 0-9 or underscore.",
        ));
    }
    Ok(code)
}

fn validate_value(discount_type: DiscountType, value: f64) -> AppResult<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(AppError::validation("Discount value must be greater than zero."));
    }
    if discount_type == DiscountType::Percent && value > 100.0 {
        return Err(AppError::validation("Percentage discount cannot exceed 100."));
    }
    Ok(())
}

/// Accepts a full RFC 3339 timestamp or a plain date, which expires at the end of that day.
pub fn parse_expiry(value: &str) -> AppResult<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(23, 59, 59))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| AppError::validation("Expiry date must be YYYY-MM-DD or an RFC 3339 timestamp."))
}

/// Rejects changes to the terms of a coupon somebody already used.
pub fn ensure_mutable(existing: &Coupon, draft: &CouponDraft) -> AppResult<()> {
    if existing.used_count == 0 {
        return Ok(());
    }
    let changed = existing.code != draft.code
        || existing.discount_type != draft.discount_type
        || (existing.discount_value - draft.discount_value).abs() > f64::EPSILON
        || existing.audience.is_global() != draft.audience.is_global()
        || existing.audience.is_first_booking() != draft.audience.is_first_booking();
    if changed {
        Err(AppError::CouponLocked)
    } else {
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponView {
    pub id: String,
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: f64,
    pub expiry_date: String,
    pub min_booking_value: f64,
    pub usage_limit: Option<i64>,
    pub used_count: i64,
    pub audience: &'static str,
    pub is_global: bool,
    pub is_first_booking: bool,
    pub assigned_to: Option<String>,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_by: Option<Vec<CouponUsageRow>>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Coupon> for CouponView {
    fn from(coupon: Coupon) -> Self {
        Self {
            id: coupon.id,
            code: coupon.code,
            discount_type: coupon.discount_type,
            discount_value: coupon.discount_value,
            expiry_date: coupon.expiry_date.to_rfc3339(),
            min_booking_value: coupon.min_booking_value,
            usage_limit: coupon.usage_limit,
            used_count: coupon.used_count,
            audience: coupon.audience.kind(),
            is_global: coupon.audience.is_global(),
            is_first_booking: coupon.audience.is_first_booking(),
            assigned_to: coupon.audience.assigned_to().map(str::to_string),
            is_active: coupon.is_active,
            used_by: None,
            created_at: coupon.created_at,
            updated_at: coupon.updated_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Quote {
    pub coupon: Coupon,
    pub discount: f64,
}

pub async fn find_by_code<'e, E>(executor: E, code: &str) -> AppResult<Option<Coupon>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query_as::<_, CouponRow>(&format!(
        "SELECT {COUPON_COLUMNS} FROM coupons WHERE code = ? LIMIT 1"
    ))
    .bind(code.trim().to_uppercase())
    .fetch_optional(executor)
    .await?;
    row.map(Coupon::try_from).transpose()
}

pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Coupon> {
    let row = sqlx::query_as::<_, CouponRow>(&format!(
        "SELECT {COUPON_COLUMNS} FROM coupons WHERE id = ? LIMIT 1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.map(Coupon::try_from)
        .transpose()?
        .ok_or(AppError::NotFound("Coupon"))
}

pub async fn usages(pool: &SqlitePool, coupon_id: &str) -> AppResult<Vec<CouponUsageRow>> {
    Ok(sqlx::query_as::<_, CouponUsageRow>(
        r#"SELECT user_id AS user, booking_id, booking_value, used_at
           FROM coupon_usages
           WHERE coupon_id = ?
           ORDER BY used_at"#,
    )
    .bind(coupon_id)
    .fetch_all(pool)
    .await?)
}

/// Looks a code up and evaluates it for a customer without recording anything.
pub async fn quote<'e, E>(
    executor: E,
    code: &str,
    redeemer: &Redeemer<'_>,
    subtotal: f64,
) -> AppResult<Quote>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let coupon = find_by_code(executor, code)
        .await?
        .ok_or(CouponError::NotFound)?;
    let discount = coupon.evaluate(redeemer, subtotal, Utc::now())?;
    Ok(Quote { coupon, discount })
}

/// Records one use. Must run on the connection holding the booking transaction.
pub async fn redeem(
    conn: &mut SqliteConnection,
    coupon: &Coupon,
    user_id: &str,
    booking_id: &str,
    subtotal: f64,
) -> AppResult<()> {
    let now = Utc::now().to_rfc3339();
    let claimed = sqlx::query(
        r#"UPDATE coupons
           SET used_count = used_count + 1, updated_at = ?
           WHERE id = ? AND is_active = 1
             AND (usage_limit IS NULL OR used_count < usage_limit)"#,
    )
    .bind(&now)
    .bind(&coupon.id)
    .execute(&mut *conn)
    .await?;

    if claimed.rows_affected() == 0 {
        return Err(CouponError::UsageExhausted.into());
    }

    sqlx::query(
        r#"INSERT INTO coupon_usages (id, coupon_id, user_id, booking_id, booking_value, used_at)
           VALUES (?, ?, ?, ?, ?, ?)"#,
    )
    .bind(new_id())
    .bind(&coupon.id)
    .bind(user_id)
    .bind(booking_id)
    .bind(subtotal)
    .bind(&now)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn ensure_assignee_is_customer(pool: &SqlitePool, audience: &Audience) -> AppResult<()> {
    let Some(user_id) = audience.assigned_to() else {
        return Ok(());
    };
    let role = sqlx::query_as::<_, (String,)>("SELECT role FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    match role {
        Some((role,)) if role == Role::Customer.as_str() => Ok(()),
        _ => Err(AppError::validation("Assigned user must be an existing customer.")),
    }
}

fn unique_code_conflict(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.message().contains("coupons.code") => {
            AppError::Conflict("A coupon with this code already exists.".to_string())
        }
        _ => AppError::Database(err),
    }
}

pub async fn insert(pool: &SqlitePool, draft: CouponDraft) -> AppResult<Coupon> {
    ensure_assignee_is_customer(pool, &draft.audience).await?;
    let id = new_id();
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"INSERT INTO coupons
           (id, code, discount_type, discount_value, expiry_date, min_booking_value, usage_limit,
            used_count, audience, assigned_to, is_active, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?, ?)"#,
    )
    .bind(&id)
    .bind(&draft.code)
    .bind(draft.discount_type.as_str())
    .bind(draft.discount_value)
    .bind(draft.expiry_date.to_rfc3339())
    .bind(draft.min_booking_value)
    .bind(draft.usage_limit)
    .bind(draft.audience.kind())
    .bind(draft.audience.assigned_to())
    .bind(draft.is_active)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await
    .map_err(unique_code_conflict)?;

    find_by_id(pool, &id).await
}

/// Redemptions may land between the read and the write, so the write is
/// conditional on the usage count that the lock check saw.
pub async fn update(pool: &SqlitePool, id: &str, draft: CouponDraft) -> AppResult<Coupon> {
    ensure_assignee_is_customer(pool, &draft.audience).await?;
    for _ in 0..UPDATE_ATTEMPTS {
        let existing = find_by_id(pool, id).await?;
        ensure_mutable(&existing, &draft)?;
        if write_terms(pool, id, &draft, existing.used_count).await? {
            return find_by_id(pool, id).await;
        }
        log::debug!("Coupon {id} was redeemed during an edit, re-checking");
    }
    Err(AppError::Conflict(
        "The coupon is being redeemed right now. Try again.".to_string(),
    ))
}

const UPDATE_ATTEMPTS: usize = 3;

async fn write_terms(
    pool: &SqlitePool,
    id: &str,
    draft: &CouponDraft,
    expected_used: i64,
) -> AppResult<bool> {
    let updated = sqlx::query(
        r#"UPDATE coupons
           SET code = ?, discount_type = ?, discount_value = ?, expiry_date = ?,
               min_booking_value = ?, usage_limit = ?, audience = ?, assigned_to = ?,
               is_active = ?, updated_at = ?
           WHERE id = ? AND used_count = ?"#,
    )
    .bind(&draft.code)
    .bind(draft.discount_type.as_str())
    .bind(draft.discount_value)
    .bind(draft.expiry_date.to_rfc3339())
    .bind(draft.min_booking_value)
    .bind(draft.usage_limit)
    .bind(draft.audience.kind())
    .bind(draft.audience.assigned_to())
    .bind(draft.is_active)
    .bind(Utc::now().to_rfc3339())
    .bind(id)
    .bind(expected_used)
    .execute(pool)
    .await
    .map_err(unique_code_conflict)?;
    Ok(updated.rows_affected() > 0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Removal {
    Deleted,
    Deactivated,
}

impl Removal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Removal::Deleted => "deleted",
            Removal::Deactivated => "deactivated",
        }
    }
}

/// Redeemed coupons keep their usage history, so they are only switched off.
pub async fn remove(pool: &SqlitePool, id: &str) -> AppResult<Removal> {
    find_by_id(pool, id).await?;
    let deleted = sqlx::query("DELETE FROM coupons WHERE id = ? AND used_count = 0")
        .bind(id)
        .execute(pool)
        .await?;
    if deleted.rows_affected() > 0 {
        return Ok(Removal::Deleted);
    }
    sqlx::query("UPDATE coupons SET is_active = 0, updated_at = ? WHERE id = ?")
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(Removal::Deactivated)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponFilter {
    pub search: Option<String>,
    pub is_active: Option<bool>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, filter: &CouponFilter) {
    if let Some(pattern) = like_pattern(filter.search.as_deref()) {
        qb.push(" AND LOWER(code) LIKE ").push_bind(pattern);
    }
    if let Some(active) = filter.is_active {
        qb.push(" AND is_active = ").push_bind(active);
    }
}

pub async fn list(pool: &SqlitePool, filter: &CouponFilter) -> AppResult<Paginated<CouponView>> {
    let page = Page::resolve(filter.page, filter.limit)?;

    let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM coupons WHERE 1 = 1");
    push_filters(&mut count, filter);
    let (total,) = count.build_query_as::<(i64,)>().fetch_one(pool).await?;

    let mut select = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {COUPON_COLUMNS} FROM coupons WHERE 1 = 1"
    ));
    push_filters(&mut select, filter);
    select
        .push(" ORDER BY created_at DESC LIMIT ")
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset());
    let rows = select.build_query_as::<CouponRow>().fetch_all(pool).await?;

    let items = rows
        .into_iter()
        .map(|row| Coupon::try_from(row).map(CouponView::from))
        .collect::<AppResult<Vec<_>>>()?;
    Ok(Paginated::new(items, total, page))
}

/// Active, unexpired coupons this customer could redeem, ignoring the booking minimum.
pub async fn available_for(pool: &SqlitePool, redeemer: &Redeemer<'_>) -> AppResult<Vec<CouponView>> {
    let rows = sqlx::query_as::<_, CouponRow>(&format!(
        r#"SELECT {COUPON_COLUMNS} FROM coupons
           WHERE is_active = 1
             AND (usage_limit IS NULL OR used_count < usage_limit)
             AND (audience IN ('global', 'first_booking') OR assigned_to = ?)
           ORDER BY expiry_date"#
    ))
    .bind(redeemer.user_id)
    .fetch_all(pool)
    .await?;

    let now = Utc::now();
    let mut available = Vec::new();
    for row in rows {
        let coupon = Coupon::try_from(row)?;
        let subtotal = coupon.min_booking_value.max(1.0);
        if coupon.evaluate(redeemer, subtotal, now).is_ok() {
            available.push(CouponView::from(coupon));
        }
    }
    Ok(available)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn coupon(discount_type: DiscountType, value: f64, audience: Audience) -> Coupon {
        Coupon {
            id: "c1".into(),
            code: "TESTCODE".into(),
            discount_type,
            discount_value: value,
            expiry_date: Utc::now() + Duration::days(30),
            min_booking_value: 0.0,
            usage_limit: None,
            used_count: 0,
            audience,
            is_active: true,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn newcomer(user_id: &str) -> Redeemer<'_> {
        Redeemer {
            user_id,
            first_booking_used: false,
        }
    }

    #[test]
    fn welcome_flat_coupon_takes_200_off_1000() {
        let welcome = coupon(DiscountType::Flat, 200.0, Audience::Global);
        let discount = welcome.evaluate(&newcomer("u1"), 1000.0, Utc::now()).unwrap();
        assert_eq!(discount, 200.0);
        assert_eq!(1000.0 - discount, 800.0);
    }

    #[test]
    fn below_minimum_is_rejected() {
        let mut save10 = coupon(DiscountType::Percent, 10.0, Audience::Global);
        save10.min_booking_value = 500.0;
        let err = save10.evaluate(&newcomer("u1"), 400.0, Utc::now()).unwrap_err();
        assert_eq!(err, CouponError::BelowMinimum { minimum: 500.0 });
        assert_eq!(save10.evaluate(&newcomer("u1"), 500.0, Utc::now()), Ok(50.0));
    }

    #[test]
    fn first_booking_coupon_rejects_returning_customers() {
        let first = coupon(DiscountType::Flat, 100.0, Audience::FirstBooking);
        let returning = Redeemer {
            user_id: "u1",
            first_booking_used: true,
        };
        assert_eq!(
            first.evaluate(&returning, 1000.0, Utc::now()),
            Err(CouponError::NotEligible)
        );
        assert!(first.evaluate(&newcomer("u1"), 1000.0, Utc::now()).is_ok());
    }

    #[test]
    fn assigned_coupon_only_for_its_customer() {
        let assigned = coupon(DiscountType::Flat, 50.0, Audience::Assigned("u1".into()));
        assert!(assigned.evaluate(&newcomer("u1"), 300.0, Utc::now()).is_ok());
        assert_eq!(
            assigned.evaluate(&newcomer("u2"), 300.0, Utc::now()),
            Err(CouponError::NotEligible)
        );
    }

    #[test]
    fn standard_coupon_matches_nobody() {
        let standard = coupon(DiscountType::Flat, 50.0, Audience::Standard);
        assert_eq!(
            standard.evaluate(&newcomer("u1"), 300.0, Utc::now()),
            Err(CouponError::NotEligible)
        );
    }

    #[test]
    fn rules_apply_in_order() {
        let now = Utc::now();
        let mut c = coupon(DiscountType::Flat, 50.0, Audience::Standard);
        c.expiry_date = now - Duration::seconds(1);
        c.is_active = false;
        assert_eq!(c.evaluate(&newcomer("u1"), 10.0, now), Err(CouponError::Expired));

        c.expiry_date = now + Duration::days(1);
        assert_eq!(c.evaluate(&newcomer("u1"), 10.0, now), Err(CouponError::Inactive));

        c.is_active = true;
        c.usage_limit = Some(2);
        c.used_count = 2;
        assert_eq!(
            c.evaluate(&newcomer("u1"), 10.0, now),
            Err(CouponError::UsageExhausted)
        );
    }

    #[test]
    fn discount_never_exceeds_subtotal() {
        assert_eq!(discount_for(DiscountType::Flat, 500.0, 120.0), 120.0);
        assert_eq!(discount_for(DiscountType::Percent, 100.0, 333.33), 333.33);
        assert_eq!(discount_for(DiscountType::Percent, 12.5, 199.99), 25.0);
        for subtotal in [0.0, 0.01, 49.5, 1000.0] {
            for (kind, value) in [(DiscountType::Flat, 75.0), (DiscountType::Percent, 33.0)] {
                let discount = discount_for(kind, value, subtotal);
                assert!(discount <= subtotal);
                assert!(subtotal - discount >= 0.0);
            }
        }
    }

    fn input(code: &str, discount_type: DiscountType, value: f64) -> CouponInput {
        CouponInput {
            code: code.into(),
            discount_type,
            discount_value: value,
            expiry_date: "2099-12-31".into(),
            min_booking_value: None,
            usage_limit: None,
            is_global: true,
            is_first_booking: false,
            assigned_to: None,
            is_active: None,
        }
    }

    #[test]
    fn percent_values_must_be_within_0_and_100() {
        assert!(input("SAVE10", DiscountType::Percent, 100.0).into_draft().is_ok());
        assert!(input("SAVE10", DiscountType::Percent, 100.5).into_draft().is_err());
        assert!(input("SAVE10", DiscountType::Percent, 0.0).into_draft().is_err());
        assert!(input("FLAT500", DiscountType::Flat, 500.0).into_draft().is_ok());
    }

    #[test]
    fn codes_are_normalized_and_checked() {
        assert_eq!(normalize_code(" welcome20 ").unwrap(), "WELCOME20");
        assert!(normalize_code("ABCD").is_err());
        assert!(normalize_code("SPACE CODE").is_err());
        assert!(normalize_code("A".repeat(21).as_str()).is_err());
        assert!(normalize_code("NEW_USER_1").is_ok());
    }

    #[test]
    fn audiences_are_mutually_exclusive() {
        assert_eq!(Audience::from_flags(false, false, None).unwrap(), Audience::Standard);
        assert_eq!(
            Audience::from_flags(false, false, Some(" u1 ".into())).unwrap(),
            Audience::Assigned("u1".into())
        );
        assert!(Audience::from_flags(true, true, None).is_err());
        assert!(Audience::from_flags(true, false, Some("u1".into())).is_err());
    }

    #[test]
    fn plain_date_expires_at_end_of_day() {
        let expiry = parse_expiry("2030-01-15").unwrap();
        assert_eq!(expiry.to_rfc3339(), "2030-01-15T23:59:59+00:00");
        assert!(parse_expiry("15/01/2030").is_err());
    }

    #[test]
    fn redeemed_coupon_terms_are_locked() {
        let mut existing = coupon(DiscountType::Flat, 200.0, Audience::Global);
        existing.code = "WELCOME20".into();
        let mut draft = input("WELCOME20", DiscountType::Flat, 200.0).into_draft().unwrap();
        existing.used_count = 1;

        draft.usage_limit = Some(10);
        draft.is_active = false;
        assert!(ensure_mutable(&existing, &draft).is_ok());

        let mut changed_value = draft.clone();
        changed_value.discount_value = 250.0;
        assert!(matches!(ensure_mutable(&existing, &changed_value), Err(AppError::CouponLocked)));

        let mut changed_audience = draft.clone();
        changed_audience.audience = Audience::FirstBooking;
        assert!(matches!(ensure_mutable(&existing, &changed_audience), Err(AppError::CouponLocked)));

        let mut renamed = draft;
        renamed.code = "WELCOME25".into();
        assert!(matches!(ensure_mutable(&existing, &renamed), Err(AppError::CouponLocked)));

        existing.used_count = 0;
        assert!(ensure_mutable(&existing, &changed_value).is_ok());
    }

    #[actix_web::test]
    async fn redemption_during_an_edit_keeps_terms_locked() {
        let fx = crate::test_support::Fixture::new().await;
        let id = fx.coupon("WELCOME20", "flat", 200.0, "global", None, None, 0.0).await;
        let seen = find_by_id(&fx.pool, &id).await.unwrap();
        assert_eq!(seen.used_count, 0);

        sqlx::query("UPDATE coupons SET used_count = used_count + 1 WHERE id = ?")
            .bind(&id)
            .execute(&fx.pool)
            .await
            .unwrap();

        let richer = input("WELCOME20", DiscountType::Flat, 250.0).into_draft().unwrap();
        assert!(!write_terms(&fx.pool, &id, &richer, seen.used_count).await.unwrap());
        assert_eq!(find_by_id(&fx.pool, &id).await.unwrap().discount_value, 200.0);

        let err = update(&fx.pool, &id, richer).await.unwrap_err();
        assert!(matches!(err, AppError::CouponLocked));

        let mut capped = input("WELCOME20", DiscountType::Flat, 200.0).into_draft().unwrap();
        capped.usage_limit = Some(50);
        let updated = update(&fx.pool, &id, capped).await.unwrap();
        assert_eq!(updated.usage_limit, Some(50));

        assert_eq!(remove(&fx.pool, &id).await.unwrap(), Removal::Deactivated);
        assert!(!find_by_id(&fx.pool, &id).await.unwrap().is_active);
    }
}
