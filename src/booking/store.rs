use chrono::{Local, Utc};
use serde::Deserialize;
use sqlx::{Sqlite, SqliteConnection, SqlitePool};

use super::{
    ensure_within_hours, parse_date, parse_time, plan_transition, Actor, BookingDetail,
    BookingError, BookingStatus, PaymentMethod, PaymentStatus, Pricing,
};
use crate::{
    auth::new_id,
    coupon::{self, round_money, Redeemer},
    error::{AppError, AppResult},
    models::{BookingItemRow, BookingRow, Role, StatusHistoryRow},
    settings::SettingsSnapshot,
};

pub(crate) const BOOKING_SELECT: &str = r#"SELECT b.id, b.customer_id, c.name AS customer_name,
       c.email AS customer_email, c.phone AS customer_phone,
       b.provider_id, p.name AS provider_name,
       b.address_line, b.city, b.pincode, b.date, b.time, b.notes, b.status,
       b.subtotal, b.discount, b.total_amount, b.coupon_code,
       b.payment_method, b.payment_status, b.transaction_id, b.paid_at,
       b.service_started_at, b.service_completed_at, b.rating, b.review,
       (SELECT GROUP_CONCAT(i.title, ', ') FROM booking_items i WHERE i.booking_id = b.id) AS services,
       b.created_at, b.updated_at
FROM bookings b
JOIN users c ON b.customer_id = c.id
LEFT JOIN users p ON b.provider_id = p.id"#;

pub async fn fetch<'e, E>(executor: E, booking_id: &str) -> AppResult<Option<BookingRow>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    Ok(
        sqlx::query_as::<_, BookingRow>(&format!("{BOOKING_SELECT} WHERE b.id = ? LIMIT 1"))
            .bind(booking_id)
            .fetch_optional(executor)
            .await?,
    )
}

pub async fn fetch_required(pool: &SqlitePool, booking_id: &str) -> AppResult<BookingRow> {
    fetch(pool, booking_id)
        .await?
        .ok_or(AppError::NotFound("Booking"))
}

pub async fn detail(pool: &SqlitePool, booking_id: &str) -> AppResult<BookingDetail> {
    let row = fetch_required(pool, booking_id).await?;
    Ok(BookingDetail::new(
        row,
        items(pool, booking_id).await?,
        history(pool, booking_id).await?,
    ))
}

pub async fn items(pool: &SqlitePool, booking_id: &str) -> AppResult<Vec<BookingItemRow>> {
    Ok(sqlx::query_as::<_, BookingItemRow>(
        "SELECT service_id, title, quantity, price FROM booking_items WHERE booking_id = ? ORDER BY rowid",
    )
    .bind(booking_id)
    .fetch_all(pool)
    .await?)
}

pub async fn history(pool: &SqlitePool, booking_id: &str) -> AppResult<Vec<StatusHistoryRow>> {
    Ok(sqlx::query_as::<_, StatusHistoryRow>(
        r#"SELECT status, changed_by, note, changed_at
           FROM booking_status_history
           WHERE booking_id = ?
           ORDER BY changed_at, rowid"#,
    )
    .bind(booking_id)
    .fetch_all(pool)
    .await?)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceLine {
    pub service_id: String,
    pub quantity: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressInput {
    pub line: Option<String>,
    pub city: Option<String>,
    pub pincode: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBooking {
    #[serde(default)]
    pub services: Vec<ServiceLine>,
    pub address: Option<AddressInput>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub notes: Option<String>,
    pub coupon_code: Option<String>,
    pub payment_method: PaymentMethod,
}

fn required<'a>(value: Option<&'a str>, message: &str) -> AppResult<&'a str> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::validation(message))
}

async fn insert_history(
    conn: &mut SqliteConnection,
    booking_id: &str,
    status: BookingStatus,
    changed_by: &str,
    note: Option<&str>,
    at: &str,
) -> AppResult<()> {
    sqlx::query(
        r#"INSERT INTO booking_status_history (id, booking_id, status, changed_by, note, changed_at)
           VALUES (?, ?, ?, ?, ?, ?)"#,
    )
    .bind(new_id())
    .bind(booking_id)
    .bind(status.as_str())
    .bind(changed_by)
    .bind(note)
    .bind(at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Creates a pending booking. Coupon redemption and customer counters share
/// the booking's transaction, so a failed redemption leaves nothing behind.
pub async fn create(
    pool: &SqlitePool,
    settings: &SettingsSnapshot,
    customer_id: &str,
    input: NewBooking,
) -> AppResult<String> {
    if input.services.is_empty() {
        return Err(AppError::validation("Select at least one service."));
    }
    let address = input
        .address
        .as_ref()
        .ok_or_else(|| AppError::validation("Service address is required."))?;
    let line = required(address.line.as_deref(), "Service address is required.")?;
    let city = required(address.city.as_deref(), "City is required.")?;
    let date = parse_date(required(input.date.as_deref(), "Please pick a date.")?)?;
    let time = parse_time(required(input.time.as_deref(), "Please pick a time.")?)?;
    if date < Local::now().date_naive() {
        return Err(AppError::validation("Booking date cannot be in the past."));
    }
    ensure_within_hours(time, settings.business_hours())?;
    if input.services.iter().any(|item| item.quantity.unwrap_or(1) < 1) {
        return Err(AppError::validation("Quantity must be at least 1."));
    }

    let mut tx = pool.begin().await?;

    let (first_booking_used, custom_discount) = sqlx::query_as::<_, (bool, f64)>(
        "SELECT first_booking_used, custom_discount FROM customers WHERE user_id = ?",
    )
    .bind(customer_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound("Customer"))?;

    let mut lines = Vec::with_capacity(input.services.len());
    let mut subtotal = 0.0;
    for requested in &input.services {
        let service = sqlx::query_as::<_, (String, String, f64, bool)>(
            "SELECT id, title, base_price, is_active FROM services WHERE id = ?",
        )
        .bind(&requested.service_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound("Service"))?;
        let (service_id, title, price, is_active) = service;
        if !is_active {
            return Err(AppError::ServiceUnavailable(title));
        }
        let quantity = requested.quantity.unwrap_or(1);
        subtotal += price * quantity as f64;
        lines.push((service_id, title, quantity, price));
    }
    let subtotal = round_money(subtotal);

    let coupon_code = input
        .coupon_code
        .as_deref()
        .map(str::trim)
        .filter(|code| !code.is_empty());
    let redeemer = Redeemer {
        user_id: customer_id,
        first_booking_used,
    };
    let quote = match coupon_code {
        Some(code) => Some(coupon::quote(&mut *tx, code, &redeemer, subtotal).await?),
        None => None,
    };
    let discount = match &quote {
        Some(quote) => quote.discount,
        None if custom_discount > 0.0 => subtotal * custom_discount.min(100.0) / 100.0,
        None => 0.0,
    };
    let pricing = Pricing::new(subtotal, discount);

    let booking_id = new_id();
    let now = Utc::now().to_rfc3339();
    let notes = input
        .notes
        .as_deref()
        .map(str::trim)
        .filter(|notes| !notes.is_empty());
    let pincode = address
        .pincode
        .as_deref()
        .map(str::trim)
        .filter(|pincode| !pincode.is_empty());

    sqlx::query(
        r#"INSERT INTO bookings
           (id, customer_id, provider_id, address_line, city, pincode, date, time, notes, status,
            subtotal, discount, total_amount, coupon_code, payment_method, payment_status,
            created_at, updated_at)
           VALUES (?, ?, NULL, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&booking_id)
    .bind(customer_id)
    .bind(line)
    .bind(city)
    .bind(pincode)
    .bind(date.format("%Y-%m-%d").to_string())
    .bind(time.format("%H:%M").to_string())
    .bind(notes)
    .bind(BookingStatus::Pending.as_str())
    .bind(pricing.subtotal)
    .bind(pricing.discount)
    .bind(pricing.total_amount)
    .bind(quote.as_ref().map(|quote| quote.coupon.code.as_str()))
    .bind(input.payment_method.as_str())
    .bind(PaymentStatus::Pending.as_str())
    .bind(&now)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    for (service_id, title, quantity, price) in &lines {
        sqlx::query(
            r#"INSERT INTO booking_items (id, booking_id, service_id, title, quantity, price)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(new_id())
        .bind(&booking_id)
        .bind(service_id)
        .bind(title)
        .bind(quantity)
        .bind(price)
        .execute(&mut *tx)
        .await?;
    }

    insert_history(
        &mut tx,
        &booking_id,
        BookingStatus::Pending,
        customer_id,
        Some("Booking created"),
        &now,
    )
    .await?;

    if let Some(quote) = &quote {
        coupon::redeem(&mut tx, &quote.coupon, customer_id, &booking_id, pricing.subtotal).await?;
    }

    sqlx::query(
        r#"UPDATE customers
           SET total_bookings = total_bookings + 1, first_booking_used = 1, last_active_at = ?
           WHERE user_id = ?"#,
    )
    .bind(&now)
    .bind(customer_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(booking_id)
}

/// Eligibility flags of the provider being assigned, for the caller to log.
#[derive(Debug, Clone, Copy)]
pub struct Assignment {
    pub eligible: bool,
}

pub async fn assign_provider(
    pool: &SqlitePool,
    booking_id: &str,
    provider_id: &str,
) -> AppResult<Assignment> {
    let booking = fetch_required(pool, booking_id).await?;

    let provider = sqlx::query_as::<_, (String, bool, bool)>(
        r#"SELECT p.kyc_status, p.approved, p.test_passed
           FROM providers p
           JOIN users u ON u.id = p.user_id
           WHERE p.user_id = ? AND u.role = ?"#,
    )
    .bind(provider_id)
    .bind(Role::Provider.as_str())
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Provider"))?;

    if booking.provider_id.is_some() {
        return Err(BookingError::AlreadyAssigned.into());
    }
    if booking.status != BookingStatus::Pending.as_str() {
        return Err(BookingError::NotPending.into());
    }

    let updated = sqlx::query(
        r#"UPDATE bookings SET provider_id = ?, updated_at = ?
           WHERE id = ? AND provider_id IS NULL AND status = ?"#,
    )
    .bind(provider_id)
    .bind(Utc::now().to_rfc3339())
    .bind(booking_id)
    .bind(BookingStatus::Pending.as_str())
    .execute(pool)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(BookingError::AlreadyAssigned.into());
    }

    let (kyc_status, approved, test_passed) = provider;
    Ok(Assignment {
        eligible: kyc_status == "approved" && approved && test_passed,
    })
}

#[derive(Debug, Deserialize)]
pub struct Reschedule {
    pub date: Option<String>,
    pub time: Option<String>,
}

/// Overwrites date and/or time of an open booking. Concurrent reschedules are last-write-wins.
pub async fn reschedule(
    pool: &SqlitePool,
    settings: &SettingsSnapshot,
    booking_id: &str,
    input: Reschedule,
) -> AppResult<()> {
    let date = input
        .date
        .as_deref()
        .filter(|value| !value.trim().is_empty())
        .map(parse_date)
        .transpose()?;
    let time = input
        .time
        .as_deref()
        .filter(|value| !value.trim().is_empty())
        .map(parse_time)
        .transpose()?;
    if date.is_none() && time.is_none() {
        return Err(AppError::validation("Provide a new date or time."));
    }
    if date.is_some_and(|date| date < Local::now().date_naive()) {
        return Err(AppError::validation("Booking date cannot be in the past."));
    }
    if let Some(time) = time {
        ensure_within_hours(time, settings.business_hours())?;
    }

    let updated = sqlx::query(
        r#"UPDATE bookings
           SET date = COALESCE(?, date), time = COALESCE(?, time), updated_at = ?
           WHERE id = ? AND status NOT IN (?, ?)"#,
    )
    .bind(date.map(|date| date.format("%Y-%m-%d").to_string()))
    .bind(time.map(|time| time.format("%H:%M").to_string()))
    .bind(Utc::now().to_rfc3339())
    .bind(booking_id)
    .bind(BookingStatus::Completed.as_str())
    .bind(BookingStatus::Cancelled.as_str())
    .execute(pool)
    .await?;
    if updated.rows_affected() == 0 {
        let booking = fetch_required(pool, booking_id).await?;
        return Err(BookingError::Closed(current_status(&booking)?).into());
    }
    Ok(())
}

fn current_status(booking: &BookingRow) -> AppResult<BookingStatus> {
    BookingStatus::parse(&booking.status)
        .ok_or_else(|| AppError::Internal(format!("unknown booking status '{}'", booking.status)))
}

/// Moves a booking along the lifecycle. The update is conditional on the
/// status and provider that were read, so racing transitions cannot both win.
pub async fn transition(
    pool: &SqlitePool,
    booking_id: &str,
    next: BookingStatus,
    actor: &Actor,
    note: Option<&str>,
) -> AppResult<()> {
    let booking = fetch_required(pool, booking_id).await?;
    let current = current_status(&booking)?;
    let plan = plan_transition(
        current,
        booking.provider_id.as_deref(),
        &booking.customer_id,
        next,
        actor,
    )?;

    let now = Utc::now().to_rfc3339();
    let provider_id = if plan.claim {
        Some(actor.id().to_string())
    } else {
        booking.provider_id.clone()
    };
    let started_at = if next == BookingStatus::InProgress {
        Some(now.clone())
    } else {
        booking.service_started_at.clone()
    };
    let completed_at = if next == BookingStatus::Completed {
        Some(now.clone())
    } else {
        booking.service_completed_at.clone()
    };

    let mut tx = pool.begin().await?;
    let updated = sqlx::query(
        r#"UPDATE bookings
           SET status = ?, provider_id = ?, service_started_at = ?, service_completed_at = ?, updated_at = ?
           WHERE id = ? AND status = ? AND provider_id IS ?"#,
    )
    .bind(next.as_str())
    .bind(&provider_id)
    .bind(&started_at)
    .bind(&completed_at)
    .bind(&now)
    .bind(booking_id)
    .bind(current.as_str())
    .bind(&booking.provider_id)
    .execute(&mut *tx)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(BookingError::Stale.into());
    }

    insert_history(&mut tx, booking_id, next, actor.id(), note, &now).await?;

    let counter = match next {
        BookingStatus::Completed => Some("completed_bookings"),
        BookingStatus::Cancelled => Some("canceled_bookings"),
        _ => None,
    };
    if let (Some(column), Some(provider_id)) = (counter, provider_id.as_deref()) {
        sqlx::query(&format!(
            "UPDATE providers SET {column} = {column} + 1 WHERE user_id = ?"
        ))
        .bind(provider_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentUpdate {
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
}

/// Payment is reconciled separately from the lifecycle; cancelling never refunds by itself.
pub async fn update_payment(
    pool: &SqlitePool,
    booking_id: &str,
    input: PaymentUpdate,
) -> AppResult<()> {
    let booking = fetch_required(pool, booking_id).await?;
    let current = PaymentStatus::parse(&booking.payment_status).ok_or_else(|| {
        AppError::Internal(format!("unknown payment status '{}'", booking.payment_status))
    })?;
    if !current.can_transition_to(input.status) {
        return Err(BookingError::InvalidPaymentTransition {
            from: current,
            to: input.status,
        }
        .into());
    }

    let now = Utc::now().to_rfc3339();
    let paid_at = if input.status == PaymentStatus::Paid {
        Some(now.clone())
    } else {
        booking.paid_at
    };
    let transaction_id = input
        .transaction_id
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    let updated = sqlx::query(
        r#"UPDATE bookings
           SET payment_status = ?, transaction_id = COALESCE(?, transaction_id), paid_at = ?, updated_at = ?
           WHERE id = ? AND payment_status = ?"#,
    )
    .bind(input.status.as_str())
    .bind(transaction_id)
    .bind(paid_at)
    .bind(&now)
    .bind(booking_id)
    .bind(current.as_str())
    .execute(pool)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(BookingError::Stale.into());
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct ReviewInput {
    pub rating: i64,
    pub comment: Option<String>,
}

/// One review per completed booking; folds the rating into provider and service averages.
pub async fn review(
    pool: &SqlitePool,
    booking_id: &str,
    customer_id: &str,
    input: ReviewInput,
) -> AppResult<()> {
    if !(1..=5).contains(&input.rating) {
        return Err(AppError::validation("Rating must be between 1 and 5."));
    }
    let booking = fetch_required(pool, booking_id).await?;
    if booking.customer_id != customer_id {
        return Err(AppError::Forbidden("You can only review your own bookings.".into()));
    }
    if booking.status != BookingStatus::Completed.as_str() {
        return Err(BookingError::NotCompleted.into());
    }
    if booking.rating.is_some() {
        return Err(BookingError::AlreadyReviewed.into());
    }

    let comment = input
        .comment
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    let mut tx = pool.begin().await?;
    let updated = sqlx::query(
        "UPDATE bookings SET rating = ?, review = ?, updated_at = ? WHERE id = ? AND rating IS NULL",
    )
    .bind(input.rating)
    .bind(comment)
    .bind(Utc::now().to_rfc3339())
    .bind(booking_id)
    .execute(&mut *tx)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(BookingError::AlreadyReviewed.into());
    }

    if let Some(provider_id) = booking.provider_id.as_deref() {
        sqlx::query(
            r#"UPDATE providers
               SET average_rating = ROUND((average_rating * rating_count + ?) / (rating_count + 1), 2),
                   rating_count = rating_count + 1
               WHERE user_id = ?"#,
        )
        .bind(input.rating as f64)
        .bind(provider_id)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query(
        r#"UPDATE services
           SET average_rating = ROUND((average_rating * rating_count + ?) / (rating_count + 1), 2),
               rating_count = rating_count + 1
           WHERE id IN (SELECT DISTINCT service_id FROM booking_items WHERE booking_id = ?)"#,
    )
    .bind(input.rating as f64)
    .bind(booking_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Hard delete for data cleanup. Coupon usage records outlive the booking.
pub async fn delete(pool: &SqlitePool, booking_id: &str) -> AppResult<()> {
    let deleted = sqlx::query("DELETE FROM bookings WHERE id = ?")
        .bind(booking_id)
        .execute(pool)
        .await?;
    if deleted.rows_affected() == 0 {
        return Err(AppError::NotFound("Booking"));
    }
    Ok(())
}
