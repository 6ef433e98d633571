use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use super::{parse_date, store::BOOKING_SELECT, BookingStatus, BookingSummary, PaymentStatus};
use crate::{
    error::{AppError, AppResult},
    models::BookingRow,
    pagination::{like_pattern, Page, Paginated},
};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingFilter {
    pub status: Option<String>,
    pub payment_status: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub search: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// Whose bookings a listing covers.
#[derive(Debug, Clone, Copy)]
pub enum Scope<'a> {
    All,
    Customer(&'a str),
    /// Assigned to the provider, plus unassigned pending ones they could claim.
    Provider(&'a str),
}

/// Filter values after validation; blank inputs are dropped.
#[derive(Debug, Default)]
struct Criteria {
    status: Option<BookingStatus>,
    payment_status: Option<PaymentStatus>,
    start_date: Option<String>,
    end_date: Option<String>,
    search: Option<String>,
}

fn blank_to_none(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty() && *value != "all")
}

impl Criteria {
    fn from_filter(filter: &BookingFilter) -> AppResult<Self> {
        let status = blank_to_none(filter.status.as_deref())
            .map(|value| {
                BookingStatus::parse(value)
                    .ok_or_else(|| AppError::validation(format!("Unknown booking status '{value}'.")))
            })
            .transpose()?;
        let payment_status = blank_to_none(filter.payment_status.as_deref())
            .map(|value| {
                PaymentStatus::parse(value)
                    .ok_or_else(|| AppError::validation(format!("Unknown payment status '{value}'.")))
            })
            .transpose()?;
        let start_date = blank_to_none(filter.start_date.as_deref()).map(parse_date).transpose()?;
        let end_date = blank_to_none(filter.end_date.as_deref()).map(parse_date).transpose()?;
        if let (Some(start), Some(end)) = (start_date, end_date) {
            if start > end {
                return Err(AppError::validation("startDate must not be after endDate."));
            }
        }
        Ok(Self {
            status,
            payment_status,
            start_date: start_date.map(|date| date.format("%Y-%m-%d").to_string()),
            end_date: end_date.map(|date| date.format("%Y-%m-%d").to_string()),
            search: like_pattern(filter.search.as_deref()),
        })
    }

    fn push(&self, qb: &mut QueryBuilder<'_, Sqlite>, scope: Scope<'_>) {
        match scope {
            Scope::All => {}
            Scope::Customer(customer_id) => {
                qb.push(" AND b.customer_id = ").push_bind(customer_id.to_string());
            }
            Scope::Provider(provider_id) => {
                qb.push(" AND (b.provider_id = ")
                    .push_bind(provider_id.to_string())
                    .push(" OR (b.provider_id IS NULL AND b.status = ")
                    .push_bind(BookingStatus::Pending.as_str())
                    .push("))");
            }
        }
        if let Some(status) = self.status {
            qb.push(" AND b.status = ").push_bind(status.as_str());
        }
        if let Some(payment_status) = self.payment_status {
            qb.push(" AND b.payment_status = ").push_bind(payment_status.as_str());
        }
        if let Some(start) = &self.start_date {
            qb.push(" AND b.date >= ").push_bind(start.clone());
        }
        if let Some(end) = &self.end_date {
            qb.push(" AND b.date <= ").push_bind(end.clone());
        }
        if let Some(pattern) = &self.search {
            qb.push(" AND (LOWER(b.id) LIKE ")
                .push_bind(pattern.clone())
                .push(" OR LOWER(c.name) LIKE ")
                .push_bind(pattern.clone())
                .push(" OR LOWER(c.email) LIKE ")
                .push_bind(pattern.clone())
                .push(" OR LOWER(b.address_line) LIKE ")
                .push_bind(pattern.clone())
                .push(" OR LOWER(b.city) LIKE ")
                .push_bind(pattern.clone())
                .push(")");
        }
    }
}

pub async fn list(
    pool: &SqlitePool,
    scope: Scope<'_>,
    filter: &BookingFilter,
) -> AppResult<Paginated<BookingSummary>> {
    let page = Page::resolve(filter.page, filter.limit)?;
    let criteria = Criteria::from_filter(filter)?;

    let mut count = QueryBuilder::<Sqlite>::new(
        "SELECT COUNT(*) FROM bookings b JOIN users c ON b.customer_id = c.id WHERE 1 = 1",
    );
    criteria.push(&mut count, scope);
    let (total,) = count.build_query_as::<(i64,)>().fetch_one(pool).await?;

    let mut select = QueryBuilder::<Sqlite>::new(format!("{BOOKING_SELECT} WHERE 1 = 1"));
    criteria.push(&mut select, scope);
    select
        .push(" ORDER BY b.created_at DESC LIMIT ")
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset());
    let rows = select.build_query_as::<BookingRow>().fetch_all(pool).await?;

    Ok(Paginated::new(rows, total, page).map(BookingSummary::from))
}

/// Every booking in the range for the export, oldest first.
pub async fn report_rows(pool: &SqlitePool, filter: &BookingFilter) -> AppResult<Vec<BookingRow>> {
    let criteria = Criteria::from_filter(filter)?;
    let mut select = QueryBuilder::<Sqlite>::new(format!("{BOOKING_SELECT} WHERE 1 = 1"));
    criteria.push(&mut select, Scope::All);
    select.push(" ORDER BY b.date, b.time, b.created_at");
    Ok(select.build_query_as::<BookingRow>().fetch_all(pool).await?)
}

#[derive(Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub total: i64,
    pub pending: i64,
    pub accepted: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub cancelled: i64,
    pub revenue: f64,
}

/// Counts by status, plus revenue from paid bookings. `provider_id` narrows to one provider.
pub async fn status_counts(pool: &SqlitePool, provider_id: Option<&str>) -> AppResult<StatusCounts> {
    let mut qb = QueryBuilder::<Sqlite>::new(
        "SELECT status, COUNT(*), TOTAL(CASE WHEN payment_status = 'paid' THEN total_amount ELSE 0.0 END) \
         FROM bookings WHERE 1 = 1",
    );
    if let Some(provider_id) = provider_id {
        qb.push(" AND provider_id = ").push_bind(provider_id.to_string());
    }
    qb.push(" GROUP BY status");
    let rows = qb
        .build_query_as::<(String, i64, f64)>()
        .fetch_all(pool)
        .await?;

    let mut counts = StatusCounts::default();
    for (status, count, revenue) in rows {
        counts.total += count;
        counts.revenue += revenue;
        match BookingStatus::parse(&status) {
            Some(BookingStatus::Pending) => counts.pending = count,
            Some(BookingStatus::Accepted) => counts.accepted = count,
            Some(BookingStatus::InProgress) => counts.in_progress = count,
            Some(BookingStatus::Completed) => counts.completed = count,
            Some(BookingStatus::Cancelled) => counts.cancelled = count,
            None => log::warn!("Booking with unknown status '{status}' in counts"),
        }
    }
    counts.revenue = crate::coupon::round_money(counts.revenue);
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Fixture;

    #[actix_web::test]
    async fn filters_by_status_search_and_scope() {
        let fx = Fixture::new().await;
        let first = fx.booking().await;
        let second = fx.booking().await;
        sqlx::query("UPDATE bookings SET status = 'cancelled', city = 'Nashik' WHERE id = ?")
            .bind(&second)
            .execute(&fx.pool)
            .await
            .unwrap();

        let all = list(&fx.pool, Scope::All, &BookingFilter::default()).await.unwrap();
        assert_eq!(all.total, 2);

        let pending = BookingFilter {
            status: Some("pending".into()),
            ..Default::default()
        };
        let page = list(&fx.pool, Scope::All, &pending).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].id, first);

        let by_city = BookingFilter {
            search: Some("NASHIK".into()),
            ..Default::default()
        };
        let page = list(&fx.pool, Scope::All, &by_city).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, second);

        let mine = list(&fx.pool, Scope::Customer("someone-else"), &BookingFilter::default())
            .await
            .unwrap();
        assert_eq!(mine.total, 0);

        // The open pending booking is visible to providers; the cancelled one is not.
        let open = list(&fx.pool, Scope::Provider(&fx.provider), &BookingFilter::default())
            .await
            .unwrap();
        assert_eq!(open.total, 1);
    }

    #[actix_web::test]
    async fn date_range_and_pagination() {
        let fx = Fixture::new().await;
        for date in ["2031-01-05", "2031-01-10", "2031-02-01"] {
            let id = fx.booking().await;
            sqlx::query("UPDATE bookings SET date = ? WHERE id = ?")
                .bind(date)
                .bind(&id)
                .execute(&fx.pool)
                .await
                .unwrap();
        }

        let january = BookingFilter {
            start_date: Some("2031-01-01".into()),
            end_date: Some("2031-01-31".into()),
            limit: Some(1),
            ..Default::default()
        };
        let page = list(&fx.pool, Scope::All, &january).await.unwrap();
        assert_eq!((page.total, page.items.len(), page.total_pages), (2, 1, 2));

        let rows = report_rows(&fx.pool, &january).await.unwrap();
        let dates: Vec<_> = rows.iter().map(|row| row.date.as_str()).collect();
        assert_eq!(dates, ["2031-01-05", "2031-01-10"]);

        let backwards = BookingFilter {
            start_date: Some("2031-02-01".into()),
            end_date: Some("2031-01-01".into()),
            ..Default::default()
        };
        assert!(list(&fx.pool, Scope::All, &backwards).await.is_err());
    }

    #[actix_web::test]
    async fn unknown_status_filter_is_rejected() {
        let fx = Fixture::new().await;
        let filter = BookingFilter {
            status: Some("archived".into()),
            ..Default::default()
        };
        let err = list(&fx.pool, Scope::All, &filter).await.unwrap_err();
        assert_eq!(err.code(), "ValidationError");
    }

    #[actix_web::test]
    async fn counts_and_paid_revenue() {
        let fx = Fixture::new().await;
        let paid = fx.booking().await;
        fx.booking().await;
        sqlx::query("UPDATE bookings SET status = 'completed', payment_status = 'paid', provider_id = ? WHERE id = ?")
            .bind(&fx.provider)
            .bind(&paid)
            .execute(&fx.pool)
            .await
            .unwrap();

        let counts = status_counts(&fx.pool, None).await.unwrap();
        assert_eq!((counts.total, counts.pending, counts.completed), (2, 1, 1));
        let (amount,) = sqlx::query_as::<_, (f64,)>("SELECT total_amount FROM bookings WHERE id = ?")
            .bind(&paid)
            .fetch_one(&fx.pool)
            .await
            .unwrap();
        assert_eq!(counts.revenue, amount);

        let provider = status_counts(&fx.pool, Some(&fx.provider)).await.unwrap();
        assert_eq!(provider.total, 1);
    }

    #[actix_web::test]
    async fn counts_without_paid_bookings_report_zero_revenue() {
        let fx = Fixture::new().await;
        let empty = status_counts(&fx.pool, None).await.unwrap();
        assert_eq!(empty, StatusCounts::default());

        fx.booking().await;
        fx.booking().await;
        let counts = status_counts(&fx.pool, None).await.unwrap();
        assert_eq!((counts.total, counts.pending), (2, 2));
        assert_eq!(counts.revenue, 0.0);

        let provider = status_counts(&fx.pool, Some(&fx.provider)).await.unwrap();
        assert_eq!(provider, StatusCounts::default());
    }
}
