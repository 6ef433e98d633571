//! Booking lifecycle: statuses, who may move them, and the payment record.

pub mod query;
pub mod store;

use std::fmt;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::{
    auth::AuthUser,
    coupon::round_money,
    error::{AppError, AppResult},
    models::{BookingItemRow, BookingRow, Role, StatusHistoryRow},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BookingStatus {
    Pending,
    Accepted,
    InProgress,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Accepted => "accepted",
            BookingStatus::InProgress => "in-progress",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(BookingStatus::Pending),
            "accepted" => Some(BookingStatus::Accepted),
            "in-progress" => Some(BookingStatus::InProgress),
            "completed" => Some(BookingStatus::Completed),
            "cancelled" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Accepted)
                | (Pending, Cancelled)
                | (Accepted, InProgress)
                | (Accepted, Cancelled)
                | (InProgress, Completed)
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(PaymentStatus::Pending),
            "paid" => Some(PaymentStatus::Paid),
            "failed" => Some(PaymentStatus::Failed),
            "refunded" => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Pending, Paid) | (Pending, Failed) | (Failed, Pending) | (Failed, Paid) | (Paid, Refunded)
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Online,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Online => "online",
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BookingError {
    #[error("A provider is already assigned to this booking.")]
    AlreadyAssigned,
    #[error("Only pending bookings can be assigned a provider.")]
    NotPending,
    #[error("Cannot move a booking from {from} to {to}.")]
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    #[error("Assign a provider before accepting this booking.")]
    ProviderRequired,
    #[error("This booking is {0} and can no longer be changed.")]
    Closed(BookingStatus),
    #[error("Payment cannot move from {from} to {to}.")]
    InvalidPaymentTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },
    #[error("Only completed bookings can be reviewed.")]
    NotCompleted,
    #[error("This booking has already been reviewed.")]
    AlreadyReviewed,
    #[error("The booking changed while you were updating it. Reload and try again.")]
    Stale,
}

impl BookingError {
    pub fn code(&self) -> &'static str {
        match self {
            BookingError::AlreadyAssigned => "AlreadyAssigned",
            BookingError::NotPending => "NotPending",
            BookingError::InvalidTransition { .. } => "InvalidTransition",
            BookingError::ProviderRequired => "ProviderRequired",
            BookingError::Closed(_) => "BookingClosed",
            BookingError::InvalidPaymentTransition { .. } => "InvalidPaymentTransition",
            BookingError::NotCompleted => "NotCompleted",
            BookingError::AlreadyReviewed => "AlreadyReviewed",
            BookingError::Stale => "Conflict",
        }
    }
}

/// Who is asking for a status change.
#[derive(Debug, Clone)]
pub enum Actor {
    Admin { id: String },
    /// `eligible` is approved KYC plus a passed qualification test.
    Provider { id: String, eligible: bool },
    Customer { id: String },
}

impl Actor {
    pub fn id(&self) -> &str {
        match self {
            Actor::Admin { id } | Actor::Provider { id, .. } | Actor::Customer { id } => id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionPlan {
    pub next: BookingStatus,
    /// The acting provider takes an unassigned pending booking.
    pub claim: bool,
}

pub fn plan_transition(
    current: BookingStatus,
    provider_id: Option<&str>,
    customer_id: &str,
    next: BookingStatus,
    actor: &Actor,
) -> AppResult<TransitionPlan> {
    if !current.can_transition_to(next) {
        return Err(BookingError::InvalidTransition {
            from: current,
            to: next,
        }
        .into());
    }

    let plan = TransitionPlan { next, claim: false };
    match actor {
        Actor::Admin { .. } => {
            if next == BookingStatus::Accepted && provider_id.is_none() {
                return Err(BookingError::ProviderRequired.into());
            }
            Ok(plan)
        }
        Actor::Customer { id } => {
            if id != customer_id {
                return Err(AppError::Forbidden("You can only change your own bookings.".into()));
            }
            if next != BookingStatus::Cancelled {
                return Err(AppError::Forbidden("Customers can only cancel bookings.".into()));
            }
            Ok(plan)
        }
        Actor::Provider { id, eligible } => match provider_id {
            Some(assigned) if assigned == id => Ok(plan),
            Some(_) => Err(AppError::Forbidden(
                "This booking is assigned to another provider.".into(),
            )),
            None if next == BookingStatus::Accepted => {
                if *eligible {
                    Ok(TransitionPlan { next, claim: true })
                } else {
                    Err(AppError::Forbidden(
                        "Complete KYC approval and the qualification test before accepting bookings."
                            .into(),
                    ))
                }
            }
            None => Err(AppError::Forbidden("This booking is not assigned to you.".into())),
        },
    }
}

pub fn parse_date(value: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::validation("Date must be in YYYY-MM-DD format."))
}

pub fn parse_time(value: &str) -> AppResult<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|_| AppError::validation("Time must be in HH:MM format."))
}

pub fn ensure_within_hours(time: NaiveTime, hours: Option<(NaiveTime, NaiveTime)>) -> AppResult<()> {
    match hours {
        Some((start, end)) if time < start || time > end => Err(AppError::validation(format!(
            "Bookings are taken between {} and {}.",
            start.format("%H:%M"),
            end.format("%H:%M")
        ))),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pricing {
    pub subtotal: f64,
    pub discount: f64,
    pub total_amount: f64,
}

impl Pricing {
    pub fn new(subtotal: f64, discount: f64) -> Self {
        let subtotal = round_money(subtotal.max(0.0));
        let discount = round_money(discount.clamp(0.0, subtotal));
        Self {
            subtotal,
            discount,
            total_amount: round_money(subtotal - discount),
        }
    }
}

/// Admins see everything, customers their own bookings, providers the ones
/// assigned to them and the open pool they could claim.
pub fn can_view(row: &BookingRow, user: &AuthUser) -> bool {
    match user.role {
        Role::Admin => true,
        Role::Customer => row.customer_id == user.id,
        Role::Provider => match row.provider_id.as_deref() {
            Some(provider) => provider == user.id,
            None => row.status == BookingStatus::Pending.as_str(),
        },
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingSummary {
    pub id: String,
    pub customer_id: String,
    pub customer_name: String,
    pub customer_email: String,
    pub provider_id: Option<String>,
    pub provider_name: Option<String>,
    pub services: String,
    pub city: String,
    pub date: String,
    pub time: String,
    pub status: String,
    pub total_amount: f64,
    pub payment_status: String,
    pub payment_method: String,
    pub created_at: String,
}

impl From<BookingRow> for BookingSummary {
    fn from(row: BookingRow) -> Self {
        Self {
            id: row.id,
            customer_id: row.customer_id,
            customer_name: row.customer_name,
            customer_email: row.customer_email,
            provider_id: row.provider_id,
            provider_name: row.provider_name,
            services: row.services.unwrap_or_default(),
            city: row.city,
            date: row.date,
            time: row.time,
            status: row.status,
            total_amount: row.total_amount,
            payment_status: row.payment_status,
            payment_method: row.payment_method,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PartyView {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressView {
    pub line: String,
    pub city: String,
    pub pincode: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentView {
    pub subtotal: f64,
    pub discount: f64,
    pub coupon_code: Option<String>,
    pub total_amount: f64,
    pub method: String,
    pub status: String,
    pub transaction_id: Option<String>,
    pub paid_at: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewView {
    pub rating: i64,
    pub comment: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingDetail {
    pub id: String,
    pub customer: PartyView,
    pub provider: Option<PartyView>,
    pub services: Vec<BookingItemRow>,
    pub address: AddressView,
    pub date: String,
    pub time: String,
    pub notes: Option<String>,
    pub status: String,
    pub status_history: Vec<StatusHistoryRow>,
    pub service_started_at: Option<String>,
    pub service_completed_at: Option<String>,
    pub payment: PaymentView,
    pub review: Option<ReviewView>,
    pub created_at: String,
    pub updated_at: String,
}

impl BookingDetail {
    pub fn new(row: BookingRow, items: Vec<BookingItemRow>, history: Vec<StatusHistoryRow>) -> Self {
        let provider = match (row.provider_id, row.provider_name) {
            (Some(id), name) => Some(PartyView {
                id,
                name: name.unwrap_or_default(),
                email: None,
                phone: None,
            }),
            (None, _) => None,
        };
        Self {
            id: row.id,
            customer: PartyView {
                id: row.customer_id,
                name: row.customer_name,
                email: Some(row.customer_email),
                phone: row.customer_phone,
            },
            provider,
            services: items,
            address: AddressView {
                line: row.address_line,
                city: row.city,
                pincode: row.pincode,
            },
            date: row.date,
            time: row.time,
            notes: row.notes,
            status: row.status,
            status_history: history,
            service_started_at: row.service_started_at,
            service_completed_at: row.service_completed_at,
            payment: PaymentView {
                subtotal: row.subtotal,
                discount: row.discount,
                coupon_code: row.coupon_code,
                total_amount: row.total_amount,
                method: row.payment_method,
                status: row.payment_status,
                transaction_id: row.transaction_id,
                paid_at: row.paid_at,
            },
            review: row.rating.map(|rating| ReviewView {
                rating,
                comment: row.review,
            }),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
