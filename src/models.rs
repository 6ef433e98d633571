use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Provider,
    Customer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Provider => "provider",
            Role::Customer => "customer",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "admin" => Some(Role::Admin),
            "provider" => Some(Role::Provider),
            "customer" => Some(Role::Customer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KycStatus {
    Pending,
    Approved,
    Rejected,
}

impl KycStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KycStatus::Pending => "pending",
            KycStatus::Approved => "approved",
            KycStatus::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(KycStatus::Pending),
            "approved" => Some(KycStatus::Approved),
            "rejected" => Some(KycStatus::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContactStatus {
    New,
    Replied,
}

impl ContactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactStatus::New => "NEW",
            ContactStatus::Replied => "REPLIED",
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: String,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub role: String,
    pub password_hash: String,
    pub active: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CustomerRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub total_bookings: i64,
    pub first_booking_used: bool,
    pub custom_discount: f64,
    pub is_verified: bool,
    pub last_active_at: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProviderRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub city: Option<String>,
    pub service_area: Option<String>,
    pub kyc_status: String,
    pub kyc_document_type: Option<String>,
    pub kyc_document_number: Option<String>,
    pub kyc_rejection_reason: Option<String>,
    pub approved: bool,
    pub test_passed: bool,
    pub test_score: Option<f64>,
    pub bank_account_holder: Option<String>,
    pub bank_account_number: Option<String>,
    pub bank_ifsc: Option<String>,
    pub bank_verified: bool,
    pub completed_bookings: i64,
    pub canceled_bookings: i64,
    pub average_rating: f64,
    pub rating_count: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRow {
    pub id: String,
    pub title: String,
    pub category: String,
    pub description: String,
    pub base_price: f64,
    pub duration: f64,
    pub image: Option<String>,
    pub is_active: bool,
    pub average_rating: f64,
    pub rating_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CouponRow {
    pub id: String,
    pub code: String,
    pub discount_type: String,
    pub discount_value: f64,
    pub expiry_date: String,
    pub min_booking_value: f64,
    pub usage_limit: Option<i64>,
    pub used_count: i64,
    pub audience: String,
    pub assigned_to: Option<String>,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CouponUsageRow {
    pub user: String,
    pub booking_id: Option<String>,
    pub booking_value: f64,
    pub used_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BookingRow {
    pub id: String,
    pub customer_id: String,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub provider_id: Option<String>,
    pub provider_name: Option<String>,
    pub address_line: String,
    pub city: String,
    pub pincode: Option<String>,
    pub date: String,
    pub time: String,
    pub notes: Option<String>,
    pub status: String,
    pub subtotal: f64,
    pub discount: f64,
    pub total_amount: f64,
    pub coupon_code: Option<String>,
    pub payment_method: String,
    pub payment_status: String,
    pub transaction_id: Option<String>,
    pub paid_at: Option<String>,
    pub service_started_at: Option<String>,
    pub service_completed_at: Option<String>,
    pub rating: Option<i64>,
    pub review: Option<String>,
    pub services: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct BookingItemRow {
    pub service_id: String,
    pub title: String,
    pub quantity: i64,
    pub price: f64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct StatusHistoryRow {
    pub status: String,
    pub changed_by: Option<String>,
    pub note: Option<String>,
    pub changed_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ContactRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub subject: String,
    pub message: String,
    pub status: String,
    pub admin_reply: Option<String>,
    pub replied_at: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRow {
    pub message: String,
    pub created_at: String,
}
