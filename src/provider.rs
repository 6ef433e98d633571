//! Provider onboarding: KYC, the qualification test, bank details and
//! service-area matching.

use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::{
    error::{AppError, AppResult},
    models::{BookingRow, KycStatus, ProviderRow, Role},
    pagination::{like_pattern, Page, Paginated},
};

const PROVIDER_SELECT: &str = r#"SELECT u.id, u.name, u.email, u.phone, p.city, p.service_area,
       p.kyc_status, p.kyc_document_type, p.kyc_document_number, p.kyc_rejection_reason,
       p.approved, p.test_passed, p.test_score,
       p.bank_account_holder, p.bank_account_number, p.bank_ifsc, p.bank_verified,
       p.completed_bookings, p.canceled_bookings, p.average_rating, p.rating_count,
       u.created_at
FROM providers p
JOIN users u ON u.id = p.user_id"#;

/// Approved KYC, the approved flag and a passed test.
pub fn is_eligible(row: &ProviderRow) -> bool {
    row.kyc_status == KycStatus::Approved.as_str() && row.approved && row.test_passed
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KycView {
    pub status: String,
    pub document_type: Option<String>,
    pub document_number: Option<String>,
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BankView {
    pub account_holder: Option<String>,
    pub account_number: Option<String>,
    pub ifsc: Option<String>,
    pub verified: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderView {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub city: Option<String>,
    pub service_area: Option<String>,
    pub categories: Vec<String>,
    pub kyc: KycView,
    pub approved: bool,
    pub test_passed: bool,
    pub test_score: Option<f64>,
    pub bank_details: BankView,
    pub eligible: bool,
    pub completed_bookings: i64,
    pub canceled_bookings: i64,
    pub average_rating: f64,
    pub rating_count: i64,
    pub created_at: String,
}

/// Keeps the last four digits of an account number.
fn mask_account(number: &str) -> String {
    let digits: Vec<char> = number.chars().collect();
    let keep = digits.len().min(4);
    let hidden = digits.len() - keep;
    let tail: String = digits[hidden..].iter().collect();
    format!("{}{tail}", "*".repeat(hidden))
}

impl ProviderView {
    pub fn new(row: ProviderRow, categories: Vec<String>) -> Self {
        let eligible = is_eligible(&row);
        Self {
            id: row.id,
            name: row.name,
            email: row.email,
            phone: row.phone,
            city: row.city,
            service_area: row.service_area,
            categories,
            kyc: KycView {
                status: row.kyc_status,
                document_type: row.kyc_document_type,
                document_number: row.kyc_document_number,
                rejection_reason: row.kyc_rejection_reason,
            },
            approved: row.approved,
            test_passed: row.test_passed,
            test_score: row.test_score,
            bank_details: BankView {
                account_holder: row.bank_account_holder,
                account_number: row.bank_account_number.as_deref().map(mask_account),
                ifsc: row.bank_ifsc,
                verified: row.bank_verified,
            },
            eligible,
            completed_bookings: row.completed_bookings,
            canceled_bookings: row.canceled_bookings,
            average_rating: row.average_rating,
            rating_count: row.rating_count,
            created_at: row.created_at,
        }
    }
}

pub async fn fetch(pool: &SqlitePool, provider_id: &str) -> AppResult<ProviderRow> {
    sqlx::query_as::<_, ProviderRow>(&format!("{PROVIDER_SELECT} WHERE p.user_id = ? LIMIT 1"))
        .bind(provider_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Provider"))
}

pub async fn categories(pool: &SqlitePool, provider_id: &str) -> AppResult<Vec<String>> {
    let rows = sqlx::query_as::<_, (String,)>(
        "SELECT category FROM provider_categories WHERE provider_id = ? ORDER BY category",
    )
    .bind(provider_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(category,)| category).collect())
}

pub async fn view(pool: &SqlitePool, provider_id: &str) -> AppResult<ProviderView> {
    let row = fetch(pool, provider_id).await?;
    Ok(ProviderView::new(row, categories(pool, provider_id).await?))
}

pub async fn eligibility(pool: &SqlitePool, provider_id: &str) -> AppResult<bool> {
    Ok(is_eligible(&fetch(pool, provider_id).await?))
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub city: Option<String>,
    pub service_area: Option<String>,
    pub categories: Option<Vec<String>>,
}

pub async fn update_profile(pool: &SqlitePool, provider_id: &str, input: ProfileUpdate) -> AppResult<()> {
    fetch(pool, provider_id).await?;
    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE users SET name = COALESCE(?, name), phone = COALESCE(?, phone) WHERE id = ?")
        .bind(trimmed(input.name))
        .bind(trimmed(input.phone))
        .bind(provider_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        "UPDATE providers SET city = COALESCE(?, city), service_area = COALESCE(?, service_area) WHERE user_id = ?",
    )
    .bind(trimmed(input.city))
    .bind(trimmed(input.service_area))
    .bind(provider_id)
    .execute(&mut *tx)
    .await?;

    if let Some(categories) = input.categories {
        sqlx::query("DELETE FROM provider_categories WHERE provider_id = ?")
            .bind(provider_id)
            .execute(&mut *tx)
            .await?;
        let mut seen = std::collections::BTreeSet::new();
        for category in categories {
            let category = category.trim().to_lowercase();
            if category.is_empty() || !seen.insert(category.clone()) {
                continue;
            }
            sqlx::query("INSERT INTO provider_categories (provider_id, category) VALUES (?, ?)")
                .bind(provider_id)
                .bind(category)
                .execute(&mut *tx)
                .await?;
        }
    }

    tx.commit().await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KycSubmission {
    pub document_type: String,
    pub document_number: String,
}

/// Any submission puts the provider back in review.
pub async fn submit_kyc(pool: &SqlitePool, provider_id: &str, input: KycSubmission) -> AppResult<()> {
    let document_type = input.document_type.trim();
    let document_number = input.document_number.trim();
    if document_type.is_empty() || document_number.is_empty() {
        return Err(AppError::validation("Document type and number are required."));
    }
    let updated = sqlx::query(
        r#"UPDATE providers
           SET kyc_status = ?, kyc_document_type = ?, kyc_document_number = ?,
               kyc_rejection_reason = NULL, approved = 0
           WHERE user_id = ?"#,
    )
    .bind(KycStatus::Pending.as_str())
    .bind(document_type)
    .bind(document_number)
    .bind(provider_id)
    .execute(pool)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(AppError::NotFound("Provider"));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct KycDecision {
    pub status: KycStatus,
    pub reason: Option<String>,
}

pub async fn review_kyc(pool: &SqlitePool, provider_id: &str, decision: KycDecision) -> AppResult<()> {
    let reason = trimmed(decision.reason);
    let (approved, reason) = match decision.status {
        KycStatus::Approved => (true, None),
        KycStatus::Rejected => match reason {
            Some(reason) => (false, Some(reason)),
            None => return Err(AppError::validation("A rejection reason is required.")),
        },
        KycStatus::Pending => {
            return Err(AppError::validation("KYC can only be approved or rejected."))
        }
    };
    let updated = sqlx::query(
        "UPDATE providers SET kyc_status = ?, approved = ?, kyc_rejection_reason = ? WHERE user_id = ?",
    )
    .bind(decision.status.as_str())
    .bind(approved)
    .bind(reason)
    .bind(provider_id)
    .execute(pool)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(AppError::NotFound("Provider"));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct TestSubmission {
    pub correct: u32,
    pub total: u32,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub score: f64,
    pub passed: bool,
}

pub fn grade(submission: &TestSubmission, pass_ratio: f64) -> AppResult<TestResult> {
    if submission.total == 0 || submission.correct > submission.total {
        return Err(AppError::validation("Test answers are out of range."));
    }
    let score = crate::coupon::round_money(submission.correct as f64 / submission.total as f64);
    Ok(TestResult {
        score,
        passed: score >= pass_ratio,
    })
}

/// Records the latest attempt. A failed retake does not revoke an earlier pass.
pub async fn record_test(pool: &SqlitePool, provider_id: &str, result: &TestResult) -> AppResult<()> {
    let updated = sqlx::query(
        "UPDATE providers SET test_score = ?, test_passed = (test_passed OR ?) WHERE user_id = ?",
    )
    .bind(result.score)
    .bind(result.passed)
    .bind(provider_id)
    .execute(pool)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(AppError::NotFound("Provider"));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankDetails {
    pub account_holder: String,
    pub account_number: String,
    pub ifsc: String,
}

/// Four bank letters, a zero, then six branch characters.
pub fn valid_ifsc(ifsc: &str) -> bool {
    let bytes = ifsc.as_bytes();
    bytes.len() == 11
        && bytes[..4].iter().all(u8::is_ascii_uppercase)
        && bytes[4] == b'0'
        && bytes[5..].iter().all(u8::is_ascii_alphanumeric)
}

/// Changing bank details always needs a fresh verification.
pub async fn set_bank(pool: &SqlitePool, provider_id: &str, input: BankDetails) -> AppResult<()> {
    let holder = input.account_holder.trim();
    let number = input.account_number.trim();
    let ifsc = input.ifsc.trim().to_uppercase();
    if holder.is_empty() {
        return Err(AppError::validation("Account holder name is required."));
    }
    if !(9..=18).contains(&number.len()) || !number.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::validation("Account number must be 9-18 digits."));
    }
    if !valid_ifsc(&ifsc) {
        return Err(AppError::validation("IFSC code is not valid."));
    }
    let updated = sqlx::query(
        r#"UPDATE providers
           SET bank_account_holder = ?, bank_account_number = ?, bank_ifsc = ?, bank_verified = 0
           WHERE user_id = ?"#,
    )
    .bind(holder)
    .bind(number)
    .bind(ifsc)
    .bind(provider_id)
    .execute(pool)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(AppError::NotFound("Provider"));
    }
    Ok(())
}

pub async fn verify_bank(pool: &SqlitePool, provider_id: &str) -> AppResult<()> {
    let provider = fetch(pool, provider_id).await?;
    if provider.bank_account_number.is_none() {
        return Err(AppError::validation("Provider has not added bank details."));
    }
    sqlx::query("UPDATE providers SET bank_verified = 1 WHERE user_id = ?")
        .bind(provider_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Case-insensitive: the provider's city or any comma-separated service area
/// appears in the booking address.
pub fn matches_area(address: &str, city: Option<&str>, service_area: Option<&str>) -> bool {
    let address = address.to_lowercase();
    city.into_iter()
        .chain(service_area.into_iter().flat_map(|area| area.split(',')))
        .map(|part| part.trim().to_lowercase())
        .any(|part| !part.is_empty() && address.contains(&part))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub id: String,
    pub name: String,
    pub phone: Option<String>,
    pub city: Option<String>,
    pub service_area: Option<String>,
    pub eligible: bool,
    pub average_rating: f64,
    pub completed_bookings: i64,
}

/// Providers serving the booking's area, eligible ones first. Advisory only.
pub async fn candidates(pool: &SqlitePool, booking: &BookingRow) -> AppResult<Vec<Candidate>> {
    let rows = sqlx::query_as::<_, ProviderRow>(&format!(
        "{PROVIDER_SELECT} WHERE u.active = 1 AND u.role = ? ORDER BY p.average_rating DESC, u.name"
    ))
    .bind(Role::Provider.as_str())
    .fetch_all(pool)
    .await?;

    let address = format!("{}, {}", booking.address_line, booking.city);
    let mut matched: Vec<Candidate> = rows
        .into_iter()
        .filter(|row| matches_area(&address, row.city.as_deref(), row.service_area.as_deref()))
        .map(|row| Candidate {
            eligible: is_eligible(&row),
            id: row.id,
            name: row.name,
            phone: row.phone,
            city: row.city,
            service_area: row.service_area,
            average_rating: row.average_rating,
            completed_bookings: row.completed_bookings,
        })
        .collect();
    matched.sort_by_key(|candidate| !candidate.eligible);
    Ok(matched)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderFilter {
    pub kyc_status: Option<String>,
    pub city: Option<String>,
    pub search: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, kyc: Option<KycStatus>, filter: &ProviderFilter) {
    if let Some(kyc) = kyc {
        qb.push(" AND p.kyc_status = ").push_bind(kyc.as_str());
    }
    if let Some(city) = like_pattern(filter.city.as_deref()) {
        qb.push(" AND LOWER(p.city) LIKE ").push_bind(city);
    }
    if let Some(pattern) = like_pattern(filter.search.as_deref()) {
        qb.push(" AND (LOWER(u.name) LIKE ")
            .push_bind(pattern.clone())
            .push(" OR LOWER(u.email) LIKE ")
            .push_bind(pattern.clone())
            .push(" OR LOWER(COALESCE(u.phone, '')) LIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

pub async fn list(pool: &SqlitePool, filter: &ProviderFilter) -> AppResult<Paginated<ProviderView>> {
    let page = Page::resolve(filter.page, filter.limit)?;
    let kyc = filter
        .kyc_status
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty() && *value != "all")
        .map(|value| {
            KycStatus::parse(value)
                .ok_or_else(|| AppError::validation(format!("Unknown KYC status '{value}'.")))
        })
        .transpose()?;

    let mut count = QueryBuilder::<Sqlite>::new(
        "SELECT COUNT(*) FROM providers p JOIN users u ON u.id = p.user_id WHERE 1 = 1",
    );
    push_filters(&mut count, kyc, filter);
    let (total,) = count.build_query_as::<(i64,)>().fetch_one(pool).await?;

    let mut select = QueryBuilder::<Sqlite>::new(format!("{PROVIDER_SELECT} WHERE 1 = 1"));
    push_filters(&mut select, kyc, filter);
    select
        .push(" ORDER BY u.created_at DESC LIMIT ")
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset());
    let rows = select.build_query_as::<ProviderRow>().fetch_all(pool).await?;

    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        let categories = categories(pool, &row.id).await?;
        items.push(ProviderView::new(row, categories));
    }
    Ok(Paginated::new(items, total, page))
}

pub async fn pending_kyc_count(pool: &SqlitePool) -> AppResult<i64> {
    let (count,) = sqlx::query_as::<_, (i64,)>(
        "SELECT COUNT(*) FROM providers WHERE kyc_status = ? AND kyc_document_number IS NOT NULL",
    )
    .bind(KycStatus::Pending.as_str())
    .fetch_one(pool)
    .await?;
    Ok(count)
}
