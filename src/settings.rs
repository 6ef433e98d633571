//! System settings, read through an expiring in-process snapshot.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::RwLock;

use crate::error::{AppError, AppResult};

pub const BUSINESS_HOURS_START: &str = "business_hours_start";
pub const BUSINESS_HOURS_END: &str = "business_hours_end";

pub const DEFAULTS: &[(&str, &str)] = &[
    ("site_name", "VoltCare"),
    ("support_email", "support@voltcare.local"),
    ("support_phone", "+91 00000 00000"),
    ("currency", "INR"),
    (BUSINESS_HOURS_START, "08:00"),
    (BUSINESS_HOURS_END, "20:00"),
];

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsSnapshot {
    pub values: BTreeMap<String, String>,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SettingsSnapshot {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Opening hours for bookings, if both ends are configured and valid.
    pub fn business_hours(&self) -> Option<(NaiveTime, NaiveTime)> {
        let start = NaiveTime::parse_from_str(self.get(BUSINESS_HOURS_START)?, "%H:%M").ok()?;
        let end = NaiveTime::parse_from_str(self.get(BUSINESS_HOURS_END)?, "%H:%M").ok()?;
        (start < end).then_some((start, end))
    }
}

#[derive(Clone)]
pub struct SettingsCache {
    ttl: Duration,
    inner: Arc<RwLock<Option<SettingsSnapshot>>>,
}

impl SettingsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn snapshot(&self, pool: &SqlitePool) -> Result<SettingsSnapshot, sqlx::Error> {
        self.snapshot_at(pool, Utc::now()).await
    }

    async fn snapshot_at(
        &self,
        pool: &SqlitePool,
        now: DateTime<Utc>,
    ) -> Result<SettingsSnapshot, sqlx::Error> {
        if let Some(snapshot) = self.inner.read().await.as_ref() {
            if snapshot.is_fresh(now) {
                return Ok(snapshot.clone());
            }
        }

        let mut guard = self.inner.write().await;
        if let Some(snapshot) = guard.as_ref() {
            if snapshot.is_fresh(now) {
                return Ok(snapshot.clone());
            }
        }

        let snapshot = SettingsSnapshot {
            values: load(pool).await?,
            fetched_at: now,
            expires_at: now + self.ttl,
        };
        *guard = Some(snapshot.clone());
        Ok(snapshot)
    }

    pub async fn invalidate(&self) {
        *self.inner.write().await = None;
    }
}

pub async fn load(pool: &SqlitePool) -> Result<BTreeMap<String, String>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (String, String)>("SELECT key, value FROM settings ORDER BY key")
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().collect())
}

pub fn validate_updates(values: &BTreeMap<String, String>) -> AppResult<()> {
    if values.is_empty() {
        return Err(AppError::validation("No settings to update."));
    }
    for (key, value) in values {
        let key_ok = !key.is_empty()
            && key.len() <= 64
            && key.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if !key_ok {
            return Err(AppError::validation(format!("Invalid setting key '{key}'.")));
        }
        if value.len() > 500 {
            return Err(AppError::validation(format!("Setting '{key}' is too long.")));
        }
        if (key == BUSINESS_HOURS_START || key == BUSINESS_HOURS_END)
            && NaiveTime::parse_from_str(value.trim(), "%H:%M").is_err()
        {
            return Err(AppError::validation(format!("Setting '{key}' must be HH:MM.")));
        }
    }
    Ok(())
}

pub async fn save(pool: &SqlitePool, values: &BTreeMap<String, String>) -> Result<(), sqlx::Error> {
    let now = Utc::now().to_rfc3339();
    let mut tx = pool.begin().await?;
    for (key, value) in values {
        sqlx::query(
            r#"INSERT INTO settings (key, value, updated_at) VALUES (?, ?, ?)
               ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at"#,
        )
        .bind(key)
        .bind(value.trim())
        .bind(&now)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[actix_web::test]
    async fn serves_cached_snapshot_until_invalidated() {
        let pool = test_support::pool().await;
        let cache = SettingsCache::new(Duration::hours(24));

        let first = cache.snapshot(&pool).await.unwrap();
        assert_eq!(first.get("site_name"), Some("VoltCare"));
        assert_eq!(first.expires_at - first.fetched_at, Duration::hours(24));

        sqlx::query("UPDATE settings SET value = 'Renamed' WHERE key = 'site_name'")
            .execute(&pool)
            .await
            .unwrap();
        let cached = cache.snapshot(&pool).await.unwrap();
        assert_eq!(cached.get("site_name"), Some("VoltCare"));

        cache.invalidate().await;
        let fresh = cache.snapshot(&pool).await.unwrap();
        assert_eq!(fresh.get("site_name"), Some("Renamed"));
    }

    #[actix_web::test]
    async fn reloads_after_expiry() {
        let pool = test_support::pool().await;
        let cache = SettingsCache::new(Duration::seconds(10));
        let now = Utc::now();
        cache.snapshot_at(&pool, now).await.unwrap();

        sqlx::query("UPDATE settings SET value = 'USD' WHERE key = 'currency'")
            .execute(&pool)
            .await
            .unwrap();
        let later = cache
            .snapshot_at(&pool, now + Duration::seconds(11))
            .await
            .unwrap();
        assert_eq!(later.get("currency"), Some("USD"));
    }

    #[test]
    fn business_hours_need_both_ends_in_order() {
        let mut snapshot = SettingsSnapshot {
            values: BTreeMap::new(),
            fetched_at: Utc::now(),
            expires_at: Utc::now(),
        };
        assert!(snapshot.business_hours().is_none());
        snapshot.values.insert(BUSINESS_HOURS_START.into(), "09:00".into());
        snapshot.values.insert(BUSINESS_HOURS_END.into(), "18:30".into());
        let (start, end) = snapshot.business_hours().unwrap();
        assert_eq!(start, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        assert_eq!(end, NaiveTime::from_hms_opt(18, 30, 0).unwrap());

        snapshot.values.insert(BUSINESS_HOURS_END.into(), "07:00".into());
        assert!(snapshot.business_hours().is_none());
    }

    #[test]
    fn rejects_bad_keys_and_hours() {
        let mut values = BTreeMap::new();
        values.insert("Site Name".to_string(), "x".to_string());
        assert!(validate_updates(&values).is_err());

        let mut values = BTreeMap::new();
        values.insert(BUSINESS_HOURS_START.to_string(), "9am".to_string());
        assert!(validate_updates(&values).is_err());

        let mut values = BTreeMap::new();
        values.insert("support_phone".to_string(), "+91 12345".to_string());
        assert!(validate_updates(&values).is_ok());
    }
}
