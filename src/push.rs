use serde::Deserialize;
use sqlx::SqlitePool;
use web_push::{
    ContentEncoding, IsahcWebPushClient, SubscriptionInfo, VapidSignatureBuilder, WebPushClient,
    WebPushError, WebPushMessageBuilder, URL_SAFE_NO_PAD,
};

use crate::{
    auth::new_id,
    error::{AppError, AppResult},
    state::{AppState, PushConfig},
};

#[derive(Debug, Deserialize)]
pub struct PushSubscriptionInput {
    pub endpoint: String,
    pub keys: PushKeys,
}

#[derive(Debug, Deserialize)]
pub struct PushKeys {
    pub p256dh: String,
    pub auth: String,
}

#[derive(Debug, sqlx::FromRow)]
struct PushSubscriptionRow {
    endpoint: String,
    p256dh: String,
    auth: String,
}

/// Saves a browser subscription for one booking; re-subscribing refreshes the keys.
pub async fn store_subscription(
    pool: &SqlitePool,
    booking_id: &str,
    subscription: PushSubscriptionInput,
) -> AppResult<()> {
    if !subscription.endpoint.starts_with("https://") {
        return Err(AppError::validation("Push endpoint must be an https URL."));
    }
    if subscription.keys.p256dh.trim().is_empty() || subscription.keys.auth.trim().is_empty() {
        return Err(AppError::validation("Push subscription keys are missing."));
    }

    sqlx::query(
        r#"INSERT INTO push_subscriptions (id, booking_id, endpoint, p256dh, auth, created_at)
           VALUES (?, ?, ?, ?, ?, ?)
           ON CONFLICT(booking_id, endpoint) DO UPDATE SET
             p256dh = excluded.p256dh,
             auth = excluded.auth"#,
    )
    .bind(new_id())
    .bind(booking_id)
    .bind(subscription.endpoint)
    .bind(subscription.keys.p256dh)
    .bind(subscription.keys.auth)
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn notify_booking(state: &AppState, booking_id: &str, title: &str, body: &str) {
    if !state.push.enabled() {
        return;
    }

    let rows = match sqlx::query_as::<_, PushSubscriptionRow>(
        "SELECT endpoint, p256dh, auth FROM push_subscriptions WHERE booking_id = ?",
    )
    .bind(booking_id)
    .fetch_all(&state.db)
    .await
    {
        Ok(rows) => rows,
        Err(err) => {
            log::warn!("Loading push subscriptions for {booking_id} failed: {err}");
            return;
        }
    };

    if rows.is_empty() {
        return;
    }

    let payload = serde_json::json!({
        "title": title,
        "body": body,
        "url": format!("/bookings/{booking_id}")
    })
    .to_string();

    for row in rows {
        let endpoint = row.endpoint.clone();
        match send_push(&state.push, row, &payload).await {
            Ok(()) => {}
            Err(WebPushError::EndpointNotValid | WebPushError::EndpointNotFound) => {
                prune_subscription(state, &endpoint).await;
            }
            Err(err) => log::warn!("Push send failed: {err}"),
        }
    }
}

/// The push service reported the endpoint gone; stop sending to it.
async fn prune_subscription(state: &AppState, endpoint: &str) {
    let result = sqlx::query("DELETE FROM push_subscriptions WHERE endpoint = ?")
        .bind(endpoint)
        .execute(&state.db)
        .await;
    match result {
        Ok(_) => log::info!("Removed expired push subscription {endpoint}"),
        Err(err) => log::warn!("Removing push subscription {endpoint} failed: {err}"),
    }
}

async fn send_push(
    config: &PushConfig,
    row: PushSubscriptionRow,
    payload: &str,
) -> Result<(), WebPushError> {
    let subscription = SubscriptionInfo::new(row.endpoint, row.p256dh, row.auth);
    let mut builder = WebPushMessageBuilder::new(&subscription);
    builder.set_payload(ContentEncoding::Aes128Gcm, payload.as_bytes());

    let mut vapid_builder =
        VapidSignatureBuilder::from_base64(&config.private_key, URL_SAFE_NO_PAD, &subscription)?;
    vapid_builder.add_claim("sub", config.subject.clone());

    builder.set_vapid_signature(vapid_builder.build()?);

    let client = IsahcWebPushClient::new()?;
    client.send(builder.build()?).await?;
    Ok(())
}
