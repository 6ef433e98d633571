use std::sync::Arc;

use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::broadcast;

use crate::{config::Config, models::BookingRow, settings::SettingsCache};

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub events: broadcast::Sender<ServerEvent>,
    pub push: PushConfig,
    pub config: Arc<Config>,
    pub settings: SettingsCache,
}

impl AppState {
    pub fn new(db: SqlitePool, config: Config) -> Self {
        let (events, _) = broadcast::channel(256);
        let settings = SettingsCache::new(chrono::Duration::seconds(config.settings_ttl_secs));
        Self {
            db,
            events,
            push: config.push.clone(),
            config: Arc::new(config),
            settings,
        }
    }

    /// Broadcasts a booking change to live dashboards. Nobody listening is fine.
    pub fn publish(&self, kind: &str, row: BookingRow) {
        let _ = self.events.send(ServerEvent::from_row(kind, row));
    }
}

#[derive(Clone, Debug)]
pub struct PushConfig {
    pub public_key: String,
    pub private_key: String,
    pub subject: String,
}

impl PushConfig {
    pub fn enabled(&self) -> bool {
        !(self.public_key.trim().is_empty() || self.private_key.trim().is_empty())
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEvent {
    pub kind: String,
    pub booking_id: String,
    pub status: String,
    pub payment_status: String,
    pub customer_id: String,
    pub customer_name: String,
    pub provider_id: Option<String>,
    pub provider_name: Option<String>,
    pub services: Option<String>,
    pub city: String,
    pub date: String,
    pub time: String,
    pub total_amount: f64,
}

impl ServerEvent {
    pub fn from_row(kind: &str, row: BookingRow) -> Self {
        Self {
            kind: kind.to_string(),
            booking_id: row.id,
            status: row.status,
            payment_status: row.payment_status,
            customer_id: row.customer_id,
            customer_name: row.customer_name,
            provider_id: row.provider_id,
            provider_name: row.provider_name,
            services: row.services,
            city: row.city,
            date: row.date,
            time: row.time,
            total_amount: row.total_amount,
        }
    }
}
